//! Per-connector status state machines.
//!
//! One machine per physical connector plus the virtual connector 0, which
//! only knows Available / Unavailable / Faulted. Every accepted transition
//! schedules a StatusNotification after the `MinimumStatusDuration`
//! debounce; a second transition inside the window replaces the pending
//! notification, so at most one notification per window leaves per
//! connector.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rust_ocpp::v1_6::types::{AvailabilityType, ChargePointErrorCode, ChargePointStatus};
use tracing::{debug, warn};

use crate::timers::TimerHandle;

/// Inputs of the connector state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    UsageInitiated,
    StartCharging,
    PauseChargingEv,
    PauseChargingEvse,
    TransactionStoppedAndUserActionRequired,
    ReserveConnector,
    BecomeAvailable,
    ChangeAvailabilityToUnavailable,
    FaultDetected(ChargePointErrorCode),
    /// Fault cleared, connector usable again.
    ReturnToAvailable,
}

/// Receives debounced transitions; the charge point turns these into
/// StatusNotification calls.
pub type StatusListener = Arc<dyn Fn(u32, ChargePointErrorCode, ChargePointStatus) + Send + Sync>;

struct ConnectorState {
    status: ChargePointStatus,
    last_error: ChargePointErrorCode,
}

/// All connector state machines plus the notification debounce timers.
pub struct ChargePointStates {
    connectors: Vec<Mutex<ConnectorState>>,
    timers: Vec<TimerHandle>,
    debounce: Duration,
    listener: RwLock<Option<StatusListener>>,
}

impl ChargePointStates {
    /// `number_of_connectors` physical connectors; index 0 is the virtual
    /// whole-charge-point connector.
    pub fn new(number_of_connectors: u32, debounce: Duration) -> Self {
        let n = number_of_connectors as usize + 1;
        Self {
            connectors: (0..n)
                .map(|_| {
                    Mutex::new(ConnectorState {
                        status: ChargePointStatus::Available,
                        last_error: ChargePointErrorCode::NoError,
                    })
                })
                .collect(),
            timers: (0..n).map(|_| TimerHandle::new()).collect(),
            debounce,
            listener: RwLock::new(None),
        }
    }

    pub fn set_listener(&self, listener: StatusListener) {
        *self.listener.write().unwrap() = Some(listener);
    }

    pub fn number_of_connectors(&self) -> u32 {
        self.connectors.len() as u32 - 1
    }

    pub fn get_state(&self, connector: u32) -> ChargePointStatus {
        self.connectors
            .get(connector as usize)
            .map(|c| c.lock().unwrap().status.clone())
            .unwrap_or(ChargePointStatus::Unavailable)
    }

    /// Drive every machine to its initial state from persisted availability
    /// and emit the initial round of status notifications.
    pub fn run(&self, availability: &std::collections::HashMap<u32, AvailabilityType>) {
        for connector in 0..self.connectors.len() as u32 {
            let inoperative = matches!(
                availability.get(&connector),
                Some(AvailabilityType::Inoperative)
            );
            // connector 0 is always reported operative
            let event = if inoperative && connector != 0 {
                StatusEvent::ChangeAvailabilityToUnavailable
            } else {
                StatusEvent::BecomeAvailable
            };
            let status = {
                let mut state = self.connectors[connector as usize].lock().unwrap();
                state.status = match event {
                    StatusEvent::ChangeAvailabilityToUnavailable => ChargePointStatus::Unavailable,
                    _ => ChargePointStatus::Available,
                };
                state.last_error = ChargePointErrorCode::NoError;
                state.status.clone()
            };
            self.schedule_notification(connector, ChargePointErrorCode::NoError, status);
        }
    }

    /// Feed an event into one connector's machine. Invalid transitions are
    /// logged and ignored.
    pub fn submit_event(&self, connector: u32, event: StatusEvent) {
        let Some(slot) = self.connectors.get(connector as usize) else {
            warn!(connector, "Status event for unknown connector");
            return;
        };

        let transition = {
            let mut state = slot.lock().unwrap();
            let next = if connector == 0 {
                transition_connector_zero(&state.status, &event)
            } else {
                transition(&state.status, &event)
            };
            match next {
                Some(next_status) => {
                    debug!(
                        connector,
                        from = ?state.status,
                        to = ?next_status,
                        ?event,
                        "Connector state transition"
                    );
                    state.last_error = match &event {
                        StatusEvent::FaultDetected(code) => code.clone(),
                        _ => ChargePointErrorCode::NoError,
                    };
                    state.status = next_status.clone();
                    Some((state.last_error.clone(), next_status))
                }
                None => {
                    warn!(connector, status = ?state.status, ?event, "Invalid state transition");
                    None
                }
            }
        };

        if let Some((error_code, status)) = transition {
            self.schedule_notification(connector, error_code, status);
        }
    }

    /// (Re)arm the debounce timer for one connector. Replacing the pending
    /// timer is what coalesces rapid transitions.
    fn schedule_notification(
        &self,
        connector: u32,
        error_code: ChargePointErrorCode,
        status: ChargePointStatus,
    ) {
        let listener = self.listener.read().unwrap().clone();
        let Some(listener) = listener else {
            return;
        };
        self.timers[connector as usize].schedule_once(self.debounce, move || async move {
            listener(connector, error_code, status);
        });
    }

    pub fn stop(&self) {
        for timer in &self.timers {
            timer.stop();
        }
    }
}

/// Full transition table for physical connectors (OCPP 1.6 §4.9).
fn transition(current: &ChargePointStatus, event: &StatusEvent) -> Option<ChargePointStatus> {
    use ChargePointStatus::*;
    use StatusEvent::*;

    match (current, event) {
        (_, FaultDetected(_)) => Some(Faulted),

        (Available, UsageInitiated) => Some(Preparing),
        (Available, StartCharging) => Some(Charging),
        (Available, PauseChargingEv) => Some(SuspendedEV),
        (Available, PauseChargingEvse) => Some(SuspendedEVSE),
        (Available, ReserveConnector) => Some(Reserved),
        (Available, ChangeAvailabilityToUnavailable) => Some(Unavailable),

        (Preparing, StartCharging) => Some(Charging),
        (Preparing, PauseChargingEv) => Some(SuspendedEV),
        (Preparing, PauseChargingEvse) => Some(SuspendedEVSE),
        (Preparing, TransactionStoppedAndUserActionRequired) => Some(Finishing),
        (Preparing, BecomeAvailable) => Some(Available),

        (Charging, PauseChargingEv) => Some(SuspendedEV),
        (Charging, PauseChargingEvse) => Some(SuspendedEVSE),
        (Charging, TransactionStoppedAndUserActionRequired) => Some(Finishing),
        (Charging, BecomeAvailable) => Some(Available),
        (Charging, ChangeAvailabilityToUnavailable) => Some(Unavailable),

        (SuspendedEV, StartCharging) => Some(Charging),
        (SuspendedEV, PauseChargingEvse) => Some(SuspendedEVSE),
        (SuspendedEV, TransactionStoppedAndUserActionRequired) => Some(Finishing),
        (SuspendedEV, BecomeAvailable) => Some(Available),
        (SuspendedEV, ChangeAvailabilityToUnavailable) => Some(Unavailable),

        (SuspendedEVSE, StartCharging) => Some(Charging),
        (SuspendedEVSE, PauseChargingEv) => Some(SuspendedEV),
        (SuspendedEVSE, TransactionStoppedAndUserActionRequired) => Some(Finishing),
        (SuspendedEVSE, BecomeAvailable) => Some(Available),
        (SuspendedEVSE, ChangeAvailabilityToUnavailable) => Some(Unavailable),

        (Finishing, UsageInitiated) => Some(Preparing),
        (Finishing, BecomeAvailable) => Some(Available),
        (Finishing, ChangeAvailabilityToUnavailable) => Some(Unavailable),

        (Reserved, UsageInitiated) => Some(Preparing),
        (Reserved, BecomeAvailable) => Some(Available),
        (Reserved, ChangeAvailabilityToUnavailable) => Some(Unavailable),

        (Unavailable, BecomeAvailable) => Some(Available),

        (Faulted, ReturnToAvailable) => Some(Available),
        (Faulted, ChangeAvailabilityToUnavailable) => Some(Unavailable),
        (Faulted, BecomeAvailable) => Some(Available),

        _ => None,
    }
}

/// Connector 0 uses the reduced alphabet {Available, Unavailable, Faulted}.
fn transition_connector_zero(
    current: &ChargePointStatus,
    event: &StatusEvent,
) -> Option<ChargePointStatus> {
    use ChargePointStatus::*;
    use StatusEvent::*;

    match (current, event) {
        (_, FaultDetected(_)) => Some(Faulted),
        (Available, ChangeAvailabilityToUnavailable) => Some(Unavailable),
        (Unavailable, BecomeAvailable) => Some(Available),
        (Faulted, ReturnToAvailable) => Some(Available),
        (Faulted, BecomeAvailable) => Some(Available),
        (Faulted, ChangeAvailabilityToUnavailable) => Some(Unavailable),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Seen = Arc<Mutex<Vec<(u32, ChargePointErrorCode, ChargePointStatus)>>>;

    fn states_with_listener(n: u32, debounce_s: u64) -> (Arc<ChargePointStates>, Seen) {
        let states = Arc::new(ChargePointStates::new(n, Duration::from_secs(debounce_s)));
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        states.set_listener(Arc::new(move |connector, code, status| {
            sink.lock().unwrap().push((connector, code, status));
        }));
        (states, seen)
    }

    #[test]
    fn charging_session_walk() {
        let states = ChargePointStates::new(1, Duration::ZERO);
        assert_eq!(states.get_state(1), ChargePointStatus::Available);

        states.submit_event(1, StatusEvent::UsageInitiated);
        assert_eq!(states.get_state(1), ChargePointStatus::Preparing);

        states.submit_event(1, StatusEvent::StartCharging);
        assert_eq!(states.get_state(1), ChargePointStatus::Charging);

        states.submit_event(1, StatusEvent::PauseChargingEv);
        assert_eq!(states.get_state(1), ChargePointStatus::SuspendedEV);

        states.submit_event(1, StatusEvent::StartCharging);
        assert_eq!(states.get_state(1), ChargePointStatus::Charging);

        states.submit_event(1, StatusEvent::TransactionStoppedAndUserActionRequired);
        assert_eq!(states.get_state(1), ChargePointStatus::Finishing);

        states.submit_event(1, StatusEvent::BecomeAvailable);
        assert_eq!(states.get_state(1), ChargePointStatus::Available);
    }

    #[test]
    fn fault_from_any_state_and_recovery() {
        let states = ChargePointStates::new(1, Duration::ZERO);
        states.submit_event(1, StatusEvent::UsageInitiated);
        states.submit_event(
            1,
            StatusEvent::FaultDetected(ChargePointErrorCode::PowerMeterFailure),
        );
        assert_eq!(states.get_state(1), ChargePointStatus::Faulted);

        states.submit_event(1, StatusEvent::ReturnToAvailable);
        assert_eq!(states.get_state(1), ChargePointStatus::Available);
    }

    #[test]
    fn invalid_transition_is_ignored() {
        let states = ChargePointStates::new(1, Duration::ZERO);
        states.submit_event(1, StatusEvent::StartCharging);
        states.submit_event(1, StatusEvent::ReturnToAvailable);
        assert_eq!(states.get_state(1), ChargePointStatus::Charging);
    }

    #[test]
    fn connector_zero_reduced_alphabet() {
        let states = ChargePointStates::new(2, Duration::ZERO);
        states.submit_event(0, StatusEvent::UsageInitiated);
        assert_eq!(states.get_state(0), ChargePointStatus::Available);

        states.submit_event(0, StatusEvent::ChangeAvailabilityToUnavailable);
        assert_eq!(states.get_state(0), ChargePointStatus::Unavailable);

        states.submit_event(0, StatusEvent::BecomeAvailable);
        assert_eq!(states.get_state(0), ChargePointStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_rapid_transitions() {
        let (states, seen) = states_with_listener(1, 5);

        states.submit_event(1, StatusEvent::UsageInitiated);
        tokio::time::sleep(Duration::from_secs(1)).await;
        // second transition within the window replaces the pending one
        states.submit_event(1, StatusEvent::StartCharging);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].2, ChargePointStatus::Charging);
    }

    #[tokio::test(start_paused = true)]
    async fn separated_transitions_both_notify() {
        let (states, seen) = states_with_listener(1, 2);

        states.submit_event(1, StatusEvent::UsageInitiated);
        tokio::time::sleep(Duration::from_secs(3)).await;
        states.submit_event(1, StatusEvent::StartCharging);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].2, ChargePointStatus::Preparing);
        assert_eq!(events[1].2, ChargePointStatus::Charging);
    }

    #[tokio::test(start_paused = true)]
    async fn run_emits_initial_statuses() {
        let (states, seen) = states_with_listener(2, 0);
        let mut availability = HashMap::new();
        availability.insert(2u32, AvailabilityType::Inoperative);
        states.run(&availability);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .any(|(c, _, s)| *c == 2 && *s == ChargePointStatus::Unavailable));
        assert!(events
            .iter()
            .any(|(c, _, s)| *c == 0 && *s == ChargePointStatus::Available));
    }

    #[tokio::test(start_paused = true)]
    async fn faulted_carries_error_code() {
        let states = Arc::new(ChargePointStates::new(1, Duration::ZERO));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        states.set_listener(Arc::new(move |_, code, status| {
            assert_eq!(status, ChargePointStatus::Faulted);
            assert_eq!(code, ChargePointErrorCode::GroundFailure);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        states.submit_event(
            1,
            StatusEvent::FaultDetected(ChargePointErrorCode::GroundFailure),
        );
        assert_eq!(states.get_state(1), ChargePointStatus::Faulted);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
