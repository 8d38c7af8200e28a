//! Transaction manager.
//!
//! Tracks the active charging session per connector and keeps stopped
//! sessions addressable until their StopTransactionResponse arrives, which
//! is what lets a queued StopTransaction be patched with the server-assigned
//! transactionId after a reconnect.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::MeterValue;
use tracing::warn;

use crate::errors::ChargePointError;
use crate::timers::TimerHandle;

/// A meter reading frozen at a point in time.
#[derive(Debug, Clone)]
pub struct StampedEnergyWh {
    pub timestamp: DateTime<Utc>,
    pub energy_wh: f64,
}

/// Periodic sampling hook armed per transaction.
pub type SampleFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One charging session on one connector.
pub struct Transaction {
    connector: u32,
    session_id: String,
    id_tag: String,
    start_energy_wh: StampedEnergyWh,
    reservation_id: Option<i32>,

    /// -1 until the StartTransactionResponse assigns the real id.
    transaction_id: Mutex<i32>,
    start_transaction_message_id: Mutex<Option<String>>,
    stop_transaction_message_id: Mutex<Option<String>>,
    stop_energy_wh: Mutex<Option<StampedEnergyWh>>,
    finished: AtomicBool,
    meter_values: Mutex<Vec<MeterValue>>,

    sampling_timer: TimerHandle,
    sample_fn: Mutex<Option<SampleFn>>,
}

impl Transaction {
    pub fn new(
        connector: u32,
        session_id: impl Into<String>,
        id_tag: impl Into<String>,
        start_energy_wh: StampedEnergyWh,
        reservation_id: Option<i32>,
    ) -> Self {
        Self {
            connector,
            session_id: session_id.into(),
            id_tag: id_tag.into(),
            start_energy_wh,
            reservation_id,
            transaction_id: Mutex::new(-1),
            start_transaction_message_id: Mutex::new(None),
            stop_transaction_message_id: Mutex::new(None),
            stop_energy_wh: Mutex::new(None),
            finished: AtomicBool::new(false),
            meter_values: Mutex::new(Vec::new()),
            sampling_timer: TimerHandle::new(),
            sample_fn: Mutex::new(None),
        }
    }

    pub fn connector(&self) -> u32 {
        self.connector
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn id_tag(&self) -> &str {
        &self.id_tag
    }

    pub fn start_energy_wh(&self) -> &StampedEnergyWh {
        &self.start_energy_wh
    }

    pub fn reservation_id(&self) -> Option<i32> {
        self.reservation_id
    }

    pub fn transaction_id(&self) -> i32 {
        *self.transaction_id.lock().unwrap()
    }

    /// Assign the server id. The id is set exactly once; later calls are
    /// ignored with a warning.
    pub fn set_transaction_id(&self, transaction_id: i32) {
        let mut current = self.transaction_id.lock().unwrap();
        if *current != -1 {
            warn!(
                session_id = self.session_id.as_str(),
                current = *current,
                rejected = transaction_id,
                "Transaction id already assigned"
            );
            return;
        }
        *current = transaction_id;
    }

    pub fn start_transaction_message_id(&self) -> Option<String> {
        self.start_transaction_message_id.lock().unwrap().clone()
    }

    pub fn set_start_transaction_message_id(&self, message_id: impl Into<String>) {
        *self.start_transaction_message_id.lock().unwrap() = Some(message_id.into());
    }

    pub fn stop_transaction_message_id(&self) -> Option<String> {
        self.stop_transaction_message_id.lock().unwrap().clone()
    }

    pub fn set_stop_transaction_message_id(&self, message_id: impl Into<String>) {
        *self.stop_transaction_message_id.lock().unwrap() = Some(message_id.into());
    }

    pub fn stop_energy_wh(&self) -> Option<StampedEnergyWh> {
        self.stop_energy_wh.lock().unwrap().clone()
    }

    pub fn add_stop_energy_wh(&self, stamped: StampedEnergyWh) {
        *self.stop_energy_wh.lock().unwrap() = Some(stamped);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn set_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.sampling_timer.stop();
    }

    pub fn add_meter_value(&self, meter_value: MeterValue) {
        self.meter_values.lock().unwrap().push(meter_value);
    }

    /// Sampled values for the StopTransaction transactionData field.
    pub fn transaction_data(&self) -> Vec<MeterValue> {
        self.meter_values
            .lock()
            .unwrap()
            .iter()
            .map(|mv| MeterValue {
                timestamp: mv.timestamp,
                sampled_value: mv.sampled_value.clone(),
            })
            .collect()
    }

    /// Arm the periodic sampling timer; the hook is retained so the cadence
    /// can be changed later.
    pub fn arm_sampling(&self, interval: Duration, sample: SampleFn) {
        *self.sample_fn.lock().unwrap() = Some(sample.clone());
        self.schedule_sampling(interval, sample);
    }

    /// Change the sampling cadence; takes effect on the next tick.
    pub fn reschedule_sampling(&self, interval: Duration) {
        let Some(sample) = self.sample_fn.lock().unwrap().clone() else {
            return;
        };
        self.schedule_sampling(interval, sample);
    }

    fn schedule_sampling(&self, interval: Duration, sample: SampleFn) {
        if interval.is_zero() {
            self.sampling_timer.stop();
            return;
        }
        self.sampling_timer
            .schedule_interval(interval, move || sample());
    }
}

/// Active and recently stopped transactions across all connectors.
#[derive(Default)]
pub struct TransactionHandler {
    active: Mutex<HashMap<u32, Arc<Transaction>>>,
    /// Stopped but not yet confirmed by a StopTransactionResponse.
    stopped: Mutex<Vec<Arc<Transaction>>>,
}

impl TransactionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active transaction. At most one per connector.
    pub fn add_transaction(&self, transaction: Arc<Transaction>) -> Result<(), ChargePointError> {
        let mut active = self.active.lock().unwrap();
        let connector = transaction.connector();
        if active.contains_key(&connector) {
            return Err(ChargePointError::TransactionInProgress(connector));
        }
        active.insert(connector, transaction);
        Ok(())
    }

    pub fn get_transaction(&self, connector: u32) -> Option<Arc<Transaction>> {
        self.active.lock().unwrap().get(&connector).cloned()
    }

    /// Look a transaction up by its StartTransaction message id, searching
    /// active and stopped-awaiting-confirmation sessions.
    pub fn get_transaction_by_start_message_id(&self, message_id: &str) -> Option<Arc<Transaction>> {
        let from_active = self
            .active
            .lock()
            .unwrap()
            .values()
            .find(|t| t.start_transaction_message_id().as_deref() == Some(message_id))
            .cloned();
        from_active.or_else(|| {
            self.stopped
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.start_transaction_message_id().as_deref() == Some(message_id))
                .cloned()
        })
    }

    /// Find the connector that runs the given server-assigned transaction.
    pub fn get_connector_from_transaction_id(&self, transaction_id: i32) -> Option<u32> {
        self.active
            .lock()
            .unwrap()
            .values()
            .find(|t| t.transaction_id() == transaction_id)
            .map(|t| t.connector())
    }

    pub fn transaction_active(&self, connector: u32) -> bool {
        self.active
            .lock()
            .unwrap()
            .get(&connector)
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    pub fn any_transaction_active(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .values()
            .any(|t| !t.is_finished())
    }

    /// A stop was sent but its StopTransactionResponse is still outstanding.
    pub fn any_stop_unconfirmed(&self) -> bool {
        !self.stopped.lock().unwrap().is_empty()
    }

    pub fn active_transactions(&self) -> Vec<Arc<Transaction>> {
        self.active.lock().unwrap().values().cloned().collect()
    }

    /// Move the connector's transaction into the stopped set where it stays
    /// addressable by message id until the StopTransactionResponse.
    pub fn add_stopped_transaction(&self, connector: u32) {
        if let Some(transaction) = self.active.lock().unwrap().get(&connector).cloned() {
            self.stopped.lock().unwrap().push(transaction);
        }
    }

    pub fn remove_active_transaction(&self, connector: u32) {
        self.active.lock().unwrap().remove(&connector);
    }

    /// Drop the stopped record once its StopTransactionResponse arrived and
    /// report which connector it ran on.
    pub fn erase_stopped_transaction(&self, stop_message_id: &str) -> Option<Arc<Transaction>> {
        let mut stopped = self.stopped.lock().unwrap();
        let index = stopped
            .iter()
            .position(|t| t.stop_transaction_message_id().as_deref() == Some(stop_message_id))?;
        Some(stopped.remove(index))
    }

    /// The idTag that started the stopped transaction, for cache refresh on
    /// StopTransactionResponse.
    pub fn get_authorized_id_tag(&self, stop_message_id: &str) -> Option<String> {
        self.stopped
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.stop_transaction_message_id().as_deref() == Some(stop_message_id))
            .map(|t| t.id_tag().to_string())
    }

    /// Reconfigure the sampling timer of every active transaction; the new
    /// cadence applies from the next tick.
    pub fn change_meter_values_sample_intervals(&self, interval: Duration) {
        for transaction in self.active.lock().unwrap().values() {
            transaction.reschedule_sampling(interval);
        }
    }

    pub fn stop_all_sampling(&self) {
        for transaction in self.active.lock().unwrap().values() {
            transaction.sampling_timer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn transaction(connector: u32, session: &str) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            connector,
            session,
            "TAG01",
            StampedEnergyWh {
                timestamp: Utc::now(),
                energy_wh: 100.0,
            },
            None,
        ))
    }

    #[test]
    fn one_active_transaction_per_connector() {
        let handler = TransactionHandler::new();
        handler.add_transaction(transaction(1, "s1")).unwrap();
        assert!(matches!(
            handler.add_transaction(transaction(1, "s2")),
            Err(ChargePointError::TransactionInProgress(1))
        ));
        handler.add_transaction(transaction(2, "s3")).unwrap();
        assert!(handler.transaction_active(1));
        assert!(handler.transaction_active(2));
    }

    #[test]
    fn transaction_id_is_assigned_once() {
        let t = transaction(1, "s1");
        assert_eq!(t.transaction_id(), -1);
        t.set_transaction_id(42);
        assert_eq!(t.transaction_id(), 42);
        t.set_transaction_id(43);
        assert_eq!(t.transaction_id(), 42);
    }

    #[test]
    fn stopped_transaction_stays_addressable_until_confirmed() {
        let handler = TransactionHandler::new();
        let t = transaction(1, "s1");
        t.set_start_transaction_message_id("m-start");
        handler.add_transaction(t.clone()).unwrap();

        t.set_finished();
        t.set_stop_transaction_message_id("m-stop");
        handler.add_stopped_transaction(1);
        handler.remove_active_transaction(1);

        assert!(!handler.transaction_active(1));
        assert!(handler
            .get_transaction_by_start_message_id("m-start")
            .is_some());
        assert_eq!(
            handler.get_authorized_id_tag("m-stop").as_deref(),
            Some("TAG01")
        );

        let erased = handler.erase_stopped_transaction("m-stop").unwrap();
        assert_eq!(erased.connector(), 1);
        assert!(handler
            .get_transaction_by_start_message_id("m-start")
            .is_none());
    }

    #[test]
    fn connector_lookup_by_transaction_id() {
        let handler = TransactionHandler::new();
        let t = transaction(2, "s1");
        handler.add_transaction(t.clone()).unwrap();
        t.set_transaction_id(7);
        assert_eq!(handler.get_connector_from_transaction_id(7), Some(2));
        assert_eq!(handler.get_connector_from_transaction_id(8), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_interval_change_applies_next_tick() {
        let handler = TransactionHandler::new();
        let t = transaction(1, "s1");
        handler.add_transaction(t.clone()).unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        t.arm_sampling(
            Duration::from_secs(60),
            Arc::new(move || {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        handler.change_meter_values_sample_intervals(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
    }
}
