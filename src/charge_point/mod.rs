//! The charge-point aggregate.
//!
//! Owns the message queue, connector state machines, transaction manager,
//! smart-charging registry and timers, and exposes the `on_*` API the EVSE
//! hardware adapter drives. The inbound path lives in [`dispatcher`] and the
//! per-message handlers under [`handlers`].

pub(crate) mod dispatcher;
pub(crate) mod handlers;
mod responses;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::diagnostics_status_notification::DiagnosticsStatusNotificationRequest;
use rust_ocpp::v1_6::messages::firmware_status_notification::FirmwareStatusNotificationRequest;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatRequest;
use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::messages::start_transaction::StartTransactionRequest;
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionRequest;
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, AvailabilityType, ChargePointErrorCode, ChargePointStatus,
    ChargingRateUnitType, ChargingSchedule, DataTransferStatus, DiagnosticsStatus, FirmwareStatus,
    IdTagInfo, Location, Measurand, MeterValue, ReadingContext, Reason, RegistrationStatus,
    SampledValue, UnitOfMeasure, ValueFormat,
};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::callbacks::ChargePointCallbacks;
use crate::config::{ChargePointSettings, OcppConfig};
use crate::errors::{ChargePointError, Result};
use crate::message::queue::{MessageQueue, TransmitFn};
use crate::message::{EnhancedMessage, MessageType, MessageTypeId};
use crate::security::{
    FirmwareStatusEnumType, SecurityEvent, SecurityEventNotificationRequest,
    SignCertificateRequest, SignedFirmwareStatusNotificationRequest, LogStatusNotificationRequest,
    UploadLogStatusEnumType,
};
use crate::smart_charging::{ProfileLimits, SmartChargingHandler};
use crate::status::{ChargePointStates, StatusEvent};
use crate::store::{DataStore, TransactionRecord};
use crate::support::ocpp_frame::OcppFrame;
use crate::timers::{next_clock_aligned_delay, TimerHandle};
use crate::transaction::{StampedEnergyWh, Transaction, TransactionHandler};
use crate::transport::{
    SharedTransport, TransportEvent, WebsocketOptions, CLOSE_GOING_AWAY, CLOSE_NORMAL,
    CLOSE_SERVICE_RESTART,
};

/// Connection lifecycle towards the central system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Pending,
    Rejected,
    Booted,
}

/// Why a session on a connector began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStartedReason {
    EvConnected,
    Authorized,
}

/// Latest power-meter snapshot pushed by the hardware adapter.
#[derive(Debug, Clone, Default)]
pub struct PowerMeter {
    pub timestamp: Option<DateTime<Utc>>,
    pub energy_wh_import: f64,
    pub energy_wh_export: Option<f64>,
    pub power_w: Option<f64>,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub soc_percent: Option<f64>,
}

/// One physical connector (or the virtual connector 0).
pub struct Connector {
    pub id: u32,
    powermeter: Mutex<PowerMeter>,
    max_current_offered: Mutex<f64>,
}

impl Connector {
    fn new(id: u32) -> Self {
        Self {
            id,
            powermeter: Mutex::new(PowerMeter::default()),
            max_current_offered: Mutex::new(0.0),
        }
    }
}

/// Armed security-profile switch, executed on the next disconnect.
#[derive(Debug, Clone, Copy)]
enum ProfileSwitch {
    /// Try the new profile once, remember what to fall back to.
    Switch { new: u8, fallback: u8 },
    /// The one-shot attempt failed, return to the previous profile.
    Fallback { profile: u8 },
}

/// The OCPP 1.6 charge-point protocol runtime.
pub struct ChargePoint {
    pub(crate) config: Arc<OcppConfig>,
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) callbacks: ChargePointCallbacks,
    pub(crate) transport: SharedTransport,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,

    pub(crate) queue: Arc<MessageQueue>,
    pub(crate) transaction_handler: Arc<TransactionHandler>,
    pub(crate) status: Arc<ChargePointStates>,
    pub(crate) smart_charging: Arc<SmartChargingHandler>,
    connectors: HashMap<u32, Arc<Connector>>,
    supported_receiving: std::collections::HashSet<MessageType>,

    pub(crate) connection_state: Mutex<ConnectionState>,
    pub(crate) registration_status: Mutex<RegistrationStatus>,
    initialized: AtomicBool,
    stopped: AtomicBool,
    boot_time: Mutex<Option<Instant>>,

    heartbeat_timer: TimerHandle,
    boot_notification_timer: TimerHandle,
    clock_aligned_timer: TimerHandle,

    pending_profile_switch: Mutex<Option<ProfileSwitch>>,
    pub(crate) change_availability_queue: Mutex<HashMap<u32, AvailabilityType>>,
    data_transfer_callbacks: DashMap<(String, String), Arc<dyn Fn(&str) + Send + Sync>>,
    /// Signalled when a transaction stops or its stop is confirmed; the
    /// reset coordinator waits on this.
    pub(crate) transactions_changed: Notify,

    pub(crate) diagnostics_status: Mutex<DiagnosticsStatus>,
    pub(crate) firmware_status: Mutex<FirmwareStatus>,
    pub(crate) log_status: Mutex<(UploadLogStatusEnumType, i32)>,
    pub(crate) signed_firmware_status: Mutex<(FirmwareStatusEnumType, i32)>,

    event_loop: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ChargePoint {
    pub fn new(
        settings: ChargePointSettings,
        store: Arc<dyn DataStore>,
        callbacks: ChargePointCallbacks,
        transport: SharedTransport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Arc<Self> {
        let config = Arc::new(OcppConfig::new(settings));
        let number_of_connectors = config.number_of_connectors();

        let transmit: TransmitFn = {
            let transport = transport.clone();
            Arc::new(move |text: String| {
                let transport = transport.clone();
                Box::pin(async move { transport.send(text).await.is_ok() })
            })
        };
        let queue = MessageQueue::new(
            transmit,
            store.clone(),
            config.transaction_message_attempts(),
            config.transaction_message_retry_interval(),
        );

        let status = Arc::new(ChargePointStates::new(
            number_of_connectors,
            config.minimum_status_duration(),
        ));
        let smart_charging = Arc::new(SmartChargingHandler::new(
            store.clone(),
            number_of_connectors,
        ));

        let connectors = (0..=number_of_connectors)
            .map(|id| (id, Arc::new(Connector::new(id))))
            .collect();

        Arc::new(Self {
            config,
            store,
            callbacks,
            transport,
            events: Mutex::new(Some(events)),
            queue,
            transaction_handler: Arc::new(TransactionHandler::new()),
            status,
            smart_charging,
            connectors,
            supported_receiving: MessageType::default_supported_receiving(),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            registration_status: Mutex::new(RegistrationStatus::Pending),
            initialized: AtomicBool::new(false),
            stopped: AtomicBool::new(true),
            boot_time: Mutex::new(None),
            heartbeat_timer: TimerHandle::new(),
            boot_notification_timer: TimerHandle::new(),
            clock_aligned_timer: TimerHandle::new(),
            pending_profile_switch: Mutex::new(None),
            change_availability_queue: Mutex::new(HashMap::new()),
            data_transfer_callbacks: DashMap::new(),
            transactions_changed: Notify::new(),
            diagnostics_status: Mutex::new(DiagnosticsStatus::Idle),
            firmware_status: Mutex::new(FirmwareStatus::Idle),
            log_status: Mutex::new((UploadLogStatusEnumType::Idle, -1)),
            signed_firmware_status: Mutex::new((FirmwareStatusEnumType::Idle, -1)),
            event_loop: Mutex::new(None),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────

    /// Connect, announce ourselves and resume any unfinished business from
    /// the previous run.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.stopped.swap(false, Ordering::SeqCst) {
            return Err(ChargePointError::AlreadyRunning);
        }
        info!(
            charge_point_id = self.config.charge_point_id().as_str(),
            "Starting OCPP charge point"
        );

        // debounced FSM transitions turn into StatusNotification calls
        let weak = Arc::downgrade(self);
        self.status.set_listener(Arc::new(move |connector, code, state| {
            if let Some(cp) = weak.upgrade() {
                tokio::spawn(async move {
                    cp.status_notification(connector, code, state).await;
                });
            }
        }));

        if let Some(events) = self.events.lock().unwrap().take() {
            let cp = Arc::clone(self);
            *self.event_loop.lock().unwrap() =
                Some(tokio::spawn(async move { cp.run_event_loop(events).await }));
        }

        self.queue.restore().await;
        self.queue.start();

        let profile = self.config.security_profile();
        self.transport
            .connect(self.websocket_options(profile), false)
            .await;

        self.boot_notification().await;
        self.stop_pending_transactions().await;
        self.load_charging_profiles().await;
        Ok(())
    }

    /// Stop timers, close transactions, drain the queue and close the
    /// transport with `going away`.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(ChargePointError::NotRunning);
        }
        info!("Stopping OCPP charge point");
        self.initialized.store(false, Ordering::SeqCst);

        self.boot_notification_timer.stop();
        self.heartbeat_timer.stop();
        self.clock_aligned_timer.stop();
        self.status.stop();
        self.transaction_handler.stop_all_sampling();

        self.stop_all_transactions(Reason::Other).await;

        self.store.close().await?;
        self.transport.disconnect(CLOSE_GOING_AWAY).await;
        self.queue.stop().await;
        Ok(())
    }

    /// Restart after [`ChargePoint::stop`]; re-hydrates the queue and runs
    /// the boot sequence again.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        if !self.stopped.load(Ordering::SeqCst) {
            return Err(ChargePointError::AlreadyRunning);
        }
        info!("Restarting OCPP charge point");
        *self.connection_state.lock().unwrap() = ConnectionState::Disconnected;
        self.start().await
    }

    fn websocket_options(&self, security_profile: u8) -> WebsocketOptions {
        WebsocketOptions {
            central_system_uri: self.config.central_system_uri(),
            charge_point_id: self.config.charge_point_id(),
            security_profile,
            authorization_key: self.config.authorization_key(),
            reconnect_interval: self.config.websocket_reconnect_interval(),
            supported_ciphers_12: self.config.supported_ciphers_12(),
            supported_ciphers_13: self.config.supported_ciphers_13(),
        }
    }

    // ── Transport events ───────────────────────────────────

    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected { security_profile } => {
                    self.on_connected(security_profile).await
                }
                TransportEvent::Disconnected => self.on_disconnected().await,
                TransportEvent::Message(raw) => self.on_message(&raw).await,
            }
        }
    }

    async fn on_connected(&self, security_profile: u8) {
        // a successful connect settles any profile switch
        *self.pending_profile_switch.lock().unwrap() = None;
        self.config.set_security_profile(security_profile);
        self.callbacks.connection_state_changed(true);
        self.queue.resume();

        let state = *self.connection_state.lock().unwrap();
        match state {
            ConnectionState::Disconnected => {
                *self.connection_state.lock().unwrap() = ConnectionState::Connected;
            }
            ConnectionState::Booted => {
                // reconnect while registered: no BootNotification, but a
                // fresh StatusNotification for every connector
                for connector in 0..=self.status.number_of_connectors() {
                    self.status_notification(
                        connector,
                        ChargePointErrorCode::NoError,
                        self.status.get_state(connector),
                    )
                    .await;
                }
            }
            other => {
                debug!(state = ?other, "Connected while registration still in progress");
            }
        }
    }

    async fn on_disconnected(&self) {
        self.callbacks.connection_state_changed(false);
        self.queue.pause();

        let switch = self.pending_profile_switch.lock().unwrap().take();
        match switch {
            Some(ProfileSwitch::Switch { new, fallback }) => {
                info!(from = fallback, to = new, "Switching security profile");
                *self.pending_profile_switch.lock().unwrap() =
                    Some(ProfileSwitch::Fallback { profile: fallback });
                self.transport
                    .connect(self.websocket_options(new), true)
                    .await;
            }
            Some(ProfileSwitch::Fallback { profile }) => {
                warn!(profile, "Security profile switch failed, falling back");
                self.config.set_security_profile(profile);
                self.transport
                    .connect(self.websocket_options(profile), false)
                    .await;
            }
            None => {}
        }
    }

    /// Arm a security-profile switch and kick the reconnect that runs it.
    pub(crate) async fn schedule_profile_switch(&self, new_profile: u8, fallback: u8) {
        *self.pending_profile_switch.lock().unwrap() = Some(ProfileSwitch::Switch {
            new: new_profile,
            fallback,
        });
        self.transport.disconnect(CLOSE_SERVICE_RESTART).await;
    }

    /// Reconnect with the current profile (AuthorizationKey changes on
    /// profiles 1 and 2).
    pub(crate) async fn reconnect(&self) {
        self.transport.disconnect(CLOSE_NORMAL).await;
        let profile = self.config.security_profile();
        self.transport
            .connect(self.websocket_options(profile), false)
            .await;
    }

    // ── Outbound send paths ────────────────────────────────

    /// Registration gate: before a BootNotificationResponse only
    /// BootNotification and StopTransaction leave; in Rejected state only
    /// a BootNotification after the retry window may go out.
    fn allowed_to_send_message(&self, message_type: MessageType) -> bool {
        if !self.initialized.load(Ordering::SeqCst) {
            return matches!(
                message_type,
                MessageType::BootNotification | MessageType::StopTransaction
            );
        }

        match *self.registration_status.lock().unwrap() {
            RegistrationStatus::Rejected => {
                let retry_at = self
                    .boot_time
                    .lock()
                    .unwrap()
                    .map(|t| t + self.config.heartbeat_interval());
                match retry_at {
                    Some(at) if Instant::now() < at => false,
                    // after the retry window only a new BootNotification
                    _ => message_type == MessageType::BootNotification,
                }
            }
            RegistrationStatus::Pending => matches!(
                message_type,
                MessageType::BootNotification | MessageType::StopTransaction
            ),
            RegistrationStatus::Accepted => true,
        }
    }

    pub(crate) async fn send_call<T: Serialize>(&self, message_type: MessageType, request: &T) -> bool {
        let message_id = self.queue.create_message_id();
        self.send_call_with_id(message_type, message_id, request)
            .await
    }

    pub(crate) async fn send_call_with_id<T: Serialize>(
        &self,
        message_type: MessageType,
        message_id: String,
        request: &T,
    ) -> bool {
        if !self.allowed_to_send_message(message_type) {
            debug!(?message_type, "Message dropped by registration gating");
            return false;
        }
        let payload = match serde_json::to_value(request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, ?message_type, "Failed to serialize request");
                return false;
            }
        };
        self.queue.push(message_type, message_id, payload).await;
        true
    }

    /// Request/response pair; the future resolves offline when the link is
    /// down. Not subject to registration gating, matching the async send
    /// path of the queue.
    pub(crate) async fn send_call_async<T: Serialize>(
        &self,
        message_type: MessageType,
        request: &T,
    ) -> EnhancedMessage {
        let message_id = self.queue.create_message_id();
        let payload = match serde_json::to_value(request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, ?message_type, "Failed to serialize request");
                return EnhancedMessage::offline(message_id, message_type);
            }
        };
        self.queue.push_async(message_type, message_id, payload).await
    }

    /// CALLRESULT goes straight to the socket, bypassing the queue.
    pub(crate) async fn respond<T: Serialize>(&self, unique_id: &str, response: &T) {
        let payload = match serde_json::to_value(response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, unique_id, "Failed to serialize response");
                return;
            }
        };
        let text = OcppFrame::call_result(unique_id, payload).serialize();
        if let Err(e) = self.transport.send(text).await {
            warn!(error = %e, unique_id, "Failed to send CALLRESULT");
        }
    }

    pub(crate) async fn send_call_error(&self, unique_id: &str, code: &str, description: &str) {
        let text = OcppFrame::call_error(unique_id, code, description).serialize();
        if let Err(e) = self.transport.send(text).await {
            warn!(error = %e, unique_id, "Failed to send CALLERROR");
        }
    }

    // ── Registration ───────────────────────────────────────

    pub(crate) async fn boot_notification(&self) {
        debug!("Sending BootNotification");
        let identity = self.config.identity();
        let request = BootNotificationRequest {
            charge_box_serial_number: identity.charge_box_serial_number,
            charge_point_model: identity.charge_point_model,
            charge_point_serial_number: identity.charge_point_serial_number,
            charge_point_vendor: identity.charge_point_vendor,
            firmware_version: identity.firmware_version,
            iccid: identity.iccid,
            imsi: identity.imsi,
            meter_serial_number: identity.meter_serial_number,
            meter_type: identity.meter_type,
        };
        self.send_call(MessageType::BootNotification, &request).await;
    }

    pub(crate) async fn heartbeat(&self) {
        debug!("Sending heartbeat");
        self.send_call(MessageType::Heartbeat, &HeartbeatRequest {})
            .await;
    }

    pub(crate) fn update_heartbeat_interval(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.heartbeat_timer
            .schedule_interval(self.config.heartbeat_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(cp) = weak.upgrade() {
                        cp.heartbeat().await;
                    }
                }
            });
    }

    pub(crate) fn update_meter_values_sample_interval(&self) {
        self.transaction_handler
            .change_meter_values_sample_intervals(self.config.meter_value_sample_interval());
    }

    pub(crate) fn update_clock_aligned_meter_values_interval(self: &Arc<Self>) {
        let interval = self.config.clock_aligned_data_interval_s();
        if interval == 0 {
            self.clock_aligned_timer.stop();
            return;
        }
        let config = self.config.clone();
        let weak = Arc::downgrade(self);
        self.clock_aligned_timer.schedule_repeating_with(
            move || next_clock_aligned_delay(Utc::now(), config.clock_aligned_data_interval_s()),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(cp) = weak.upgrade() {
                        cp.clock_aligned_meter_values_sample().await;
                    }
                }
            },
        );
    }

    pub(crate) fn schedule_boot_retry(self: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(self);
        self.boot_notification_timer.schedule_once(delay, move || async move {
            if let Some(cp) = weak.upgrade() {
                cp.boot_notification().await;
            }
        });
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        *self.boot_time.lock().unwrap() = Some(Instant::now());
    }

    // ── Metering ───────────────────────────────────────────

    /// Snapshot-to-wire conversion: one SampledValue per configured
    /// measurand the snapshot can satisfy.
    pub(crate) fn get_latest_meter_value(
        &self,
        connector: u32,
        measurands: &[Measurand],
        context: ReadingContext,
    ) -> MeterValue {
        let Some(slot) = self.connectors.get(&connector) else {
            return MeterValue {
                timestamp: Utc::now(),
                sampled_value: Vec::new(),
            };
        };
        let (meter, current_offered) = {
            (
                slot.powermeter.lock().unwrap().clone(),
                *slot.max_current_offered.lock().unwrap(),
            )
        };

        let mut sampled = Vec::new();
        for measurand in measurands {
            let (value, unit, location) = match measurand {
                Measurand::EnergyActiveImportRegister => (
                    Some(meter.energy_wh_import),
                    Some(UnitOfMeasure::Wh),
                    Some(Location::Outlet),
                ),
                Measurand::EnergyActiveExportRegister => {
                    (meter.energy_wh_export, Some(UnitOfMeasure::Wh), None)
                }
                Measurand::PowerActiveImport => (
                    meter.power_w,
                    Some(UnitOfMeasure::W),
                    Some(Location::Outlet),
                ),
                Measurand::Voltage => (meter.voltage_v, Some(UnitOfMeasure::V), None),
                Measurand::CurrentImport => (
                    meter.current_a,
                    Some(UnitOfMeasure::A),
                    Some(Location::Outlet),
                ),
                Measurand::CurrentOffered => (
                    Some(current_offered),
                    Some(UnitOfMeasure::A),
                    Some(Location::Outlet),
                ),
                // grid frequency carries no UnitOfMeasure in OCPP 1.6
                Measurand::Frequency => (meter.frequency_hz, None, None),
                Measurand::SoC => (meter.soc_percent, Some(UnitOfMeasure::Percent), None),
                other => {
                    debug!(measurand = ?other, "Measurand not available from power meter");
                    (None, None, None)
                }
            };
            if let Some(value) = value {
                sampled.push(SampledValue {
                    value: format!("{value}"),
                    context: Some(context.clone()),
                    format: Some(ValueFormat::Raw),
                    measurand: Some(measurand.clone()),
                    phase: None,
                    location,
                    unit,
                });
            }
        }

        MeterValue {
            timestamp: meter.timestamp.unwrap_or_else(Utc::now),
            sampled_value: sampled,
        }
    }

    fn signed_meter_value(
        &self,
        signed_value: String,
        context: ReadingContext,
        timestamp: DateTime<Utc>,
    ) -> MeterValue {
        MeterValue {
            timestamp,
            sampled_value: vec![SampledValue {
                value: signed_value,
                context: Some(context),
                format: Some(ValueFormat::SignedData),
                measurand: None,
                phase: None,
                location: None,
                unit: None,
            }],
        }
    }

    pub(crate) async fn send_meter_value(&self, connector: u32, meter_value: MeterValue) {
        if meter_value.sampled_value.is_empty() {
            return;
        }
        let transaction_id = self
            .transaction_handler
            .get_transaction(connector)
            .map(|t| t.transaction_id())
            .filter(|id| *id != -1);
        let request = MeterValuesRequest {
            connector_id: connector,
            transaction_id,
            meter_value: vec![meter_value],
        };
        self.send_call(MessageType::MeterValues, &request).await;
    }

    async fn sample_transaction_meter(&self, connector: u32) {
        let meter_value = self.get_latest_meter_value(
            connector,
            &self.config.meter_values_sampled_data(),
            ReadingContext::SamplePeriodic,
        );
        if let Some(transaction) = self.transaction_handler.get_transaction(connector) {
            transaction.add_meter_value(meter_value.clone());
        }
        self.send_meter_value(connector, meter_value).await;
    }

    pub(crate) async fn clock_aligned_meter_values_sample(&self) {
        if !self.initialized.load(Ordering::SeqCst) {
            return;
        }
        debug!("Sampling clock-aligned meter values");
        for connector in 1..=self.status.number_of_connectors() {
            let meter_value = self.get_latest_meter_value(
                connector,
                &self.config.meter_values_aligned_data(),
                ReadingContext::SampleClock,
            );
            if self.transaction_handler.transaction_active(connector) {
                if let Some(transaction) = self.transaction_handler.get_transaction(connector) {
                    transaction.add_meter_value(meter_value.clone());
                }
            }
            self.send_meter_value(connector, meter_value).await;
        }
    }

    pub(crate) async fn status_notification(
        &self,
        connector: u32,
        code: ChargePointErrorCode,
        state: ChargePointStatus,
    ) {
        let request = StatusNotificationRequest {
            connector_id: connector,
            error_code: code,
            info: None,
            status: state,
            timestamp: Some(Utc::now()),
            vendor_error_code: None,
            vendor_id: None,
        };
        self.send_call(MessageType::StatusNotification, &request)
            .await;
    }

    // ── Transactions ───────────────────────────────────────

    async fn start_transaction(self: &Arc<Self>, transaction: Arc<Transaction>) {
        let start = transaction.start_energy_wh().clone();
        let request = StartTransactionRequest {
            connector_id: transaction.connector(),
            id_tag: transaction.id_tag().to_string(),
            meter_start: start.energy_wh.round() as i32,
            reservation_id: transaction.reservation_id(),
            timestamp: start.timestamp,
        };
        let message_id = self.queue.create_message_id();
        transaction.set_start_transaction_message_id(message_id.clone());

        let connector = transaction.connector();
        let weak = Arc::downgrade(self);
        transaction.arm_sampling(
            self.config.meter_value_sample_interval(),
            Arc::new(move || {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(cp) = weak.upgrade() {
                        cp.sample_transaction_meter(connector).await;
                    }
                })
            }),
        );

        self.send_call_with_id(MessageType::StartTransaction, message_id, &request)
            .await;
    }

    async fn send_stop_transaction(
        &self,
        connector: u32,
        reason: Reason,
        id_tag_end: Option<String>,
    ) {
        let Some(transaction) = self.transaction_handler.get_transaction(connector) else {
            warn!(connector, "StopTransaction without an active transaction");
            return;
        };
        debug!(connector, ?reason, "Stopping transaction");

        if reason == Reason::EVDisconnected
            && self.config.unlock_connector_on_ev_side_disconnect()
        {
            self.callbacks.unlock_connector(connector);
        }

        let stop = transaction
            .stop_energy_wh()
            .unwrap_or_else(|| transaction.start_energy_wh().clone());
        let transaction_data = transaction.transaction_data();
        let request = StopTransactionRequest {
            id_tag: id_tag_end,
            meter_stop: stop.energy_wh.round() as i32,
            timestamp: stop.timestamp,
            transaction_id: transaction.transaction_id(),
            reason: Some(reason),
            transaction_data: (!transaction_data.is_empty()).then_some(transaction_data),
        };

        let message_id = self.queue.create_message_id();
        transaction.set_finished();
        transaction.set_stop_transaction_message_id(message_id.clone());
        self.transaction_handler.add_stopped_transaction(connector);

        self.send_call_with_id(MessageType::StopTransaction, message_id, &request)
            .await;
    }

    /// Ask the hardware to end every running session, e.g. for Reset.
    pub(crate) async fn stop_all_transactions(&self, reason: Reason) {
        for connector in 1..=self.status.number_of_connectors() {
            if self.transaction_handler.transaction_active(connector) {
                self.callbacks.stop_transaction(connector, reason.clone());
            }
        }
    }

    /// Close transactions that were still open in the store when the
    /// process went down. The last known meter value is the start value,
    /// which is what gets reported as meterStop.
    async fn stop_pending_transactions(&self) {
        let open = match self.store.open_transactions().await {
            Ok(open) => open,
            Err(e) => {
                error!(error = %e, "Failed to read open transactions");
                return;
            }
        };

        for record in open {
            info!(
                session_id = record.session_id.as_str(),
                transaction_id = record.transaction_id,
                "Closing transaction left open by previous run"
            );
            let timestamp = Utc::now();
            let request = StopTransactionRequest {
                id_tag: None,
                meter_stop: record.meter_start,
                timestamp,
                transaction_id: record.transaction_id,
                reason: Some(Reason::PowerLoss),
                transaction_data: None,
            };
            self.send_call(MessageType::StopTransaction, &request).await;
            if let Err(e) = self
                .store
                .update_transaction_stop(
                    &record.session_id,
                    record.meter_start,
                    timestamp,
                    Some("PowerLoss".to_string()),
                )
                .await
            {
                warn!(error = %e, "Failed to persist PowerLoss stop");
            }
        }
    }

    async fn load_charging_profiles(&self) {
        let limits = self.profile_limits();
        let handler = self.transaction_handler.clone();
        self.smart_charging
            .load_persisted_profiles(&limits, move |c| handler.transaction_active(c))
            .await;
    }

    pub(crate) fn profile_limits(&self) -> ProfileLimits {
        ProfileLimits {
            charge_profile_max_stack_level: self.config.charge_profile_max_stack_level(),
            max_charging_profiles_installed: self.config.max_charging_profiles_installed(),
            charging_schedule_max_periods: self.config.charging_schedule_max_periods(),
            allowed_charging_rate_units: self.config.allowed_charging_rate_units(),
        }
    }

    /// Apply a (possibly deferred) availability change to one connector.
    pub(crate) async fn apply_availability_change(
        &self,
        connector: u32,
        availability: AvailabilityType,
    ) {
        if let Err(e) = self
            .store
            .set_connector_availability(&[connector], availability.clone())
            .await
        {
            warn!(error = %e, connector, "Failed to persist availability");
        }
        match availability {
            AvailabilityType::Operative => {
                self.callbacks.enable_evse(connector);
                self.status
                    .submit_event(connector, StatusEvent::BecomeAvailable);
            }
            AvailabilityType::Inoperative => {
                self.callbacks.disable_evse(connector);
                self.status
                    .submit_event(connector, StatusEvent::ChangeAvailabilityToUnavailable);
            }
        }
    }

    // ── Authorization engine ───────────────────────────────

    /// Local list, then cache, then an online Authorize round trip, with
    /// the offline policy applied when the link is down.
    pub async fn authorize_id_token(&self, id_tag: &str) -> IdTagInfo {
        let online = self.transport.is_connected();
        if (self.config.local_pre_authorize() && online)
            || (self.config.local_authorize_offline() && !online)
        {
            if self.config.local_auth_list_enabled() {
                if let Ok(Some(entry)) = self.store.local_list_entry(id_tag).await {
                    info!(id_tag, "Found id tag in local authorization list");
                    return entry;
                }
            }
            if self.config.authorization_cache_enabled() {
                if let Some(entry) = self.validate_against_cache_entries(id_tag).await {
                    info!(id_tag, "Found valid id tag in authorization cache");
                    return entry;
                }
            }
        }

        let request = AuthorizeRequest {
            id_tag: id_tag.to_string(),
        };
        let reply = self.send_call_async(MessageType::Authorize, &request).await;

        if reply.message_type_id == MessageTypeId::CallResult {
            if let Ok(response) = serde_json::from_value::<AuthorizeResponse>(reply.payload) {
                if response.id_tag_info.status == AuthorizationStatus::Accepted {
                    let _ = self
                        .store
                        .upsert_authorization_cache_entry(id_tag, response.id_tag_info.clone())
                        .await;
                }
                return response.id_tag_info;
            }
        } else if reply.offline && self.config.allow_offline_tx_for_unknown_id() {
            return IdTagInfo {
                status: AuthorizationStatus::Accepted,
                expiry_date: None,
                parent_id_tag: None,
            };
        }

        IdTagInfo {
            status: AuthorizationStatus::Invalid,
            expiry_date: None,
            parent_id_tag: None,
        }
    }

    /// Accepted-and-unexpired cache entries pass; an expired entry is
    /// rewritten as Expired so the state self-heals.
    async fn validate_against_cache_entries(&self, id_tag: &str) -> Option<IdTagInfo> {
        let entry = self.store.authorization_cache_entry(id_tag).await.ok()??;
        if entry.status != AuthorizationStatus::Accepted {
            return None;
        }
        match entry.expiry_date {
            Some(expiry) if expiry < Utc::now() => {
                let expired = IdTagInfo {
                    status: AuthorizationStatus::Expired,
                    ..entry
                };
                let _ = self
                    .store
                    .upsert_authorization_cache_entry(id_tag, expired)
                    .await;
                None
            }
            _ => Some(entry),
        }
    }

    // ── Data transfer ──────────────────────────────────────

    /// CP→CS DataTransfer; offline resolves to Rejected.
    pub async fn data_transfer(
        &self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<String>,
    ) -> DataTransferResponse {
        let request = DataTransferRequest {
            vendor_string: vendor_id.to_string(),
            message_id: message_id.map(str::to_string),
            data,
        };
        let reply = self
            .send_call_async(MessageType::DataTransfer, &request)
            .await;

        if reply.message_type_id == MessageTypeId::CallResult {
            if let Ok(response) = serde_json::from_value::<DataTransferResponse>(reply.payload) {
                return response;
            }
        }
        DataTransferResponse {
            status: DataTransferStatus::Rejected,
            data: None,
        }
    }

    /// Register a handler for CS→CP DataTransfer with this vendor/message
    /// id pair.
    pub fn register_data_transfer_callback(
        &self,
        vendor_id: impl Into<String>,
        message_id: impl Into<String>,
        callback: Arc<dyn Fn(&str) + Send + Sync>,
    ) {
        self.data_transfer_callbacks
            .insert((vendor_id.into(), message_id.into()), callback);
    }

    pub(crate) fn data_transfer_callback(
        &self,
        vendor_id: &str,
        message_id: &str,
    ) -> Option<Arc<dyn Fn(&str) + Send + Sync>> {
        self.data_transfer_callbacks
            .get(&(vendor_id.to_string(), message_id.to_string()))
            .map(|e| e.clone())
    }

    pub(crate) fn has_data_transfer_vendor(&self, vendor_id: &str) -> bool {
        self.data_transfer_callbacks
            .iter()
            .any(|e| e.key().0 == vendor_id)
    }

    // ── Security / firmware / diagnostics plumbing ─────────

    pub(crate) async fn security_event_notification(&self, kind: SecurityEvent, tech_info: &str) {
        let request = SecurityEventNotificationRequest {
            kind,
            timestamp: Utc::now(),
            tech_info: Some(tech_info.to_string()),
        };
        self.send_call(MessageType::SecurityEventNotification, &request)
            .await;
    }

    /// Send a SignCertificate with a CSR for our serial; requires CpoName
    /// and the CSR hook.
    pub(crate) async fn sign_certificate(&self) {
        let Some(cpo_name) = self.config.cpo_name() else {
            warn!("SignCertificate requested but CpoName is not configured");
            return;
        };
        let serial = self
            .config
            .identity()
            .charge_box_serial_number
            .unwrap_or_default();
        let Some(csr) = self
            .callbacks
            .generate_csr
            .as_ref()
            .and_then(|f| f(&cpo_name, &serial))
        else {
            warn!("CSR generation unavailable");
            return;
        };
        self.send_call(MessageType::SignCertificate, &SignCertificateRequest { csr })
            .await;
    }

    pub(crate) async fn diagnostics_status_notification(&self, status: DiagnosticsStatus) {
        *self.diagnostics_status.lock().unwrap() = status.clone();
        let request = DiagnosticsStatusNotificationRequest { status };
        self.send_call(MessageType::DiagnosticsStatusNotification, &request)
            .await;
    }

    pub(crate) async fn firmware_status_notification(&self, status: FirmwareStatus) {
        *self.firmware_status.lock().unwrap() = status.clone();
        let request = FirmwareStatusNotificationRequest { status };
        self.send_call(MessageType::FirmwareStatusNotification, &request)
            .await;
    }

    pub(crate) async fn log_status_notification(
        &self,
        status: UploadLogStatusEnumType,
        request_id: i32,
    ) {
        *self.log_status.lock().unwrap() = (status, request_id);
        let request = LogStatusNotificationRequest { status, request_id };
        self.send_call(MessageType::LogStatusNotification, &request)
            .await;
    }

    pub(crate) async fn signed_firmware_status_notification(
        &self,
        status: FirmwareStatusEnumType,
        request_id: i32,
    ) {
        *self.signed_firmware_status.lock().unwrap() = (status, request_id);
        let request = SignedFirmwareStatusNotificationRequest { status, request_id };
        self.send_call(MessageType::SignedFirmwareStatusNotification, &request)
            .await;
        if status == FirmwareStatusEnumType::InvalidSignature {
            self.security_event_notification(
                SecurityEvent::InvalidFirmwareSignature,
                "firmware signature verification failed",
            )
            .await;
        }
    }

    // ── Public hardware-facing API ─────────────────────────

    /// A user or vehicle initiated usage of a connector.
    pub fn on_session_started(&self, connector: u32, session_id: &str, reason: SessionStartedReason) {
        debug!(connector, session_id, ?reason, "Session started");
        let state = self.status.get_state(connector);
        if state != ChargePointStatus::Reserved || reason == SessionStartedReason::Authorized {
            self.status.submit_event(connector, StatusEvent::UsageInitiated);
        }
    }

    /// The connector became free again without (or after) a transaction.
    pub fn on_session_stopped(&self, connector: u32) {
        match self.status.get_state(connector) {
            ChargePointStatus::Faulted => {
                self.status
                    .submit_event(connector, StatusEvent::ReturnToAvailable);
            }
            ChargePointStatus::Reserved | ChargePointStatus::Unavailable => {}
            _ => {
                self.status
                    .submit_event(connector, StatusEvent::BecomeAvailable);
            }
        }
    }

    /// Energy delivery started; sends StartTransaction and begins periodic
    /// metering.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_transaction_started(
        self: &Arc<Self>,
        connector: u32,
        session_id: &str,
        id_token: &str,
        meter_start_wh: f64,
        reservation_id: Option<i32>,
        timestamp: DateTime<Utc>,
        signed_meter_value: Option<String>,
    ) -> Result<()> {
        if !self.connectors.contains_key(&connector) || connector == 0 {
            return Err(ChargePointError::UnknownConnector(connector));
        }
        if self.status.get_state(connector) == ChargePointStatus::Reserved {
            self.status.submit_event(connector, StatusEvent::UsageInitiated);
        }

        let transaction = Arc::new(Transaction::new(
            connector,
            session_id,
            id_token,
            StampedEnergyWh {
                timestamp,
                energy_wh: meter_start_wh,
            },
            reservation_id,
        ));
        if let Some(signed) = signed_meter_value {
            transaction.add_meter_value(self.signed_meter_value(
                signed,
                ReadingContext::TransactionBegin,
                timestamp,
            ));
        }

        self.store
            .insert_transaction(TransactionRecord {
                session_id: session_id.to_string(),
                transaction_id: -1,
                connector,
                id_tag: id_token.to_string(),
                start_timestamp: timestamp,
                meter_start: meter_start_wh.round() as i32,
                reservation_id,
                meter_stop: None,
                stop_timestamp: None,
                stop_reason: None,
            })
            .await?;
        self.transaction_handler.add_transaction(transaction.clone())?;

        self.start_transaction(transaction).await;
        Ok(())
    }

    /// Energy delivery ended; sends StopTransaction with the buffered
    /// transaction data.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_transaction_stopped(
        &self,
        connector: u32,
        session_id: &str,
        reason: Reason,
        timestamp: DateTime<Utc>,
        energy_wh_import: f64,
        id_tag_end: Option<String>,
        signed_meter_value: Option<String>,
    ) -> Result<()> {
        let Some(transaction) = self.transaction_handler.get_transaction(connector) else {
            return Err(ChargePointError::NoActiveTransaction(connector));
        };
        if let Some(signed) = signed_meter_value {
            transaction.add_meter_value(self.signed_meter_value(
                signed,
                ReadingContext::TransactionEnd,
                timestamp,
            ));
        }
        transaction.add_stop_energy_wh(StampedEnergyWh {
            timestamp,
            energy_wh: energy_wh_import,
        });

        self.status.submit_event(
            connector,
            StatusEvent::TransactionStoppedAndUserActionRequired,
        );
        self.send_stop_transaction(connector, reason.clone(), id_tag_end)
            .await;

        self.store
            .update_transaction_stop(
                session_id,
                energy_wh_import.round() as i32,
                timestamp,
                Some(format!("{reason:?}")),
            )
            .await?;
        self.transaction_handler.remove_active_transaction(connector);
        self.smart_charging
            .clear_all_profiles_with_filter(
                None,
                Some(connector),
                None,
                Some(rust_ocpp::v1_6::types::ChargingProfilePurposeType::TxProfile),
                false,
            )
            .await;
        self.transactions_changed.notify_waiters();
        Ok(())
    }

    pub fn on_suspend_charging_ev(&self, connector: u32) {
        self.status.submit_event(connector, StatusEvent::PauseChargingEv);
    }

    pub fn on_suspend_charging_evse(&self, connector: u32) {
        self.status.submit_event(connector, StatusEvent::PauseChargingEvse);
    }

    pub fn on_resume_charging(&self, connector: u32) {
        self.status.submit_event(connector, StatusEvent::StartCharging);
    }

    pub fn on_error(&self, connector: u32, code: ChargePointErrorCode) {
        self.status
            .submit_event(connector, StatusEvent::FaultDetected(code));
    }

    pub fn on_fault_cleared(&self, connector: u32) {
        self.status
            .submit_event(connector, StatusEvent::ReturnToAvailable);
    }

    pub fn on_reservation_start(&self, connector: u32) {
        self.status
            .submit_event(connector, StatusEvent::ReserveConnector);
    }

    pub fn on_reservation_end(&self, connector: u32) {
        self.status
            .submit_event(connector, StatusEvent::BecomeAvailable);
    }

    /// New power-meter snapshot from the hardware adapter.
    pub fn on_meter_values(&self, connector: u32, power_meter: PowerMeter) {
        if let Some(slot) = self.connectors.get(&connector) {
            *slot.powermeter.lock().unwrap() = power_meter;
        }
    }

    /// Current offered to the EV changed (Current.Offered measurand).
    pub fn on_max_current_offered(&self, connector: u32, max_current_a: f64) {
        if let Some(slot) = self.connectors.get(&connector) {
            *slot.max_current_offered.lock().unwrap() = max_current_a;
        }
    }

    /// Upload progress for GetLog (`request_id >= 0`) or legacy
    /// GetDiagnostics (`request_id == -1`).
    pub async fn on_log_status_notification(
        &self,
        request_id: i32,
        status: UploadLogStatusEnumType,
    ) {
        if request_id != -1 {
            self.log_status_notification(status, request_id).await;
        } else {
            let diagnostics_status = match status {
                UploadLogStatusEnumType::Uploaded => DiagnosticsStatus::Uploaded,
                UploadLogStatusEnumType::Uploading => DiagnosticsStatus::Uploading,
                // DiagnosticsStatus calls the failure case UploadFailed
                UploadLogStatusEnumType::UploadFailure
                | UploadLogStatusEnumType::BadMessage
                | UploadLogStatusEnumType::NotSupportedOperation
                | UploadLogStatusEnumType::PermissionDenied => DiagnosticsStatus::UploadFailed,
                UploadLogStatusEnumType::Idle => DiagnosticsStatus::Idle,
            };
            self.diagnostics_status_notification(diagnostics_status).await;
        }
    }

    /// Firmware update progress for SignedUpdateFirmware
    /// (`request_id >= 0`) or legacy UpdateFirmware (`request_id == -1`).
    pub async fn on_firmware_update_status_notification(
        &self,
        request_id: i32,
        status: FirmwareStatusEnumType,
    ) {
        if request_id != -1 {
            self.signed_firmware_status_notification(status, request_id)
                .await;
        } else {
            let firmware_status = match status {
                FirmwareStatusEnumType::Downloaded => FirmwareStatus::Downloaded,
                FirmwareStatusEnumType::Downloading => FirmwareStatus::Downloading,
                FirmwareStatusEnumType::DownloadFailed => FirmwareStatus::DownloadFailed,
                FirmwareStatusEnumType::Installed => FirmwareStatus::Installed,
                FirmwareStatusEnumType::Installing => FirmwareStatus::Installing,
                FirmwareStatusEnumType::InstallationFailed
                | FirmwareStatusEnumType::InvalidSignature
                | FirmwareStatusEnumType::InstallVerificationFailed => {
                    FirmwareStatus::InstallationFailed
                }
                _ => FirmwareStatus::Idle,
            };
            self.firmware_status_notification(firmware_status).await;
        }
    }

    /// Composite schedule per connector, virtual connector 0 included.
    pub fn get_all_composite_charging_schedules(
        &self,
        duration_s: u32,
    ) -> HashMap<u32, ChargingSchedule> {
        let start = Utc::now();
        let end = start + chrono::Duration::seconds(i64::from(duration_s));
        let mut schedules = HashMap::new();
        for connector in 0..=self.status.number_of_connectors() {
            let valid = self.smart_charging.get_valid_profiles(start, end, connector);
            schedules.insert(
                connector,
                self.smart_charging.calculate_composite_schedule(
                    &valid,
                    start,
                    duration_s,
                    Some(ChargingRateUnitType::A),
                ),
            );
        }
        schedules
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock().unwrap()
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        self.registration_status.lock().unwrap().clone()
    }

    pub(crate) fn is_supported_receiving(&self, message_type: MessageType) -> bool {
        self.supported_receiving.contains(&message_type)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;

    use chrono::TimeZone;
    use serde_json::{json, Value};

    use super::*;
    use crate::config::test_settings;
    use crate::store::MemoryStore;
    use crate::transport::testing::MockTransport;

    struct Harness {
        cp: Arc<ChargePoint>,
        mock: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        stop_requests: Arc<std::sync::Mutex<Vec<(u32, Reason)>>>,
        reset_count: Arc<AtomicU32>,
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn harness(connectors: u32) -> Harness {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mock = MockTransport::new(events_tx);
        let store = Arc::new(MemoryStore::new());

        let stop_requests = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reset_count = Arc::new(AtomicU32::new(0));

        let stops = stop_requests.clone();
        let resets = reset_count.clone();
        let callbacks = ChargePointCallbacks {
            stop_transaction: Some(Arc::new(move |connector, reason| {
                stops.lock().unwrap().push((connector, reason));
                true
            })),
            is_reset_allowed: Some(Arc::new(|_| true)),
            reset: Some(Arc::new(move |_| {
                resets.fetch_add(1, Ordering::SeqCst);
            })),
            unlock_connector: Some(Arc::new(|_| true)),
            ..Default::default()
        };

        let cp = ChargePoint::new(
            test_settings(connectors),
            store.clone(),
            callbacks,
            mock.clone(),
            events_rx,
        );
        Harness {
            cp,
            mock,
            store,
            stop_requests,
            reset_count,
        }
    }

    /// Acknowledge every outbound CALL except the given actions with an
    /// empty CALLRESULT, letting the one-in-flight queue drain. Safe to run
    /// repeatedly; already-acknowledged ids are skipped.
    async fn settle(h: &Harness, preserve: &[&str]) {
        let mut acknowledged: HashSet<String> = HashSet::new();
        for _ in 0..6 {
            tick().await;
            for raw in h.mock.sent_frames() {
                let arr: Vec<Value> = match serde_json::from_str(&raw) {
                    Ok(arr) => arr,
                    Err(_) => continue,
                };
                if arr.first().and_then(Value::as_u64) != Some(2) {
                    continue;
                }
                let id = arr[1].as_str().unwrap_or_default().to_string();
                let action = arr[2].as_str().unwrap_or_default();
                if preserve.contains(&action) || !acknowledged.insert(id.clone()) {
                    continue;
                }
                h.mock.inject(TransportEvent::Message(
                    OcppFrame::call_result(id, json!({})).serialize(),
                ));
            }
        }
        tick().await;
    }

    /// CALLRESULT / CALLERROR payload the charge point sent for a given id.
    fn reply_payload(h: &Harness, unique_id: &str) -> Option<Value> {
        h.mock.sent_frames().iter().find_map(|raw| {
            let arr: Vec<Value> = serde_json::from_str(raw).ok()?;
            if arr.first()?.as_u64()? == 3 && arr.get(1)?.as_str()? == unique_id {
                Some(arr[2].clone())
            } else {
                None
            }
        })
    }

    fn error_reply(h: &Harness, unique_id: &str) -> Option<String> {
        h.mock.sent_frames().iter().find_map(|raw| {
            let arr: Vec<Value> = serde_json::from_str(raw).ok()?;
            if arr.first()?.as_u64()? == 4 && arr.get(1)?.as_str()? == unique_id {
                Some(arr[2].as_str()?.to_string())
            } else {
                None
            }
        })
    }

    /// Start the charge point and complete the boot handshake.
    async fn boot(h: &Harness) {
        h.cp.start().await.unwrap();
        tick().await;

        let boots = h.mock.sent_calls("BootNotification");
        assert_eq!(boots.len(), 1, "exactly one BootNotification expected");
        let (boot_id, payload) = &boots[0];
        assert_eq!(payload["chargePointVendor"], "VendorX");

        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{boot_id}",{{"status":"Accepted","currentTime":"2024-06-01T00:00:00Z","interval":300}}]"#
        )));
        settle(h, &["StartTransaction", "StopTransaction"]).await;
        assert_eq!(h.cp.connection_state(), ConnectionState::Booted);
        h.mock.clear_sent();
    }

    async fn start_test_transaction(h: &Harness, connector: u32, session: &str) {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        h.cp.on_transaction_started(connector, session, "TAG01", 100.0, None, t0, None)
            .await
            .unwrap();
        settle(h, &["StartTransaction", "StopTransaction"]).await;
    }

    // Full session: start, server id assignment, stop
    #[tokio::test(start_paused = true)]
    async fn transaction_happy_path() {
        let h = harness(2);
        boot(&h).await;

        h.cp.on_session_started(1, "s1", SessionStartedReason::Authorized);
        start_test_transaction(&h, 1, "s1").await;

        let starts = h.mock.sent_calls("StartTransaction");
        assert_eq!(starts.len(), 1);
        let (start_id, payload) = &starts[0];
        assert_eq!(payload["connectorId"], 1);
        assert_eq!(payload["idTag"], "TAG01");
        assert_eq!(payload["meterStart"], 100);

        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{start_id}",{{"transactionId":42,"idTagInfo":{{"status":"Accepted"}}}}]"#
        )));
        tick().await;

        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        h.cp.on_transaction_stopped(1, "s1", Reason::Local, t1, 250.0, None, None)
            .await
            .unwrap();
        settle(&h, &["StartTransaction", "StopTransaction"]).await;

        let stops = h.mock.sent_calls("StopTransaction");
        assert_eq!(stops.len(), 1);
        let (_, payload) = &stops[0];
        assert_eq!(payload["transactionId"], 42);
        assert_eq!(payload["meterStop"], 250);
        assert_eq!(payload["reason"], "Local");
    }

    // A StopTransaction queued offline gets the transaction id patched in
    #[tokio::test(start_paused = true)]
    async fn queued_stop_transaction_is_patched() {
        let h = harness(1);
        boot(&h).await;
        start_test_transaction(&h, 1, "s1").await;
        assert_eq!(h.mock.sent_calls("StartTransaction").len(), 1);

        // link drops before the response arrives; the session ends offline
        h.mock.drop_link();
        tick().await;
        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        h.cp.on_transaction_stopped(1, "s1", Reason::Local, t1, 250.0, None, None)
            .await
            .unwrap();
        tick().await;
        h.mock.clear_sent();

        h.mock.reconnect_link(0);
        tick().await;

        // StartTransaction is retried first, the stop is held back
        let starts = h.mock.sent_calls("StartTransaction");
        assert_eq!(starts.len(), 1);
        let start_id = starts[0].0.clone();
        assert!(h.mock.sent_calls("StopTransaction").is_empty());

        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{start_id}",{{"transactionId":7,"idTagInfo":{{"status":"Accepted"}}}}]"#
        )));
        settle(&h, &["StartTransaction", "StopTransaction"]).await;

        let stops = h.mock.sent_calls("StopTransaction");
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].1["transactionId"], 7);
    }

    // ChangeAvailability during a transaction is deferred until the stop confirms
    #[tokio::test(start_paused = true)]
    async fn change_availability_scheduled_until_stop_confirmed() {
        let h = harness(1);
        boot(&h).await;
        start_test_transaction(&h, 1, "s1").await;

        let starts = h.mock.sent_calls("StartTransaction");
        let start_id = starts[0].0.clone();
        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{start_id}",{{"transactionId":5,"idTagInfo":{{"status":"Accepted"}}}}]"#
        )));
        tick().await;
        h.mock.clear_sent();

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-1","ChangeAvailability",{"connectorId":1,"type":"Inoperative"}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-1").unwrap()["status"], "Scheduled");

        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        h.cp.on_transaction_stopped(1, "s1", Reason::Local, t1, 200.0, None, None)
            .await
            .unwrap();
        settle(&h, &["StopTransaction"]).await;

        let stops = h.mock.sent_calls("StopTransaction");
        assert_eq!(stops.len(), 1);
        let stop_id = stops[0].0.clone();
        h.mock.inject(TransportEvent::Message(
            OcppFrame::call_result(stop_id, json!({})).serialize(),
        ));
        settle(&h, &[]).await;

        // availability is applied and persisted once the stop is confirmed
        assert_eq!(
            h.store.connector_availability(1).await.unwrap(),
            AvailabilityType::Inoperative
        );
        let statuses = h.mock.sent_calls("StatusNotification");
        assert!(statuses
            .iter()
            .any(|(_, p)| p["status"] == "Unavailable" && p["connectorId"] == 1));
    }

    // Reset waits for the StopTransactionResponse before resetting
    #[tokio::test(start_paused = true)]
    async fn reset_coordinator_waits_for_transactions() {
        let h = harness(1);
        boot(&h).await;
        start_test_transaction(&h, 1, "s1").await;

        let starts = h.mock.sent_calls("StartTransaction");
        let start_id = starts[0].0.clone();
        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{start_id}",{{"transactionId":5,"idTagInfo":{{"status":"Accepted"}}}}]"#
        )));
        tick().await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-9","Reset",{"type":"Soft"}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-9").unwrap()["status"], "Accepted");

        // the hardware was asked to stop the running session
        assert_eq!(
            h.stop_requests.lock().unwrap().as_slice(),
            &[(1, Reason::SoftReset)]
        );
        assert_eq!(h.reset_count.load(Ordering::SeqCst), 0);

        // session ends and the stop is confirmed within the budget
        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        h.cp.on_transaction_stopped(1, "s1", Reason::SoftReset, t1, 180.0, None, None)
            .await
            .unwrap();
        settle(&h, &["StopTransaction"]).await;
        assert_eq!(h.reset_count.load(Ordering::SeqCst), 0);

        let stops = h.mock.sent_calls("StopTransaction");
        let stop_id = stops[0].0.clone();
        h.mock.inject(TransportEvent::Message(
            OcppFrame::call_result(stop_id, json!({})).serialize(),
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.reset_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_proceeds_after_budget_elapses() {
        let h = harness(1);
        boot(&h).await;
        start_test_transaction(&h, 1, "s1").await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-9","Reset",{"type":"Hard"}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(
            h.stop_requests.lock().unwrap().as_slice(),
            &[(1, Reason::HardReset)]
        );

        // nothing confirms the stop; after 5 s the reset happens anyway
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.reset_count.load(Ordering::SeqCst), 1);
    }

    // An expired cache entry self-heals to Expired
    #[tokio::test(start_paused = true)]
    async fn expired_cache_entry_rewritten() {
        let h = harness(1);
        h.store
            .upsert_authorization_cache_entry(
                "TAG02",
                IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    expiry_date: Some(Utc::now() - chrono::Duration::hours(1)),
                    parent_id_tag: None,
                },
            )
            .await
            .unwrap();

        // offline, queue not started: the Authorize future resolves offline
        let info = h.cp.authorize_id_token("TAG02").await;
        assert_eq!(info.status, AuthorizationStatus::Invalid);

        let entry = h
            .store
            .authorization_cache_entry("TAG02")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, AuthorizationStatus::Expired);
    }

    // Valid cache entry authorizes locally without an Authorize round trip
    #[tokio::test(start_paused = true)]
    async fn valid_cache_entry_authorizes_locally() {
        let h = harness(1);
        boot(&h).await;
        h.store
            .upsert_authorization_cache_entry(
                "TAG03",
                IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    expiry_date: Some(Utc::now() + chrono::Duration::hours(1)),
                    parent_id_tag: None,
                },
            )
            .await
            .unwrap();

        let info = h.cp.authorize_id_token("TAG03").await;
        assert_eq!(info.status, AuthorizationStatus::Accepted);
        tick().await;
        assert!(h.mock.sent_calls("Authorize").is_empty());
    }

    // SecurityProfile change cycles the connection onto the new profile
    #[tokio::test(start_paused = true)]
    async fn security_profile_switch() {
        let h = harness(1);
        boot(&h).await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-2","ChangeConfiguration",{"key":"SecurityProfile","value":"3"}]"#.to_string(),
        ));
        tick().await;

        assert_eq!(reply_payload(&h, "cs-2").unwrap()["status"], "Accepted");
        assert_eq!(h.mock.disconnect_codes.lock().unwrap().as_slice(), &[1012]);
        // one-shot connect with the new profile succeeded
        assert!(h.mock.connect_attempts.lock().unwrap().contains(&(3, true)));
        assert_eq!(h.cp.config.security_profile(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_profile_switch_falls_back() {
        let h = harness(1);
        boot(&h).await;

        h.mock.fail_next_connect.store(true, Ordering::SeqCst);
        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-2","ChangeConfiguration",{"key":"SecurityProfile","value":"2"}]"#.to_string(),
        ));
        tick().await;

        let attempts = h.mock.connect_attempts.lock().unwrap().clone();
        assert!(attempts.contains(&(2, true)));
        // fallback resumed the old profile with the normal reconnect loop
        assert_eq!(attempts.last(), Some(&(0, false)));
        assert_eq!(h.cp.config.security_profile(), 0);
    }

    // Before acceptance nothing but BootNotification leaves the station
    #[tokio::test(start_paused = true)]
    async fn nothing_but_boot_notification_before_acceptance() {
        let h = harness(1);
        h.cp.start().await.unwrap();
        tick().await;

        // these would normally enqueue calls; gating must drop them
        h.cp.heartbeat().await;
        h.cp.status_notification(1, ChargePointErrorCode::NoError, ChargePointStatus::Available)
            .await;
        tick().await;

        assert_eq!(h.mock.sent_actions(), vec!["BootNotification"]);
    }

    // A reconnect while registered resends statuses, never BootNotification
    #[tokio::test(start_paused = true)]
    async fn reconnect_resends_statuses_without_boot() {
        let h = harness(2);
        boot(&h).await;

        h.mock.drop_link();
        tick().await;
        h.mock.reconnect_link(0);
        settle(&h, &[]).await;

        assert!(h.mock.sent_calls("BootNotification").is_empty());
        let statuses = h.mock.sent_calls("StatusNotification");
        // one per connector, including connector 0
        assert_eq!(statuses.len(), 3);
    }

    // Pending registration gates traffic but dispatches configuration
    #[tokio::test(start_paused = true)]
    async fn pending_registration_allows_configuration() {
        let h = harness(1);
        h.cp.start().await.unwrap();
        tick().await;

        let boots = h.mock.sent_calls("BootNotification");
        let boot_id = boots[0].0.clone();
        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{boot_id}",{{"status":"Pending","currentTime":"2024-06-01T00:00:00Z","interval":120}}]"#
        )));
        tick().await;
        assert_eq!(h.cp.connection_state(), ConnectionState::Pending);
        h.mock.clear_sent();

        // the central system may change configuration while pending
        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-3","ChangeConfiguration",{"key":"HeartbeatInterval","value":"60"}]"#
                .to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-3").unwrap()["status"], "Accepted");

        // but a heartbeat is still gated
        h.mock.clear_sent();
        h.cp.heartbeat().await;
        tick().await;
        assert!(h.mock.sent_actions().is_empty());
    }

    // Unknown actions are answered with NotSupported
    #[tokio::test(start_paused = true)]
    async fn unknown_action_not_supported() {
        let h = harness(1);
        boot(&h).await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-4","FancyNewOperation",{}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(error_reply(&h, "cs-4").as_deref(), Some("NotSupported"));
    }

    // Local list versions move forward only
    #[tokio::test(start_paused = true)]
    async fn local_list_version_monotonic() {
        let h = harness(1);
        boot(&h).await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-5","SendLocalList",{"listVersion":5,"updateType":"Full","localAuthorizationList":[{"idTag":"A","idTagInfo":{"status":"Accepted"}}]}]"#
                .to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-5").unwrap()["status"], "Accepted");
        assert_eq!(h.store.local_list_version().await.unwrap(), 5);

        // stale differential is refused
        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-6","SendLocalList",{"listVersion":4,"updateType":"Differential","localAuthorizationList":[{"idTag":"B","idTagInfo":{"status":"Accepted"}}]}]"#
                .to_string(),
        ));
        tick().await;
        assert_eq!(
            reply_payload(&h, "cs-6").unwrap()["status"],
            "VersionMismatch"
        );
        assert_eq!(h.store.local_list_version().await.unwrap(), 5);
        assert!(h.store.local_list_entry("B").await.unwrap().is_none());
        assert!(h.store.local_list_entry("A").await.unwrap().is_some());
    }

    // RemoteStart on a busy connector is rejected; a free one is accepted
    #[tokio::test(start_paused = true)]
    async fn remote_start_validation() {
        let h = harness(2);
        boot(&h).await;
        start_test_transaction(&h, 1, "s1").await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-7","RemoteStartTransaction",{"idTag":"TAG09","connectorId":1}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-7").unwrap()["status"], "Rejected");

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-8","RemoteStartTransaction",{"idTag":"TAG09","connectorId":2}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-8").unwrap()["status"], "Accepted");
    }

    // RemoteStop resolves the connector from the transaction id
    #[tokio::test(start_paused = true)]
    async fn remote_stop_by_transaction_id() {
        let h = harness(1);
        boot(&h).await;
        start_test_transaction(&h, 1, "s1").await;

        let starts = h.mock.sent_calls("StartTransaction");
        let start_id = starts[0].0.clone();
        h.mock.inject(TransportEvent::Message(format!(
            r#"[3,"{start_id}",{{"transactionId":11,"idTagInfo":{{"status":"Accepted"}}}}]"#
        )));
        tick().await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-10","RemoteStopTransaction",{"transactionId":11}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-10").unwrap()["status"], "Accepted");
        assert!(h
            .stop_requests
            .lock()
            .unwrap()
            .contains(&(1, Reason::Remote)));

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-11","RemoteStopTransaction",{"transactionId":99}]"#.to_string(),
        ));
        tick().await;
        assert_eq!(reply_payload(&h, "cs-11").unwrap()["status"], "Rejected");
    }

    // GetConfiguration returns known keys and flags unknown ones
    #[tokio::test(start_paused = true)]
    async fn get_configuration_known_and_unknown_keys() {
        let h = harness(1);
        boot(&h).await;

        h.mock.inject(TransportEvent::Message(
            r#"[2,"cs-12","GetConfiguration",{"key":["HeartbeatInterval","NoSuchKey"]}]"#
                .to_string(),
        ));
        tick().await;
        let payload = reply_payload(&h, "cs-12").unwrap();
        assert_eq!(payload["configurationKey"][0]["key"], "HeartbeatInterval");
        assert_eq!(payload["unknownKey"][0], "NoSuchKey");
    }
}
