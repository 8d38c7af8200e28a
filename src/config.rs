//! Configuration module
//!
//! TOML-based settings with serde defaults, wrapped by [`OcppConfig`], the
//! runtime key registry behind GetConfiguration / ChangeConfiguration.
//! Standard OCPP keys are resolved by name with per-key readonly flags;
//! values always travel as strings on the wire.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use rust_ocpp::v1_6::types::{ChargingProfilePurposeType, ChargingRateUnitType, KeyValue, Measurand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ChargePointError;

// ── Static settings (TOML) ─────────────────────────────────────

/// Immutable identity reported in BootNotification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub charge_point_vendor: String,
    pub charge_point_model: String,

    #[serde(default)]
    pub charge_box_serial_number: Option<String>,
    #[serde(default)]
    pub charge_point_serial_number: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub imsi: Option<String>,
    #[serde(default)]
    pub meter_serial_number: Option<String>,
    #[serde(default)]
    pub meter_type: Option<String>,
}

/// Central-system connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URI of the central system, e.g. `wss://cs.example.com/ocpp`.
    pub central_system_uri: String,

    /// Charge-point identity appended to the URI path.
    pub charge_point_id: String,

    /// Security profile 0..=3.
    #[serde(default)]
    pub security_profile: u8,

    /// Pre-shared key for basic auth on profiles 1 and 2.
    #[serde(default)]
    pub authorization_key: Option<String>,

    #[serde(default = "default_reconnect_interval")]
    pub websocket_reconnect_interval_s: u32,

    /// Seconds the EV user has to plug in after authorization.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_s: u32,

    #[serde(default)]
    pub supported_ciphers_12: Vec<String>,
    #[serde(default)]
    pub supported_ciphers_13: Vec<String>,
}

/// Core-profile behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_number_of_connectors")]
    pub number_of_connectors: u32,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_s: u32,

    #[serde(default = "default_meter_value_sample_interval")]
    pub meter_value_sample_interval_s: u32,

    /// 0 disables clock-aligned sampling.
    #[serde(default)]
    pub clock_aligned_data_interval_s: u32,

    #[serde(default)]
    pub minimum_status_duration_s: u32,

    /// Comma-separated measurand list for periodic samples.
    #[serde(default = "default_sampled_data")]
    pub meter_values_sampled_data: String,

    /// Comma-separated measurand list for clock-aligned samples.
    #[serde(default = "default_aligned_data")]
    pub meter_values_aligned_data: String,

    #[serde(default = "default_true")]
    pub authorize_remote_tx_requests: bool,

    #[serde(default = "default_true")]
    pub stop_transaction_on_invalid_id: bool,

    #[serde(default = "default_true")]
    pub unlock_connector_on_ev_side_disconnect: bool,

    #[serde(default)]
    pub allow_offline_tx_for_unknown_id: bool,

    #[serde(default = "default_true")]
    pub local_pre_authorize: bool,

    #[serde(default = "default_true")]
    pub local_authorize_offline: bool,

    #[serde(default = "default_true")]
    pub authorization_cache_enabled: bool,
}

/// Local authorization list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalListConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_local_list_max_length")]
    pub max_length: u32,
}

/// Smart-charging limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartChargingConfig {
    #[serde(default = "default_max_stack_level")]
    pub charge_profile_max_stack_level: u32,

    #[serde(default = "default_max_profiles")]
    pub max_charging_profiles_installed: u32,

    #[serde(default = "default_max_periods")]
    pub charging_schedule_max_periods: u32,

    /// Comma-separated subset of `Current`,`Power`.
    #[serde(default = "default_rate_units")]
    pub charging_schedule_allowed_charging_rate_unit: String,

    #[serde(default = "default_max_composite_duration")]
    pub max_composite_schedule_duration_s: u32,

    /// Comma-separated purposes accepted by SetChargingProfile.
    #[serde(default = "default_purposes")]
    pub supported_charging_profile_purpose_types: String,
}

/// Transaction message queue retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_transaction_attempts")]
    pub transaction_message_attempts: u32,

    #[serde(default = "default_transaction_retry_interval")]
    pub transaction_message_retry_interval_s: u32,
}

/// Security-whitepaper extras.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// CPO name used as the CSR organization; SignChargePointCertificate
    /// triggers are rejected while unset.
    #[serde(default)]
    pub cpo_name: Option<String>,
}

/// Root settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointSettings {
    pub identity: IdentityConfig,
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub local_list: LocalListConfig,

    #[serde(default)]
    pub smart_charging: SmartChargingConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default = "default_feature_profiles")]
    pub supported_feature_profiles: String,
}

impl ChargePointSettings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChargePointError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ChargePointError::Configuration(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ChargePointError::Configuration(e.to_string()))
    }
}

fn default_true() -> bool {
    true
}
fn default_reconnect_interval() -> u32 {
    10
}
fn default_connection_timeout() -> u32 {
    60
}
fn default_number_of_connectors() -> u32 {
    1
}
fn default_heartbeat_interval() -> u32 {
    86400
}
fn default_meter_value_sample_interval() -> u32 {
    60
}
fn default_sampled_data() -> String {
    "Energy.Active.Import.Register".to_string()
}
fn default_aligned_data() -> String {
    "Energy.Active.Import.Register".to_string()
}
fn default_local_list_max_length() -> u32 {
    250
}
fn default_max_stack_level() -> u32 {
    10
}
fn default_max_profiles() -> u32 {
    20
}
fn default_max_periods() -> u32 {
    48
}
fn default_rate_units() -> String {
    "Current,Power".to_string()
}
fn default_max_composite_duration() -> u32 {
    31_536_000
}
fn default_purposes() -> String {
    "ChargePointMaxProfile,TxDefaultProfile,TxProfile".to_string()
}
fn default_transaction_attempts() -> u32 {
    3
}
fn default_transaction_retry_interval() -> u32 {
    60
}
fn default_feature_profiles() -> String {
    "Core,FirmwareManagement,LocalAuthListManagement,Reservation,SmartCharging,RemoteTrigger"
        .to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            number_of_connectors: default_number_of_connectors(),
            heartbeat_interval_s: default_heartbeat_interval(),
            meter_value_sample_interval_s: default_meter_value_sample_interval(),
            clock_aligned_data_interval_s: 0,
            minimum_status_duration_s: 0,
            meter_values_sampled_data: default_sampled_data(),
            meter_values_aligned_data: default_aligned_data(),
            authorize_remote_tx_requests: true,
            stop_transaction_on_invalid_id: true,
            unlock_connector_on_ev_side_disconnect: true,
            allow_offline_tx_for_unknown_id: false,
            local_pre_authorize: true,
            local_authorize_offline: true,
            authorization_cache_enabled: true,
        }
    }
}

impl Default for LocalListConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: default_local_list_max_length(),
        }
    }
}

impl Default for SmartChargingConfig {
    fn default() -> Self {
        Self {
            charge_profile_max_stack_level: default_max_stack_level(),
            max_charging_profiles_installed: default_max_profiles(),
            charging_schedule_max_periods: default_max_periods(),
            charging_schedule_allowed_charging_rate_unit: default_rate_units(),
            max_composite_schedule_duration_s: default_max_composite_duration(),
            supported_charging_profile_purpose_types: default_purposes(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            transaction_message_attempts: default_transaction_attempts(),
            transaction_message_retry_interval_s: default_transaction_retry_interval(),
        }
    }
}

// ── Runtime key registry ───────────────────────────────────────

/// Outcome of a ChangeConfiguration write, before protocol mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKeyStatus {
    Accepted,
    Rejected,
    NotSupported,
}

/// Runtime view over [`ChargePointSettings`] keyed by OCPP configuration
/// key names.
#[derive(Debug)]
pub struct OcppConfig {
    settings: RwLock<ChargePointSettings>,
}

/// Standard key names, write-gated as the protocol requires.
const READONLY_KEYS: &[&str] = &[
    "NumberOfConnectors",
    "SupportedFeatureProfiles",
    "ChargeProfileMaxStackLevel",
    "MaxChargingProfilesInstalled",
    "ChargingScheduleMaxPeriods",
    "ChargingScheduleAllowedChargingRateUnit",
    "SupportedChargingProfilePurposeTypes",
    "LocalAuthListMaxLength",
    "MinimumStatusDuration",
    "WebsocketReconnectInterval",
];

impl OcppConfig {
    pub fn new(settings: ChargePointSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ChargePointSettings> {
        self.settings.read().unwrap()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ChargePointSettings> {
        self.settings.write().unwrap()
    }

    // ── Typed getters used across the runtime ──────────────

    pub fn charge_point_id(&self) -> String {
        self.read().connection.charge_point_id.clone()
    }

    pub fn central_system_uri(&self) -> String {
        self.read().connection.central_system_uri.clone()
    }

    pub fn identity(&self) -> IdentityConfig {
        self.read().identity.clone()
    }

    pub fn security_profile(&self) -> u8 {
        self.read().connection.security_profile
    }

    pub fn set_security_profile(&self, profile: u8) {
        self.write().connection.security_profile = profile;
    }

    pub fn authorization_key(&self) -> Option<String> {
        self.read().connection.authorization_key.clone()
    }

    pub fn websocket_reconnect_interval(&self) -> Duration {
        Duration::from_secs(u64::from(
            self.read().connection.websocket_reconnect_interval_s,
        ))
    }

    pub fn connection_timeout(&self) -> u32 {
        self.read().connection.connection_timeout_s
    }

    pub fn supported_ciphers_12(&self) -> Vec<String> {
        self.read().connection.supported_ciphers_12.clone()
    }

    pub fn supported_ciphers_13(&self) -> Vec<String> {
        self.read().connection.supported_ciphers_13.clone()
    }

    pub fn number_of_connectors(&self) -> u32 {
        self.read().core.number_of_connectors
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.read().core.heartbeat_interval_s))
    }

    pub fn set_heartbeat_interval_s(&self, interval: u32) {
        self.write().core.heartbeat_interval_s = interval;
    }

    pub fn meter_value_sample_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.read().core.meter_value_sample_interval_s))
    }

    pub fn clock_aligned_data_interval_s(&self) -> u32 {
        self.read().core.clock_aligned_data_interval_s
    }

    pub fn minimum_status_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.read().core.minimum_status_duration_s))
    }

    pub fn meter_values_sampled_data(&self) -> Vec<Measurand> {
        parse_measurands(&self.read().core.meter_values_sampled_data)
    }

    pub fn meter_values_aligned_data(&self) -> Vec<Measurand> {
        parse_measurands(&self.read().core.meter_values_aligned_data)
    }

    pub fn authorize_remote_tx_requests(&self) -> bool {
        self.read().core.authorize_remote_tx_requests
    }

    pub fn stop_transaction_on_invalid_id(&self) -> bool {
        self.read().core.stop_transaction_on_invalid_id
    }

    pub fn unlock_connector_on_ev_side_disconnect(&self) -> bool {
        self.read().core.unlock_connector_on_ev_side_disconnect
    }

    pub fn allow_offline_tx_for_unknown_id(&self) -> bool {
        self.read().core.allow_offline_tx_for_unknown_id
    }

    pub fn local_pre_authorize(&self) -> bool {
        self.read().core.local_pre_authorize
    }

    pub fn local_authorize_offline(&self) -> bool {
        self.read().core.local_authorize_offline
    }

    pub fn authorization_cache_enabled(&self) -> bool {
        self.read().core.authorization_cache_enabled
    }

    pub fn local_auth_list_enabled(&self) -> bool {
        self.read().local_list.enabled
    }

    pub fn charge_profile_max_stack_level(&self) -> u32 {
        self.read().smart_charging.charge_profile_max_stack_level
    }

    pub fn max_charging_profiles_installed(&self) -> usize {
        self.read().smart_charging.max_charging_profiles_installed as usize
    }

    pub fn charging_schedule_max_periods(&self) -> usize {
        self.read().smart_charging.charging_schedule_max_periods as usize
    }

    pub fn max_composite_schedule_duration_s(&self) -> u32 {
        self.read().smart_charging.max_composite_schedule_duration_s
    }

    pub fn allowed_charging_rate_units(&self) -> Vec<ChargingRateUnitType> {
        self.read()
            .smart_charging
            .charging_schedule_allowed_charging_rate_unit
            .split(',')
            .filter_map(|unit| match unit.trim() {
                "Current" | "A" => Some(ChargingRateUnitType::A),
                "Power" | "W" => Some(ChargingRateUnitType::W),
                _ => None,
            })
            .collect()
    }

    pub fn supported_charging_profile_purposes(&self) -> Vec<ChargingProfilePurposeType> {
        self.read()
            .smart_charging
            .supported_charging_profile_purpose_types
            .split(',')
            .filter_map(|purpose| match purpose.trim() {
                "ChargePointMaxProfile" => Some(ChargingProfilePurposeType::ChargePointMaxProfile),
                "TxDefaultProfile" => Some(ChargingProfilePurposeType::TxDefaultProfile),
                "TxProfile" => Some(ChargingProfilePurposeType::TxProfile),
                _ => None,
            })
            .collect()
    }

    pub fn transaction_message_attempts(&self) -> u32 {
        self.read().queue.transaction_message_attempts
    }

    pub fn transaction_message_retry_interval(&self) -> Duration {
        Duration::from_secs(u64::from(
            self.read().queue.transaction_message_retry_interval_s,
        ))
    }

    pub fn cpo_name(&self) -> Option<String> {
        self.read().security.cpo_name.clone()
    }

    pub fn has_feature_profile(&self, profile: &str) -> bool {
        self.read()
            .supported_feature_profiles
            .split(',')
            .any(|p| p.trim() == profile)
    }

    // ── Key registry ───────────────────────────────────────

    /// Look up a single key for GetConfiguration.
    ///
    /// `AuthorizationKey` is write-only and reported without a value.
    pub fn get_key(&self, key: &str) -> Option<KeyValue> {
        let s = self.read();
        let value: Option<String> = match key {
            "AllowOfflineTxForUnknownId" => Some(s.core.allow_offline_tx_for_unknown_id.to_string()),
            "AuthorizationCacheEnabled" => Some(s.core.authorization_cache_enabled.to_string()),
            "AuthorizationKey" => None,
            "AuthorizeRemoteTxRequests" => Some(s.core.authorize_remote_tx_requests.to_string()),
            "ChargeProfileMaxStackLevel" => {
                Some(s.smart_charging.charge_profile_max_stack_level.to_string())
            }
            "ChargingScheduleAllowedChargingRateUnit" => Some(
                s.smart_charging
                    .charging_schedule_allowed_charging_rate_unit
                    .clone(),
            ),
            "ChargingScheduleMaxPeriods" => {
                Some(s.smart_charging.charging_schedule_max_periods.to_string())
            }
            "ClockAlignedDataInterval" => Some(s.core.clock_aligned_data_interval_s.to_string()),
            "ConnectionTimeOut" => Some(s.connection.connection_timeout_s.to_string()),
            "CpoName" => s.security.cpo_name.clone(),
            "HeartbeatInterval" => Some(s.core.heartbeat_interval_s.to_string()),
            "LocalAuthListEnabled" => Some(s.local_list.enabled.to_string()),
            "LocalAuthListMaxLength" => Some(s.local_list.max_length.to_string()),
            "LocalAuthorizeOffline" => Some(s.core.local_authorize_offline.to_string()),
            "LocalPreAuthorize" => Some(s.core.local_pre_authorize.to_string()),
            "MaxChargingProfilesInstalled" => {
                Some(s.smart_charging.max_charging_profiles_installed.to_string())
            }
            "MeterValueSampleInterval" => Some(s.core.meter_value_sample_interval_s.to_string()),
            "MeterValuesAlignedData" => Some(s.core.meter_values_aligned_data.clone()),
            "MeterValuesSampledData" => Some(s.core.meter_values_sampled_data.clone()),
            "MinimumStatusDuration" => Some(s.core.minimum_status_duration_s.to_string()),
            "NumberOfConnectors" => Some(s.core.number_of_connectors.to_string()),
            "SecurityProfile" => Some(s.connection.security_profile.to_string()),
            "StopTransactionOnInvalidId" => Some(s.core.stop_transaction_on_invalid_id.to_string()),
            "SupportedChargingProfilePurposeTypes" => Some(
                s.smart_charging
                    .supported_charging_profile_purpose_types
                    .clone(),
            ),
            "SupportedFeatureProfiles" => Some(s.supported_feature_profiles.clone()),
            "TransactionMessageAttempts" => Some(s.queue.transaction_message_attempts.to_string()),
            "TransactionMessageRetryInterval" => {
                Some(s.queue.transaction_message_retry_interval_s.to_string())
            }
            "UnlockConnectorOnEVSideDisconnect" => {
                Some(s.core.unlock_connector_on_ev_side_disconnect.to_string())
            }
            "WebsocketReconnectInterval" => {
                Some(s.connection.websocket_reconnect_interval_s.to_string())
            }
            _ => return None,
        };

        Some(KeyValue {
            key: key.to_string(),
            readonly: READONLY_KEYS.contains(&key),
            value,
        })
    }

    /// All known keys, for an unfiltered GetConfiguration.
    pub fn all_key_values(&self) -> Vec<KeyValue> {
        const ALL_KEYS: &[&str] = &[
            "AllowOfflineTxForUnknownId",
            "AuthorizationCacheEnabled",
            "AuthorizeRemoteTxRequests",
            "ChargeProfileMaxStackLevel",
            "ChargingScheduleAllowedChargingRateUnit",
            "ChargingScheduleMaxPeriods",
            "ClockAlignedDataInterval",
            "ConnectionTimeOut",
            "CpoName",
            "HeartbeatInterval",
            "LocalAuthListEnabled",
            "LocalAuthListMaxLength",
            "LocalAuthorizeOffline",
            "LocalPreAuthorize",
            "MaxChargingProfilesInstalled",
            "MeterValueSampleInterval",
            "MeterValuesAlignedData",
            "MeterValuesSampledData",
            "MinimumStatusDuration",
            "NumberOfConnectors",
            "SecurityProfile",
            "StopTransactionOnInvalidId",
            "SupportedChargingProfilePurposeTypes",
            "SupportedFeatureProfiles",
            "TransactionMessageAttempts",
            "TransactionMessageRetryInterval",
            "UnlockConnectorOnEVSideDisconnect",
            "WebsocketReconnectInterval",
        ];
        ALL_KEYS.iter().filter_map(|k| self.get_key(k)).collect()
    }

    /// Apply a ChangeConfiguration write. Side effects (timer updates,
    /// reconnects) are the caller's responsibility.
    pub fn set_key(&self, key: &str, value: &str) -> SetKeyStatus {
        if READONLY_KEYS.contains(&key) {
            return SetKeyStatus::Rejected;
        }

        let mut s = self.write();
        match key {
            "AllowOfflineTxForUnknownId" => {
                set_bool(value, &mut s.core.allow_offline_tx_for_unknown_id)
            }
            "AuthorizationCacheEnabled" => {
                set_bool(value, &mut s.core.authorization_cache_enabled)
            }
            "AuthorizationKey" => {
                s.connection.authorization_key = Some(value.to_string());
                SetKeyStatus::Accepted
            }
            "AuthorizeRemoteTxRequests" => {
                set_bool(value, &mut s.core.authorize_remote_tx_requests)
            }
            "ClockAlignedDataInterval" => set_u32(value, &mut s.core.clock_aligned_data_interval_s),
            "ConnectionTimeOut" => set_u32(value, &mut s.connection.connection_timeout_s),
            "CpoName" => {
                s.security.cpo_name = Some(value.to_string());
                SetKeyStatus::Accepted
            }
            "HeartbeatInterval" => set_u32(value, &mut s.core.heartbeat_interval_s),
            "LocalAuthListEnabled" => set_bool(value, &mut s.local_list.enabled),
            "LocalAuthorizeOffline" => set_bool(value, &mut s.core.local_authorize_offline),
            "LocalPreAuthorize" => set_bool(value, &mut s.core.local_pre_authorize),
            "MeterValueSampleInterval" => {
                set_u32(value, &mut s.core.meter_value_sample_interval_s)
            }
            "MeterValuesAlignedData" => set_measurands(value, &mut s.core.meter_values_aligned_data),
            "MeterValuesSampledData" => set_measurands(value, &mut s.core.meter_values_sampled_data),
            "SecurityProfile" => match value.parse::<u8>() {
                Ok(profile) if profile <= 3 => {
                    s.connection.security_profile = profile;
                    SetKeyStatus::Accepted
                }
                _ => SetKeyStatus::Rejected,
            },
            "StopTransactionOnInvalidId" => {
                set_bool(value, &mut s.core.stop_transaction_on_invalid_id)
            }
            "TransactionMessageAttempts" => {
                set_u32(value, &mut s.queue.transaction_message_attempts)
            }
            "TransactionMessageRetryInterval" => {
                set_u32(value, &mut s.queue.transaction_message_retry_interval_s)
            }
            "UnlockConnectorOnEVSideDisconnect" => {
                set_bool(value, &mut s.core.unlock_connector_on_ev_side_disconnect)
            }
            _ => SetKeyStatus::NotSupported,
        }
    }
}

fn set_bool(value: &str, slot: &mut bool) -> SetKeyStatus {
    match value.to_ascii_lowercase().parse::<bool>() {
        Ok(v) => {
            *slot = v;
            SetKeyStatus::Accepted
        }
        Err(_) => SetKeyStatus::Rejected,
    }
}

fn set_u32(value: &str, slot: &mut u32) -> SetKeyStatus {
    match value.parse::<u32>() {
        Ok(v) => {
            *slot = v;
            SetKeyStatus::Accepted
        }
        Err(_) => SetKeyStatus::Rejected,
    }
}

fn set_measurands(value: &str, slot: &mut String) -> SetKeyStatus {
    if parse_measurands(value).len() == value.split(',').filter(|s| !s.trim().is_empty()).count() {
        *slot = value.to_string();
        SetKeyStatus::Accepted
    } else {
        SetKeyStatus::Rejected
    }
}

/// Parse a comma-separated measurand list, dropping unknown entries.
pub fn parse_measurands(csl: &str) -> Vec<Measurand> {
    csl.split(',')
        .filter_map(|m| {
            let trimmed = m.trim();
            if trimmed.is_empty() {
                return None;
            }
            serde_json::from_value::<Measurand>(Value::String(trimmed.to_string())).ok()
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn test_settings(connectors: u32) -> ChargePointSettings {
    ChargePointSettings {
        identity: IdentityConfig {
            charge_point_vendor: "VendorX".to_string(),
            charge_point_model: "ModelY".to_string(),
            charge_box_serial_number: Some("CB-0001".to_string()),
            charge_point_serial_number: None,
            firmware_version: Some("1.2.3".to_string()),
            iccid: None,
            imsi: None,
            meter_serial_number: None,
            meter_type: None,
        },
        connection: ConnectionConfig {
            central_system_uri: "ws://localhost:9000/ocpp".to_string(),
            charge_point_id: "CP0001".to_string(),
            security_profile: 0,
            authorization_key: None,
            websocket_reconnect_interval_s: 10,
            connection_timeout_s: 60,
            supported_ciphers_12: vec![],
            supported_ciphers_13: vec![],
        },
        core: CoreConfig {
            number_of_connectors: connectors,
            ..Default::default()
        },
        local_list: Default::default(),
        smart_charging: Default::default(),
        queue: Default::default(),
        security: SecurityConfig {
            cpo_name: Some("ExampleCPO".to_string()),
        },
        supported_feature_profiles: default_feature_profiles(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let toml_text = r#"
            [identity]
            charge_point_vendor = "VendorX"
            charge_point_model = "ModelY"

            [connection]
            central_system_uri = "ws://cs.local/ocpp"
            charge_point_id = "CP42"
        "#;
        let settings: ChargePointSettings = toml::from_str(toml_text).unwrap();
        assert_eq!(settings.core.number_of_connectors, 1);
        assert_eq!(settings.core.heartbeat_interval_s, 86400);
        assert_eq!(settings.queue.transaction_message_attempts, 3);
        assert!(settings.local_list.enabled);
    }

    #[test]
    fn readonly_keys_reject_writes() {
        let config = OcppConfig::new(test_settings(2));
        assert_eq!(
            config.set_key("NumberOfConnectors", "4"),
            SetKeyStatus::Rejected
        );
        assert_eq!(config.number_of_connectors(), 2);
    }

    #[test]
    fn unknown_key_not_supported() {
        let config = OcppConfig::new(test_settings(1));
        assert_eq!(config.set_key("NoSuchKey", "1"), SetKeyStatus::NotSupported);
        assert!(config.get_key("NoSuchKey").is_none());
    }

    #[test]
    fn writable_key_applies() {
        let config = OcppConfig::new(test_settings(1));
        assert_eq!(config.set_key("HeartbeatInterval", "120"), SetKeyStatus::Accepted);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(120));

        assert_eq!(config.set_key("HeartbeatInterval", "x"), SetKeyStatus::Rejected);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(120));
    }

    #[test]
    fn authorization_key_is_write_only() {
        let config = OcppConfig::new(test_settings(1));
        assert_eq!(config.set_key("AuthorizationKey", "s3cret"), SetKeyStatus::Accepted);
        let kv = config.get_key("AuthorizationKey").unwrap();
        assert_eq!(kv.value, None);
        assert_eq!(config.authorization_key().as_deref(), Some("s3cret"));
    }

    #[test]
    fn security_profile_range_checked() {
        let config = OcppConfig::new(test_settings(1));
        assert_eq!(config.set_key("SecurityProfile", "3"), SetKeyStatus::Accepted);
        assert_eq!(config.security_profile(), 3);
        assert_eq!(config.set_key("SecurityProfile", "7"), SetKeyStatus::Rejected);
    }

    #[test]
    fn measurand_lists_parse() {
        let measurands = parse_measurands("Energy.Active.Import.Register, Power.Active.Import");
        assert_eq!(measurands.len(), 2);
        assert!(measurands.contains(&Measurand::EnergyActiveImportRegister));
        assert!(measurands.contains(&Measurand::PowerActiveImport));

        let config = OcppConfig::new(test_settings(1));
        assert_eq!(
            config.set_key("MeterValuesSampledData", "Bogus.Measurand"),
            SetKeyStatus::Rejected
        );
    }
}
