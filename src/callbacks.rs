//! Operator-supplied policy hooks.
//!
//! [`ChargePointCallbacks`] is the capability record the runtime consumes
//! to reach the EVSE hardware adapter and site policies. Every hook is
//! optional; an unset hook disables the corresponding feature (reset is
//! rejected, unlock reports NotSupported, and so on).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::get_diagnostics::GetDiagnosticsRequest;
use rust_ocpp::v1_6::messages::update_firmware::UpdateFirmwareRequest;
use rust_ocpp::v1_6::types::{Reason, ReservationStatus, ResetRequestStatus};

use crate::security::{
    CertificateHashDataType, CertificateUseEnumType, DeleteCertificateStatusEnumType,
    GetLogRequest, GetLogResponse, InstallCertificateRequest, InstallCertificateStatusEnumType,
    SignedUpdateFirmwareRequest, UpdateFirmwareStatusEnumType,
};

/// Outcome of validating a CSMS-signed charge-point certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateVerification {
    Valid,
    Expired,
    InvalidSignature,
    InvalidCertificateChain,
    InvalidCommonName,
}

impl CertificateVerification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "Valid",
            Self::Expired => "Expired",
            Self::InvalidSignature => "InvalidSignature",
            Self::InvalidCertificateChain => "InvalidCertificateChain",
            Self::InvalidCommonName => "InvalidCommonName",
        }
    }
}

type Hook<T> = Option<Arc<T>>;

/// Policy and hardware hooks consumed by the protocol runtime.
///
/// Hooks run on the runtime's event loop; long-running work belongs in the
/// implementor's own tasks.
#[derive(Clone, Default)]
pub struct ChargePointCallbacks {
    pub enable_evse: Hook<dyn Fn(u32) -> bool + Send + Sync>,
    pub disable_evse: Hook<dyn Fn(u32) -> bool + Send + Sync>,
    pub pause_charging: Hook<dyn Fn(u32) -> bool + Send + Sync>,
    pub resume_charging: Hook<dyn Fn(u32) -> bool + Send + Sync>,

    /// Hand a token to the EVSE for session matching after
    /// RemoteStartTransaction. `prevalidated` skips the Authorize round
    /// trip when `AuthorizeRemoteTxRequests` is off.
    pub provide_token: Hook<dyn Fn(&str, Vec<u32>, bool) + Send + Sync>,

    /// Ask the EVSE to end the session on a connector; the adapter is
    /// expected to call back `on_transaction_stopped`.
    pub stop_transaction: Hook<dyn Fn(u32, Reason) -> bool + Send + Sync>,

    pub unlock_connector: Hook<dyn Fn(u32) -> bool + Send + Sync>,

    pub reserve_now: Hook<
        dyn Fn(i32, u32, DateTime<Utc>, &str, Option<&str>) -> ReservationStatus + Send + Sync,
    >,
    pub cancel_reservation: Hook<dyn Fn(i32) -> bool + Send + Sync>,

    pub is_reset_allowed: Hook<dyn Fn(ResetRequestStatus) -> bool + Send + Sync>,
    pub reset: Hook<dyn Fn(ResetRequestStatus) + Send + Sync>,

    pub set_connection_timeout: Hook<dyn Fn(u32) + Send + Sync>,
    pub connection_state_changed: Hook<dyn Fn(bool) + Send + Sync>,

    /// Installed charging profiles changed; the energy manager should
    /// recompute setpoints.
    pub signal_set_charging_profiles: Hook<dyn Fn() + Send + Sync>,
    pub set_max_current: Hook<dyn Fn(u32, f64) -> bool + Send + Sync>,

    /// Returns the upload file name, when an upload was started.
    pub upload_diagnostics: Hook<dyn Fn(GetDiagnosticsRequest) -> Option<String> + Send + Sync>,
    pub upload_logs: Hook<dyn Fn(GetLogRequest) -> GetLogResponse + Send + Sync>,
    pub update_firmware: Hook<dyn Fn(UpdateFirmwareRequest) + Send + Sync>,
    pub signed_update_firmware:
        Hook<dyn Fn(SignedUpdateFirmwareRequest) -> UpdateFirmwareStatusEnumType + Send + Sync>,
    /// Validates the firmware signing certificate of SignedUpdateFirmware.
    pub verify_firmware_certificate: Hook<dyn Fn(&str) -> bool + Send + Sync>,

    // PKI seam: X.509 handling stays outside the protocol runtime.
    /// Produce a CSR for (CpoName, chargeBoxSerialNumber).
    pub generate_csr: Hook<dyn Fn(&str, &str) -> Option<String> + Send + Sync>,
    /// Verify a signed client certificate chain against the serial.
    pub verify_charge_point_certificate:
        Hook<dyn Fn(&str, &str) -> CertificateVerification + Send + Sync>,
    pub install_charge_point_certificate: Hook<dyn Fn(&str) -> bool + Send + Sync>,
    /// Seconds until the chain's leaf becomes valid; <= 0 means already.
    pub charge_point_certificate_valid_in: Hook<dyn Fn(&str) -> i64 + Send + Sync>,
    pub install_root_certificate:
        Hook<dyn Fn(InstallCertificateRequest) -> InstallCertificateStatusEnumType + Send + Sync>,
    pub delete_root_certificate: Hook<
        dyn Fn(CertificateHashDataType, u8) -> DeleteCertificateStatusEnumType + Send + Sync,
    >,
    pub installed_certificate_hashes:
        Hook<dyn Fn(CertificateUseEnumType) -> Vec<CertificateHashDataType> + Send + Sync>,
}

impl ChargePointCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enable_evse(&self, connector: u32) -> bool {
        self.enable_evse.as_ref().map(|f| f(connector)).unwrap_or(true)
    }

    pub(crate) fn disable_evse(&self, connector: u32) -> bool {
        self.disable_evse
            .as_ref()
            .map(|f| f(connector))
            .unwrap_or(true)
    }

    pub(crate) fn pause_charging(&self, connector: u32) -> bool {
        self.pause_charging
            .as_ref()
            .map(|f| f(connector))
            .unwrap_or(false)
    }

    pub(crate) fn provide_token(&self, id_token: &str, connectors: Vec<u32>, prevalidated: bool) {
        if let Some(f) = &self.provide_token {
            f(id_token, connectors, prevalidated);
        }
    }

    pub(crate) fn stop_transaction(&self, connector: u32, reason: Reason) -> bool {
        self.stop_transaction
            .as_ref()
            .map(|f| f(connector, reason))
            .unwrap_or(false)
    }

    pub(crate) fn unlock_connector(&self, connector: u32) -> Option<bool> {
        self.unlock_connector.as_ref().map(|f| f(connector))
    }

    pub(crate) fn is_reset_allowed(&self, kind: ResetRequestStatus) -> bool {
        match (&self.is_reset_allowed, &self.reset) {
            (Some(allowed), Some(_)) => allowed(kind),
            _ => false,
        }
    }

    pub(crate) fn reset(&self, kind: ResetRequestStatus) {
        if let Some(f) = &self.reset {
            f(kind);
        }
    }

    pub(crate) fn set_connection_timeout(&self, seconds: u32) {
        if let Some(f) = &self.set_connection_timeout {
            f(seconds);
        }
    }

    pub(crate) fn connection_state_changed(&self, connected: bool) {
        if let Some(f) = &self.connection_state_changed {
            f(connected);
        }
    }

    pub(crate) fn signal_set_charging_profiles(&self) {
        if let Some(f) = &self.signal_set_charging_profiles {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_hooks_use_safe_defaults() {
        let callbacks = ChargePointCallbacks::new();
        assert!(!callbacks.is_reset_allowed(ResetRequestStatus::Soft));
        assert!(!callbacks.stop_transaction(1, Reason::Local));
        assert!(callbacks.unlock_connector(1).is_none());
        assert!(callbacks.enable_evse(1));
        callbacks.provide_token("TAG01", vec![1], true);
    }

    #[test]
    fn reset_requires_both_hooks() {
        let callbacks = ChargePointCallbacks {
            is_reset_allowed: Some(Arc::new(|_| true)),
            ..Default::default()
        };
        // no reset hook registered, so reset must be rejected
        assert!(!callbacks.is_reset_allowed(ResetRequestStatus::Hard));
    }
}
