//! SignedUpdateFirmware handler (Security Whitepaper)

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;
use crate::security::{
    SecurityEvent, SignedUpdateFirmwareRequest, SignedUpdateFirmwareResponse,
    UpdateFirmwareStatusEnumType,
};

/// The signing certificate is checked before the request reaches the
/// firmware hook; a bad certificate raises a security event.
pub(crate) async fn handle_signed_update_firmware(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<SignedUpdateFirmwareRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(request_id = req.request_id, "SignedUpdateFirmware");

    let certificate_ok = cp
        .callbacks
        .verify_firmware_certificate
        .as_ref()
        .map(|f| f(&req.firmware.signing_certificate))
        .unwrap_or(false);

    let status = if !certificate_ok {
        warn!("Firmware signing certificate rejected");
        UpdateFirmwareStatusEnumType::InvalidCertificate
    } else {
        match cp.callbacks.signed_update_firmware.as_ref() {
            Some(signed_update_firmware) => signed_update_firmware(req),
            None => UpdateFirmwareStatusEnumType::Rejected,
        }
    };

    let invalid_certificate = status == UpdateFirmwareStatusEnumType::InvalidCertificate;
    cp.respond(unique_id, &SignedUpdateFirmwareResponse { status })
        .await;

    if invalid_certificate {
        cp.security_event_notification(
            SecurityEvent::InvalidFirmwareSigningCertificate,
            "certificate is invalid",
        )
        .await;
    }
}
