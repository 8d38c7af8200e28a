//! UpdateFirmware handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::update_firmware::{UpdateFirmwareRequest, UpdateFirmwareResponse};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Download and installation are delegated to the firmware hook; progress
/// comes back through `on_firmware_update_status_notification`.
pub(crate) async fn handle_update_firmware(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<UpdateFirmwareRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(location = req.location.as_str(), "UpdateFirmware");

    if let Some(update_firmware) = cp.callbacks.update_firmware.as_ref() {
        update_firmware(req);
    }

    cp.respond(unique_id, &UpdateFirmwareResponse {}).await;
}
