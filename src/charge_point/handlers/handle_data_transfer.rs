//! DataTransfer handler (CS→CP)

use std::sync::Arc;

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::types::DataTransferStatus;
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Routes to the registered vendor/message callback; the callback runs
/// after the response went out.
pub(crate) async fn handle_data_transfer(cp: &Arc<ChargePoint>, unique_id: &str, payload: &Value) {
    let Some(req) = cp
        .parse_call_payload::<DataTransferRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(
        vendor_id = req.vendor_string.as_str(),
        message_id = ?req.message_id,
        "DataTransfer"
    );

    let message_id = req.message_id.clone().unwrap_or_default();
    let callback = cp.data_transfer_callback(&req.vendor_string, &message_id);

    let status = if callback.is_some() {
        DataTransferStatus::Accepted
    } else if cp.has_data_transfer_vendor(&req.vendor_string) {
        DataTransferStatus::UnknownMessageId
    } else {
        DataTransferStatus::UnknownVendorId
    };

    cp.respond(
        unique_id,
        &DataTransferResponse {
            status,
            data: None,
        },
    )
    .await;

    if let Some(callback) = callback {
        callback(req.data.as_deref().unwrap_or(""));
    }
}
