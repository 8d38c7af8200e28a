//! GetDiagnostics handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// The upload itself is operator territory; we only report the file name
/// the hook chose, if any.
pub(crate) async fn handle_get_diagnostics(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<GetDiagnosticsRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(location = req.location.as_str(), "GetDiagnostics");

    let file_name = cp
        .callbacks
        .upload_diagnostics
        .as_ref()
        .and_then(|f| f(req));

    cp.respond(unique_id, &GetDiagnosticsResponse { file_name })
        .await;
}
