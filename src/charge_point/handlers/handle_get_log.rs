//! GetLog handler (Security Whitepaper)

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;
use crate::security::{GetLogRequest, GetLogResponse, LogStatusEnumType};

pub(crate) async fn handle_get_log(cp: &Arc<ChargePoint>, unique_id: &str, payload: &Value) {
    let Some(req) = cp
        .parse_call_payload::<GetLogRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(log_type = ?req.log_type, request_id = req.request_id, "GetLog");

    let response = match cp.callbacks.upload_logs.as_ref() {
        Some(upload_logs) => upload_logs(req),
        None => GetLogResponse {
            status: LogStatusEnumType::Rejected,
            filename: None,
        },
    };

    cp.respond(unique_id, &response).await;
}
