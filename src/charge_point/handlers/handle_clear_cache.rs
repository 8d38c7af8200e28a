//! ClearCache handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
use rust_ocpp::v1_6::types::ClearCacheStatus;
use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;

pub(crate) async fn handle_clear_cache(cp: &Arc<ChargePoint>, unique_id: &str, payload: &Value) {
    let Some(_req) = cp
        .parse_call_payload::<ClearCacheRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!("ClearCache");

    let status = if cp.config.authorization_cache_enabled() {
        match cp.store.clear_authorization_cache().await {
            Ok(()) => ClearCacheStatus::Accepted,
            Err(e) => {
                warn!(error = %e, "Failed to clear authorization cache");
                ClearCacheStatus::Rejected
            }
        }
    } else {
        ClearCacheStatus::Rejected
    };

    cp.respond(unique_id, &ClearCacheResponse { status }).await;
}
