//! GetLocalListVersion handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

pub(crate) async fn handle_get_local_list_version(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(_req) = cp
        .parse_call_payload::<GetLocalListVersionRequest>(unique_id, payload)
        .await
    else {
        return;
    };

    // -1 reports the feature as unsupported
    let list_version = if cp.config.has_feature_profile("LocalAuthListManagement") {
        cp.store.local_list_version().await.unwrap_or(0)
    } else {
        -1
    };
    info!(list_version, "GetLocalListVersion");

    cp.respond(unique_id, &GetLocalListVersionResponse { list_version })
        .await;
}
