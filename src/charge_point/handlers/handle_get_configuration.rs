//! GetConfiguration handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

pub(crate) async fn handle_get_configuration(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<GetConfigurationRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(keys = ?req.key, "GetConfiguration");

    let mut configuration_key = Vec::new();
    let mut unknown_key = Vec::new();

    match req.key {
        None => configuration_key = cp.config.all_key_values(),
        Some(keys) if keys.is_empty() => configuration_key = cp.config.all_key_values(),
        Some(keys) => {
            for key in keys {
                match cp.config.get_key(&key) {
                    Some(kv) => configuration_key.push(kv),
                    None => unknown_key.push(key),
                }
            }
        }
    }

    let response = GetConfigurationResponse {
        configuration_key: (!configuration_key.is_empty()).then_some(configuration_key),
        unknown_key: (!unknown_key.is_empty()).then_some(unknown_key),
    };
    cp.respond(unique_id, &response).await;
}
