//! ClearChargingProfile handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v1_6::types::ClearChargingProfileStatus;
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Clears by id or by filter; an empty request clears everything. Repeating
/// the same request yields the same stored set, only the status differs
/// (Unknown when nothing matched).
pub(crate) async fn handle_clear_charging_profile(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<ClearChargingProfileRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(id = ?req.id, connector_id = ?req.connector_id, "ClearChargingProfile");

    let connector = req.connector_id.map(|c| c.max(0) as u32);
    let stack_level = req.stack_level.map(|s| s.max(0) as u32);

    let cleared = if req.id.is_none()
        && req.connector_id.is_none()
        && req.charging_profile_purpose.is_none()
        && req.stack_level.is_none()
    {
        cp.smart_charging.clear_all_profiles().await;
        true
    } else if req.id.is_some()
        && cp
            .smart_charging
            .clear_all_profiles_with_filter(
                req.id,
                connector,
                stack_level,
                req.charging_profile_purpose.clone(),
                true,
            )
            .await
    {
        true
    } else {
        cp.smart_charging
            .clear_all_profiles_with_filter(
                req.id,
                connector,
                stack_level,
                req.charging_profile_purpose,
                false,
            )
            .await
    };

    let status = if cleared {
        ClearChargingProfileStatus::Accepted
    } else {
        ClearChargingProfileStatus::Unknown
    };
    cp.respond(unique_id, &ClearChargingProfileResponse { status })
        .await;
}
