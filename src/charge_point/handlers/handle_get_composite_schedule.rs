//! GetCompositeSchedule handler

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
use rust_ocpp::v1_6::types::GetCompositeScheduleStatus;
use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;

pub(crate) async fn handle_get_composite_schedule(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<GetCompositeScheduleRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(connector_id = req.connector_id, duration = req.duration, "GetCompositeSchedule");

    let number_of_connectors = cp.status.number_of_connectors() as i32;
    let allowed_units = cp.config.allowed_charging_rate_units();

    let response = if req.connector_id < 0 || req.connector_id > number_of_connectors {
        GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Rejected,
            connector_id: None,
            schedule_start: None,
            charging_schedule: None,
        }
    } else if req
        .charging_rate_unit
        .as_ref()
        .is_some_and(|unit| !allowed_units.contains(unit))
    {
        warn!("GetCompositeSchedule: charging rate unit not allowed");
        GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Rejected,
            connector_id: None,
            schedule_start: None,
            charging_schedule: None,
        }
    } else {
        let max_duration = cp.config.max_composite_schedule_duration_s();
        let duration = req.duration.max(0) as u32;
        if duration > max_duration {
            warn!(
                requested = duration,
                maximum = max_duration,
                "GetCompositeSchedule duration clamped"
            );
        }
        let duration = duration.min(max_duration);

        let start = Utc::now();
        let end = start + chrono::Duration::seconds(i64::from(duration));
        let connector = req.connector_id as u32;
        let valid = cp.smart_charging.get_valid_profiles(start, end, connector);
        let schedule = cp.smart_charging.calculate_composite_schedule(
            &valid,
            start,
            duration,
            req.charging_rate_unit,
        );

        GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Accepted,
            connector_id: Some(req.connector_id),
            schedule_start: Some(start),
            charging_schedule: Some(schedule),
        }
    };

    cp.respond(unique_id, &response).await;
}
