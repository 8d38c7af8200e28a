//! ReserveNow handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::reserve_now::{ReserveNowRequest, ReserveNowResponse};
use rust_ocpp::v1_6::types::{ChargePointStatus, ReservationStatus};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Delegates to the operator's reservation hook, gated on the Reservation
/// feature profile; a faulted connector reports Faulted.
pub(crate) async fn handle_reserve_now(cp: &Arc<ChargePoint>, unique_id: &str, payload: &Value) {
    let Some(req) = cp
        .parse_call_payload::<ReserveNowRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(
        reservation_id = req.reservation_id,
        connector_id = req.connector_id,
        "ReserveNow"
    );

    let status = if cp.status.get_state(req.connector_id) == ChargePointStatus::Faulted {
        ReservationStatus::Faulted
    } else if let (Some(reserve_now), true) = (
        cp.callbacks.reserve_now.as_ref(),
        cp.config.has_feature_profile("Reservation"),
    ) {
        reserve_now(
            req.reservation_id,
            req.connector_id,
            req.expiry_date,
            &req.id_tag,
            req.parent_id_tag.as_deref(),
        )
    } else {
        ReservationStatus::Rejected
    };

    cp.respond(unique_id, &ReserveNowResponse { status }).await;
}
