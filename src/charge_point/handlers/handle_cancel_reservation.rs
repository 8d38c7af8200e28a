//! CancelReservation handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::cancel_reservation::{
    CancelReservationRequest, CancelReservationResponse,
};
use rust_ocpp::v1_6::types::CancelReservationStatus;
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

pub(crate) async fn handle_cancel_reservation(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<CancelReservationRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(reservation_id = req.reservation_id, "CancelReservation");

    let cancelled = cp
        .callbacks
        .cancel_reservation
        .as_ref()
        .map(|f| f(req.reservation_id))
        .unwrap_or(false);

    let status = if cancelled {
        CancelReservationStatus::Accepted
    } else {
        CancelReservationStatus::Rejected
    };
    cp.respond(unique_id, &CancelReservationResponse { status })
        .await;
}
