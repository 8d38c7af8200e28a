//! ChangeAvailability handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::types::AvailabilityStatus;
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Connector 0 targets every physical connector. Connectors with a running
/// transaction answer `Scheduled`; the change is applied when their
/// StopTransactionResponse arrives.
pub(crate) async fn handle_change_availability(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<ChangeAvailabilityRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(connector_id = req.connector_id, kind = ?req.kind, "ChangeAvailability");

    let number_of_connectors = cp.status.number_of_connectors();
    if req.connector_id > number_of_connectors {
        cp.respond(
            unique_id,
            &ChangeAvailabilityResponse {
                status: AvailabilityStatus::Rejected,
            },
        )
        .await;
        return;
    }

    let targets: Vec<u32> = if req.connector_id == 0 {
        (1..=number_of_connectors).collect()
    } else {
        vec![req.connector_id]
    };

    let mut idle = Vec::new();
    let mut transaction_running = false;
    for connector in targets {
        if cp.transaction_handler.transaction_active(connector) {
            transaction_running = true;
            cp.change_availability_queue
                .lock()
                .unwrap()
                .insert(connector, req.kind.clone());
        } else {
            idle.push(connector);
        }
    }

    let status = if transaction_running {
        AvailabilityStatus::Scheduled
    } else {
        AvailabilityStatus::Accepted
    };
    cp.respond(unique_id, &ChangeAvailabilityResponse { status })
        .await;

    for connector in idle {
        cp.apply_availability_change(connector, req.kind.clone()).await;
    }
}
