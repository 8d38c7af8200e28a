//! RemoteStopTransaction handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::types::{Reason, RemoteStartStopStatus};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

pub(crate) async fn handle_remote_stop_transaction(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<RemoteStopTransactionRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(transaction_id = req.transaction_id, "RemoteStopTransaction");

    let connector = cp
        .transaction_handler
        .get_connector_from_transaction_id(req.transaction_id);

    let status = if connector.is_some() {
        RemoteStartStopStatus::Accepted
    } else {
        RemoteStartStopStatus::Rejected
    };
    cp.respond(unique_id, &RemoteStopTransactionResponse { status })
        .await;

    if let Some(connector) = connector {
        cp.callbacks.stop_transaction(connector, Reason::Remote);
    }
}
