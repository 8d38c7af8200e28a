//! UnlockConnector handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use rust_ocpp::v1_6::types::{Reason, UnlockStatus};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Stops a still-running session first, then asks the hardware to release
/// the connector latch.
pub(crate) async fn handle_unlock_connector(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<UnlockConnectorRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(connector_id = req.connector_id, "UnlockConnector");

    let connector = req.connector_id;
    let status = if connector == 0 || connector > cp.status.number_of_connectors() {
        UnlockStatus::NotSupported
    } else {
        if cp.transaction_handler.transaction_active(connector) {
            info!(connector, "Unlock requested with an active session, stopping it first");
            cp.callbacks
                .stop_transaction(connector, Reason::UnlockCommand);
        }
        match cp.callbacks.unlock_connector(connector) {
            Some(true) => UnlockStatus::Unlocked,
            Some(false) => UnlockStatus::UnlockFailed,
            None => UnlockStatus::NotSupported,
        }
    };

    cp.respond(unique_id, &UnlockConnectorResponse { status })
        .await;
}
