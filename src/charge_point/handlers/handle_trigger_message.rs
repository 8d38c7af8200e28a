//! TriggerMessage handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::types::{ChargePointErrorCode, MessageTrigger, ReadingContext, TriggerMessageStatus};
use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;

/// Accepts supported triggers and emits the requested message after the
/// response has gone out.
pub(crate) async fn handle_trigger_message(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<TriggerMessageRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(requested = ?req.requested_message, connector_id = ?req.connector_id, "TriggerMessage");

    let connector = req.connector_id.unwrap_or(0);
    let valid = connector <= cp.status.number_of_connectors();
    let status = if valid {
        TriggerMessageStatus::Accepted
    } else {
        TriggerMessageStatus::Rejected
    };

    cp.respond(unique_id, &TriggerMessageResponse { status })
        .await;

    if !valid {
        return;
    }

    match req.requested_message {
        MessageTrigger::BootNotification => cp.boot_notification().await,
        MessageTrigger::Heartbeat => cp.heartbeat().await,
        MessageTrigger::DiagnosticsStatusNotification => {
            let status = cp.diagnostics_status.lock().unwrap().clone();
            cp.diagnostics_status_notification(status).await;
        }
        MessageTrigger::FirmwareStatusNotification => {
            let status = cp.firmware_status.lock().unwrap().clone();
            cp.firmware_status_notification(status).await;
        }
        MessageTrigger::MeterValues => {
            let meter_value = cp.get_latest_meter_value(
                connector,
                &cp.config.meter_values_sampled_data(),
                ReadingContext::Trigger,
            );
            cp.send_meter_value(connector, meter_value).await;
        }
        MessageTrigger::StatusNotification => {
            cp.status_notification(
                connector,
                ChargePointErrorCode::NoError,
                cp.status.get_state(connector),
            )
            .await;
        }
    }
}
