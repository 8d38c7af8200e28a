//! ExtendedTriggerMessage handler (Security Whitepaper)

use std::sync::Arc;

use rust_ocpp::v1_6::types::{ChargePointErrorCode, ReadingContext};
use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;
use crate::security::{
    ExtendedTriggerMessageRequest, ExtendedTriggerMessageResponse, MessageTriggerEnumType,
    TriggerMessageStatusEnumType,
};

/// Like TriggerMessage, with the security-profile message set.
/// SignChargePointCertificate requires a configured CpoName.
pub(crate) async fn handle_extended_trigger_message(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<ExtendedTriggerMessageRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(requested = ?req.requested_message, connector_id = ?req.connector_id, "ExtendedTriggerMessage");

    let mut status = TriggerMessageStatusEnumType::Accepted;
    if req.requested_message == MessageTriggerEnumType::SignChargePointCertificate
        && cp.config.cpo_name().is_none()
    {
        warn!("SignChargePointCertificate requested but no CpoName is set");
        status = TriggerMessageStatusEnumType::Rejected;
    }

    let connector = req.connector_id.unwrap_or(0);
    if connector > cp.status.number_of_connectors() {
        status = TriggerMessageStatusEnumType::Rejected;
    }
    let valid = status == TriggerMessageStatusEnumType::Accepted;

    cp.respond(unique_id, &ExtendedTriggerMessageResponse { status })
        .await;

    if !valid {
        return;
    }

    match req.requested_message {
        MessageTriggerEnumType::BootNotification => cp.boot_notification().await,
        MessageTriggerEnumType::Heartbeat => cp.heartbeat().await,
        MessageTriggerEnumType::FirmwareStatusNotification => {
            let (status, request_id) = *cp.signed_firmware_status.lock().unwrap();
            cp.signed_firmware_status_notification(status, request_id)
                .await;
        }
        MessageTriggerEnumType::LogStatusNotification => {
            let (status, request_id) = *cp.log_status.lock().unwrap();
            cp.log_status_notification(status, request_id).await;
        }
        MessageTriggerEnumType::MeterValues => {
            let meter_value = cp.get_latest_meter_value(
                connector,
                &cp.config.meter_values_sampled_data(),
                ReadingContext::Trigger,
            );
            cp.send_meter_value(connector, meter_value).await;
        }
        MessageTriggerEnumType::SignChargePointCertificate => cp.sign_certificate().await,
        MessageTriggerEnumType::StatusNotification => {
            cp.status_notification(
                connector,
                ChargePointErrorCode::NoError,
                cp.status.get_state(connector),
            )
            .await;
        }
    }
}
