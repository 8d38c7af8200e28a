//! ChangeConfiguration handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::types::ConfigurationStatus;
use serde_json::Value;
use tracing::{debug, info};

use crate::charge_point::ChargePoint;
use crate::config::SetKeyStatus;

/// Applies a configuration write and runs the key-specific side effects.
/// For AuthorizationKey (profiles 1-2) and SecurityProfile the response is
/// sent before the connection is cycled.
pub(crate) async fn handle_change_configuration(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<ChangeConfigurationRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(key = req.key.as_str(), "ChangeConfiguration");

    let previous_profile = cp.config.security_profile();
    let status = match cp.config.set_key(&req.key, &req.value) {
        SetKeyStatus::Accepted => ConfigurationStatus::Accepted,
        SetKeyStatus::Rejected => ConfigurationStatus::Rejected,
        SetKeyStatus::NotSupported => ConfigurationStatus::NotSupported,
    };
    let accepted = status == ConfigurationStatus::Accepted;

    // the reconnecting keys must be acknowledged before the socket drops
    cp.respond(unique_id, &ChangeConfigurationResponse { status })
        .await;
    if !accepted {
        return;
    }

    match req.key.as_str() {
        "HeartbeatInterval" => cp.update_heartbeat_interval(),
        "MeterValueSampleInterval" => cp.update_meter_values_sample_interval(),
        "ClockAlignedDataInterval" => cp.update_clock_aligned_meter_values_interval(),
        "ConnectionTimeOut" => {
            cp.callbacks
                .set_connection_timeout(cp.config.connection_timeout());
        }
        "TransactionMessageAttempts" => {
            cp.queue
                .update_transaction_message_attempts(cp.config.transaction_message_attempts());
        }
        "TransactionMessageRetryInterval" => {
            cp.queue.update_transaction_message_retry_interval(
                cp.config.transaction_message_retry_interval(),
            );
        }
        "AuthorizationKey" => match previous_profile {
            0 => debug!("AuthorizationKey changed while on security profile 0"),
            1 | 2 => {
                info!("AuthorizationKey changed, reconnecting websocket");
                cp.reconnect().await;
            }
            _ => debug!("AuthorizationKey changed while on security profile 3, nothing to do"),
        },
        "SecurityProfile" => {
            let new_profile = cp.config.security_profile();
            if new_profile != previous_profile {
                cp.schedule_profile_switch(new_profile, previous_profile)
                    .await;
            }
        }
        _ => {}
    }
}
