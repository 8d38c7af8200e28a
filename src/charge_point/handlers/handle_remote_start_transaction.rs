//! RemoteStartTransaction handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::types::{
    AvailabilityType, ChargePointStatus, ChargingProfilePurposeType, RemoteStartStopStatus,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;

async fn reject(cp: &Arc<ChargePoint>, unique_id: &str) {
    cp.respond(
        unique_id,
        &RemoteStartTransactionResponse {
            status: RemoteStartStopStatus::Rejected,
        },
    )
    .await;
}

/// Validates the target connector and an optional TxProfile, then hands the
/// token to the EVSE. With `AuthorizeRemoteTxRequests` off the token is
/// passed pre-validated.
pub(crate) async fn handle_remote_start_transaction(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<RemoteStartTransactionRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(id_tag = req.id_tag.as_str(), connector_id = ?req.connector_id, "RemoteStartTransaction");

    if let Some(connector) = req.connector_id {
        if connector == 0 || connector > cp.status.number_of_connectors() {
            warn!(connector, "RemoteStartTransaction for invalid connector");
            return reject(cp, unique_id).await;
        }
        let availability = cp
            .store
            .connector_availability(connector)
            .await
            .unwrap_or(AvailabilityType::Operative);
        if availability == AvailabilityType::Inoperative {
            warn!(connector, "RemoteStartTransaction for inoperative connector");
            return reject(cp, unique_id).await;
        }
        if cp.transaction_handler.get_transaction(connector).is_some()
            || cp.status.get_state(connector) == ChargePointStatus::Finishing
        {
            warn!(
                connector,
                "RemoteStartTransaction for a connector with an active or finishing transaction"
            );
            return reject(cp, unique_id).await;
        }
    }

    if let Some(profile) = req.charging_profile {
        // only a TxProfile for a concrete connector may ride along
        let valid = match req.connector_id {
            Some(connector)
                if profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile =>
            {
                let handler = cp.transaction_handler.clone();
                cp.smart_charging.validate_profile(
                    &profile,
                    connector,
                    true,
                    &cp.profile_limits(),
                    move |c| handler.transaction_active(c),
                )
            }
            _ => false,
        };
        if !valid {
            return reject(cp, unique_id).await;
        }
        cp.smart_charging
            .remove_conflicting_profiles(&profile)
            .await;
        cp.smart_charging
            .add_tx_profile(profile, req.connector_id.unwrap_or(0))
            .await;
    }

    let referenced_connectors: Vec<u32> = match req.connector_id {
        Some(connector) => vec![connector],
        None => (1..=cp.status.number_of_connectors()).collect(),
    };

    cp.respond(
        unique_id,
        &RemoteStartTransactionResponse {
            status: RemoteStartStopStatus::Accepted,
        },
    )
    .await;

    let prevalidated = !cp.config.authorize_remote_tx_requests();
    cp.callbacks
        .provide_token(&req.id_tag, referenced_connectors, prevalidated);
}
