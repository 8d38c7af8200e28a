//! SetChargingProfile handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::types::{ChargingProfilePurposeType, ChargingProfileStatus};
use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;

/// Validates against the configured limits, replaces any profile with the
/// same id or (stackLevel, purpose) pair and installs by purpose.
pub(crate) async fn handle_set_charging_profile(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<SetChargingProfileRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    let profile = req.cs_charging_profiles;
    let connector_id = req.connector_id.max(0) as u32;
    info!(
        connector_id,
        profile_id = profile.charging_profile_id,
        purpose = ?profile.charging_profile_purpose,
        "SetChargingProfile"
    );

    let supported_purposes = cp.config.supported_charging_profile_purposes();
    let handler = cp.transaction_handler.clone();
    let accepted = if !supported_purposes.contains(&profile.charging_profile_purpose) {
        warn!(purpose = ?profile.charging_profile_purpose, "Profile purpose not supported");
        false
    } else {
        req.connector_id >= 0
            && cp.smart_charging.validate_profile(
                &profile,
                connector_id,
                false,
                &cp.profile_limits(),
                move |c| handler.transaction_active(c),
            )
    };

    if accepted {
        // a profile with the same id or the same stackLevel/purpose pair
        // replaces the existing one
        cp.smart_charging.remove_conflicting_profiles(&profile).await;
        match profile.charging_profile_purpose {
            ChargingProfilePurposeType::ChargePointMaxProfile => {
                cp.smart_charging.add_charge_point_max_profile(profile).await;
            }
            ChargingProfilePurposeType::TxDefaultProfile => {
                cp.smart_charging
                    .add_tx_default_profile(profile, connector_id)
                    .await;
            }
            ChargingProfilePurposeType::TxProfile => {
                cp.smart_charging.add_tx_profile(profile, connector_id).await;
            }
        }
    }

    let status = if accepted {
        ChargingProfileStatus::Accepted
    } else {
        ChargingProfileStatus::Rejected
    };
    cp.respond(unique_id, &SetChargingProfileResponse { status })
        .await;

    if accepted {
        cp.callbacks.signal_set_charging_profiles();
    }
}
