//! Reset handler

use std::sync::Arc;
use std::time::Duration;

use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::types::{Reason, ResetRequestStatus, ResetResponseStatus};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::charge_point::ChargePoint;

/// How long the coordinator waits for all transactions to stop before
/// resetting anyway.
const RESET_TRANSACTION_BUDGET: Duration = Duration::from_secs(5);

/// Accepts when the operator allows it, then stops all transactions and
/// hands control to the reset callback from a dedicated task.
pub(crate) async fn handle_reset(cp: &Arc<ChargePoint>, unique_id: &str, payload: &Value) {
    let Some(req) = cp
        .parse_call_payload::<ResetRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(kind = ?req.kind, "Reset");

    let allowed = cp.callbacks.is_reset_allowed(req.kind.clone());
    let status = if allowed {
        ResetResponseStatus::Accepted
    } else {
        ResetResponseStatus::Rejected
    };
    cp.respond(unique_id, &ResetResponse { status }).await;

    if !allowed {
        return;
    }

    let kind = req.kind.clone();
    let coordinator = cp.clone();
    tokio::spawn(async move {
        debug!("Waiting until all transactions are stopped");
        let wait_all_stopped = async {
            while coordinator.transaction_handler.any_transaction_active()
                || coordinator.transaction_handler.any_stop_unconfirmed()
            {
                coordinator.transactions_changed.notified().await;
            }
        };
        if tokio::time::timeout(RESET_TRANSACTION_BUDGET, wait_all_stopped)
            .await
            .is_err()
        {
            warn!("Reset proceeding with transactions still open");
        }

        if let Err(e) = coordinator.stop().await {
            warn!(error = %e, "Stop before reset failed");
        }
        coordinator.callbacks.reset(kind);
    });

    let reason = match req.kind {
        ResetRequestStatus::Soft => Reason::SoftReset,
        ResetRequestStatus::Hard => Reason::HardReset,
    };
    cp.stop_all_transactions(reason).await;
}
