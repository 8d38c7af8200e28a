//! SendLocalList handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
use rust_ocpp::v1_6::types::{UpdateStatus, UpdateType};
use serde_json::Value;
use tracing::{info, warn};

use crate::charge_point::ChargePoint;

/// Full updates replace list and version; differential updates only apply
/// when the incoming version is newer.
pub(crate) async fn handle_send_local_list(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<SendLocalListRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(
        list_version = req.list_version,
        update_type = ?req.update_type,
        entries = req.local_authorization_list.as_ref().map(Vec::len).unwrap_or(0),
        "SendLocalList"
    );

    let status = if !cp.config.local_auth_list_enabled() {
        UpdateStatus::NotSupported
    } else {
        match req.update_type {
            UpdateType::Full => {
                let applied = async {
                    cp.store.clear_local_list().await?;
                    cp.store.set_local_list_version(req.list_version).await?;
                    if let Some(entries) = req.local_authorization_list {
                        cp.store.apply_local_list(entries).await?;
                    }
                    Ok::<(), crate::errors::StoreError>(())
                }
                .await;
                match applied {
                    Ok(()) => UpdateStatus::Accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to apply full local list");
                        UpdateStatus::Failed
                    }
                }
            }
            UpdateType::Differential => {
                let current = cp.store.local_list_version().await.unwrap_or(-1);
                match req.local_authorization_list {
                    Some(entries) if current < req.list_version => {
                        let applied = async {
                            cp.store.set_local_list_version(req.list_version).await?;
                            cp.store.apply_local_list(entries).await
                        }
                        .await;
                        match applied {
                            Ok(()) => UpdateStatus::Accepted,
                            Err(e) => {
                                warn!(error = %e, "Failed to apply differential local list");
                                UpdateStatus::Failed
                            }
                        }
                    }
                    Some(_) => UpdateStatus::VersionMismatch,
                    None => UpdateStatus::Failed,
                }
            }
        }
    };

    cp.respond(unique_id, &SendLocalListResponse { status })
        .await;
}
