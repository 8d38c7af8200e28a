//! GetInstalledCertificateIds handler (Security Whitepaper)

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;
use crate::security::{
    GetInstalledCertificateIdsRequest, GetInstalledCertificateIdsResponse,
    GetInstalledCertificateStatusEnumType,
};

pub(crate) async fn handle_get_installed_certificate_ids(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<GetInstalledCertificateIdsRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(certificate_type = ?req.certificate_type, "GetInstalledCertificateIds");

    let hashes = cp
        .callbacks
        .installed_certificate_hashes
        .as_ref()
        .map(|f| f(req.certificate_type))
        .unwrap_or_default();

    let response = if hashes.is_empty() {
        GetInstalledCertificateIdsResponse {
            status: GetInstalledCertificateStatusEnumType::NotFound,
            certificate_hash_data: None,
        }
    } else {
        GetInstalledCertificateIdsResponse {
            status: GetInstalledCertificateStatusEnumType::Accepted,
            certificate_hash_data: Some(hashes),
        }
    };

    cp.respond(unique_id, &response).await;
}
