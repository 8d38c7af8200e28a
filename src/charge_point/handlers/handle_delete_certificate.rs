//! DeleteCertificate handler (Security Whitepaper)

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;
use crate::security::{
    DeleteCertificateRequest, DeleteCertificateResponse, DeleteCertificateStatusEnumType,
};

pub(crate) async fn handle_delete_certificate(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<DeleteCertificateRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(
        serial_number = req.certificate_hash_data.serial_number.as_str(),
        "DeleteCertificate"
    );

    let status = match cp.callbacks.delete_root_certificate.as_ref() {
        Some(delete) => delete(req.certificate_hash_data, cp.config.security_profile()),
        None => DeleteCertificateStatusEnumType::Failed,
    };

    cp.respond(unique_id, &DeleteCertificateResponse { status })
        .await;
}
