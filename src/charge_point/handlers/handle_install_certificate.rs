//! InstallCertificate handler (Security Whitepaper)

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::charge_point::ChargePoint;
use crate::security::{
    InstallCertificateRequest, InstallCertificateResponse, InstallCertificateStatusEnumType,
    SecurityEvent,
};

pub(crate) async fn handle_install_certificate(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<InstallCertificateRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!(certificate_type = ?req.certificate_type, "InstallCertificate");

    let status = match cp.callbacks.install_root_certificate.as_ref() {
        Some(install) => install(req),
        None => InstallCertificateStatusEnumType::Rejected,
    };

    let rejected = status == InstallCertificateStatusEnumType::Rejected;
    cp.respond(unique_id, &InstallCertificateResponse { status })
        .await;

    if rejected {
        cp.security_event_notification(
            SecurityEvent::InvalidCentralSystemCertificate,
            "root certificate rejected",
        )
        .await;
    }
}
