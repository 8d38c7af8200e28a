//! CertificateSigned handler (Security Whitepaper)

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::callbacks::CertificateVerification;
use crate::charge_point::ChargePoint;
use crate::security::{
    CertificateSignedRequest, CertificateSignedResponse, CertificateSignedStatusEnumType,
    SecurityEvent,
};

/// Verifies the chain against our CSR subject and installs it. On security
/// profile 3 a reconnect is scheduled so the new client certificate is
/// presented: immediately when the chain is already valid, otherwise when
/// it becomes valid.
pub(crate) async fn handle_certificate_signed(
    cp: &Arc<ChargePoint>,
    unique_id: &str,
    payload: &Value,
) {
    let Some(req) = cp
        .parse_call_payload::<CertificateSignedRequest>(unique_id, payload)
        .await
    else {
        return;
    };
    info!("CertificateSigned");

    let serial = cp
        .config
        .identity()
        .charge_box_serial_number
        .unwrap_or_default();
    let verification = cp
        .callbacks
        .verify_charge_point_certificate
        .as_ref()
        .map(|f| f(&req.certificate_chain, &serial))
        .unwrap_or(CertificateVerification::InvalidCertificateChain);

    let mut status = CertificateSignedStatusEnumType::Rejected;
    if verification == CertificateVerification::Valid {
        let installed = cp
            .callbacks
            .install_charge_point_certificate
            .as_ref()
            .map(|f| f(&req.certificate_chain))
            .unwrap_or(false);
        if installed {
            status = CertificateSignedStatusEnumType::Accepted;
        }
    }

    let accepted = status == CertificateSignedStatusEnumType::Accepted;
    cp.respond(unique_id, &CertificateSignedResponse { status })
        .await;

    if !accepted {
        warn!(result = verification.as_str(), "Charge point certificate rejected");
        cp.security_event_notification(
            SecurityEvent::InvalidChargePointCertificate,
            verification.as_str(),
        )
        .await;
        return;
    }

    if cp.config.security_profile() == 3 {
        let valid_in = cp
            .callbacks
            .charge_point_certificate_valid_in
            .as_ref()
            .map(|f| f(&req.certificate_chain))
            .unwrap_or(0);
        if valid_in <= 0 {
            cp.reconnect().await;
        } else {
            info!(valid_in_s = valid_in, "Reconnecting when the new certificate becomes valid");
            let weak = Arc::downgrade(cp);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(valid_in as u64)).await;
                if let Some(cp) = weak.upgrade() {
                    cp.reconnect().await;
                }
            });
        }
    }
}
