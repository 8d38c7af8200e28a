//! Inbound dispatch.
//!
//! `on_message` runs every frame through the queue (for parsing and
//! response correlation), enforces the supported-message and
//! registration-state gates, and routes CS-initiated calls to their typed
//! handlers. Responses awaited by futures (Authorize, DataTransfer) have
//! already been resolved by the queue when they get here.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::handlers;
use super::{ChargePoint, ConnectionState};
use crate::errors::FrameError;
use crate::message::{EnhancedMessage, MessageType, MessageTypeId};
use crate::support::ocpp_frame::error_code;

impl ChargePoint {
    pub(crate) async fn on_message(self: &Arc<Self>, raw: &str) {
        debug!(raw, "Received message");

        let message = match self.queue.receive(raw).await {
            Ok(message) => message,
            Err(FrameError::UnknownAction { action, unique_id }) => {
                warn!(action = action.as_str(), "Received an unsupported action");
                self.send_call_error(&unique_id, error_code::NOT_SUPPORTED, "")
                    .await;
                return;
            }
            Err(FrameError::UnknownMessageId(unique_id)) => {
                warn!(unique_id = unique_id.as_str(), "Response for unknown call");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        if !self.is_supported_receiving(message.message_type) {
            warn!(message_type = ?message.message_type, "Received an unsupported message");
            if message.message_type_id == MessageTypeId::Call {
                self.send_call_error(&message.unique_id, error_code::NOT_SUPPORTED, "")
                    .await;
            }
            return;
        }

        let state = self.connection_state();
        match state {
            ConnectionState::Disconnected => {
                error!("Received a message in disconnected state, this cannot be correct");
            }
            ConnectionState::Connected => {
                if message.message_type == MessageType::BootNotificationResponse {
                    self.handle_boot_notification_response(&message).await;
                }
            }
            ConnectionState::Rejected => {
                // while rejected only a fresh boot response matters
                if message.message_type == MessageType::BootNotificationResponse {
                    self.handle_boot_notification_response(&message).await;
                }
            }
            ConnectionState::Pending => {
                if message.message_type == MessageType::BootNotificationResponse {
                    self.handle_boot_notification_response(&message).await;
                } else {
                    // the central system may configure us while pending
                    self.handle_message(&message).await;
                }
            }
            ConnectionState::Booted => {
                self.handle_message(&message).await;
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, message: &EnhancedMessage) {
        if message.message_type_id == MessageTypeId::CallError {
            warn!(
                unique_id = message.unique_id.as_str(),
                error_code = message.error_code.as_deref().unwrap_or(""),
                error_description = message.error_description.as_deref().unwrap_or(""),
                "Received CALLERROR"
            );
            return;
        }

        let unique_id = message.unique_id.as_str();
        let payload = &message.payload;

        match message.message_type {
            // responses consumed by the runtime itself
            MessageType::StartTransactionResponse => {
                self.handle_start_transaction_response(message).await
            }
            MessageType::StopTransactionResponse => {
                self.handle_stop_transaction_response(message).await
            }
            MessageType::BootNotificationResponse => {
                self.handle_boot_notification_response(message).await
            }

            // responses consumed by request futures or fire-and-forget
            MessageType::AuthorizeResponse
            | MessageType::DataTransferResponse
            | MessageType::HeartbeatResponse
            | MessageType::MeterValuesResponse
            | MessageType::StatusNotificationResponse
            | MessageType::DiagnosticsStatusNotificationResponse
            | MessageType::FirmwareStatusNotificationResponse
            | MessageType::LogStatusNotificationResponse
            | MessageType::SecurityEventNotificationResponse
            | MessageType::SignCertificateResponse
            | MessageType::SignedFirmwareStatusNotificationResponse => {}

            // CS-initiated operations
            MessageType::CancelReservation => {
                handlers::handle_cancel_reservation(self, unique_id, payload).await
            }
            MessageType::CertificateSigned => {
                handlers::handle_certificate_signed(self, unique_id, payload).await
            }
            MessageType::ChangeAvailability => {
                handlers::handle_change_availability(self, unique_id, payload).await
            }
            MessageType::ChangeConfiguration => {
                handlers::handle_change_configuration(self, unique_id, payload).await
            }
            MessageType::ClearCache => handlers::handle_clear_cache(self, unique_id, payload).await,
            MessageType::ClearChargingProfile => {
                handlers::handle_clear_charging_profile(self, unique_id, payload).await
            }
            MessageType::DataTransfer => {
                handlers::handle_data_transfer(self, unique_id, payload).await
            }
            MessageType::DeleteCertificate => {
                handlers::handle_delete_certificate(self, unique_id, payload).await
            }
            MessageType::ExtendedTriggerMessage => {
                handlers::handle_extended_trigger_message(self, unique_id, payload).await
            }
            MessageType::GetCompositeSchedule => {
                handlers::handle_get_composite_schedule(self, unique_id, payload).await
            }
            MessageType::GetConfiguration => {
                handlers::handle_get_configuration(self, unique_id, payload).await
            }
            MessageType::GetDiagnostics => {
                handlers::handle_get_diagnostics(self, unique_id, payload).await
            }
            MessageType::GetInstalledCertificateIds => {
                handlers::handle_get_installed_certificate_ids(self, unique_id, payload).await
            }
            MessageType::GetLocalListVersion => {
                handlers::handle_get_local_list_version(self, unique_id, payload).await
            }
            MessageType::GetLog => handlers::handle_get_log(self, unique_id, payload).await,
            MessageType::InstallCertificate => {
                handlers::handle_install_certificate(self, unique_id, payload).await
            }
            MessageType::RemoteStartTransaction => {
                handlers::handle_remote_start_transaction(self, unique_id, payload).await
            }
            MessageType::RemoteStopTransaction => {
                handlers::handle_remote_stop_transaction(self, unique_id, payload).await
            }
            MessageType::ReserveNow => {
                handlers::handle_reserve_now(self, unique_id, payload).await
            }
            MessageType::Reset => handlers::handle_reset(self, unique_id, payload).await,
            MessageType::SendLocalList => {
                handlers::handle_send_local_list(self, unique_id, payload).await
            }
            MessageType::SetChargingProfile => {
                handlers::handle_set_charging_profile(self, unique_id, payload).await
            }
            MessageType::SignedUpdateFirmware => {
                handlers::handle_signed_update_firmware(self, unique_id, payload).await
            }
            MessageType::TriggerMessage => {
                handlers::handle_trigger_message(self, unique_id, payload).await
            }
            MessageType::UnlockConnector => {
                handlers::handle_unlock_connector(self, unique_id, payload).await
            }
            MessageType::UpdateFirmware => {
                handlers::handle_update_firmware(self, unique_id, payload).await
            }

            other => {
                warn!(message_type = ?other, "No handler for message");
            }
        }
    }

    /// Parse a CALL payload, answering FormationViolation on failure.
    pub(crate) async fn parse_call_payload<T: serde::de::DeserializeOwned>(
        &self,
        unique_id: &str,
        payload: &serde_json::Value,
    ) -> Option<T> {
        match serde_json::from_value(payload.clone()) {
            Ok(request) => Some(request),
            Err(e) => {
                error!(error = %e, unique_id, "Failed to parse request payload");
                self.send_call_error(
                    unique_id,
                    error_code::FORMATION_VIOLATION,
                    &e.to_string(),
                )
                .await;
                None
            }
        }
    }
}
