//! OCPP 1.6 message classification.
//!
//! [`MessageType`] names every message the charge point can send or receive,
//! including the Security Whitepaper extensions. The message queue uses it to
//! decide persistence and retry behaviour; the dispatcher uses it for routing
//! and feature gating.

pub mod queue;

use std::collections::HashSet;

use serde_json::Value;

/// OCPP-J frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTypeId {
    Call,
    CallResult,
    CallError,
}

/// Every OCPP 1.6 message type this runtime knows about.
///
/// `...Response` variants are used for CALLRESULT classification: a
/// CALLRESULT carries no action on the wire, so the queue derives the type
/// from the pending call it correlates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Authorize,
    AuthorizeResponse,
    BootNotification,
    BootNotificationResponse,
    CancelReservation,
    CertificateSigned,
    ChangeAvailability,
    ChangeConfiguration,
    ClearCache,
    ClearChargingProfile,
    DataTransfer,
    DataTransferResponse,
    DeleteCertificate,
    DiagnosticsStatusNotification,
    DiagnosticsStatusNotificationResponse,
    ExtendedTriggerMessage,
    FirmwareStatusNotification,
    FirmwareStatusNotificationResponse,
    GetCompositeSchedule,
    GetConfiguration,
    GetDiagnostics,
    GetInstalledCertificateIds,
    GetLocalListVersion,
    GetLog,
    Heartbeat,
    HeartbeatResponse,
    InstallCertificate,
    LogStatusNotification,
    LogStatusNotificationResponse,
    MeterValues,
    MeterValuesResponse,
    RemoteStartTransaction,
    RemoteStopTransaction,
    ReserveNow,
    Reset,
    SecurityEventNotification,
    SecurityEventNotificationResponse,
    SendLocalList,
    SetChargingProfile,
    SignCertificate,
    SignCertificateResponse,
    SignedFirmwareStatusNotification,
    SignedFirmwareStatusNotificationResponse,
    SignedUpdateFirmware,
    StartTransaction,
    StartTransactionResponse,
    StatusNotification,
    StatusNotificationResponse,
    StopTransaction,
    StopTransactionResponse,
    TriggerMessage,
    UnlockConnector,
    UpdateFirmware,
}

impl MessageType {
    /// The wire action name for CALL frames.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Authorize => "Authorize",
            Self::BootNotification => "BootNotification",
            Self::CancelReservation => "CancelReservation",
            Self::CertificateSigned => "CertificateSigned",
            Self::ChangeAvailability => "ChangeAvailability",
            Self::ChangeConfiguration => "ChangeConfiguration",
            Self::ClearCache => "ClearCache",
            Self::ClearChargingProfile => "ClearChargingProfile",
            Self::DataTransfer => "DataTransfer",
            Self::DeleteCertificate => "DeleteCertificate",
            Self::DiagnosticsStatusNotification => "DiagnosticsStatusNotification",
            Self::ExtendedTriggerMessage => "ExtendedTriggerMessage",
            Self::FirmwareStatusNotification => "FirmwareStatusNotification",
            Self::GetCompositeSchedule => "GetCompositeSchedule",
            Self::GetConfiguration => "GetConfiguration",
            Self::GetDiagnostics => "GetDiagnostics",
            Self::GetInstalledCertificateIds => "GetInstalledCertificateIds",
            Self::GetLocalListVersion => "GetLocalListVersion",
            Self::GetLog => "GetLog",
            Self::Heartbeat => "Heartbeat",
            Self::InstallCertificate => "InstallCertificate",
            Self::LogStatusNotification => "LogStatusNotification",
            Self::MeterValues => "MeterValues",
            Self::RemoteStartTransaction => "RemoteStartTransaction",
            Self::RemoteStopTransaction => "RemoteStopTransaction",
            Self::ReserveNow => "ReserveNow",
            Self::Reset => "Reset",
            Self::SecurityEventNotification => "SecurityEventNotification",
            Self::SendLocalList => "SendLocalList",
            Self::SetChargingProfile => "SetChargingProfile",
            Self::SignCertificate => "SignCertificate",
            Self::SignedFirmwareStatusNotification => "SignedFirmwareStatusNotification",
            Self::SignedUpdateFirmware => "SignedUpdateFirmware",
            Self::StartTransaction => "StartTransaction",
            Self::StatusNotification => "StatusNotification",
            Self::StopTransaction => "StopTransaction",
            Self::TriggerMessage => "TriggerMessage",
            Self::UnlockConnector => "UnlockConnector",
            Self::UpdateFirmware => "UpdateFirmware",
            // Response variants never appear as a CALL action.
            Self::AuthorizeResponse
            | Self::BootNotificationResponse
            | Self::DataTransferResponse
            | Self::DiagnosticsStatusNotificationResponse
            | Self::FirmwareStatusNotificationResponse
            | Self::HeartbeatResponse
            | Self::LogStatusNotificationResponse
            | Self::MeterValuesResponse
            | Self::SecurityEventNotificationResponse
            | Self::SignCertificateResponse
            | Self::SignedFirmwareStatusNotificationResponse
            | Self::StartTransactionResponse
            | Self::StatusNotificationResponse
            | Self::StopTransactionResponse => "",
        }
    }

    /// Resolve a CALL action name.
    pub fn from_action(action: &str) -> Option<Self> {
        let message_type = match action {
            "Authorize" => Self::Authorize,
            "BootNotification" => Self::BootNotification,
            "CancelReservation" => Self::CancelReservation,
            "CertificateSigned" => Self::CertificateSigned,
            "ChangeAvailability" => Self::ChangeAvailability,
            "ChangeConfiguration" => Self::ChangeConfiguration,
            "ClearCache" => Self::ClearCache,
            "ClearChargingProfile" => Self::ClearChargingProfile,
            "DataTransfer" => Self::DataTransfer,
            "DeleteCertificate" => Self::DeleteCertificate,
            "DiagnosticsStatusNotification" => Self::DiagnosticsStatusNotification,
            "ExtendedTriggerMessage" => Self::ExtendedTriggerMessage,
            "FirmwareStatusNotification" => Self::FirmwareStatusNotification,
            "GetCompositeSchedule" => Self::GetCompositeSchedule,
            "GetConfiguration" => Self::GetConfiguration,
            "GetDiagnostics" => Self::GetDiagnostics,
            "GetInstalledCertificateIds" => Self::GetInstalledCertificateIds,
            "GetLocalListVersion" => Self::GetLocalListVersion,
            "GetLog" => Self::GetLog,
            "Heartbeat" => Self::Heartbeat,
            "InstallCertificate" => Self::InstallCertificate,
            "LogStatusNotification" => Self::LogStatusNotification,
            "MeterValues" => Self::MeterValues,
            "RemoteStartTransaction" => Self::RemoteStartTransaction,
            "RemoteStopTransaction" => Self::RemoteStopTransaction,
            "ReserveNow" => Self::ReserveNow,
            "Reset" => Self::Reset,
            "SecurityEventNotification" => Self::SecurityEventNotification,
            "SendLocalList" => Self::SendLocalList,
            "SetChargingProfile" => Self::SetChargingProfile,
            "SignCertificate" => Self::SignCertificate,
            "SignedFirmwareStatusNotification" => Self::SignedFirmwareStatusNotification,
            "SignedUpdateFirmware" => Self::SignedUpdateFirmware,
            "StartTransaction" => Self::StartTransaction,
            "StatusNotification" => Self::StatusNotification,
            "StopTransaction" => Self::StopTransaction,
            "TriggerMessage" => Self::TriggerMessage,
            "UnlockConnector" => Self::UnlockConnector,
            "UpdateFirmware" => Self::UpdateFirmware,
            _ => return None,
        };
        Some(message_type)
    }

    /// The response type a CALLRESULT for this call classifies as.
    pub fn response_type(&self) -> Option<Self> {
        let response = match self {
            Self::Authorize => Self::AuthorizeResponse,
            Self::BootNotification => Self::BootNotificationResponse,
            Self::DataTransfer => Self::DataTransferResponse,
            Self::DiagnosticsStatusNotification => Self::DiagnosticsStatusNotificationResponse,
            Self::FirmwareStatusNotification => Self::FirmwareStatusNotificationResponse,
            Self::Heartbeat => Self::HeartbeatResponse,
            Self::LogStatusNotification => Self::LogStatusNotificationResponse,
            Self::MeterValues => Self::MeterValuesResponse,
            Self::SecurityEventNotification => Self::SecurityEventNotificationResponse,
            Self::SignCertificate => Self::SignCertificateResponse,
            Self::SignedFirmwareStatusNotification => {
                Self::SignedFirmwareStatusNotificationResponse
            }
            Self::StartTransaction => Self::StartTransactionResponse,
            Self::StatusNotification => Self::StatusNotificationResponse,
            Self::StopTransaction => Self::StopTransactionResponse,
            _ => return None,
        };
        Some(response)
    }

    /// Transaction-class messages are persisted across restarts and retried
    /// with back-off; everything else is best-effort.
    pub fn is_transaction_related(&self) -> bool {
        matches!(
            self,
            Self::StartTransaction
                | Self::StopTransaction
                | Self::MeterValues
                | Self::SecurityEventNotification
        )
    }

    /// Message types the charge point accepts from the central system by
    /// default (`SupportedMessageTypesReceiving`).
    pub fn default_supported_receiving() -> HashSet<Self> {
        [
            Self::AuthorizeResponse,
            Self::BootNotificationResponse,
            Self::CancelReservation,
            Self::CertificateSigned,
            Self::ChangeAvailability,
            Self::ChangeConfiguration,
            Self::ClearCache,
            Self::ClearChargingProfile,
            Self::DataTransfer,
            Self::DataTransferResponse,
            Self::DeleteCertificate,
            Self::DiagnosticsStatusNotificationResponse,
            Self::ExtendedTriggerMessage,
            Self::FirmwareStatusNotificationResponse,
            Self::GetCompositeSchedule,
            Self::GetConfiguration,
            Self::GetDiagnostics,
            Self::GetInstalledCertificateIds,
            Self::GetLocalListVersion,
            Self::GetLog,
            Self::HeartbeatResponse,
            Self::InstallCertificate,
            Self::LogStatusNotificationResponse,
            Self::MeterValuesResponse,
            Self::RemoteStartTransaction,
            Self::RemoteStopTransaction,
            Self::ReserveNow,
            Self::Reset,
            Self::SecurityEventNotificationResponse,
            Self::SendLocalList,
            Self::SetChargingProfile,
            Self::SignCertificateResponse,
            Self::SignedFirmwareStatusNotificationResponse,
            Self::SignedUpdateFirmware,
            Self::StartTransactionResponse,
            Self::StatusNotificationResponse,
            Self::StopTransactionResponse,
            Self::TriggerMessage,
            Self::UnlockConnector,
            Self::UpdateFirmware,
        ]
        .into_iter()
        .collect()
    }
}

/// A received frame after correlation, handed to the dispatcher or to the
/// future returned by [`queue::MessageQueue::push_async`].
#[derive(Debug, Clone)]
pub struct EnhancedMessage {
    pub unique_id: String,
    pub message_type: MessageType,
    pub message_type_id: MessageTypeId,
    /// CALL / CALLRESULT payload object, or CALLERROR details.
    pub payload: Value,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    /// Set when the queue resolved the waiting future without a response
    /// because the connection is down or the queue was stopped.
    pub offline: bool,
}

impl EnhancedMessage {
    pub(crate) fn offline(unique_id: String, message_type: MessageType) -> Self {
        Self {
            unique_id,
            message_type,
            message_type_id: MessageTypeId::CallError,
            payload: Value::Null,
            error_code: None,
            error_description: None,
            offline: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_roundtrip() {
        for action in [
            "Authorize",
            "BootNotification",
            "StartTransaction",
            "StopTransaction",
            "ExtendedTriggerMessage",
            "SignedUpdateFirmware",
        ] {
            let mt = MessageType::from_action(action).unwrap();
            assert_eq!(mt.action(), action);
        }
        assert!(MessageType::from_action("NoSuchAction").is_none());
    }

    #[test]
    fn transaction_classification() {
        assert!(MessageType::StartTransaction.is_transaction_related());
        assert!(MessageType::StopTransaction.is_transaction_related());
        assert!(MessageType::MeterValues.is_transaction_related());
        assert!(MessageType::SecurityEventNotification.is_transaction_related());
        assert!(!MessageType::Heartbeat.is_transaction_related());
        assert!(!MessageType::StatusNotification.is_transaction_related());
    }

    #[test]
    fn response_mapping() {
        assert_eq!(
            MessageType::StartTransaction.response_type(),
            Some(MessageType::StartTransactionResponse)
        );
        assert_eq!(MessageType::Reset.response_type(), None);
    }
}
