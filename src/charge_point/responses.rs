//! Handlers for CALLRESULTs the runtime consumes itself: the boot
//! handshake and the transaction id plumbing. Authorize and DataTransfer
//! responses resolve through their request futures instead.

use std::sync::Arc;
use std::time::Duration;

use rust_ocpp::v1_6::messages::boot_notification::BootNotificationResponse;
use rust_ocpp::v1_6::messages::start_transaction::StartTransactionResponse;
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionResponse;
use rust_ocpp::v1_6::types::{AuthorizationStatus, AvailabilityType, Reason, RegistrationStatus};
use tracing::{debug, error, info, warn};

use super::{ChargePoint, ConnectionState};
use crate::message::EnhancedMessage;

impl ChargePoint {
    /// BootNotificationResponse drives the registration state machine.
    pub(crate) async fn handle_boot_notification_response(
        self: &Arc<Self>,
        message: &EnhancedMessage,
    ) {
        let response: BootNotificationResponse =
            match serde_json::from_value(message.payload.clone()) {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "Failed to parse BootNotificationResponse");
                    return;
                }
            };
        info!(status = ?response.status, interval = response.interval, "BootNotificationResponse");

        *self.registration_status.lock().unwrap() = response.status.clone();
        self.mark_initialized();

        let interval_s = response.interval.max(0) as u64;
        if interval_s > 0 {
            self.config.set_heartbeat_interval_s(interval_s as u32);
        }

        match response.status {
            RegistrationStatus::Accepted => {
                *self.connection_state.lock().unwrap() = ConnectionState::Booted;

                self.update_heartbeat_interval();
                self.update_clock_aligned_meter_values_interval();

                let mut availability = self
                    .store
                    .all_connector_availability(self.status.number_of_connectors())
                    .await
                    .unwrap_or_default();
                // the virtual connector is always operative
                availability.insert(0, AvailabilityType::Operative);
                self.status.run(&availability);
            }
            RegistrationStatus::Pending => {
                *self.connection_state.lock().unwrap() = ConnectionState::Pending;
                debug!("BootNotification response is pending");
                self.schedule_boot_retry(self.boot_retry_delay(interval_s));
            }
            RegistrationStatus::Rejected => {
                *self.connection_state.lock().unwrap() = ConnectionState::Rejected;
                debug!(
                    retry_in_s = self.boot_retry_delay(interval_s).as_secs(),
                    "BootNotification was rejected"
                );
                self.schedule_boot_retry(self.boot_retry_delay(interval_s));
            }
        }
    }

    /// An interval of 0 means "retry at the heartbeat cadence".
    fn boot_retry_delay(&self, interval_s: u64) -> Duration {
        if interval_s > 0 {
            Duration::from_secs(interval_s)
        } else {
            self.config.heartbeat_interval()
        }
    }

    /// StartTransactionResponse assigns the server transaction id and, when
    /// the session already ended offline, patches the queued
    /// StopTransaction.
    pub(crate) async fn handle_start_transaction_response(
        self: &Arc<Self>,
        message: &EnhancedMessage,
    ) {
        let response: StartTransactionResponse =
            match serde_json::from_value(message.payload.clone()) {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "Failed to parse StartTransactionResponse");
                    return;
                }
            };

        let Some(transaction) = self
            .transaction_handler
            .get_transaction_by_start_message_id(&message.unique_id)
        else {
            warn!(
                message_id = message.unique_id.as_str(),
                "StartTransactionResponse for unknown transaction"
            );
            self.queue
                .notify_start_transaction_handled(&message.unique_id);
            return;
        };

        // session already stopped while the start was still queued
        if transaction.is_finished() {
            if let Some(stop_message_id) = transaction.stop_transaction_message_id() {
                self.queue
                    .add_stopped_transaction_id(&stop_message_id, response.transaction_id)
                    .await;
            }
        }
        self.queue
            .notify_start_transaction_handled(&message.unique_id);

        let connector = transaction.connector();
        transaction.set_transaction_id(response.transaction_id);
        info!(
            connector,
            transaction_id = response.transaction_id,
            id_tag_status = ?response.id_tag_info.status,
            "Transaction id assigned"
        );

        if let Err(e) = self
            .store
            .update_transaction_id(transaction.session_id(), response.transaction_id)
            .await
        {
            warn!(error = %e, "Failed to persist transaction id");
        }
        if let Err(e) = self
            .store
            .upsert_authorization_cache_entry(transaction.id_tag(), response.id_tag_info.clone())
            .await
        {
            warn!(error = %e, "Failed to refresh authorization cache");
        }

        if response.id_tag_info.status != AuthorizationStatus::Accepted {
            warn!(connector, "Transaction token no longer authorized");
            self.callbacks.pause_charging(connector);
            if self.config.stop_transaction_on_invalid_id() {
                self.callbacks
                    .stop_transaction(connector, Reason::DeAuthorized);
            }
        }
    }

    /// StopTransactionResponse finalizes the session record and applies a
    /// deferred availability change. The connector is recovered from the
    /// stopped-transaction lookup by message id.
    pub(crate) async fn handle_stop_transaction_response(
        self: &Arc<Self>,
        message: &EnhancedMessage,
    ) {
        let response: StopTransactionResponse =
            match serde_json::from_value(message.payload.clone()) {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "Failed to parse StopTransactionResponse");
                    return;
                }
            };

        if let Some(id_tag_info) = response.id_tag_info {
            if let Some(id_tag) = self
                .transaction_handler
                .get_authorized_id_tag(&message.unique_id)
            {
                if let Err(e) = self
                    .store
                    .upsert_authorization_cache_entry(&id_tag, id_tag_info)
                    .await
                {
                    warn!(error = %e, "Failed to refresh authorization cache");
                }
            }
        }

        let Some(transaction) = self
            .transaction_handler
            .erase_stopped_transaction(&message.unique_id)
        else {
            warn!(
                message_id = message.unique_id.as_str(),
                "StopTransactionResponse for unknown transaction"
            );
            self.transactions_changed.notify_waiters();
            return;
        };
        let connector = transaction.connector();
        debug!(connector, session_id = transaction.session_id(), "Transaction confirmed stopped");

        if let Err(e) = self.store.delete_transaction(transaction.session_id()).await {
            warn!(error = %e, "Failed to delete confirmed transaction");
        }

        // perform a queued connector availability change
        let queued = self
            .change_availability_queue
            .lock()
            .unwrap()
            .remove(&connector);
        if let Some(availability) = queued {
            info!(connector, ?availability, "Applying deferred availability change");
            self.apply_availability_change(connector, availability).await;
        }

        // a Reset waiting for transactions to stop can proceed
        self.transactions_changed.notify_waiters();
    }
}
