//! Typed handlers for CS-initiated operations, one file per message.
//!
//! Every handler parses its payload, answers with the typed response (or a
//! CALLERROR on malformed payloads) and performs side effects in the order
//! the protocol requires; TriggerMessage-style handlers respond first and
//! emit the requested message afterwards.

mod handle_cancel_reservation;
mod handle_certificate_signed;
mod handle_change_availability;
mod handle_change_configuration;
mod handle_clear_cache;
mod handle_clear_charging_profile;
mod handle_data_transfer;
mod handle_delete_certificate;
mod handle_extended_trigger_message;
mod handle_get_composite_schedule;
mod handle_get_configuration;
mod handle_get_diagnostics;
mod handle_get_installed_certificate_ids;
mod handle_get_local_list_version;
mod handle_get_log;
mod handle_install_certificate;
mod handle_remote_start_transaction;
mod handle_remote_stop_transaction;
mod handle_reserve_now;
mod handle_reset;
mod handle_send_local_list;
mod handle_set_charging_profile;
mod handle_signed_update_firmware;
mod handle_trigger_message;
mod handle_unlock_connector;
mod handle_update_firmware;

pub(crate) use handle_cancel_reservation::handle_cancel_reservation;
pub(crate) use handle_certificate_signed::handle_certificate_signed;
pub(crate) use handle_change_availability::handle_change_availability;
pub(crate) use handle_change_configuration::handle_change_configuration;
pub(crate) use handle_clear_cache::handle_clear_cache;
pub(crate) use handle_clear_charging_profile::handle_clear_charging_profile;
pub(crate) use handle_data_transfer::handle_data_transfer;
pub(crate) use handle_delete_certificate::handle_delete_certificate;
pub(crate) use handle_extended_trigger_message::handle_extended_trigger_message;
pub(crate) use handle_get_composite_schedule::handle_get_composite_schedule;
pub(crate) use handle_get_configuration::handle_get_configuration;
pub(crate) use handle_get_diagnostics::handle_get_diagnostics;
pub(crate) use handle_get_installed_certificate_ids::handle_get_installed_certificate_ids;
pub(crate) use handle_get_local_list_version::handle_get_local_list_version;
pub(crate) use handle_get_log::handle_get_log;
pub(crate) use handle_install_certificate::handle_install_certificate;
pub(crate) use handle_remote_start_transaction::handle_remote_start_transaction;
pub(crate) use handle_remote_stop_transaction::handle_remote_stop_transaction;
pub(crate) use handle_reserve_now::handle_reserve_now;
pub(crate) use handle_reset::handle_reset;
pub(crate) use handle_send_local_list::handle_send_local_list;
pub(crate) use handle_set_charging_profile::handle_set_charging_profile;
pub(crate) use handle_signed_update_firmware::handle_signed_update_firmware;
pub(crate) use handle_trigger_message::handle_trigger_message;
pub(crate) use handle_unlock_connector::handle_unlock_connector;
pub(crate) use handle_update_firmware::handle_update_firmware;
