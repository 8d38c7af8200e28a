//! Durable store abstraction.
//!
//! The runtime persists exactly what must survive a restart: open
//! transactions, connector availability, installed charging profiles, the
//! local authorization list and cache, and transaction-class message-queue
//! envelopes. Real deployments back this with their database of choice;
//! [`memory::MemoryStore`] serves tests and ephemeral setups.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::{AuthorizationData, AvailabilityType, ChargingProfile, IdTagInfo};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persisted shape of a charging session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Locally unique session identifier.
    pub session_id: String,
    /// Server-assigned id, -1 until StartTransactionResponse.
    pub transaction_id: i32,
    pub connector: u32,
    pub id_tag: String,
    pub start_timestamp: DateTime<Utc>,
    pub meter_start: i32,
    pub reservation_id: Option<i32>,
    pub meter_stop: Option<i32>,
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
}

impl TransactionRecord {
    pub fn is_open(&self) -> bool {
        self.meter_stop.is_none()
    }
}

/// Storage trait for persistence operations.
#[async_trait]
pub trait DataStore: Send + Sync {
    // Connector availability
    async fn set_connector_availability(
        &self,
        connectors: &[u32],
        availability: AvailabilityType,
    ) -> StoreResult<()>;
    async fn connector_availability(&self, connector: u32) -> StoreResult<AvailabilityType>;
    async fn all_connector_availability(
        &self,
        number_of_connectors: u32,
    ) -> StoreResult<HashMap<u32, AvailabilityType>>;

    // Transactions
    async fn insert_transaction(&self, record: TransactionRecord) -> StoreResult<()>;
    async fn update_transaction_id(
        &self,
        session_id: &str,
        transaction_id: i32,
    ) -> StoreResult<()>;
    async fn update_transaction_stop(
        &self,
        session_id: &str,
        meter_stop: i32,
        stop_timestamp: DateTime<Utc>,
        stop_reason: Option<String>,
    ) -> StoreResult<()>;
    async fn open_transactions(&self) -> StoreResult<Vec<TransactionRecord>>;
    async fn delete_transaction(&self, session_id: &str) -> StoreResult<()>;

    // Authorization cache
    async fn authorization_cache_entry(&self, id_tag: &str) -> StoreResult<Option<IdTagInfo>>;
    async fn upsert_authorization_cache_entry(
        &self,
        id_tag: &str,
        info: IdTagInfo,
    ) -> StoreResult<()>;
    async fn clear_authorization_cache(&self) -> StoreResult<()>;

    // Local authorization list
    async fn local_list_version(&self) -> StoreResult<i32>;
    async fn set_local_list_version(&self, version: i32) -> StoreResult<()>;
    async fn local_list_entry(&self, id_tag: &str) -> StoreResult<Option<IdTagInfo>>;
    /// Differential merge: entries without `id_tag_info` are removed.
    async fn apply_local_list(&self, entries: Vec<AuthorizationData>) -> StoreResult<()>;
    async fn clear_local_list(&self) -> StoreResult<()>;

    // Charging profiles
    async fn insert_charging_profile(
        &self,
        connector: u32,
        profile: &ChargingProfile,
    ) -> StoreResult<()>;
    async fn delete_charging_profile(&self, profile_id: i32) -> StoreResult<()>;
    async fn charging_profiles(&self) -> StoreResult<Vec<(u32, ChargingProfile)>>;

    // Message-queue persistence (transaction-class envelopes only)
    async fn persist_queued_message(&self, message_id: &str, frame: &str) -> StoreResult<()>;
    async fn delete_queued_message(&self, message_id: &str) -> StoreResult<()>;
    /// Persisted envelopes in insertion order.
    async fn queued_messages(&self) -> StoreResult<Vec<(String, String)>>;

    async fn close(&self) -> StoreResult<()>;
}

pub use memory::MemoryStore;
