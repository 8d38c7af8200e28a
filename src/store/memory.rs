//! In-memory store implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_ocpp::v1_6::types::{AuthorizationData, AvailabilityType, ChargingProfile, IdTagInfo};

use super::{DataStore, StoreResult, TransactionRecord};

/// In-memory storage for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    availability: DashMap<u32, AvailabilityType>,
    transactions: DashMap<String, TransactionRecord>,
    authorization_cache: DashMap<String, IdTagInfo>,
    local_list: DashMap<String, IdTagInfo>,
    local_list_version: Mutex<i32>,
    charging_profiles: DashMap<i32, (u32, ChargingProfile)>,
    // envelope order matters for queue re-hydration
    queued_messages: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn set_connector_availability(
        &self,
        connectors: &[u32],
        availability: AvailabilityType,
    ) -> StoreResult<()> {
        for connector in connectors {
            self.availability.insert(*connector, availability.clone());
        }
        Ok(())
    }

    async fn connector_availability(&self, connector: u32) -> StoreResult<AvailabilityType> {
        Ok(self
            .availability
            .get(&connector)
            .map(|a| a.clone())
            .unwrap_or(AvailabilityType::Operative))
    }

    async fn all_connector_availability(
        &self,
        number_of_connectors: u32,
    ) -> StoreResult<HashMap<u32, AvailabilityType>> {
        let mut map = HashMap::new();
        for connector in 0..=number_of_connectors {
            map.insert(connector, self.connector_availability(connector).await?);
        }
        Ok(map)
    }

    async fn insert_transaction(&self, record: TransactionRecord) -> StoreResult<()> {
        self.transactions.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn update_transaction_id(
        &self,
        session_id: &str,
        transaction_id: i32,
    ) -> StoreResult<()> {
        if let Some(mut record) = self.transactions.get_mut(session_id) {
            record.transaction_id = transaction_id;
        }
        Ok(())
    }

    async fn update_transaction_stop(
        &self,
        session_id: &str,
        meter_stop: i32,
        stop_timestamp: DateTime<Utc>,
        stop_reason: Option<String>,
    ) -> StoreResult<()> {
        if let Some(mut record) = self.transactions.get_mut(session_id) {
            record.meter_stop = Some(meter_stop);
            record.stop_timestamp = Some(stop_timestamp);
            record.stop_reason = stop_reason;
        }
        Ok(())
    }

    async fn open_transactions(&self) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self
            .transactions
            .iter()
            .filter(|entry| entry.is_open())
            .map(|entry| entry.clone())
            .collect())
    }

    async fn delete_transaction(&self, session_id: &str) -> StoreResult<()> {
        self.transactions.remove(session_id);
        Ok(())
    }

    async fn authorization_cache_entry(&self, id_tag: &str) -> StoreResult<Option<IdTagInfo>> {
        Ok(self.authorization_cache.get(id_tag).map(|e| e.clone()))
    }

    async fn upsert_authorization_cache_entry(
        &self,
        id_tag: &str,
        info: IdTagInfo,
    ) -> StoreResult<()> {
        self.authorization_cache.insert(id_tag.to_string(), info);
        Ok(())
    }

    async fn clear_authorization_cache(&self) -> StoreResult<()> {
        self.authorization_cache.clear();
        Ok(())
    }

    async fn local_list_version(&self) -> StoreResult<i32> {
        Ok(*self.local_list_version.lock().unwrap())
    }

    async fn set_local_list_version(&self, version: i32) -> StoreResult<()> {
        *self.local_list_version.lock().unwrap() = version;
        Ok(())
    }

    async fn local_list_entry(&self, id_tag: &str) -> StoreResult<Option<IdTagInfo>> {
        Ok(self.local_list.get(id_tag).map(|e| e.clone()))
    }

    async fn apply_local_list(&self, entries: Vec<AuthorizationData>) -> StoreResult<()> {
        for entry in entries {
            match entry.id_tag_info {
                Some(info) => {
                    self.local_list.insert(entry.id_tag, info);
                }
                None => {
                    self.local_list.remove(&entry.id_tag);
                }
            }
        }
        Ok(())
    }

    async fn clear_local_list(&self) -> StoreResult<()> {
        self.local_list.clear();
        Ok(())
    }

    async fn insert_charging_profile(
        &self,
        connector: u32,
        profile: &ChargingProfile,
    ) -> StoreResult<()> {
        self.charging_profiles
            .insert(profile.charging_profile_id, (connector, profile.clone()));
        Ok(())
    }

    async fn delete_charging_profile(&self, profile_id: i32) -> StoreResult<()> {
        self.charging_profiles.remove(&profile_id);
        Ok(())
    }

    async fn charging_profiles(&self) -> StoreResult<Vec<(u32, ChargingProfile)>> {
        Ok(self
            .charging_profiles
            .iter()
            .map(|entry| entry.clone())
            .collect())
    }

    async fn persist_queued_message(&self, message_id: &str, frame: &str) -> StoreResult<()> {
        let mut queued = self.queued_messages.lock().unwrap();
        match queued.iter_mut().find(|(id, _)| id == message_id) {
            // updated in place so envelope order is preserved
            Some((_, existing)) => *existing = frame.to_string(),
            None => queued.push((message_id.to_string(), frame.to_string())),
        }
        Ok(())
    }

    async fn delete_queued_message(&self, message_id: &str) -> StoreResult<()> {
        self.queued_messages
            .lock()
            .unwrap()
            .retain(|(id, _)| id != message_id);
        Ok(())
    }

    async fn queued_messages(&self) -> StoreResult<Vec<(String, String)>> {
        Ok(self.queued_messages.lock().unwrap().clone())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_transactions_filters_stopped() {
        let store = MemoryStore::new();
        let record = TransactionRecord {
            session_id: "s1".to_string(),
            transaction_id: -1,
            connector: 1,
            id_tag: "TAG01".to_string(),
            start_timestamp: Utc::now(),
            meter_start: 100,
            reservation_id: None,
            meter_stop: None,
            stop_timestamp: None,
            stop_reason: None,
        };
        store.insert_transaction(record.clone()).await.unwrap();
        assert_eq!(store.open_transactions().await.unwrap().len(), 1);

        store
            .update_transaction_stop("s1", 250, Utc::now(), Some("Local".to_string()))
            .await
            .unwrap();
        assert!(store.open_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn differential_list_merge_removes_empty_entries() {
        let store = MemoryStore::new();
        let info = IdTagInfo {
            status: rust_ocpp::v1_6::types::AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        };
        store
            .apply_local_list(vec![AuthorizationData {
                id_tag: "A".to_string(),
                id_tag_info: Some(info),
            }])
            .await
            .unwrap();
        assert!(store.local_list_entry("A").await.unwrap().is_some());

        store
            .apply_local_list(vec![AuthorizationData {
                id_tag: "A".to_string(),
                id_tag_info: None,
            }])
            .await
            .unwrap();
        assert!(store.local_list_entry("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queued_messages_keep_order() {
        let store = MemoryStore::new();
        store.persist_queued_message("m1", "f1").await.unwrap();
        store.persist_queued_message("m2", "f2").await.unwrap();
        store.delete_queued_message("m1").await.unwrap();
        let remaining = store.queued_messages().await.unwrap();
        assert_eq!(remaining, vec![("m2".to_string(), "f2".to_string())]);
    }
}
