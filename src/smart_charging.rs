//! Smart-charging profile handling.
//!
//! Installs, validates and clears charging profiles and answers
//! GetCompositeSchedule. Composition is reduced to deterministic
//! stack-level selection clamped by the ChargePointMaxProfile; richer
//! period-merge arithmetic is left to the energy-management side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::{
    ChargingProfile, ChargingProfilePurposeType, ChargingRateUnitType, ChargingSchedule,
};
use tracing::{debug, info, warn};

use crate::store::DataStore;

/// Limits a profile must satisfy before installation, sourced from the
/// configuration keys of the same names.
#[derive(Debug, Clone)]
pub struct ProfileLimits {
    pub charge_profile_max_stack_level: u32,
    pub max_charging_profiles_installed: usize,
    pub charging_schedule_max_periods: usize,
    pub allowed_charging_rate_units: Vec<ChargingRateUnitType>,
}

/// Installed profiles per purpose, keyed by profile id.
#[derive(Default)]
struct ProfileStore {
    charge_point_max: HashMap<i32, ChargingProfile>,
    /// connector → profile id → profile
    tx_default: HashMap<u32, HashMap<i32, ChargingProfile>>,
    tx: HashMap<u32, HashMap<i32, ChargingProfile>>,
}

impl ProfileStore {
    fn count(&self) -> usize {
        self.charge_point_max.len()
            + self.tx_default.values().map(HashMap::len).sum::<usize>()
            + self.tx.values().map(HashMap::len).sum::<usize>()
    }

    fn iter_all(&self) -> impl Iterator<Item = (u32, &ChargingProfile)> {
        self.charge_point_max
            .values()
            .map(|p| (0u32, p))
            .chain(
                self.tx_default
                    .iter()
                    .flat_map(|(c, m)| m.values().map(move |p| (*c, p))),
            )
            .chain(
                self.tx
                    .iter()
                    .flat_map(|(c, m)| m.values().map(move |p| (*c, p))),
            )
    }
}

/// Charging-profile registry of the charge point.
pub struct SmartChargingHandler {
    store: Arc<dyn DataStore>,
    profiles: Mutex<ProfileStore>,
    number_of_connectors: u32,
}

impl SmartChargingHandler {
    pub fn new(store: Arc<dyn DataStore>, number_of_connectors: u32) -> Self {
        Self {
            store,
            profiles: Mutex::new(ProfileStore::default()),
            number_of_connectors,
        }
    }

    // ── Validation ─────────────────────────────────────────

    /// Check a profile against configured limits before installation.
    ///
    /// `ignore_no_transaction` accepts a TxProfile for a connector without
    /// an active transaction (RemoteStartTransaction installs the profile
    /// before the session exists).
    pub fn validate_profile(
        &self,
        profile: &ChargingProfile,
        connector_id: u32,
        ignore_no_transaction: bool,
        limits: &ProfileLimits,
        transaction_active: impl Fn(u32) -> bool,
    ) -> bool {
        if connector_id > self.number_of_connectors {
            warn!(connector_id, "Profile for unknown connector");
            return false;
        }
        if profile.stack_level > limits.charge_profile_max_stack_level {
            warn!(
                profile_id = profile.charging_profile_id,
                stack_level = profile.stack_level,
                "Profile exceeds ChargeProfileMaxStackLevel"
            );
            return false;
        }
        if profile.charging_schedule.charging_schedule_period.len()
            > limits.charging_schedule_max_periods
        {
            warn!(
                profile_id = profile.charging_profile_id,
                "Profile exceeds ChargingScheduleMaxPeriods"
            );
            return false;
        }
        if !limits
            .allowed_charging_rate_units
            .contains(&profile.charging_schedule.charging_rate_unit)
        {
            warn!(
                profile_id = profile.charging_profile_id,
                "Charging rate unit not allowed"
            );
            return false;
        }

        let installed = self.profiles.lock().unwrap().count();
        let replaces_existing = self.profile_installed(profile.charging_profile_id);
        if !replaces_existing && installed >= limits.max_charging_profiles_installed {
            warn!(
                profile_id = profile.charging_profile_id,
                installed, "MaxChargingProfilesInstalled reached"
            );
            return false;
        }

        match profile.charging_profile_purpose {
            ChargingProfilePurposeType::ChargePointMaxProfile => connector_id == 0,
            ChargingProfilePurposeType::TxDefaultProfile => true,
            ChargingProfilePurposeType::TxProfile => {
                connector_id > 0 && (ignore_no_transaction || transaction_active(connector_id))
            }
        }
    }

    fn profile_installed(&self, profile_id: i32) -> bool {
        self.profiles
            .lock()
            .unwrap()
            .iter_all()
            .any(|(_, p)| p.charging_profile_id == profile_id)
    }

    // ── Installation ───────────────────────────────────────

    pub async fn add_charge_point_max_profile(&self, profile: ChargingProfile) {
        info!(profile_id = profile.charging_profile_id, "Installing ChargePointMaxProfile");
        self.profiles
            .lock()
            .unwrap()
            .charge_point_max
            .insert(profile.charging_profile_id, profile.clone());
        self.persist(0, &profile).await;
    }

    pub async fn add_tx_default_profile(&self, profile: ChargingProfile, connector_id: u32) {
        info!(
            profile_id = profile.charging_profile_id,
            connector_id, "Installing TxDefaultProfile"
        );
        self.profiles
            .lock()
            .unwrap()
            .tx_default
            .entry(connector_id)
            .or_default()
            .insert(profile.charging_profile_id, profile.clone());
        self.persist(connector_id, &profile).await;
    }

    pub async fn add_tx_profile(&self, profile: ChargingProfile, connector_id: u32) {
        info!(
            profile_id = profile.charging_profile_id,
            connector_id, "Installing TxProfile"
        );
        self.profiles
            .lock()
            .unwrap()
            .tx
            .entry(connector_id)
            .or_default()
            .insert(profile.charging_profile_id, profile.clone());
        self.persist(connector_id, &profile).await;
    }

    async fn persist(&self, connector_id: u32, profile: &ChargingProfile) {
        if let Err(e) = self
            .store
            .insert_charging_profile(connector_id, profile)
            .await
        {
            warn!(error = %e, "Failed to persist charging profile");
        }
    }

    // ── Clearing ───────────────────────────────────────────

    pub async fn clear_all_profiles(&self) {
        let removed: Vec<i32> = {
            let mut profiles = self.profiles.lock().unwrap();
            let ids = profiles
                .iter_all()
                .map(|(_, p)| p.charging_profile_id)
                .collect();
            *profiles = ProfileStore::default();
            ids
        };
        for id in removed {
            let _ = self.store.delete_charging_profile(id).await;
        }
    }

    /// Remove all profiles matching the filter; returns whether anything
    /// was removed. With `check_id_only` only the id is compared, which is
    /// the replace-before-install path of SetChargingProfile.
    pub async fn clear_all_profiles_with_filter(
        &self,
        profile_id: Option<i32>,
        connector_id: Option<u32>,
        stack_level: Option<u32>,
        purpose: Option<ChargingProfilePurposeType>,
        check_id_only: bool,
    ) -> bool {
        let matches = |owner: u32, profile: &ChargingProfile| -> bool {
            if check_id_only {
                return profile_id == Some(profile.charging_profile_id);
            }
            if let Some(id) = profile_id {
                if profile.charging_profile_id != id {
                    return false;
                }
            }
            if let Some(connector) = connector_id {
                if owner != connector {
                    return false;
                }
            }
            if let Some(level) = stack_level {
                if profile.stack_level != level {
                    return false;
                }
            }
            if let Some(ref p) = purpose {
                if &profile.charging_profile_purpose != p {
                    return false;
                }
            }
            true
        };

        let removed: Vec<i32> = {
            let mut profiles = self.profiles.lock().unwrap();
            let ids: Vec<i32> = profiles
                .iter_all()
                .filter(|(owner, p)| matches(*owner, p))
                .map(|(_, p)| p.charging_profile_id)
                .collect();

            profiles
                .charge_point_max
                .retain(|_, p| !ids.contains(&p.charging_profile_id));
            for map in profiles.tx_default.values_mut() {
                map.retain(|_, p| !ids.contains(&p.charging_profile_id));
            }
            for map in profiles.tx.values_mut() {
                map.retain(|_, p| !ids.contains(&p.charging_profile_id));
            }
            ids
        };

        for id in &removed {
            let _ = self.store.delete_charging_profile(*id).await;
        }
        debug!(removed = removed.len(), "Cleared charging profiles");
        !removed.is_empty()
    }

    /// Replace rule of SetChargingProfile: drop any profile with the same
    /// id or the same (stackLevel, purpose) pair.
    pub async fn remove_conflicting_profiles(&self, profile: &ChargingProfile) {
        self.clear_all_profiles_with_filter(
            Some(profile.charging_profile_id),
            None,
            None,
            None,
            true,
        )
        .await;
        self.clear_all_profiles_with_filter(
            None,
            None,
            Some(profile.stack_level),
            Some(profile.charging_profile_purpose.clone()),
            false,
        )
        .await;
    }

    // ── Queries ────────────────────────────────────────────

    /// Profiles whose validity window overlaps [start, end] and that apply
    /// to the given connector.
    pub fn get_valid_profiles(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        connector_id: u32,
    ) -> Vec<ChargingProfile> {
        let profiles = self.profiles.lock().unwrap();
        profiles
            .iter_all()
            .filter(|(owner, profile)| {
                let applies = match profile.charging_profile_purpose {
                    ChargingProfilePurposeType::ChargePointMaxProfile => true,
                    _ => *owner == connector_id || *owner == 0,
                };
                applies && in_validity_window(profile, start, end)
            })
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Deterministic composite: the highest-stack-level transaction profile
    /// wins; its period limits are clamped by the strongest
    /// ChargePointMaxProfile when both use the same rate unit.
    pub fn calculate_composite_schedule(
        &self,
        valid_profiles: &[ChargingProfile],
        start: DateTime<Utc>,
        duration_s: u32,
        rate_unit: Option<ChargingRateUnitType>,
    ) -> ChargingSchedule {
        let winner = valid_profiles
            .iter()
            .filter(|p| {
                p.charging_profile_purpose != ChargingProfilePurposeType::ChargePointMaxProfile
            })
            .max_by_key(|p| {
                // TxProfile outranks TxDefaultProfile at equal stack level
                let purpose_rank =
                    u64::from(p.charging_profile_purpose == ChargingProfilePurposeType::TxProfile);
                (u64::from(p.stack_level) << 1) | purpose_rank
            });

        let ceiling = valid_profiles
            .iter()
            .filter(|p| {
                p.charging_profile_purpose == ChargingProfilePurposeType::ChargePointMaxProfile
            })
            .max_by_key(|p| p.stack_level);

        let mut schedule = match winner.or(ceiling) {
            Some(profile) => profile.charging_schedule.clone(),
            None => {
                return ChargingSchedule {
                    duration: Some(duration_s as i32),
                    start_schedule: Some(start),
                    charging_rate_unit: rate_unit.unwrap_or(ChargingRateUnitType::A),
                    charging_schedule_period: Vec::new(),
                    min_charging_rate: None,
                }
            }
        };

        if let (Some(winner), Some(ceiling)) = (winner, ceiling) {
            if winner.charging_schedule.charging_rate_unit
                == ceiling.charging_schedule.charging_rate_unit
            {
                if let Some(cap) = ceiling
                    .charging_schedule
                    .charging_schedule_period
                    .first()
                    .map(|p| p.limit)
                {
                    for period in &mut schedule.charging_schedule_period {
                        period.limit = period.limit.min(cap);
                    }
                }
            }
        }

        schedule.duration = Some(duration_s as i32);
        schedule.start_schedule = Some(start);
        schedule
    }

    /// Re-install persisted profiles on startup, deleting the ones that no
    /// longer validate.
    pub async fn load_persisted_profiles(
        &self,
        limits: &ProfileLimits,
        transaction_active: impl Fn(u32) -> bool,
    ) {
        let persisted = match self.store.charging_profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted charging profiles");
                return;
            }
        };
        info!(count = persisted.len(), "Found charging profile(s) in the store");

        for (connector_id, profile) in persisted {
            if self.validate_profile(&profile, connector_id, true, limits, &transaction_active) {
                match profile.charging_profile_purpose {
                    ChargingProfilePurposeType::ChargePointMaxProfile => {
                        self.add_charge_point_max_profile(profile).await
                    }
                    ChargingProfilePurposeType::TxDefaultProfile => {
                        self.add_tx_default_profile(profile, connector_id).await
                    }
                    ChargingProfilePurposeType::TxProfile => {
                        self.add_tx_profile(profile, connector_id).await
                    }
                }
            } else {
                let _ = self
                    .store
                    .delete_charging_profile(profile.charging_profile_id)
                    .await;
            }
        }
    }

    pub fn installed_count(&self) -> usize {
        self.profiles.lock().unwrap().count()
    }
}

fn in_validity_window(profile: &ChargingProfile, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    if let Some(valid_from) = profile.valid_from {
        if valid_from > end {
            return false;
        }
    }
    if let Some(valid_to) = profile.valid_to {
        if valid_to < start {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::ToPrimitive as _;
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn limits() -> ProfileLimits {
        ProfileLimits {
            charge_profile_max_stack_level: 10,
            max_charging_profiles_installed: 4,
            charging_schedule_max_periods: 3,
            allowed_charging_rate_units: vec![ChargingRateUnitType::A, ChargingRateUnitType::W],
        }
    }

    fn profile(id: i32, stack_level: u32, purpose: &str, limit: f64) -> ChargingProfile {
        serde_json::from_value(json!({
            "chargingProfileId": id,
            "stackLevel": stack_level,
            "chargingProfilePurpose": purpose,
            "chargingProfileKind": "Absolute",
            "chargingSchedule": {
                "chargingRateUnit": "A",
                "chargingSchedulePeriod": [
                    { "startPeriod": 0, "limit": limit }
                ],
                "minChargingRate": null
            }
        }))
        .unwrap()
    }

    fn handler() -> SmartChargingHandler {
        SmartChargingHandler::new(Arc::new(MemoryStore::new()), 2)
    }

    #[tokio::test]
    async fn validation_enforces_limits() {
        let h = handler();
        let l = limits();

        assert!(h.validate_profile(&profile(1, 2, "TxDefaultProfile", 16.0), 1, false, &l, |_| false));

        // stack level above maximum
        assert!(!h.validate_profile(&profile(2, 11, "TxDefaultProfile", 16.0), 1, false, &l, |_| false));

        // TxProfile needs an active transaction unless pre-validated
        let tx = profile(3, 1, "TxProfile", 16.0);
        assert!(!h.validate_profile(&tx, 1, false, &l, |_| false));
        assert!(h.validate_profile(&tx, 1, true, &l, |_| false));
        assert!(h.validate_profile(&tx, 1, false, &l, |_| true));

        // ChargePointMaxProfile only on connector 0
        let max = profile(4, 1, "ChargePointMaxProfile", 32.0);
        assert!(h.validate_profile(&max, 0, false, &l, |_| false));
        assert!(!h.validate_profile(&max, 1, false, &l, |_| false));
    }

    #[tokio::test]
    async fn installed_count_limit() {
        let h = handler();
        let l = limits();
        for id in 1..=4 {
            h.add_tx_default_profile(profile(id, 1, "TxDefaultProfile", 16.0), 1)
                .await;
        }
        assert_eq!(h.installed_count(), 4);
        assert!(!h.validate_profile(&profile(9, 1, "TxDefaultProfile", 16.0), 1, false, &l, |_| false));
        // replacing an installed id is still allowed
        assert!(h.validate_profile(&profile(2, 1, "TxDefaultProfile", 10.0), 1, false, &l, |_| false));
    }

    #[tokio::test]
    async fn clear_with_filter_is_idempotent() {
        let h = handler();
        h.add_tx_default_profile(profile(1, 1, "TxDefaultProfile", 16.0), 1)
            .await;
        h.add_tx_profile(profile(2, 2, "TxProfile", 20.0), 1).await;

        assert!(
            h.clear_all_profiles_with_filter(Some(2), None, None, None, true)
                .await
        );
        assert_eq!(h.installed_count(), 1);

        // same request again: nothing left to remove, stored set unchanged
        assert!(
            !h.clear_all_profiles_with_filter(Some(2), None, None, None, true)
                .await
        );
        assert_eq!(h.installed_count(), 1);
    }

    #[tokio::test]
    async fn conflicting_profiles_replaced() {
        let h = handler();
        h.add_tx_default_profile(profile(1, 3, "TxDefaultProfile", 16.0), 1)
            .await;

        // same (stackLevel, purpose) with a different id replaces
        let incoming = profile(9, 3, "TxDefaultProfile", 8.0);
        h.remove_conflicting_profiles(&incoming).await;
        h.add_tx_default_profile(incoming, 1).await;

        assert_eq!(h.installed_count(), 1);
        let valid = h.get_valid_profiles(Utc::now(), Utc::now(), 1);
        assert_eq!(valid[0].charging_profile_id, 9);
    }

    #[tokio::test]
    async fn composite_prefers_tx_profile_and_clamps() {
        let h = handler();
        h.add_charge_point_max_profile(profile(1, 0, "ChargePointMaxProfile", 10.0))
            .await;
        h.add_tx_default_profile(profile(2, 1, "TxDefaultProfile", 16.0), 1)
            .await;
        h.add_tx_profile(profile(3, 1, "TxProfile", 20.0), 1).await;

        let now = Utc::now();
        let valid = h.get_valid_profiles(now, now + chrono::Duration::seconds(3600), 1);
        let schedule = h.calculate_composite_schedule(&valid, now, 3600, None);

        // TxProfile wins, clamped to the ChargePointMaxProfile limit
        let limit = schedule.charging_schedule_period[0].limit;
        assert!((limit.to_f64().unwrap() - 10.0).abs() < 1e-6);
        assert_eq!(schedule.duration, Some(3600));
    }

    #[tokio::test]
    async fn persisted_profiles_reload_and_invalid_are_deleted() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_charging_profile(1, &profile(1, 1, "TxDefaultProfile", 16.0))
            .await
            .unwrap();
        store
            .insert_charging_profile(1, &profile(2, 99, "TxDefaultProfile", 16.0))
            .await
            .unwrap();

        let h = SmartChargingHandler::new(store.clone(), 2);
        h.load_persisted_profiles(&limits(), |_| false).await;

        assert_eq!(h.installed_count(), 1);
        assert_eq!(store.charging_profiles().await.unwrap().len(), 1);
    }
}
