//! Instance Registry: the in-memory map of every tracked instance.
//!
//! Pure data operations: callers pass `now` in, nothing here touches a
//! clock, the network, or the filesystem. `SharedRegistry` is the handle
//! the async services share; it only lends the registry to synchronous
//! closures, so no borrow can be held across an `.await`.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use leasekeeper_common::{Creator, InstanceRecord, InstanceStatus, SelfDestructTimer, WarningThreshold};

use crate::domain::error::OrchestratorError;
use crate::domain::instance::{MetadataPatch, ProviderInstance, observed_status};

/// Result of reconciling the registry against the provider's instance list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Provider instances that were not tracked and have been adopted.
    pub discovered: Vec<String>,
    /// Tracked, active instances absent from the listing. Not yet proof
    /// that they are gone.
    pub missing: Vec<String>,
    /// Missing instances the provider confirmed gone; marked destroyed.
    pub vanished: Vec<String>,
    /// Tracked instances whose status changed.
    pub updated: Vec<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty()
            && self.missing.is_empty()
            && self.vanished.is_empty()
            && self.updated.is_empty()
    }
}

/// In-memory map keyed by provider instance id.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    records: BTreeMap<String, InstanceRecord>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, or merge into the existing one.
    ///
    /// The creator of an existing record is never replaced; metadata fields
    /// absent from `patch` keep their previous values.
    pub fn upsert(
        &mut self,
        id: &str,
        creator: Creator,
        status: InstanceStatus,
        patch: &MetadataPatch,
        now: DateTime<Utc>,
    ) -> &InstanceRecord {
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| InstanceRecord::new(id, creator, status, now));
        if record.status != InstanceStatus::Destroyed {
            record.status = status;
            apply_patch(record, patch);
            record.last_updated = now;
        }
        record
    }

    /// Update status and metadata of a tracked record.
    ///
    /// Destroyed records are returned unchanged.
    pub fn set_status(
        &mut self,
        id: &str,
        status: InstanceStatus,
        patch: &MetadataPatch,
        now: DateTime<Utc>,
    ) -> Option<&InstanceRecord> {
        let record = self.records.get_mut(id)?;
        if record.status != InstanceStatus::Destroyed {
            record.status = status;
            apply_patch(record, patch);
            record.last_updated = now;
        }
        Some(record)
    }

    /// Merge metadata without touching status.
    pub fn patch(&mut self, id: &str, patch: &MetadataPatch, now: DateTime<Utc>) -> Option<&InstanceRecord> {
        let record = self.records.get_mut(id)?;
        if record.status != InstanceStatus::Destroyed {
            apply_patch(record, patch);
            record.last_updated = now;
        }
        Some(record)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&InstanceRecord> {
        self.records.get(id)
    }

    /// Records that are neither terminated nor destroyed.
    #[must_use]
    pub fn list_active(&self) -> Vec<&InstanceRecord> {
        self.records.values().filter(|r| r.is_active()).collect()
    }

    #[must_use]
    pub fn list_by_creator(&self, requester_id: &str) -> Vec<&InstanceRecord> {
        self.records
            .values()
            .filter(|r| r.creator.requester_id == requester_id)
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Create the self-destruct timer unless one already exists.
    ///
    /// Returns `Ok(true)` when a timer was created, `Ok(false)` when the
    /// record already has one or is destroyed.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::NotFound` for untracked ids.
    pub fn arm_timer(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Result<bool, OrchestratorError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))?;
        Ok(arm(record, now, lifetime))
    }

    /// Push the expiry back by `increment`. Recorded warnings are kept.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for untracked ids and `NoActiveTimer` when the
    /// record has no timer.
    pub fn extend_timer(
        &mut self,
        id: &str,
        increment: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, OrchestratorError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))?;
        let timer = record
            .self_destruct
            .as_mut()
            .ok_or_else(|| OrchestratorError::NoActiveTimer(id.to_string()))?;
        timer.expires_at += increment;
        timer.extended_count += 1;
        let expires_at = timer.expires_at;
        record.last_updated = now;
        Ok(expires_at)
    }

    /// Record that a warning went out. Returns `false` if it was already recorded.
    pub fn record_warning(&mut self, id: &str, threshold: WarningThreshold) -> bool {
        self.records
            .get_mut(id)
            .and_then(|r| r.self_destruct.as_mut())
            .is_some_and(|t| t.warnings_sent.insert(threshold))
    }

    /// Terminal transition: status destroyed, timer cleared.
    pub fn mark_destroyed(&mut self, id: &str, now: DateTime<Utc>) -> Option<&InstanceRecord> {
        let record = self.records.get_mut(id)?;
        if record.status != InstanceStatus::Destroyed {
            record.status = InstanceStatus::Destroyed;
            record.self_destruct = None;
            record.destroyed_at = Some(now);
            record.last_updated = now;
        }
        Some(record)
    }

    /// Drop destroyed records older than `retention`. Returns the pruned ids.
    pub fn prune_destroyed(&mut self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|r| r.destroyed_at.is_some_and(|at| now - at >= retention))
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            self.records.remove(id);
        }
        expired
    }

    /// Track a provider instance that was not created by this process.
    ///
    /// The owner is unknown; creation time comes from the provider when it
    /// reports one.
    pub fn adopt(&mut self, instance: &ProviderInstance, now: DateTime<Utc>) -> &InstanceRecord {
        let record = self.records.entry(instance.id.clone()).or_insert_with(|| {
            let mut record =
                InstanceRecord::new(&instance.id, Creator::unknown(), observed_status(instance), now);
            record.recovered = true;
            record.created_at = instance.date_created.unwrap_or(now);
            record
        });
        apply_patch(record, &MetadataPatch::from_provider(instance));
        record
    }

    /// Converge the registry with the provider's instance list.
    ///
    /// Records in `creating` whose id is in `polled` belong to a running
    /// readiness poller and keep their status. A listing is not proof of
    /// absence: tracked records the list omits are reported as `missing`
    /// and left untouched for the caller to confirm one by one.
    pub fn reconcile(
        &mut self,
        observed: &[ProviderInstance],
        polled: &HashSet<String>,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let seen: HashSet<&str> = observed.iter().map(|i| i.id.as_str()).collect();

        for instance in observed {
            if !self.records.contains_key(&instance.id) {
                self.adopt(instance, now);
                // Arms the timer of a recovered running instance.
                self.observe(instance, polled, now, lifetime);
                report.discovered.push(instance.id.clone());
            } else if self.observe(instance, polled, now, lifetime) {
                report.updated.push(instance.id.clone());
            }
        }

        report.missing = self
            .records
            .values()
            .filter(|r| r.is_active() && !seen.contains(r.id.as_str()))
            .filter(|r| !(r.status == InstanceStatus::Creating && polled.contains(&r.id)))
            .map(|r| r.id.clone())
            .collect();
        report
    }

    /// Apply one provider observation to a tracked record, arming its timer
    /// when it is running. Returns whether the status changed.
    ///
    /// Destroyed records and records a readiness poller still owns keep
    /// their status; metadata is merged either way.
    pub fn observe(
        &mut self,
        instance: &ProviderInstance,
        polled: &HashSet<String>,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> bool {
        let Some(record) = self.records.get_mut(&instance.id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        apply_patch(record, &MetadataPatch::from_provider(instance));
        record.last_updated = now;
        let status = observed_status(instance);
        let owned = record.status == InstanceStatus::Creating && polled.contains(&record.id);
        let changed = !owned && status != InstanceStatus::Unknown && record.status != status;
        if changed {
            record.status = status;
        }
        if record.status == InstanceStatus::Running {
            arm(record, now, lifetime);
        }
        changed
    }
}

/// Create the timer on `record` unless it already has one or is destroyed.
fn arm(record: &mut InstanceRecord, now: DateTime<Utc>, lifetime: chrono::Duration) -> bool {
    if record.self_destruct.is_some() || record.status == InstanceStatus::Destroyed {
        return false;
    }
    record.self_destruct = Some(SelfDestructTimer::new(now, lifetime));
    record.last_updated = now;
    true
}

fn apply_patch(record: &mut InstanceRecord, patch: &MetadataPatch) {
    if let Some(ip) = &patch.ip {
        record.ip = Some(ip.clone());
    }
    if let Some(name) = &patch.name {
        record.name = Some(name.clone());
    }
    if let Some(region) = &patch.region {
        record.region = Some(region.clone());
    }
    if let Some(plan) = &patch.plan {
        record.plan = Some(plan.clone());
    }
}

// ── Shared handle ─────────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the single registry owned by the process.
///
/// Everything runs on one cooperative thread, so a `RefCell` is enough:
/// the closures passed to `read`/`write` are synchronous and cannot await.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Rc<RefCell<InstanceRegistry>>);

impl SharedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T>(&self, f: impl FnOnce(&InstanceRegistry) -> T) -> T {
        f(&self.0.borrow())
    }

    pub fn write<T>(&self, f: impl FnOnce(&mut InstanceRegistry) -> T) -> T {
        f(&mut self.0.borrow_mut())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<InstanceRecord> {
        self.read(|r| r.get(id).cloned())
    }

    #[must_use]
    pub fn list_active(&self) -> Vec<InstanceRecord> {
        self.read(|r| r.list_active().into_iter().cloned().collect())
    }

    #[must_use]
    pub fn list_by_creator(&self, requester_id: &str) -> Vec<InstanceRecord> {
        self.read(|r| r.list_by_creator(requester_id).into_iter().cloned().collect())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<InstanceRecord> {
        self.read(|r| r.records().cloned().collect())
    }
}
