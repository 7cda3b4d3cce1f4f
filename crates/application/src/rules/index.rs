use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use domain::error::Result;
use domain::{AutomationRule, DeviceId, RoomId, RuleId, SensorParameter};
use tracing::{debug, info};

type BucketKey = (RoomId, SensorParameter);

/// Immutable view of the indexed rules
#[derive(Debug, Default, Clone)]
struct Snapshot {
    /// Enabled rules only, in evaluation order
    buckets: HashMap<BucketKey, Vec<Arc<AutomationRule>>>,
    /// Every known rule, enabled or not
    rules: HashMap<RuleId, Arc<AutomationRule>>,
}

impl Snapshot {
    fn detach(&mut self, rule: &AutomationRule) {
        let key = (rule.room_id.clone(), rule.parameter);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|r| r.id != rule.id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

/// Evaluation order: priority ascending, then created-at, then id
pub fn evaluation_order(a: &AutomationRule, b: &AutomationRule) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Lookup of enabled rules by (room, parameter).
///
/// Readers clone an `Arc` to the current snapshot and never block writers
/// for longer than that clone. Writers copy the snapshot, patch the affected
/// buckets and swap it in.
#[derive(Debug, Default)]
pub struct RuleIndex {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = AutomationRule>) -> Result<Self> {
        let index = Self::new();
        for rule in rules {
            index.upsert(rule)?;
        }
        Ok(index)
    }

    fn current(&self) -> Arc<Snapshot> {
        // Snapshots are swapped whole, so a poisoned lock still guards a valid one
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Snapshot::clone(&guard);
        let out = f(&mut next);
        *guard = Arc::new(next);
        out
    }

    /// Create or replace a rule. Invalid definitions are rejected and leave
    /// the index untouched.
    pub fn upsert(&self, rule: AutomationRule) -> Result<()> {
        rule.validate()?;
        let rule = Arc::new(rule);

        self.update(|snap| {
            if let Some(previous) = snap.rules.get(&rule.id).cloned() {
                snap.detach(&previous);
            }

            if rule.enabled {
                let bucket = snap
                    .buckets
                    .entry((rule.room_id.clone(), rule.parameter))
                    .or_default();
                bucket.push(rule.clone());
                bucket.sort_by(|a, b| evaluation_order(a, b));
            }

            snap.rules.insert(rule.id.clone(), rule.clone());
        });

        debug!(
            rule_id = %rule.id,
            room_id = %rule.room_id,
            parameter = %rule.parameter,
            enabled = rule.enabled,
            "Rule indexed"
        );
        Ok(())
    }

    pub fn remove(&self, rule_id: &RuleId) -> Option<Arc<AutomationRule>> {
        let removed = self.update(|snap| {
            let removed = snap.rules.remove(rule_id);
            if let Some(rule) = &removed {
                snap.detach(rule);
            }
            removed
        });

        if removed.is_some() {
            debug!(rule_id = %rule_id, "Rule removed from index");
        }
        removed
    }

    /// Drop every rule of a room, returning the removed ids
    pub fn remove_room(&self, room_id: &RoomId) -> Vec<RuleId> {
        let removed = self.update(|snap| {
            let ids: Vec<RuleId> = snap
                .rules
                .values()
                .filter(|r| &r.room_id == room_id)
                .map(|r| r.id.clone())
                .collect();
            for id in &ids {
                snap.rules.remove(id);
            }
            snap.buckets.retain(|(room, _), _| room != room_id);
            ids
        });

        if !removed.is_empty() {
            info!(room_id = %room_id, count = removed.len(), "🧹 Room rules purged");
        }
        removed
    }

    /// Enabled rules for a (room, parameter) pair in evaluation order
    pub fn candidates(&self, room_id: &RoomId, parameter: SensorParameter) -> Vec<Arc<AutomationRule>> {
        self.current()
            .buckets
            .get(&(room_id.clone(), parameter))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, rule_id: &RuleId) -> Option<Arc<AutomationRule>> {
        self.current().rules.get(rule_id).cloned()
    }

    /// Still indexed and enabled
    pub fn is_live(&self, rule_id: &RuleId) -> bool {
        self.get(rule_id).is_some_and(|r| r.enabled)
    }

    /// All rules of a room, enabled or not, in evaluation order
    pub fn rules_for_room(&self, room_id: &RoomId) -> Vec<Arc<AutomationRule>> {
        let mut rules: Vec<_> = self
            .current()
            .rules
            .values()
            .filter(|r| &r.room_id == room_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| evaluation_order(a, b));
        rules
    }

    /// Rules whose action commands the given device
    pub fn rules_targeting(&self, device_id: &DeviceId) -> Vec<Arc<AutomationRule>> {
        let mut rules: Vec<_> = self
            .current()
            .rules
            .values()
            .filter(|r| &r.action.device_id == device_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| evaluation_order(a, b));
        rules
    }

    pub fn all(&self) -> Vec<Arc<AutomationRule>> {
        let mut rules: Vec<_> = self.current().rules.values().cloned().collect();
        rules.sort_by(|a, b| evaluation_order(a, b));
        rules
    }

    pub fn len(&self) -> usize {
        self.current().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
