// MIT License - Copyright (c) 2026 rnet contributors

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::devices::{Activity, Zone};
use crate::id::{RnetControllerId, RnetZoneId};

/// A controller on the bus and the zones discovered under it.
pub struct Controller {
    id: RnetControllerId,
    activity_timeout: Duration,
    activity: Activity,
    zones: RwLock<BTreeMap<RnetZoneId, Arc<Zone>>>,
}

impl Controller {
    pub fn new(id: RnetControllerId, activity_timeout: Duration) -> Self {
        Self {
            id,
            activity_timeout,
            activity: Activity::new(activity_timeout),
            zones: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> RnetControllerId {
        self.id
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }

    /// Snapshot of the zones, ordered by id.
    pub fn zones(&self) -> Vec<Arc<Zone>> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn zone(&self, id: RnetZoneId) -> Option<Arc<Zone>> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub(crate) fn get_or_create_zone(&self, id: RnetZoneId) -> Arc<Zone> {
        if let Some(zone) = self.zone(id) {
            return zone;
        }
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert_with(|| Arc::new(Zone::new(self.id, id, self.activity_timeout)))
            .clone()
    }

    /// Remove zones that are idle and hold no devices. `keep` is never removed.
    pub(crate) fn evict_zones(&self, max_idle: Duration, keep: Option<RnetZoneId>) -> Vec<RnetZoneId> {
        let mut zones = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        let evicted: Vec<RnetZoneId> = zones
            .iter()
            .filter(|(id, z)| Some(**id) != keep && z.is_empty() && z.activity().idle_for(max_idle))
            .map(|(id, _)| *id)
            .collect();
        for id in &evicted {
            zones.remove(id);
        }
        evicted
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
