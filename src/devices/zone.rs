// MIT License - Copyright (c) 2026 rnet contributors

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::devices::{Activity, Device};
use crate::id::{RnetControllerId, RnetKeypadId, RnetZoneId};

/// A zone of a controller and the devices (keypads) in it.
pub struct Zone {
    controller: RnetControllerId,
    id: RnetZoneId,
    activity: Activity,
    devices: RwLock<BTreeMap<RnetKeypadId, Device>>,
}

impl Zone {
    pub fn new(controller: RnetControllerId, id: RnetZoneId, activity_timeout: Duration) -> Self {
        Self {
            controller,
            id,
            activity: Activity::new(activity_timeout),
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> RnetZoneId {
        self.id
    }

    pub fn controller_id(&self) -> RnetControllerId {
        self.controller
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }

    /// Snapshot of the devices, ordered by keypad id.
    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn device(&self, keypad: RnetKeypadId) -> Option<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&keypad)
            .cloned()
    }

    pub(crate) fn get_or_insert_device(&self, keypad: RnetKeypadId, create: impl FnOnce() -> Device) -> Device {
        if let Some(device) = self.device(keypad) {
            return device;
        }
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(keypad)
            .or_insert_with(create)
            .clone()
    }

    /// Remove remote devices idle for longer than `max_idle`. Returns their
    /// keypad ids.
    pub(crate) fn evict_devices(&self, max_idle: Duration) -> Vec<RnetKeypadId> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let evicted: Vec<RnetKeypadId> = devices
            .iter()
            .filter(|(_, d)| !d.is_local() && d.activity().idle_for(max_idle))
            .map(|(k, _)| *k)
            .collect();
        for keypad in &evicted {
            devices.remove(keypad);
        }
        evicted
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
