// MIT License - Copyright (c) 2026 rnet contributors

use std::any::Any;
use std::sync::Arc;

use crate::id::{RnetControllerId, RnetDeviceId, RnetZoneId};

/// What a profile query is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileTarget {
    Bus,
    Controller(RnetControllerId),
    Zone(RnetControllerId, RnetZoneId),
    Device(RnetDeviceId),
}

/// An opaque capability description. The bus never looks inside.
pub type Profile = Arc<dyn Any + Send + Sync>;

/// Supplies profiles for bus objects.
///
/// Drivers register providers with [`Bus::add_profile_provider`](crate::bus::Bus::add_profile_provider).
pub trait ProfileProvider: Send + Sync {
    fn get_profiles(&self, target: &ProfileTarget) -> Vec<Profile>;
}

/// Any closure over a target works as a provider.
impl<F> ProfileProvider for F
where
    F: Fn(&ProfileTarget) -> Vec<Profile> + Send + Sync,
{
    fn get_profiles(&self, target: &ProfileTarget) -> Vec<Profile> {
        self(target)
    }
}
