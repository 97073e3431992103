// MIT License - Copyright (c) 2026 rnet contributors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, RnetError};

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u8);

        impl $name {
            pub const fn new(value: u8) -> Self {
                Self(value)
            }

            pub const fn value(self) -> u8 {
                self.0
            }
        }

        impl From<u8> for $name {
            fn from(v: u8) -> Self {
                Self(v)
            }
        }

        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                v.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:02X}", self.0)
            }
        }
    };
}

byte_id!(
    /// Address of a controller on the bus.
    RnetControllerId
);

byte_id!(
    /// Address of a zone within a controller.
    RnetZoneId
);

byte_id!(
    /// Address of a keypad (or the controller itself) within a zone.
    RnetKeypadId
);

impl RnetControllerId {
    /// Broadcast to every controller.
    pub const ALL_CONTROLLERS: Self = Self(0x7F);

    /// Whether this is a real controller address.
    pub fn is_reserved(self) -> bool {
        self == Self::ALL_CONTROLLERS
    }

    /// Every non-reserved controller address.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::ALL_CONTROLLERS.0).map(Self)
    }
}

impl RnetZoneId {
    /// Broadcast to every zone of a controller.
    pub const ALL_ZONES: Self = Self(0x7F);

    pub fn is_reserved(self) -> bool {
        self == Self::ALL_ZONES
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::ALL_ZONES.0).map(Self)
    }
}

impl RnetKeypadId {
    /// External systems (automation bridges). Default identity of this process.
    pub const EXTERNAL: Self = Self(0x70);
    /// Reply to whoever sent the request.
    pub const REQUEST_ID: Self = Self(0x79);
    /// Every keypad of the addressed zone.
    pub const ALL_ZONE: Self = Self(0x7D);
    /// The controller itself.
    pub const CONTROLLER: Self = Self(0x7F);

    /// Broadcast and placeholder keypad ids never name a single device.
    ///
    /// `CONTROLLER` is not reserved: it addresses a real device.
    pub fn is_reserved(self) -> bool {
        self == Self::ALL_ZONE || self == Self::REQUEST_ID
    }
}

/// Full address of a device on the bus.
///
/// Ordering is by controller, then zone, then keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RnetDeviceId {
    pub controller: RnetControllerId,
    pub zone: RnetZoneId,
    pub keypad: RnetKeypadId,
}

impl RnetDeviceId {
    /// Broadcast to every device on the bus.
    pub const ALL_DEVICES: Self = Self {
        controller: RnetControllerId::ALL_CONTROLLERS,
        zone: RnetZoneId(0x00),
        keypad: RnetKeypadId::CONTROLLER,
    };

    pub const fn new(controller: RnetControllerId, zone: RnetZoneId, keypad: RnetKeypadId) -> Self {
        Self {
            controller,
            zone,
            keypad,
        }
    }

    pub const fn from_bytes(controller: u8, zone: u8, keypad: u8) -> Self {
        Self::new(
            RnetControllerId(controller),
            RnetZoneId(zone),
            RnetKeypadId(keypad),
        )
    }

    /// The controller device of the given controller.
    pub const fn controller_device(controller: RnetControllerId) -> Self {
        Self::new(controller, RnetZoneId(0x00), RnetKeypadId::CONTROLLER)
    }

    /// Whether any component is a broadcast or placeholder value.
    pub fn is_reserved(&self) -> bool {
        self.controller.is_reserved() || self.zone.is_reserved() || self.keypad.is_reserved()
    }

    /// Whether this id is an all-keypads broadcast for the zone `other` lives in.
    pub fn is_zone_broadcast_for(&self, other: &RnetDeviceId) -> bool {
        self.keypad == RnetKeypadId::ALL_ZONE
            && self.controller == other.controller
            && self.zone == other.zone
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.controller.0, self.zone.0, self.keypad.0]
    }
}

/// Dotted hex form, e.g. `01.02.7F`.
impl fmt::Display for RnetDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.controller, self.zone, self.keypad)
    }
}

/// Parses the dotted hex form. Each part may carry a `0x` prefix.
impl FromStr for RnetDeviceId {
    type Err = RnetError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [c, z, k] = parts.as_slice() else {
            return Err(RnetError::InvalidDeviceId {
                input: s.to_string(),
                reason: "expected controller.zone.keypad".to_string(),
            });
        };
        Ok(Self::from_bytes(parse_part(c, s)?, parse_part(z, s)?, parse_part(k, s)?))
    }
}

fn parse_part(part: &str, whole: &str) -> Result<u8> {
    let part = part.trim();
    let digits = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
        .unwrap_or(part);
    u8::from_str_radix(digits, 16).map_err(|_| RnetError::InvalidDeviceId {
        input: whole.to_string(),
        reason: format!("{part:?} is not a hex byte"),
    })
}

impl Serialize for RnetDeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RnetDeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
