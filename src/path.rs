// MIT License - Copyright (c) 2026 rnet contributors

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::MAX_PATH_DEPTH;
use crate::error::{Result, RnetError};

/// Hierarchical address of a data item inside a device.
///
/// A path is up to eight byte segments deep. It is a plain `Copy` value:
/// [`navigate`](Self::navigate) and [`parent`](Self::parent) return new paths.
/// Equality and ordering are lexicographic over the segments, so `[1]`
/// sorts before `[1, 0]`, which sorts before `[2]`.
#[derive(Clone, Copy)]
pub struct RnetPath {
    len: u8,
    segments: [u8; MAX_PATH_DEPTH],
}

impl RnetPath {
    /// The root path (no segments).
    pub const EMPTY: RnetPath = RnetPath {
        len: 0,
        segments: [0; MAX_PATH_DEPTH],
    };

    /// Build a path from segments in the order given.
    pub fn new(segments: &[u8]) -> Result<Self> {
        if segments.len() > MAX_PATH_DEPTH {
            return Err(RnetError::PathOutOfRange {
                details: format!("{} segments given, at most {MAX_PATH_DEPTH} allowed", segments.len()),
            });
        }
        let mut path = Self::EMPTY;
        path.segments[..segments.len()].copy_from_slice(segments);
        path.len = segments.len() as u8;
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.segments[..self.len as usize]
    }

    /// Append a segment.
    pub fn navigate(&self, segment: u8) -> Result<Self> {
        if self.len() >= MAX_PATH_DEPTH {
            return Err(RnetError::PathOutOfRange {
                details: format!("cannot navigate below {self}: depth already {MAX_PATH_DEPTH}"),
            });
        }
        let mut next = *self;
        next.segments[self.len()] = segment;
        next.len += 1;
        Ok(next)
    }

    /// Drop the last segment.
    pub fn parent(&self) -> Result<Self> {
        if self.is_empty() {
            return Err(RnetError::PathOutOfRange {
                details: "the empty path has no parent".to_string(),
            });
        }
        let mut parent = *self;
        parent.len -= 1;
        parent.segments[parent.len()] = 0;
        Ok(parent)
    }

    /// Whether `self` is `other` or lies below it.
    pub fn starts_with(&self, other: &RnetPath) -> bool {
        self.as_slice().starts_with(other.as_slice())
    }
}

impl Default for RnetPath {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl PartialEq for RnetPath {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for RnetPath {}

impl Hash for RnetPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl PartialOrd for RnetPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RnetPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl fmt::Debug for RnetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RnetPath({self})")
    }
}

/// Dotted form, e.g. `2.0.1`. The empty path renders as an empty string.
impl fmt::Display for RnetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.as_slice().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for RnetPath {
    type Err = RnetError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::EMPTY);
        }
        let segments = s
            .split('.')
            .map(|p| {
                p.trim().parse::<u8>().map_err(|_| RnetError::InvalidPath {
                    input: s.to_string(),
                    reason: format!("{p:?} is not a segment between 0 and 255"),
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::new(&segments)
    }
}

impl TryFrom<&[u8]> for RnetPath {
    type Error = RnetError;

    fn try_from(segments: &[u8]) -> Result<Self> {
        Self::new(segments)
    }
}

impl Serialize for RnetPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RnetPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
