//! Deterministic room-id computation.
//!
//! A room is the broadcast partition for one conversation. Direct rooms are
//! derived from the two participant ids so that either side computes the
//! same id; group rooms are the group id under a fixed prefix. Rooms have
//! no persisted existence; membership is whatever connections are joined
//! right now.

use serde::{Deserialize, Serialize};

use crate::types::{GroupId, UserId};

/// Separator between the sorted participant ids of a direct room.
const DIRECT_SEPARATOR: char = '_';

/// Prefix distinguishing group rooms from direct rooms.
const GROUP_PREFIX: &str = "group-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Room id for a 1:1 conversation. Commutative: `direct(a, b) ==
    /// direct(b, a)` for any pair of ids.
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}{}{}", lo, DIRECT_SEPARATOR, hi))
    }

    /// Room id for a group conversation.
    pub fn group(group: &GroupId) -> Self {
        Self(format!("{}{}", GROUP_PREFIX, group))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
