//! Lamport clocks ordering entries across writers.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lamport clock attributed to one identity.
///
/// A `Clock` is an immutable value: [`tick`](Clock::tick) and
/// [`merge`](Clock::merge) return new clocks and never change the identity
/// the clock is attributed to.
///
/// Ordering: `time` → `id` (lexicographic). Two writers that produce an
/// entry at the same logical time are therefore ordered by identity id,
/// which makes traversal order identical on every replica.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    /// Identity id the clock is attributed to.
    pub id: String,
    /// Logical time.
    pub time: u64,
}

impl Clock {
    /// Create a clock with explicit values.
    pub fn new(id: impl Into<String>, time: u64) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }

    /// The zero clock for an identity.
    pub fn genesis(id: impl Into<String>) -> Self {
        Self::new(id, 0)
    }

    /// The next clock value for a local event, or `None` once the time is
    /// exhausted.
    pub fn tick(&self) -> Option<Self> {
        Some(Self {
            id: self.id.clone(),
            time: self.time.checked_add(1)?,
        })
    }

    /// Whether no further local event can be ordered after this clock.
    pub fn is_exhausted(&self) -> bool {
        self.time == u64::MAX
    }

    /// Adopt the causal time of `other` if it is ahead, keeping this
    /// clock's identity attribution.
    pub fn merge(&self, other: &Clock) -> Self {
        Self {
            id: self.id.clone(),
            time: self.time.max(other.time),
        }
    }
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id: String = self.id.chars().take(8).collect();
        write!(f, "Clock({id}@{})", self.time)
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.time)
    }
}
