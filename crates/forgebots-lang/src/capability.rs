//! Named permissions gating world-affecting primitives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A permission required to execute one of the effectful language
/// primitives. Capabilities are conferred by installed devices; a robot may
/// only run a primitive whose capability its devices provide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Capability {
    Move,
    Turn,
    Grab,
    Place,
    Give,
    Make,
    Build,
    Scan,
    Say,
    SelfDestruct,
}

/// An ordered set of capabilities. Ordering keeps iteration and structural
/// hashing deterministic.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// The empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cap` is present.
    #[must_use]
    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    /// Add a single capability.
    pub fn insert(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    /// Union another set into this one.
    pub fn union_with(&mut self, other: &Self) {
        self.0.extend(other.0.iter().copied());
    }

    /// Number of capabilities present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no capabilities are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate capabilities in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
