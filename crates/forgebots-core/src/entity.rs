//! Immutable, structurally hashed entity descriptors.
//!
//! Every entity caches a structural hash of its other fields; equality and
//! ordering are defined by that hash alone, which makes entities cheap map
//! keys at the accepted risk of hash collision. Construction goes through
//! [`EntityBuilder`] and every mutator recomputes the hash in the same
//! call, so no path can observe a stale cache.

use crate::inventory::Inventory;
use forgebots_lang::{Capability, CapabilitySet, Direction};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Boolean attributes an entity may carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EntityProperty {
    /// Robots cannot move into a cell holding this entity.
    BlocksMovement,
    /// The entity can be picked up with `grab`.
    Portable,
    /// The entity reappears some time after being grabbed.
    Regrowable,
    /// A robot entering this entity's cell is destroyed.
    CausesDrowning,
}

/// Regrowth timing window in ticks; the actual delay is drawn uniformly
/// from `min_ticks..=max_ticks` per growth stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Growth {
    pub min_ticks: u32,
    pub max_ticks: u32,
}

/// How an entity renders: one glyph plus a named style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityDisplay {
    pub glyph: char,
    pub style: String,
}

/// An immutable entity descriptor with a cached structural hash.
///
/// Serialization goes through [`EntityRecord`], which omits the hash: it is
/// recomputed on decode, so a snapshot cannot smuggle in a stale cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "EntityRecord", into = "EntityRecord")]
pub struct Entity {
    hash: u64,
    display: EntityDisplay,
    name: String,
    plural: Option<String>,
    description: Vec<String>,
    orientation: Option<Direction>,
    growth: Option<Growth>,
    yields: Option<String>,
    properties: BTreeSet<EntityProperty>,
    capabilities: CapabilitySet,
    inventory: Inventory,
}

impl Entity {
    /// The cached structural hash over every field except the hash itself.
    #[must_use]
    pub const fn structural_hash(&self) -> u64 {
        self.hash
    }

    /// Entity name (informally a unique key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plural form, defaulting to `name` + "s" when no irregular plural is
    /// declared.
    #[must_use]
    pub fn plural(&self) -> String {
        match &self.plural {
            Some(p) => p.clone(),
            None => format!("{}s", self.name),
        }
    }

    /// Display glyph and style.
    #[must_use]
    pub fn display(&self) -> &EntityDisplay {
        &self.display
    }

    /// Description paragraphs.
    #[must_use]
    pub fn description(&self) -> &[String] {
        &self.description
    }

    /// Facing direction, if the entity has one.
    #[must_use]
    pub const fn orientation(&self) -> Option<Direction> {
        self.orientation
    }

    /// Regrowth window, if the entity regrows.
    #[must_use]
    pub const fn growth(&self) -> Option<Growth> {
        self.growth
    }

    /// Name of the entity left behind when this one is harvested.
    #[must_use]
    pub fn yields(&self) -> Option<&str> {
        self.yields.as_deref()
    }

    /// Whether the entity carries `property`.
    #[must_use]
    pub fn has_property(&self, property: EntityProperty) -> bool {
        self.properties.contains(&property)
    }

    /// Capabilities this entity confers when installed as a device.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// The entity's own nested inventory.
    #[must_use]
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Rename the entity.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.recompute_hash();
    }

    /// Set or clear the facing direction.
    pub fn set_orientation(&mut self, orientation: Option<Direction>) {
        self.orientation = orientation;
        self.recompute_hash();
    }

    /// Replace the nested inventory.
    pub fn set_inventory(&mut self, inventory: Inventory) {
        self.inventory = inventory;
        self.recompute_hash();
    }

    /// Recompute the cached hash from every other field. Called by every
    /// mutator; field order is fixed so identical field values always hash
    /// identically regardless of how the entity was put together.
    fn recompute_hash(&mut self) {
        let mut hasher = DefaultHasher::new();
        self.display.hash(&mut hasher);
        self.name.hash(&mut hasher);
        self.plural.hash(&mut hasher);
        self.description.hash(&mut hasher);
        self.orientation.hash(&mut hasher);
        self.growth.hash(&mut hasher);
        self.yields.hash(&mut hasher);
        self.properties.hash(&mut hasher);
        self.capabilities.hash(&mut hasher);
        self.inventory.hash_contents(&mut hasher);
        self.hash = hasher.finish();
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Entity {}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// The wire shape of an [`Entity`]: every field except the cached hash.
#[derive(Serialize, Deserialize)]
struct EntityRecord {
    display: EntityDisplay,
    name: String,
    plural: Option<String>,
    description: Vec<String>,
    orientation: Option<Direction>,
    growth: Option<Growth>,
    yields: Option<String>,
    properties: BTreeSet<EntityProperty>,
    capabilities: CapabilitySet,
    inventory: Inventory,
}

impl From<EntityRecord> for Entity {
    fn from(record: EntityRecord) -> Self {
        let mut entity = Entity {
            hash: 0,
            display: record.display,
            name: record.name,
            plural: record.plural,
            description: record.description,
            orientation: record.orientation,
            growth: record.growth,
            yields: record.yields,
            properties: record.properties,
            capabilities: record.capabilities,
            inventory: record.inventory,
        };
        entity.recompute_hash();
        entity
    }
}

impl From<Entity> for EntityRecord {
    fn from(entity: Entity) -> Self {
        Self {
            display: entity.display,
            name: entity.name,
            plural: entity.plural,
            description: entity.description,
            orientation: entity.orientation,
            growth: entity.growth,
            yields: entity.yields,
            properties: entity.properties,
            capabilities: entity.capabilities,
            inventory: entity.inventory,
        }
    }
}

/// Step-by-step constructor for [`Entity`]; the only way to make one.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    display: EntityDisplay,
    name: String,
    plural: Option<String>,
    description: Vec<String>,
    orientation: Option<Direction>,
    growth: Option<Growth>,
    yields: Option<String>,
    properties: BTreeSet<EntityProperty>,
    capabilities: CapabilitySet,
    inventory: Inventory,
}

impl EntityBuilder {
    /// Start building an entity with the two mandatory fields.
    #[must_use]
    pub fn new(name: impl Into<String>, glyph: char) -> Self {
        Self {
            display: EntityDisplay {
                glyph,
                style: String::from("default"),
            },
            name: name.into(),
            plural: None,
            description: Vec::new(),
            orientation: None,
            growth: None,
            yields: None,
            properties: BTreeSet::new(),
            capabilities: CapabilitySet::new(),
            inventory: Inventory::new(),
        }
    }

    /// Named display style.
    #[must_use]
    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.display.style = style.into();
        self
    }

    /// Irregular plural form.
    #[must_use]
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    /// Append a description paragraph.
    #[must_use]
    pub fn describe(mut self, paragraph: impl Into<String>) -> Self {
        self.description.push(paragraph.into());
        self
    }

    /// Initial facing direction.
    #[must_use]
    pub fn orientation(mut self, direction: Direction) -> Self {
        self.orientation = Some(direction);
        self
    }

    /// Regrowth window.
    #[must_use]
    pub fn growth(mut self, min_ticks: u32, max_ticks: u32) -> Self {
        self.growth = Some(Growth {
            min_ticks,
            max_ticks,
        });
        self
    }

    /// Entity left behind on harvest.
    #[must_use]
    pub fn yields(mut self, name: impl Into<String>) -> Self {
        self.yields = Some(name.into());
        self
    }

    /// Add a boolean property.
    #[must_use]
    pub fn property(mut self, property: EntityProperty) -> Self {
        self.properties.insert(property);
        self
    }

    /// Add a conferred capability.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Seed the nested inventory.
    #[must_use]
    pub fn inventory(mut self, inventory: Inventory) -> Self {
        self.inventory = inventory;
        self
    }

    /// Finish, computing the structural hash.
    #[must_use]
    pub fn build(self) -> Entity {
        let mut entity = Entity {
            hash: 0,
            display: self.display,
            name: self.name,
            plural: self.plural,
            description: self.description,
            orientation: self.orientation,
            growth: self.growth,
            yields: self.yields,
            properties: self.properties,
            capabilities: self.capabilities,
            inventory: self.inventory,
        };
        entity.recompute_hash();
        entity
    }
}
