//! Robots: one autonomous agent per record, carrying (not inheriting) an
//! entity for its visual and inventory identity.

use crate::entity::Entity;
use crate::inventory::Inventory;
use forgebots_lang::{Capability, CapabilitySet, Direction, Env, Machine};
use forgebots_world::Location;

/// The union of capabilities conferred by every device in an installed
/// inventory. A robot's effective permission set.
#[must_use]
pub fn capabilities_of(inventory: &Inventory) -> CapabilitySet {
    let mut set = CapabilitySet::new();
    for (_count, entity) in inventory.iter() {
        set.union_with(entity.capabilities());
    }
    set
}

/// One agent: identity entity, two inventories, a cached capability set,
/// and the machine evaluating its current program.
#[derive(Debug)]
pub struct Robot {
    entity: Entity,
    location: Location,
    facing: Option<Direction>,
    inventory: Inventory,
    installed: Inventory,
    capabilities: CapabilitySet,
    env: Env,
    machine: Machine,
    system: bool,
    self_destruct: bool,
    steps_remaining: u32,
}

impl Robot {
    /// Create a robot with a name-carrying entity, a starting position, an
    /// initial program, and its initial devices. Name uniqueness is the
    /// caller's concern.
    #[must_use]
    pub fn new(
        entity: Entity,
        location: Location,
        facing: Option<Direction>,
        machine: Machine,
        devices: Inventory,
    ) -> Self {
        let capabilities = capabilities_of(&devices);
        Self {
            entity,
            location,
            facing,
            inventory: Inventory::new(),
            installed: devices,
            capabilities,
            env: Env::new(),
            machine,
            system: false,
            self_destruct: false,
            steps_remaining: 0,
        }
    }

    /// Mark this robot as system-spawned: environment scripting trusted by
    /// construction and exempt from capability checks.
    #[must_use]
    pub fn into_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// The robot's name, projected from its carried entity.
    #[must_use]
    pub fn name(&self) -> &str {
        self.entity.name()
    }

    /// Display glyph, projected from the carried entity.
    #[must_use]
    pub fn glyph(&self) -> char {
        self.entity.display().glyph
    }

    /// The carried entity record.
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Current location.
    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    /// Move the robot to `location`.
    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    /// Current facing direction.
    #[must_use]
    pub const fn facing(&self) -> Option<Direction> {
        self.facing
    }

    /// Set or clear the facing direction.
    pub fn set_facing(&mut self, facing: Option<Direction>) {
        self.facing = facing;
    }

    /// Carried-goods inventory.
    #[must_use]
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Mutable carried-goods inventory.
    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    /// Installed-devices inventory. Mutate it only through
    /// [`Robot::install_device`] / [`Robot::uninstall_device`] so the
    /// cached capability set stays exact.
    #[must_use]
    pub fn installed(&self) -> &Inventory {
        &self.installed
    }

    /// Install a device and recompute the cached capability set in the
    /// same call.
    pub fn install_device(&mut self, device: Entity) {
        self.installed.insert(device);
        self.capabilities = capabilities_of(&self.installed);
    }

    /// Remove one copy of a device and recompute the cached capability
    /// set. Returns whether a copy was removed.
    pub fn uninstall_device(&mut self, device: &Entity) -> bool {
        let removed = self.installed.delete(device) > 0;
        if removed {
            self.capabilities = capabilities_of(&self.installed);
        }
        removed
    }

    /// The cached effective capability set.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Whether the robot may execute a primitive requiring `capability`.
    /// System robots bypass the check entirely.
    #[must_use]
    pub fn may_use(&self, capability: Capability) -> bool {
        self.system || self.capabilities.contains(capability)
    }

    /// Whether this is a system-spawned robot.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.system
    }

    /// Whether the robot has requested its own removal.
    #[must_use]
    pub const fn wants_self_destruct(&self) -> bool {
        self.self_destruct
    }

    /// Request removal; honored by the scheduler, never immediate.
    pub fn set_self_destruct(&mut self) {
        self.self_destruct = true;
    }

    /// Accumulated top-level bindings from completed programs.
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Replace the accumulated bindings (called by the scheduler when a
    /// program completes).
    pub fn set_env(&mut self, env: Env) {
        self.env = env;
    }

    /// The robot's machine.
    #[must_use]
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Mutable access to the machine.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Replace the machine with a new program (REPL / injected work).
    pub fn set_machine(&mut self, machine: Machine) {
        self.machine = machine;
    }

    /// Steps left in the current tick.
    #[must_use]
    pub const fn steps_remaining(&self) -> u32 {
        self.steps_remaining
    }

    /// Reset the per-tick step budget.
    pub fn reset_steps(&mut self, budget: u32) {
        self.steps_remaining = budget;
    }

    /// Consume one reduction step.
    pub fn consume_step(&mut self) {
        self.steps_remaining = self.steps_remaining.saturating_sub(1);
    }

    /// Force the budget to zero: a command primitive just completed, so
    /// the robot yields the rest of this tick.
    pub fn zero_steps(&mut self) {
        self.steps_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityBuilder;
    use forgebots_lang::Term;

    fn device(name: &str, caps: &[Capability]) -> Entity {
        let mut builder = EntityBuilder::new(name, name.chars().next().expect("name"));
        for cap in caps {
            builder = builder.capability(*cap);
        }
        builder.build()
    }

    fn bare_robot() -> Robot {
        Robot::new(
            EntityBuilder::new("base", 'R').build(),
            Location::new(0, 0),
            Some(Direction::North),
            Machine::new(Term::Unit),
            Inventory::new(),
        )
    }

    #[test]
    fn capability_cache_tracks_installed_devices_exactly() {
        let mut robot = bare_robot();
        assert!(robot.capabilities().is_empty());
        assert!(!robot.may_use(Capability::Move));

        let treads = device("treads", &[Capability::Move, Capability::Turn]);
        robot.install_device(treads.clone());
        assert!(robot.may_use(Capability::Move));
        assert!(robot.may_use(Capability::Turn));

        let drill = device("drill", &[Capability::Grab]);
        robot.install_device(drill);
        assert!(robot.may_use(Capability::Grab));

        assert!(robot.uninstall_device(&treads));
        assert!(!robot.may_use(Capability::Move));
        assert!(robot.may_use(Capability::Grab));
    }

    #[test]
    fn duplicate_devices_keep_capabilities_until_the_last_is_removed() {
        let mut robot = bare_robot();
        let treads = device("treads", &[Capability::Move]);
        robot.install_device(treads.clone());
        robot.install_device(treads.clone());

        assert!(robot.uninstall_device(&treads));
        assert!(
            robot.may_use(Capability::Move),
            "one copy remains installed"
        );
        assert!(robot.uninstall_device(&treads));
        assert!(!robot.may_use(Capability::Move));
    }

    #[test]
    fn system_robots_bypass_capability_checks() {
        let robot = bare_robot().into_system();
        assert!(robot.capabilities().is_empty());
        assert!(robot.may_use(Capability::Build));
    }

    #[test]
    fn name_and_glyph_project_through_the_carried_entity() {
        let robot = bare_robot();
        assert_eq!(robot.name(), "base");
        assert_eq!(robot.glyph(), 'R');
    }
}
