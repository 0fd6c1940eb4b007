//! The tick scheduler and the effect shell.
//!
//! One control loop owns the world store and the robot collection. Each
//! tick, every active robot receives a bounded reduction-step budget and
//! its machine is stepped until the budget runs out, a command completes
//! (which forfeits the rest of the budget), or the machine terminates.
//! Robots never add or remove themselves: spawns, self-destructs, and
//! regrowth all queue up and are committed at tick boundaries.

use crate::entity::{Entity, EntityProperty};
use crate::inventory::Inventory;
use crate::recipe::{NoRecipes, RecipeSource};
use crate::registry::EntityRegistry;
use crate::robot::Robot;
use forgebots_lang::{Const, Direction, Env, Fail, Machine, StepOutcome, Term, Value};
use forgebots_world::{Coords, Location, World};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use thiserror::Error;
use tracing::{debug, warn};

new_key_type! {
    /// Stable handle for robots backed by a generational slot map.
    pub struct RobotId;
}

/// Discrete simulation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Tick zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The following tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Terrain layer values. Generated once per cell and never mutated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum Terrain {
    #[default]
    Grass,
    Dirt,
    Stone,
    Ice,
    Water,
}

/// The concrete world store used by the game.
pub type GameWorld = World<Terrain, Entity>;

/// Errors raised when constructing or driving game state.
#[derive(Debug, Error)]
pub enum GameError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The referenced robot does not exist.
    #[error("unknown robot")]
    UnknownRobot,
    /// The robot's machine is still running and cannot take new work.
    #[error("robot is still running a program")]
    RobotBusy,
}

/// Static configuration for a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Reduction steps granted to each robot per tick.
    pub steps_per_tick: u32,
    /// Optional RNG seed for reproducible regrowth timing.
    pub rng_seed: Option<u64>,
    /// Maximum retained `say` log entries.
    pub log_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            steps_per_tick: 100,
            rng_seed: None,
            log_capacity: 256,
        }
    }
}

impl GameConfig {
    fn validate(&self) -> Result<(), GameError> {
        if self.steps_per_tick == 0 {
            return Err(GameError::InvalidConfig("steps_per_tick must be positive"));
        }
        if self.log_capacity == 0 {
            return Err(GameError::InvalidConfig("log_capacity must be positive"));
        }
        Ok(())
    }

    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// One retained `say` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub tick: Tick,
    pub robot: String,
    pub message: String,
}

/// Summary returned by [`GameState::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub robots_spawned: usize,
    pub robots_removed: usize,
}

/// A `build` request waiting for the end of the tick.
struct SpawnOrder {
    entity: Entity,
    location: Location,
    facing: Option<Direction>,
    program: Term,
    env: Env,
    globals: Env,
    devices: Inventory,
    system: bool,
}

/// A grabbed regrowable entity waiting to reappear.
struct RegrowthOrder {
    due: Tick,
    coords: Coords,
    entity: Entity,
}

/// Aggregate game state: the world store, the robot collection, and the
/// queues the scheduler commits at tick boundaries.
pub struct GameState {
    config: GameConfig,
    tick: Tick,
    rng: SmallRng,
    world: GameWorld,
    registry: EntityRegistry,
    recipes: Box<dyn RecipeSource>,
    robots: SlotMap<RobotId, Robot>,
    /// Stable insertion order; the documented fairness policy for which
    /// robot steps first within a tick.
    order: Vec<RobotId>,
    pending_spawns: Vec<SpawnOrder>,
    pending_regrowth: Vec<RegrowthOrder>,
    log: VecDeque<LogEntry>,
    births: u64,
}

impl fmt::Debug for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameState")
            .field("tick", &self.tick)
            .field("robot_count", &self.robots.len())
            .field("pending_spawns", &self.pending_spawns.len())
            .field("pending_regrowth", &self.pending_regrowth.len())
            .finish()
    }
}

impl GameState {
    /// Create a game over the supplied world and entity definitions.
    pub fn new(
        config: GameConfig,
        world: GameWorld,
        registry: EntityRegistry,
    ) -> Result<Self, GameError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let log_capacity = config.log_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            world,
            registry,
            recipes: Box::new(NoRecipes),
            robots: SlotMap::with_key(),
            order: Vec::new(),
            pending_spawns: Vec::new(),
            pending_regrowth: Vec::new(),
            log: VecDeque::with_capacity(log_capacity),
            births: 0,
        })
    }

    /// Replace the crafting rule source consulted by `make`.
    pub fn set_recipes(&mut self, recipes: Box<dyn RecipeSource>) {
        self.recipes = recipes;
    }

    /// Add a robot to the active collection, returning its handle. Robots
    /// step in the order they were added.
    pub fn add_robot(&mut self, robot: Robot) -> RobotId {
        debug!(robot = robot.name(), "robot added");
        let id = self.robots.insert(robot);
        self.order.push(id);
        id
    }

    /// Borrow a robot.
    #[must_use]
    pub fn robot(&self, id: RobotId) -> Option<&Robot> {
        self.robots.get(id)
    }

    /// Mutably borrow a robot.
    pub fn robot_mut(&mut self, id: RobotId) -> Option<&mut Robot> {
        self.robots.get_mut(id)
    }

    /// Active robot handles in stepping order.
    pub fn robot_ids(&self) -> impl Iterator<Item = RobotId> + '_ {
        self.order.iter().copied()
    }

    /// Number of active robots.
    #[must_use]
    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    /// The first robot occupying `location`, if any.
    #[must_use]
    pub fn robot_at(&self, location: Location) -> Option<RobotId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.robots.get(*id).is_some_and(|r| r.location() == location))
    }

    /// Read-only access to the world store (terrain/entity render queries).
    #[must_use]
    pub fn world(&self) -> &GameWorld {
        &self.world
    }

    /// Mutable access to the world store (viewport pre-warming).
    pub fn world_mut(&mut self) -> &mut GameWorld {
        &mut self.world
    }

    /// The entity definition registry.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick_count(&self) -> Tick {
        self.tick
    }

    /// Iterate retained `say` log entries, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    /// Hand a new top-level program to an idle robot (the REPL seam). The
    /// program runs under the robot's accumulated definitions.
    pub fn inject_program(&mut self, id: RobotId, program: Term) -> Result<(), GameError> {
        let robot = self.robots.get_mut(id).ok_or(GameError::UnknownRobot)?;
        if !robot.machine().is_terminal() {
            return Err(GameError::RobotBusy);
        }
        let globals = robot.env().clone();
        robot.set_machine(Machine::with_globals(program, globals));
        Ok(())
    }

    /// Run one simulation tick: commit due regrowth, give every active
    /// robot its step budget in stable insertion order, honor
    /// self-destructs, then commit queued spawns.
    ///
    /// Robots spawned by `build` take their entity from the registry's
    /// `"robot"` definition when one is registered, falling back to a copy
    /// of the builder's own entity; hosts control spawned-robot identity by
    /// registering that definition.
    pub fn tick(&mut self) -> TickEvents {
        let current = self.tick;
        self.commit_regrowth(current);

        let ids: Vec<RobotId> = self.order.clone();
        let mut removed = 0;
        for id in ids {
            if !self.robots.contains_key(id) {
                continue;
            }
            self.run_robot_slice(id);
            if self.robots.get(id).is_some_and(Robot::wants_self_destruct) {
                self.remove_robot(id);
                removed += 1;
            }
        }

        let spawned = self.commit_spawns();
        self.tick = self.tick.next();
        // Report the tick that just ran, matching the log entries recorded
        // during it.
        TickEvents {
            tick: current,
            robots_spawned: spawned,
            robots_removed: removed,
        }
    }

    /// Step one robot until its budget, a command completion, or a
    /// terminal machine stops it.
    fn run_robot_slice(&mut self, id: RobotId) {
        let budget = self.config.steps_per_tick;
        {
            let Some(robot) = self.robots.get_mut(id) else {
                return;
            };
            if robot.machine().is_terminal() {
                return;
            }
            robot.reset_steps(budget);
        }
        loop {
            let outcome = {
                let Some(robot) = self.robots.get_mut(id) else {
                    break;
                };
                if robot.steps_remaining() == 0 || robot.wants_self_destruct() {
                    break;
                }
                robot.consume_step();
                robot.machine_mut().step()
            };
            match outcome {
                StepOutcome::Running => {}
                StepOutcome::Pending => self.dispatch_pending(id),
                StepOutcome::Finished => {
                    self.finish_program(id);
                    break;
                }
                StepOutcome::Failed => {
                    if let Some(robot) = self.robots.get(id) {
                        if let Some(fail) = robot.machine().failure() {
                            warn!(robot = robot.name(), error = %fail, "machine halted fatally");
                        }
                    }
                    break;
                }
            }
        }
    }

    /// Persist accumulated definitions when a program completes cleanly.
    fn finish_program(&mut self, id: RobotId) {
        if let Some(robot) = self.robots.get_mut(id) {
            let globals = robot.machine().globals().clone();
            robot.set_env(globals);
            debug!(robot = robot.name(), "program finished");
        }
    }

    fn remove_robot(&mut self, id: RobotId) {
        if let Some(robot) = self.robots.remove(id) {
            debug!(robot = robot.name(), "robot removed");
        }
        self.order.retain(|other| *other != id);
    }

    /// Pull the suspended command off a robot's machine and execute it.
    fn dispatch_pending(&mut self, id: RobotId) {
        let Some((op, args)) = self
            .robots
            .get(id)
            .and_then(|robot| robot.machine().pending_command())
            .map(|(op, args)| (op, args.to_vec()))
        else {
            return;
        };
        self.execute_command(id, op, args);
    }

    /// Capability-check and perform one effect command, feeding the result
    /// (or failure) back into the robot's machine. Completing a command
    /// forfeits the rest of the robot's tick; a denied or failed command
    /// does not.
    fn execute_command(&mut self, id: RobotId, op: Const, args: Vec<Value>) {
        if let Some(capability) = op.required_capability() {
            let allowed = self.robots.get(id).is_some_and(|r| r.may_use(capability));
            if !allowed {
                if let Some(robot) = self.robots.get_mut(id) {
                    debug!(
                        robot = robot.name(),
                        capability = ?capability,
                        "command denied"
                    );
                    robot.machine_mut().resume_error(Fail::Incapable(capability));
                }
                return;
            }
        }

        let result = match op {
            Const::Move => self.cmd_move(id),
            Const::Turn => self.cmd_turn(id, args),
            Const::Grab => self.cmd_grab(id),
            Const::Place => self.cmd_place(id, args),
            Const::Give => self.cmd_give(id, args),
            Const::Make => self.cmd_make(id, args),
            Const::Build => self.cmd_build(id, args),
            Const::Scan => self.cmd_scan(id),
            Const::Say => self.cmd_say(id, args),
            Const::SelfDestruct => self.cmd_self_destruct(id),
            _ => Err(Fail::Protocol("non-effect constant reached the effect shell")),
        };

        match result {
            Ok(value) => {
                if let Some(robot) = self.robots.get_mut(id) {
                    robot.machine_mut().resume_value(value);
                    robot.zero_steps();
                }
            }
            Err(fail) => {
                if let Some(robot) = self.robots.get_mut(id) {
                    debug!(robot = robot.name(), error = %fail, "command failed");
                    robot.machine_mut().resume_error(fail);
                }
            }
        }
    }

    fn robot_ref(&self, id: RobotId) -> Result<&Robot, Fail> {
        self.robots
            .get(id)
            .ok_or(Fail::Protocol("robot missing from the arena"))
    }

    fn facing_of(&self, id: RobotId) -> Result<(Location, Direction), Fail> {
        let robot = self.robot_ref(id)?;
        let facing = robot
            .facing()
            .ok_or_else(|| Fail::Cmd(String::from("robot has no facing direction")))?;
        Ok((robot.location(), facing))
    }

    fn cmd_move(&mut self, id: RobotId) -> Result<Value, Fail> {
        let (here, facing) = self.facing_of(id)?;
        let target = facing.offset(here);
        let occupant = self.world.entity_at_loading(Coords::from(target));
        if let Some(entity) = &occupant {
            if entity.has_property(EntityProperty::BlocksMovement) {
                return Err(Fail::Cmd(format!("blocked by {}", entity.name())));
            }
        }
        let drowns = occupant
            .as_ref()
            .is_some_and(|e| e.has_property(EntityProperty::CausesDrowning));
        if let Some(robot) = self.robots.get_mut(id) {
            robot.set_location(target);
            if drowns {
                warn!(robot = robot.name(), "robot drowned");
                robot.set_self_destruct();
            }
        }
        Ok(Value::Unit)
    }

    fn cmd_turn(&mut self, id: RobotId, args: Vec<Value>) -> Result<Value, Fail> {
        let Some(Value::Dir(direction)) = args.into_iter().next() else {
            return Err(Fail::BadValue("turn expects a direction"));
        };
        if let Some(robot) = self.robots.get_mut(id) {
            robot.set_facing(Some(direction));
        }
        Ok(Value::Unit)
    }

    fn cmd_grab(&mut self, id: RobotId) -> Result<Value, Fail> {
        let here = self.robot_ref(id)?.location();
        let coords = Coords::from(here);
        let Some(entity) = self.world.entity_at_loading(coords) else {
            return Err(Fail::Cmd(String::from("nothing here to grab")));
        };
        if !entity.has_property(EntityProperty::Portable) {
            return Err(Fail::Cmd(format!("the {} cannot be grabbed", entity.name())));
        }

        let replacement = entity
            .yields()
            .and_then(|name| self.registry.get(name).cloned());
        self.world.update(coords, move |_| replacement);

        if entity.has_property(EntityProperty::Regrowable) {
            if let Some(growth) = entity.growth() {
                let delay = self
                    .rng
                    .random_range(growth.min_ticks..=growth.max_ticks.max(growth.min_ticks));
                self.pending_regrowth.push(RegrowthOrder {
                    due: Tick(self.tick.0 + u64::from(delay)),
                    coords,
                    entity: entity.clone(),
                });
            }
        }

        let name = entity.name().to_string();
        if let Some(robot) = self.robots.get_mut(id) {
            robot.inventory_mut().insert(entity);
        }
        Ok(Value::Str(name))
    }

    fn cmd_place(&mut self, id: RobotId, args: Vec<Value>) -> Result<Value, Fail> {
        let Some(Value::Str(name)) = args.into_iter().next() else {
            return Err(Fail::BadValue("place expects an entity name"));
        };
        let here = self.robot_ref(id)?.location();
        let coords = Coords::from(here);
        if self.world.entity_at_loading(coords).is_some() {
            return Err(Fail::Cmd(String::from("this cell is already occupied")));
        }
        let entity = {
            let robot = self.robot_ref(id)?;
            robot
                .inventory()
                .lookup_by_name(&name)
                .first()
                .copied()
                .cloned()
                .ok_or_else(|| Fail::Cmd(format!("no {name} in inventory")))?
        };
        let placed = entity.clone();
        self.world.update(coords, move |_| Some(placed));
        if let Some(robot) = self.robots.get_mut(id) {
            robot.inventory_mut().delete(&entity);
        }
        Ok(Value::Unit)
    }

    fn cmd_give(&mut self, id: RobotId, args: Vec<Value>) -> Result<Value, Fail> {
        let Some(Value::Str(name)) = args.into_iter().next() else {
            return Err(Fail::BadValue("give expects an entity name"));
        };
        let (here, facing) = self.facing_of(id)?;
        let target = facing.offset(here);
        let receiver = self
            .robot_at(target)
            .ok_or_else(|| Fail::Cmd(String::from("no robot to give to")))?;
        let entity = {
            let robot = self.robot_ref(id)?;
            robot
                .inventory()
                .lookup_by_name(&name)
                .first()
                .copied()
                .cloned()
                .ok_or_else(|| Fail::Cmd(format!("no {name} in inventory")))?
        };
        if let Some(robot) = self.robots.get_mut(id) {
            robot.inventory_mut().delete(&entity);
        }
        if let Some(robot) = self.robots.get_mut(receiver) {
            robot.inventory_mut().insert(entity);
        }
        Ok(Value::Unit)
    }

    fn cmd_make(&mut self, id: RobotId, args: Vec<Value>) -> Result<Value, Fail> {
        let Some(Value::Str(name)) = args.into_iter().next() else {
            return Err(Fail::BadValue("make expects an entity name"));
        };
        let recipe = self
            .recipes
            .recipe_for(&name)
            .ok_or_else(|| Fail::Cmd(format!("no recipe for {name}")))?;
        {
            let robot = self.robot_ref(id)?;
            for (count, input) in &recipe.inputs {
                if robot.inventory().count_by_name(input) < *count {
                    return Err(Fail::Cmd(format!("not enough {input} to make {name}")));
                }
            }
        }
        let output = self
            .registry
            .get(&recipe.output)
            .cloned()
            .ok_or_else(|| Fail::Cmd(format!("unknown entity {}", recipe.output)))?;
        if let Some(robot) = self.robots.get_mut(id) {
            for (count, input) in &recipe.inputs {
                robot.inventory_mut().delete_by_name(input, *count);
            }
            robot.inventory_mut().insert(output);
        }
        Ok(Value::Unit)
    }

    /// Queue a child robot in the facing cell. The child's entity is the
    /// registry's `"robot"` template when registered, otherwise a copy of
    /// the builder's own entity; either way it is renamed
    /// `<builder>.<birth index>`.
    fn cmd_build(&mut self, id: RobotId, args: Vec<Value>) -> Result<Value, Fail> {
        let Some(Value::Delayed { term, env }) = args.into_iter().next() else {
            return Err(Fail::BadValue("build expects a delayed program"));
        };
        let (target, facing, devices, system, parent_name, parent_entity, globals) = {
            let robot = self.robot_ref(id)?;
            let facing = robot
                .facing()
                .ok_or_else(|| Fail::Cmd(String::from("robot has no facing direction")))?;
            (
                facing.offset(robot.location()),
                facing,
                robot.installed().clone(),
                robot.is_system(),
                robot.name().to_string(),
                robot.entity().clone(),
                robot.machine().globals().clone(),
            )
        };
        if self
            .world
            .entity_at_loading(Coords::from(target))
            .is_some_and(|e| e.has_property(EntityProperty::BlocksMovement))
        {
            return Err(Fail::Cmd(String::from("target cell is blocked")));
        }

        self.births += 1;
        let mut entity = self
            .registry
            .get("robot")
            .cloned()
            .unwrap_or(parent_entity);
        let child_name = format!("{parent_name}.{}", self.births);
        entity.set_name(child_name.clone());

        self.pending_spawns.push(SpawnOrder {
            entity,
            location: target,
            facing: Some(facing),
            program: term,
            env,
            globals,
            devices,
            system,
        });
        Ok(Value::Str(child_name))
    }

    fn cmd_scan(&mut self, id: RobotId) -> Result<Value, Fail> {
        let (here, facing) = self.facing_of(id)?;
        let target = facing.offset(here);
        match self.world.entity_at_loading(Coords::from(target)) {
            Some(entity) => Ok(Value::Str(entity.name().to_string())),
            None => Ok(Value::Unit),
        }
    }

    fn cmd_say(&mut self, id: RobotId, args: Vec<Value>) -> Result<Value, Fail> {
        let Some(Value::Str(message)) = args.into_iter().next() else {
            return Err(Fail::BadValue("say expects a string"));
        };
        let robot = self.robot_ref(id)?.name().to_string();
        debug!(robot = robot.as_str(), message = message.as_str(), "say");
        if self.log.len() >= self.config.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            tick: self.tick,
            robot,
            message,
        });
        Ok(Value::Unit)
    }

    fn cmd_self_destruct(&mut self, id: RobotId) -> Result<Value, Fail> {
        if let Some(robot) = self.robots.get_mut(id) {
            debug!(robot = robot.name(), "self-destruct requested");
            robot.set_self_destruct();
        }
        Ok(Value::Unit)
    }

    /// Commit queued `build` requests in request order, skipping any whose
    /// target cell has become blocked.
    fn commit_spawns(&mut self) -> usize {
        let orders = mem::take(&mut self.pending_spawns);
        let mut spawned = 0;
        for order in orders {
            if self
                .world
                .entity_at_loading(Coords::from(order.location))
                .is_some_and(|e| e.has_property(EntityProperty::BlocksMovement))
            {
                warn!(robot = order.entity.name(), "dropping spawn into a blocked cell");
                continue;
            }
            let machine = Machine::with_env(order.program, order.env, order.globals);
            let mut robot = Robot::new(
                order.entity,
                order.location,
                order.facing,
                machine,
                order.devices,
            );
            if order.system {
                robot = robot.into_system();
            }
            self.add_robot(robot);
            spawned += 1;
        }
        spawned
    }

    /// Reinsert regrowable entities whose delay has elapsed. An occupied
    /// cell keeps its occupant; the regrowth is simply dropped.
    fn commit_regrowth(&mut self, current: Tick) {
        let mut kept = Vec::new();
        for order in mem::take(&mut self.pending_regrowth) {
            if order.due.0 <= current.0 {
                let RegrowthOrder { coords, entity, .. } = order;
                self.world.update(coords, move |existing| existing.or(Some(entity)));
            } else {
                kept.push(order);
            }
        }
        self.pending_regrowth = kept;
    }
}
