//! Core simulation types for forgebots: entities, inventories, robots, the
//! effect shell that executes suspended language commands, and the tick
//! scheduler that interleaves every robot's machine fairly.

mod entity;
mod game;
mod inventory;
mod recipe;
mod registry;
mod robot;

pub use entity::{Entity, EntityBuilder, EntityDisplay, EntityProperty, Growth};
pub use game::{
    GameConfig, GameError, GameState, GameWorld, LogEntry, RobotId, Terrain, Tick, TickEvents,
};
pub use inventory::Inventory;
pub use recipe::{NoRecipes, Recipe, RecipeSource, RecipeTable};
pub use registry::EntityRegistry;
pub use robot::{capabilities_of, Robot};
