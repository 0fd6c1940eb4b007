//! The embedded robot language: capabilities, elaborated terms, runtime
//! values, and the step-bounded CEK machine that reduces them.
//!
//! Parsing and type inference live upstream; this crate consumes well-typed
//! terms and evaluates them one transition at a time. World-affecting
//! primitives are never performed here: the machine suspends on them and the
//! host (the game scheduler) resolves the effect and feeds the result back.

mod capability;
mod machine;
mod syntax;
mod value;

pub use capability::{Capability, CapabilitySet};
pub use machine::{Fail, Machine, StepOutcome};
pub use syntax::{Const, Direction, Term};
pub use value::{Env, Frame, Value};
