//! Elaborated terms of the robot language and the built-in constants.

use crate::capability::Capability;
use forgebots_world::Location;
use serde::{Deserialize, Serialize};

/// Compass direction a robot can face or turn toward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// The location one cell away in this direction.
    #[must_use]
    pub const fn offset(self, loc: Location) -> Location {
        match self {
            Self::North => Location::new(loc.x, loc.y + 1),
            Self::South => Location::new(loc.x, loc.y - 1),
            Self::East => Location::new(loc.x + 1, loc.y),
            Self::West => Location::new(loc.x - 1, loc.y),
        }
    }
}

/// Built-in constants: pure operators reduced inside the machine, intrinsic
/// commands resolved at execution frames, and effect commands suspended to
/// the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Const {
    // Pure operators.
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Eq,
    Lt,
    Gt,
    Not,
    Fst,
    Snd,
    // Intrinsic commands (no world effect, handled by the machine).
    Noop,
    Return,
    Raise,
    Try,
    // Effect commands (suspended to the host for execution).
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

impl Const {
    /// Number of arguments this constant consumes before it can reduce or
    /// execute.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Noop | Self::Move | Self::Grab | Self::Scan | Self::SelfDestruct => 0,
            Self::Neg
            | Self::Not
            | Self::Fst
            | Self::Snd
            | Self::Return
            | Self::Raise
            | Self::Turn
            | Self::Place
            | Self::Give
            | Self::Make
            | Self::Build
            | Self::Say => 1,
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Eq
            | Self::Lt
            | Self::Gt
            | Self::Try => 2,
        }
    }

    /// Whether this constant reduces purely during application (as opposed
    /// to executing at a command boundary).
    #[must_use]
    pub const fn is_pure(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Neg
                | Self::Eq
                | Self::Lt
                | Self::Gt
                | Self::Not
                | Self::Fst
                | Self::Snd
        )
    }

    /// Whether executing this constant requires suspending to the host.
    #[must_use]
    pub const fn is_effect(self) -> bool {
        matches!(
            self,
            Self::Move
                | Self::Turn
                | Self::Grab
                | Self::Place
                | Self::Give
                | Self::Make
                | Self::Build
                | Self::Scan
                | Self::Say
                | Self::SelfDestruct
        )
    }

    /// The capability an agent must hold to execute this constant, if any.
    /// Pure operators and machine intrinsics are ungated.
    #[must_use]
    pub const fn required_capability(self) -> Option<Capability> {
        match self {
            Self::Move => Some(Capability::Move),
            Self::Turn => Some(Capability::Turn),
            Self::Grab => Some(Capability::Grab),
            Self::Place => Some(Capability::Place),
            Self::Give => Some(Capability::Give),
            Self::Make => Some(Capability::Make),
            Self::Build => Some(Capability::Build),
            Self::Scan => Some(Capability::Scan),
            Self::Say => Some(Capability::Say),
            Self::SelfDestruct => Some(Capability::SelfDestruct),
            _ => None,
        }
    }

    /// Surface-language name of the constant.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Neg => "neg",
            Self::Eq => "==",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Not => "not",
            Self::Fst => "fst",
            Self::Snd => "snd",
            Self::Noop => "noop",
            Self::Return => "return",
            Self::Raise => "raise",
            Self::Try => "try",
            Self::Move => "move",
            Self::Turn => "turn",
            Self::Grab => "grab",
            Self::Place => "place",
            Self::Give => "give",
            Self::Make => "make",
            Self::Build => "build",
            Self::Scan => "scan",
            Self::Say => "say",
            Self::SelfDestruct => "selfdestruct",
        }
    }
}

/// A well-typed, elaborated term ready for evaluation. Produced by the
/// language front end; the runtime never parses or re-derives types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// The unit literal.
    Unit,
    /// Integer literal.
    Int(i64),
    /// String literal.
    Str(String),
    /// Boolean literal.
    Bool(bool),
    /// Direction literal.
    Dir(Direction),
    /// Variable reference.
    Var(String),
    /// Lambda abstraction.
    Lam(String, Box<Term>),
    /// Application.
    App(Box<Term>, Box<Term>),
    /// Local let binding.
    Let(String, Box<Term>, Box<Term>),
    /// Top-level definition; executing it adds a (possibly recursive)
    /// binding to the machine's accumulated environment.
    Def(String, Box<Term>),
    /// Monadic sequencing: run the first command, optionally bind its
    /// result, then run the second.
    Bind(Option<String>, Box<Term>, Box<Term>),
    /// Conditional with lazily evaluated branches.
    If(Box<Term>, Box<Term>, Box<Term>),
    /// Pair construction.
    Pair(Box<Term>, Box<Term>),
    /// Quoted term; evaluates to a delayed closure forced at execution.
    Delay(Box<Term>),
    /// Built-in constant.
    Const(Const),
}

impl Term {
    /// Apply `f` to `x`.
    #[must_use]
    pub fn app(f: Term, x: Term) -> Term {
        Term::App(Box::new(f), Box::new(x))
    }

    /// A lambda binding `param` over `body`.
    #[must_use]
    pub fn lam(param: impl Into<String>, body: Term) -> Term {
        Term::Lam(param.into(), Box::new(body))
    }

    /// Sequence two commands, discarding the first result.
    #[must_use]
    pub fn seq(first: Term, rest: Term) -> Term {
        Term::Bind(None, Box::new(first), Box::new(rest))
    }

    /// Sequence two commands, binding the first result to `name`.
    #[must_use]
    pub fn bind(name: impl Into<String>, first: Term, rest: Term) -> Term {
        Term::Bind(Some(name.into()), Box::new(first), Box::new(rest))
    }

    /// Conditional helper.
    #[must_use]
    pub fn if_(cond: Term, then: Term, otherwise: Term) -> Term {
        Term::If(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    /// Quote a term for later forcing.
    #[must_use]
    pub fn delay(t: Term) -> Term {
        Term::Delay(Box::new(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_follow_the_xy_convention() {
        let origin = Location::new(0, 0);
        assert_eq!(Direction::North.offset(origin), Location::new(0, 1));
        assert_eq!(Direction::South.offset(origin), Location::new(0, -1));
        assert_eq!(Direction::East.offset(origin), Location::new(1, 0));
        assert_eq!(Direction::West.offset(origin), Location::new(-1, 0));
    }

    #[test]
    fn effect_constants_are_all_capability_gated() {
        let all = [
            Const::Move,
            Const::Turn,
            Const::Grab,
            Const::Place,
            Const::Give,
            Const::Make,
            Const::Build,
            Const::Scan,
            Const::Say,
            Const::SelfDestruct,
        ];
        for c in all {
            assert!(c.is_effect());
            assert!(c.required_capability().is_some(), "{} must be gated", c.name());
        }
        assert!(Const::Add.required_capability().is_none());
        assert!(Const::Try.required_capability().is_none());
    }
}
