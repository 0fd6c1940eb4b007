//! Runtime values, variable environments, and continuation frames.

use crate::syntax::{Const, Direction, Term};
use std::collections::HashMap;

/// A fully or partially reduced runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Int(i64),
    Str(String),
    Bool(bool),
    Dir(Direction),
    Pair(Box<Value>, Box<Value>),
    /// A lambda closed over its defining environment.
    Closure {
        param: String,
        body: Term,
        env: Env,
    },
    /// A constant applied to some prefix of its arguments. With all
    /// arguments present and a non-pure constant, this is the executable
    /// command form handed to execution frames.
    PartialApp {
        op: Const,
        args: Vec<Value>,
    },
    /// A quoted term plus its captured environment, forced at execution
    /// or application.
    Delayed {
        term: Term,
        env: Env,
    },
}

impl Value {
    /// Pair constructor helper.
    #[must_use]
    pub fn pair(fst: Value, snd: Value) -> Value {
        Value::Pair(Box::new(fst), Box::new(snd))
    }

    /// A bare constant with no arguments applied yet.
    #[must_use]
    pub fn op(op: Const) -> Value {
        Value::PartialApp {
            op,
            args: Vec::new(),
        }
    }
}

/// Lexical variable bindings. Cloned on closure capture; the maps stay
/// small because programs are elaborated with short binding chains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Env {
    vars: HashMap<String, Value>,
}

impl Env {
    /// The empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Add or replace a binding in place.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// A child environment extended with one binding.
    #[must_use]
    pub fn extended(&self, name: impl Into<String>, value: Value) -> Self {
        let mut child = self.clone();
        child.bind(name, value);
        child
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// One pending piece of work on the continuation stack. The stack is a
/// `Vec` with its top at the end.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Evaluate the stored argument term once the function value arrives.
    Arg(Term, Env),
    /// Apply the stored function value to the incoming argument value.
    Apply(Value),
    /// Apply the incoming function value to the stored argument value
    /// (used when forcing a delayed function before application).
    ApplyTo(Value),
    /// Bind the incoming value and continue with the let body.
    LetBind(String, Term, Env),
    /// Choose a branch from the incoming boolean.
    Branch(Term, Term, Env),
    /// Execute the incoming command value (suspending to the host for
    /// effects).
    Exec,
    /// After a command completes, optionally bind its result and run the
    /// rest of the sequence.
    SeqBind(Option<String>, Term, Env),
    /// Evaluate the second pair component.
    PairRest(Term, Env),
    /// Fold the incoming value into a pair with the stored first component.
    PairWrap(Value),
    /// Error handler installed by `try`; catchable failures unwind to the
    /// nearest one of these.
    Catch { handler: Value },
}
