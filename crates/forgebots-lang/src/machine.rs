//! The CEK abstract machine.
//!
//! Each call to [`Machine::step`] performs exactly one reduction. The
//! machine is pure with respect to the world: when a fully applied effect
//! command reaches an execution frame it suspends, and the host resolves
//! the effect through [`Machine::resume_value`] / [`Machine::resume_error`].

use crate::capability::Capability;
use crate::syntax::{Const, Term};
use crate::value::{Env, Frame, Value};
use std::mem;
use thiserror::Error;

/// Runtime failures. The catchable variants are language-level errors the
/// `try` construct can recover from; the rest are defensive fatals for
/// conditions the static checker should have ruled out.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fail {
    /// A command was attempted without its required capability.
    #[error("missing capability to {}", .0.map_name())]
    Incapable(Capability),
    /// An explicit `raise` in the program.
    #[error("{0}")]
    User(String),
    /// A command effect failed (blocked move, empty grab, ...).
    #[error("command failed: {0}")]
    Cmd(String),
    /// Division by zero.
    #[error("division by zero")]
    DivideByZero,
    /// A variable reference with no binding. Fatal.
    #[error("unbound variable `{0}`")]
    Unbound(String),
    /// Application of a non-function value. Fatal.
    #[error("cannot apply a value that is not a function")]
    NotAFunction,
    /// A value of the wrong shape reached a primitive. Fatal.
    #[error("ill-shaped value: {0}")]
    BadValue(&'static str),
    /// The host drove the machine incorrectly. Fatal.
    #[error("host protocol violation: {0}")]
    Protocol(&'static str),
}

impl Fail {
    /// Whether a `try` frame can recover from this failure.
    #[must_use]
    pub const fn is_catchable(&self) -> bool {
        matches!(
            self,
            Self::Incapable(_) | Self::User(_) | Self::Cmd(_) | Self::DivideByZero
        )
    }
}

impl Capability {
    fn map_name(self) -> &'static str {
        match self {
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

/// Machine state: evaluating a term, delivering a value, suspended on a
/// command, or terminal.
#[derive(Debug, Clone, PartialEq)]
enum State {
    In(Term, Env, Vec<Frame>),
    Out(Value, Vec<Frame>),
    Suspended(Const, Vec<Value>, Vec<Frame>),
    Done(Value),
    Fatal(Fail),
}

/// Result of one [`Machine::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One reduction happened; the machine can step again.
    Running,
    /// A fully applied effect command awaits host resolution.
    Pending,
    /// The machine holds a final value.
    Finished,
    /// The machine halted on an unrecoverable error.
    Failed,
}

/// One robot's evaluator. Holds the transition state plus the accumulated
/// top-level `def` bindings, which outlive the current program.
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    state: State,
    globals: Env,
}

impl Machine {
    /// Start a program in an empty environment.
    #[must_use]
    pub fn new(program: Term) -> Self {
        Self::with_globals(program, Env::new())
    }

    /// Start a program with pre-existing top-level bindings (a robot's
    /// accumulated definitions).
    #[must_use]
    pub fn with_globals(program: Term, globals: Env) -> Self {
        Self::with_env(program, Env::new(), globals)
    }

    /// Start a program under an explicit lexical environment, used when a
    /// `build` hands a captured closure to a new robot.
    #[must_use]
    pub fn with_env(program: Term, env: Env, globals: Env) -> Self {
        Self {
            state: State::In(program, env, vec![Frame::Exec]),
            globals,
        }
    }

    /// Perform one machine transition.
    pub fn step(&mut self) -> StepOutcome {
        match &self.state {
            State::Done(_) => return StepOutcome::Finished,
            State::Fatal(_) => return StepOutcome::Failed,
            State::Suspended(..) => return StepOutcome::Pending,
            State::In(..) | State::Out(..) => {}
        }
        let state = mem::replace(&mut self.state, State::Done(Value::Unit));
        self.state = match state {
            State::In(term, env, cont) => self.step_term(term, env, cont),
            State::Out(value, cont) => self.step_value(value, cont),
            other => other,
        };
        self.outcome()
    }

    /// The command the machine is suspended on, if any.
    #[must_use]
    pub fn pending_command(&self) -> Option<(Const, &[Value])> {
        match &self.state {
            State::Suspended(op, args, _) => Some((*op, args.as_slice())),
            _ => None,
        }
    }

    /// Resolve the pending command with a result value.
    pub fn resume_value(&mut self, value: Value) {
        match mem::replace(&mut self.state, State::Done(Value::Unit)) {
            State::Suspended(_, _, cont) => self.state = State::Out(value, cont),
            _ => self.state = State::Fatal(Fail::Protocol("resume without a pending command")),
        }
    }

    /// Resolve the pending command with a failure, unwinding to the nearest
    /// `try` handler.
    pub fn resume_error(&mut self, fail: Fail) {
        match mem::replace(&mut self.state, State::Done(Value::Unit)) {
            State::Suspended(_, _, cont) => self.state = unwind(fail, cont),
            _ => self.state = State::Fatal(Fail::Protocol("resume without a pending command")),
        }
    }

    /// Whether the machine has reached `Done` or `Fatal`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Done(_) | State::Fatal(_))
    }

    /// Whether a command is awaiting resolution.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Suspended(..))
    }

    /// The final value, if the machine finished cleanly.
    #[must_use]
    pub fn final_value(&self) -> Option<&Value> {
        match &self.state {
            State::Done(v) => Some(v),
            _ => None,
        }
    }

    /// The fatal error, if the machine halted on one.
    #[must_use]
    pub fn failure(&self) -> Option<&Fail> {
        match &self.state {
            State::Fatal(f) => Some(f),
            _ => None,
        }
    }

    /// Accumulated top-level bindings.
    #[must_use]
    pub fn globals(&self) -> &Env {
        &self.globals
    }

    fn outcome(&self) -> StepOutcome {
        match &self.state {
            State::Suspended(..) => StepOutcome::Pending,
            State::Done(_) => StepOutcome::Finished,
            State::Fatal(_) => StepOutcome::Failed,
            State::In(..) | State::Out(..) => StepOutcome::Running,
        }
    }

    /// Focus on a term: either produce a value or push frames and descend.
    fn step_term(&mut self, term: Term, env: Env, mut cont: Vec<Frame>) -> State {
        match term {
            Term::Unit => State::Out(Value::Unit, cont),
            Term::Int(n) => State::Out(Value::Int(n), cont),
            Term::Str(s) => State::Out(Value::Str(s), cont),
            Term::Bool(b) => State::Out(Value::Bool(b), cont),
            Term::Dir(d) => State::Out(Value::Dir(d), cont),
            Term::Const(c) => State::Out(Value::op(c), cont),
            Term::Var(name) => match env.get(&name).or_else(|| self.globals.get(&name)) {
                Some(v) => State::Out(v.clone(), cont),
                None => unwind(Fail::Unbound(name), cont),
            },
            Term::Lam(param, body) => State::Out(
                Value::Closure {
                    param,
                    body: *body,
                    env,
                },
                cont,
            ),
            Term::App(f, x) => {
                cont.push(Frame::Arg(*x, env.clone()));
                State::In(*f, env, cont)
            }
            Term::Let(name, bound, body) => {
                cont.push(Frame::LetBind(name, *body, env.clone()));
                State::In(*bound, env, cont)
            }
            Term::Def(name, body) => {
                // Definitions are stored delayed so they may refer to
                // themselves; the recursive call resolves through the
                // machine's global bindings at force time.
                self.globals.bind(
                    name,
                    Value::Delayed {
                        term: *body,
                        env: env.clone(),
                    },
                );
                State::Out(Value::Unit, cont)
            }
            Term::Bind(name, first, rest) => {
                cont.push(Frame::SeqBind(name, *rest, env.clone()));
                cont.push(Frame::Exec);
                State::In(*first, env, cont)
            }
            Term::If(cond, then, otherwise) => {
                cont.push(Frame::Branch(*then, *otherwise, env.clone()));
                State::In(*cond, env, cont)
            }
            Term::Pair(fst, snd) => {
                cont.push(Frame::PairRest(*snd, env.clone()));
                State::In(*fst, env, cont)
            }
            Term::Delay(t) => State::Out(Value::Delayed { term: *t, env }, cont),
        }
    }

    /// Deliver a value to the top continuation frame.
    fn step_value(&mut self, value: Value, mut cont: Vec<Frame>) -> State {
        let Some(frame) = cont.pop() else {
            return State::Done(value);
        };
        match frame {
            Frame::Arg(arg, env) => {
                cont.push(Frame::Apply(value));
                State::In(arg, env, cont)
            }
            Frame::Apply(fun) => apply_value(fun, value, cont),
            Frame::ApplyTo(arg) => apply_value(value, arg, cont),
            Frame::LetBind(name, body, env) => State::In(body, env.extended(name, value), cont),
            Frame::Branch(then, otherwise, env) => match value {
                Value::Bool(true) => State::In(then, env, cont),
                Value::Bool(false) => State::In(otherwise, env, cont),
                _ => unwind(Fail::BadValue("condition must be a boolean"), cont),
            },
            Frame::Exec => exec_value(value, cont),
            Frame::SeqBind(name, rest, env) => {
                let env = match name {
                    Some(name) => env.extended(name, value),
                    None => env,
                };
                cont.push(Frame::Exec);
                State::In(rest, env, cont)
            }
            Frame::PairRest(snd, env) => {
                cont.push(Frame::PairWrap(value));
                State::In(snd, env, cont)
            }
            Frame::PairWrap(fst) => State::Out(Value::pair(fst, value), cont),
            // A value arriving at an intact catch frame means the guarded
            // command finished without failing; discard the handler.
            Frame::Catch { .. } => State::Out(value, cont),
        }
    }
}

/// Apply a function value to an evaluated argument.
fn apply_value(fun: Value, arg: Value, mut cont: Vec<Frame>) -> State {
    match fun {
        Value::Closure { param, body, env } => State::In(body, env.extended(param, arg), cont),
        Value::PartialApp { op, mut args } => {
            if args.len() >= op.arity() {
                return unwind(Fail::NotAFunction, cont);
            }
            args.push(arg);
            if args.len() == op.arity() && op.is_pure() {
                match apply_pure(op, args) {
                    Ok(v) => State::Out(v, cont),
                    Err(f) => unwind(f, cont),
                }
            } else {
                State::Out(Value::PartialApp { op, args }, cont)
            }
        }
        Value::Delayed { term, env } => {
            // Force the delayed function, then re-deliver the argument.
            cont.push(Frame::ApplyTo(arg));
            State::In(term, env, cont)
        }
        _ => unwind(Fail::NotAFunction, cont),
    }
}

/// Execute a command value reaching an `Exec` frame. `cont` no longer
/// contains that frame.
fn exec_value(value: Value, mut cont: Vec<Frame>) -> State {
    match value {
        Value::PartialApp { op, args } if args.len() == op.arity() && !op.is_pure() => match op {
            Const::Noop => State::Out(Value::Unit, cont),
            Const::Return => match into_one(args) {
                Ok(v) => State::Out(v, cont),
                Err(f) => unwind(f, cont),
            },
            Const::Raise => match into_one(args) {
                Ok(Value::Str(msg)) => unwind(Fail::User(msg), cont),
                Ok(_) => unwind(Fail::BadValue("raise expects a string"), cont),
                Err(f) => unwind(f, cont),
            },
            Const::Try => {
                let mut args = args.into_iter();
                let (Some(body), Some(handler)) = (args.next(), args.next()) else {
                    return unwind(Fail::BadValue("try expects two commands"), cont);
                };
                cont.push(Frame::Catch { handler });
                cont.push(Frame::Exec);
                State::Out(body, cont)
            }
            effect => State::Suspended(effect, args, cont),
        },
        Value::PartialApp { .. } => unwind(
            Fail::BadValue("cannot execute a partially applied constant"),
            cont,
        ),
        Value::Delayed { term, env } => {
            cont.push(Frame::Exec);
            State::In(term, env, cont)
        }
        // Executing an ordinary value yields the value itself.
        other => State::Out(other, cont),
    }
}

/// Reduce a fully applied pure constant.
fn apply_pure(op: Const, args: Vec<Value>) -> Result<Value, Fail> {
    match (op, args.as_slice()) {
        (Const::Add, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(a.wrapping_add(*b))),
        (Const::Sub, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(a.wrapping_sub(*b))),
        (Const::Mul, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(a.wrapping_mul(*b))),
        (Const::Div, [Value::Int(_), Value::Int(0)]) => Err(Fail::DivideByZero),
        (Const::Div, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(a.wrapping_div(*b))),
        (Const::Neg, [Value::Int(a)]) => Ok(Value::Int(a.wrapping_neg())),
        (Const::Eq, [a, b]) => Ok(Value::Bool(a == b)),
        (Const::Lt, [Value::Int(a), Value::Int(b)]) => Ok(Value::Bool(a < b)),
        (Const::Gt, [Value::Int(a), Value::Int(b)]) => Ok(Value::Bool(a > b)),
        (Const::Not, [Value::Bool(b)]) => Ok(Value::Bool(!b)),
        (Const::Fst, [Value::Pair(a, _)]) => Ok(*a.clone()),
        (Const::Snd, [Value::Pair(_, b)]) => Ok(*b.clone()),
        _ => Err(Fail::BadValue("operator applied to ill-typed arguments")),
    }
}

/// Unwind a failure: catchable errors run the nearest `try` handler,
/// everything else is fatal.
fn unwind(fail: Fail, mut cont: Vec<Frame>) -> State {
    if !fail.is_catchable() {
        return State::Fatal(fail);
    }
    while let Some(frame) = cont.pop() {
        if let Frame::Catch { handler } = frame {
            cont.push(Frame::Exec);
            return State::Out(handler, cont);
        }
    }
    State::Fatal(fail)
}

fn into_one(args: Vec<Value>) -> Result<Value, Fail> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(v), None) => Ok(v),
        _ => Err(Fail::BadValue("wrong argument count")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Direction;

    /// Drive the machine until it suspends or terminates, with a step cap
    /// so broken tests fail instead of spinning.
    fn run(machine: &mut Machine) -> StepOutcome {
        for _ in 0..10_000 {
            match machine.step() {
                StepOutcome::Running => {}
                outcome => return outcome,
            }
        }
        panic!("machine did not settle within the step cap");
    }

    fn int(n: i64) -> Term {
        Term::Int(n)
    }

    fn add(a: Term, b: Term) -> Term {
        Term::app(Term::app(Term::Const(Const::Add), a), b)
    }

    #[test]
    fn arithmetic_reduces_to_a_final_value() {
        let program = add(int(2), Term::app(Term::app(Term::Const(Const::Mul), int(3)), int(4)));
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Int(14)));
    }

    #[test]
    fn let_and_lambda_bind_lexically() {
        // let x = 10 in (\y. x + y) 5
        let program = Term::Let(
            "x".into(),
            Box::new(int(10)),
            Box::new(Term::app(
                Term::lam("y", add(Term::Var("x".into()), Term::Var("y".into()))),
                int(5),
            )),
        );
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Int(15)));
    }

    #[test]
    fn unbound_variable_is_fatal() {
        let mut m = Machine::new(Term::Var("ghost".into()));
        assert_eq!(run(&mut m), StepOutcome::Failed);
        assert_eq!(m.failure(), Some(&Fail::Unbound("ghost".into())));
    }

    #[test]
    fn division_by_zero_is_catchable_by_try() {
        // try { return (1 / 0) } { return 42 }
        let risky = Term::app(
            Term::Const(Const::Return),
            Term::app(Term::app(Term::Const(Const::Div), int(1)), int(0)),
        );
        let program = Term::app(
            Term::app(Term::Const(Const::Try), Term::delay(risky.clone())),
            Term::delay(Term::app(Term::Const(Const::Return), int(42))),
        );
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Int(42)));

        let mut bare = Machine::new(risky);
        assert_eq!(run(&mut bare), StepOutcome::Failed);
        assert_eq!(bare.failure(), Some(&Fail::DivideByZero));
    }

    #[test]
    fn raise_unwinds_to_the_nearest_handler() {
        let program = Term::app(
            Term::app(
                Term::Const(Const::Try),
                Term::delay(Term::app(Term::Const(Const::Raise), Term::Str("boom".into()))),
            ),
            Term::delay(Term::app(Term::Const(Const::Return), Term::Str("saved".into()))),
        );
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Str("saved".into())));
    }

    #[test]
    fn uncaught_raise_is_a_user_failure() {
        let mut m = Machine::new(Term::app(
            Term::Const(Const::Raise),
            Term::Str("boom".into()),
        ));
        assert_eq!(run(&mut m), StepOutcome::Failed);
        assert_eq!(m.failure(), Some(&Fail::User("boom".into())));
    }

    #[test]
    fn effect_commands_suspend_and_resume() {
        // turn east; move
        let program = Term::seq(
            Term::app(Term::Const(Const::Turn), Term::Dir(Direction::East)),
            Term::Const(Const::Move),
        );
        let mut m = Machine::new(program);

        assert_eq!(run(&mut m), StepOutcome::Pending);
        let (op, args) = m.pending_command().expect("pending turn");
        assert_eq!(op, Const::Turn);
        assert_eq!(args, &[Value::Dir(Direction::East)]);
        m.resume_value(Value::Unit);

        assert_eq!(run(&mut m), StepOutcome::Pending);
        let (op, args) = m.pending_command().expect("pending move");
        assert_eq!(op, Const::Move);
        assert!(args.is_empty());
        m.resume_value(Value::Unit);

        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Unit));
    }

    #[test]
    fn command_failure_reaches_a_try_handler_through_resume_error() {
        // try { move } { return 7 }
        let program = Term::app(
            Term::app(Term::Const(Const::Try), Term::delay(Term::Const(Const::Move))),
            Term::delay(Term::app(Term::Const(Const::Return), int(7))),
        );
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Pending);
        m.resume_error(Fail::Cmd("blocked".into()));
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Int(7)));
    }

    #[test]
    fn bind_threads_command_results() {
        // x <- return 4; return (x + 1)
        let program = Term::bind(
            "x",
            Term::app(Term::Const(Const::Return), int(4)),
            Term::app(
                Term::Const(Const::Return),
                add(Term::Var("x".into()), int(1)),
            ),
        );
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Int(5)));
    }

    #[test]
    fn defs_persist_and_support_recursion() {
        // def spin = \n. if n == 0 then noop else spin (n - 1)
        // (definitions resolve recursively through the globals at force time)
        let count_down = Term::Def(
            "spin".into(),
            Box::new(Term::lam(
                "n",
                Term::if_(
                    Term::app(Term::app(Term::Const(Const::Eq), Term::Var("n".into())), int(0)),
                    Term::Const(Const::Noop),
                    Term::app(
                        Term::Var("spin".into()),
                        Term::app(Term::app(Term::Const(Const::Sub), Term::Var("n".into())), int(1)),
                    ),
                ),
            )),
        );
        let program = Term::seq(count_down, Term::app(Term::Var("spin".into()), int(5)));
        let mut m = Machine::new(program);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        assert_eq!(m.final_value(), Some(&Value::Unit));
        assert!(m.globals().get("spin").is_some());
    }

    #[test]
    fn applying_a_non_function_is_fatal() {
        let mut m = Machine::new(Term::app(int(1), int(2)));
        assert_eq!(run(&mut m), StepOutcome::Failed);
        assert_eq!(m.failure(), Some(&Fail::NotAFunction));
    }

    #[test]
    fn resume_without_pending_command_is_a_protocol_fault() {
        let mut m = Machine::new(Term::Unit);
        assert_eq!(run(&mut m), StepOutcome::Finished);
        m.resume_value(Value::Unit);
        assert_eq!(m.step(), StepOutcome::Failed);
        assert!(matches!(m.failure(), Some(Fail::Protocol(_))));
    }

    #[test]
    fn stepping_while_pending_reports_pending_again() {
        let mut m = Machine::new(Term::Const(Const::Move));
        assert_eq!(run(&mut m), StepOutcome::Pending);
        assert_eq!(m.step(), StepOutcome::Pending);
        assert!(m.is_pending());
    }
}
