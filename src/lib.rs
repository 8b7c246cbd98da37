//! Baton – a composition compiler and conductor for serverless workflows
//!
//! A workflow over remote functions ("actions") is described with a small
//! combinator library: sequences, conditionals, loops, try/finally, lexical
//! bindings, retries, value capture. The compiler lowers the combinator tree
//! into a flat finite-state program (a linear instruction array with relative
//! jumps), and the conductor interprets that program inside a single
//! deployable action. The conductor never performs remote calls itself: when
//! it reaches an `action` instruction it returns an invocation request plus a
//! `$resume` continuation token, and the host re-invokes it with the result.
//!
//! - [`compose`] builds, validates, serializes, and compiles compositions
//! - [`conductor`] steps the compiled program with an explicit stack
//! - [`deploy`] encodes compositions into deployable actions and publishes
//!   them through the platform's management API

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Combinator AST, name resolution, and the FSM compiler.
pub mod compose;
/// FSM interpreter with externalized continuation.
pub mod conductor;
/// Conductor-source emission and the deployment client.
pub mod deploy;

pub use compose::{Composition, FsmProgram};
pub use conductor::{Conductor, Outcome};

/// Current version of the baton crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
