//! Conductor: the interpreter that executes a compiled composition inside a
//! single deployable action.
//!
//! The conductor owns no I/O. Each host invocation steps the finite-state
//! program until it terminates or reaches an `action` instruction; in the
//! latter case it returns the invocation request together with a `$resume`
//! continuation token, and the host re-invokes it with the action's result.
//! Errors travel as data: any pipeline value carrying an `error` field is a
//! failure in flight and unwinds to the nearest catch frame.

/// Inline expression language for `function` payloads.
pub mod expr;
/// The step loop, stack frames, and resume token.
pub mod runtime;

pub use expr::{truthy, ExprError, ExprEvaluator};
pub use runtime::{Conductor, ExecEvaluator, Frame, Outcome, Resume};

use serde_json::{json, Value};
use thiserror::Error;

/// Convenience result alias for conductor operations.
pub type Result<T> = std::result::Result<T, ConductorError>;

/// Errors surfaced by the conductor itself (as opposed to workflow errors,
/// which travel as data in the pipeline value).
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The `$resume` token on the input is malformed.
    #[error("invalid $resume token: {0}")]
    BadResume(String),

    /// The program violated a structural invariant at runtime.
    #[error("internal error: {0}")]
    Internal(String),

    /// The program failed validation before execution.
    #[error("invalid program: {0}")]
    Program(#[from] crate::compose::ir::ProgramError),
}

impl ConductorError {
    /// HTTP-style status code for the host contract.
    pub fn code(&self) -> u16 {
        match self {
            ConductorError::BadResume(_) => 400,
            ConductorError::Internal(_) | ConductorError::Program(_) => 500,
        }
    }
}

/// Coerce an arbitrary value into a `{code, error}` object.
///
/// The code defaults to 500; the error string falls back through the
/// value's `error` field, its `message` field, the value itself if it is a
/// string, and finally a generic message.
pub fn encode_error(value: &Value) -> Value {
    let code = value.get("code").and_then(Value::as_u64).unwrap_or(500);
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .or_else(|| value.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| "an error has occurred".to_string());
    json!({ "code": code, "error": error })
}
