//! Composition construction and compilation.
//!
//! Workflows are assembled with the combinator API in [`builder`], which
//! produces a typed node tree ([`ast`]) together with the list of actions
//! that must be deployed alongside it. The [`compiler`] lowers a tree into a
//! flat finite-state program ([`ir`]) whose jumps are relative offsets, so
//! compiled fragments concatenate without relocation.

/// Composition node tree, attached actions, and the serialized document.
pub mod ast;
/// Combinator API: constructors, validation, attachment merging.
pub mod builder;
/// Lowering from the node tree to the flat instruction array.
pub mod compiler;
/// Flat finite-state program: instructions with relative jumps.
pub mod ir;
/// Qualified action-name resolution.
pub mod name;

pub use ast::{ActionDef, Annotation, AttachedAction, Composition, Exec, Node};
pub use builder::{
    action, action_sequence, action_with, dowhile, dowhile_with, finally, function, if_, if_with,
    let_, literal, named, repeat, retain, retain_with, retry, seq, sequence, task, try_, value,
    while_, while_with, BranchOptions, RetainOptions, Task,
};
pub use compiler::{chain, compile, compile_composition};
pub use ir::{FsmProgram, Instruction, Op, ProgramError};
pub use name::canonicalize;

use thiserror::Error;

/// Convenience result alias for composition construction.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Errors surfaced while building or encoding a composition.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// A combinator was given an argument of the wrong shape.
    #[error("invalid argument to {combinator}: {argument}")]
    InvalidArgument {
        /// Combinator that rejected the argument.
        combinator: &'static str,
        /// Rendering of the offending argument.
        argument: String,
    },

    /// An action name could not be canonicalized.
    #[error("invalid action name: {0:?}")]
    InvalidName(String),

    /// Two attached actions with the same name but different definitions.
    #[error("duplicate attached action: {0}")]
    DuplicateAction(String),

    /// `encode` requires a composition reduced to a single named action.
    #[error("cannot encode composition: {0}")]
    CannotEncode(String),
}

impl ComposeError {
    pub(crate) fn invalid_argument(
        combinator: &'static str,
        argument: impl std::fmt::Display,
    ) -> Self {
        ComposeError::InvalidArgument {
            combinator,
            argument: argument.to_string(),
        }
    }
}
