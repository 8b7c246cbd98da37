//! Flat finite-state program emitted by the compiler.
//!
//! A program is an ordered array of instructions. Jumps (`next`, `then`,
//! `else`, `catch`) are offsets relative to the instruction that carries
//! them, so two compiled fragments concatenate without relocation. An absent
//! `next` terminates the program.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::ast::Exec;

/// One instruction of the flat program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation and its type-specific fields.
    #[serde(flatten)]
    pub op: Op,
    /// Default successor offset; absent means terminate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<i64>,
    /// Symbolic location in the source tree, for diagnostics.
    pub path: String,
}

impl Instruction {
    /// Instruction with no successor yet.
    pub fn new(op: Op, path: impl Into<String>) -> Instruction {
        Instruction {
            op,
            next: None,
            path: path.into(),
        }
    }
}

/// Operation set of the finite-state program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Op {
    /// No-op, used as a join or sentinel.
    Pass,
    /// Request the host to invoke a named action and suspend.
    Action {
        /// Canonical qualified action name.
        name: String,
    },
    /// Evaluate inline source against the parameters in the current scope.
    Function {
        /// Source payload.
        exec: Exec,
    },
    /// Replace the parameters with a deep copy of a constant.
    Literal {
        /// Constant value.
        value: Value,
    },
    /// Branch on the truthiness of `params.value`.
    Choice {
        /// Offset to the consequent branch.
        then: i64,
        /// Offset to the alternate branch.
        #[serde(rename = "else")]
        otherwise: i64,
    },
    /// Push a catch frame targeting `current + catch`.
    Try {
        /// Offset to the first handler instruction.
        catch: i64,
    },
    /// Pop the top frame; the stack must be non-empty.
    Exit,
    /// Push an environment frame with a deep copy of the declarations.
    Let {
        /// Bindings introduced by the frame.
        #[serde(rename = "let")]
        declarations: Map<String, Value>,
    },
    /// Push a save-frame snapshotting the parameters (or one field of them).
    Push {
        /// Snapshot only this field instead of the whole parameter object.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// Pop a save-frame; with `collect`, merge it with the current result.
    Pop {
        /// Produce `{params: saved, result: current}` instead of restoring.
        #[serde(default, skip_serializing_if = "is_false")]
        collect: bool,
    },
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// A compiled program ready to hand to the conductor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsmProgram {
    /// Ordered instruction array.
    pub instructions: Vec<Instruction>,
}

impl FsmProgram {
    /// Wrap an instruction array.
    pub fn new(instructions: Vec<Instruction>) -> FsmProgram {
        FsmProgram { instructions }
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the program is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Check that every jump lands on a valid instruction index.
    pub fn validate(&self) -> Result<(), ProgramError> {
        let check = |index: usize, jump: &'static str, offset: i64| {
            let target = index as i64 + offset;
            if target < 0 || target >= self.instructions.len() as i64 {
                Err(ProgramError::JumpOutOfRange {
                    index,
                    jump,
                    offset,
                })
            } else {
                Ok(())
            }
        };

        for (index, ins) in self.instructions.iter().enumerate() {
            if let Some(offset) = ins.next {
                check(index, "next", offset)?;
            }
            match ins.op {
                Op::Choice { then, otherwise } => {
                    check(index, "then", then)?;
                    check(index, "else", otherwise)?;
                }
                Op::Try { catch } => check(index, "catch", catch)?,
                _ => {}
            }
        }
        Ok(())
    }
}

/// Structural defects detected in a compiled program.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// A relative jump points outside the program.
    #[error("instruction {index}: {jump} offset {offset} lands outside the program")]
    JumpOutOfRange {
        /// Index of the offending instruction.
        index: usize,
        /// Which jump field is out of range.
        jump: &'static str,
        /// The offending relative offset.
        offset: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_serializes_flat() {
        let ins = Instruction {
            op: Op::Choice {
                then: 1,
                otherwise: 3,
            },
            next: None,
            path: ".test".to_string(),
        };
        let value = serde_json::to_value(&ins).expect("serialize");
        assert_eq!(value["type"], "choice");
        assert_eq!(value["then"], 1);
        assert_eq!(value["else"], 3);
        assert_eq!(value["path"], ".test");
        assert!(value.get("next").is_none());

        let back: Instruction = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, ins);
    }

    #[test]
    fn validate_rejects_dangling_jump() {
        let program = FsmProgram::new(vec![Instruction {
            op: Op::Pass,
            next: Some(5),
            path: String::new(),
        }]);
        match program.validate() {
            Err(ProgramError::JumpOutOfRange { index, jump, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(jump, "next");
            }
            other => panic!("expected out-of-range jump, got {:?}", other),
        }
    }

    #[test]
    fn validate_accepts_backward_jump() {
        let program = FsmProgram::new(vec![
            Instruction {
                op: Op::Pass,
                next: Some(1),
                path: String::new(),
            },
            Instruction {
                op: Op::Pass,
                next: Some(-1),
                path: String::new(),
            },
        ]);
        program.validate().expect("backward jump in range");
    }
}
