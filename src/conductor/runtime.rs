//! FSM interpreter with externalized continuation.
//!
//! The conductor steps a compiled program within a single host invocation.
//! It keeps the pipeline value (`params`), the current instruction index,
//! and a stack of frames: catch frames (error handlers), let frames
//! (lexical environments), and save frames (parameter snapshots). The only
//! suspension point is the `action` instruction, which returns an
//! invocation request plus a `$resume` token; the host invokes the action
//! and re-enters the conductor with the result merged with that token.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::compose::ast::Exec;
use crate::compose::ir::{FsmProgram, Op};

use super::expr::{truthy, ExprEvaluator};
use super::{ConductorError, Result};

/// Host seam for evaluating inline `function` payloads.
///
/// `scope` holds the let-bound names visible at the call site, innermost
/// shadowing outermost; mutations the evaluator makes to it are written
/// back to the innermost frame that declares each name.
pub trait ExecEvaluator {
    /// Error type surfaced by evaluation; rendered into an `error` field.
    type Error: std::fmt::Display;

    /// Evaluate `exec` against the pipeline value.
    ///
    /// `Ok(None)` leaves the pipeline value unchanged.
    fn evaluate(
        &self,
        exec: &Exec,
        params: &Value,
        scope: &mut Map<String, Value>,
    ) -> std::result::Result<Option<Value>, Self::Error>;
}

/// One stack frame of the conductor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Error handler: absolute index of the handler's first instruction.
    Catch {
        /// Handler entry point.
        catch: usize,
    },
    /// Lexical environment introduced by a `let` instruction.
    Let {
        /// Name/value bindings of the frame.
        #[serde(rename = "let")]
        bindings: Map<String, Value>,
    },
    /// Parameter snapshot introduced by a `push` instruction.
    Params {
        /// Saved pipeline value (or one field of it).
        params: Value,
    },
}

/// Continuation token carried through the host between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resume {
    /// Instruction index to resume at; absent means terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<usize>,
    /// Stack at suspension time.
    pub stack: Vec<Frame>,
}

/// Result of one host invocation of the conductor.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The workflow completed; wire form `{"params": ...}`.
    Params(Value),
    /// The workflow failed; wire form is the error object itself.
    Error(Value),
    /// The workflow suspended awaiting an action invocation.
    Action {
        /// Qualified name of the action to invoke.
        name: String,
        /// Parameters to invoke it with.
        params: Value,
        /// Token to merge into the conductor's next invocation.
        resume: Resume,
    },
}

impl Outcome {
    /// Render the host-contract JSON object.
    pub fn into_value(self) -> Value {
        match self {
            Outcome::Params(params) => json!({ "params": params }),
            Outcome::Error(error) => error,
            Outcome::Action {
                name,
                params,
                resume,
            } => json!({ "action": name, "params": params, "state": { "$resume": resume } }),
        }
    }
}

/// Interpreter for one compiled program.
pub struct Conductor<E = ExprEvaluator> {
    program: FsmProgram,
    evaluator: E,
}

impl Conductor<ExprEvaluator> {
    /// Conductor over a validated program, using the built-in expression
    /// evaluator for inline functions.
    pub fn new(program: FsmProgram) -> Result<Conductor<ExprEvaluator>> {
        Conductor::with_evaluator(program, ExprEvaluator)
    }

    /// Parse a deployed conductor-source payload back into a conductor.
    pub fn from_source(code: &str) -> Result<Conductor<ExprEvaluator>> {
        #[derive(Deserialize)]
        struct SourceDoc {
            fsm: FsmProgram,
        }
        let doc: SourceDoc = serde_json::from_str(code)
            .map_err(|err| ConductorError::Internal(format!("malformed conductor source: {}", err)))?;
        Conductor::new(doc.fsm)
    }
}

impl<E: ExecEvaluator> Conductor<E> {
    /// Conductor over a validated program with a caller-supplied evaluator.
    pub fn with_evaluator(program: FsmProgram, evaluator: E) -> Result<Conductor<E>> {
        program.validate()?;
        Ok(Conductor { program, evaluator })
    }

    /// The compiled program being interpreted.
    pub fn program(&self) -> &FsmProgram {
        &self.program
    }

    /// Run one host invocation to its outcome.
    ///
    /// A `$resume` field on the input replaces the initial state and stack;
    /// a malformed one is a [`ConductorError::BadResume`]. Structural
    /// violations (jumps outside the program, `exit`/`pop` on an empty
    /// stack) are [`ConductorError::Internal`].
    pub fn invoke(&self, mut params: Value) -> Result<Outcome> {
        let mut state: Option<usize> = Some(0);
        let mut stack: Vec<Frame> = Vec::new();

        let token = params
            .as_object_mut()
            .and_then(|object| object.remove("$resume"));
        if let Some(token) = token {
            let token: Resume = serde_json::from_value(token)
                .map_err(|err| ConductorError::BadResume(err.to_string()))?;
            if let Some(index) = token.state {
                if index >= self.program.len() {
                    return Err(ConductorError::BadResume(format!(
                        "state {} outside a program of {} instructions",
                        index,
                        self.program.len()
                    )));
                }
            }
            state = token.state;
            stack = token.stack;
            // A resumed action result may itself be an error.
            inspect(&mut params, &mut state, &mut stack);
        }

        while let Some(current) = state {
            let ins = self
                .program
                .instructions
                .get(current)
                .ok_or_else(|| ConductorError::Internal(format!("state {} out of range", current)))?;
            state = match ins.next {
                Some(offset) => Some(self.target(current, offset)?),
                None => None,
            };

            match &ins.op {
                Op::Pass => {
                    inspect(&mut params, &mut state, &mut stack);
                }

                Op::Choice { then, otherwise } => {
                    let taken = if truthy(params.get("value").unwrap_or(&Value::Null)) {
                        *then
                    } else {
                        *otherwise
                    };
                    state = Some(self.target(current, taken)?);
                }

                Op::Try { catch } => {
                    stack.push(Frame::Catch {
                        catch: self.target(current, *catch)?,
                    });
                }

                Op::Let { declarations } => {
                    stack.push(Frame::Let {
                        bindings: declarations.clone(),
                    });
                }

                Op::Exit => {
                    stack
                        .pop()
                        .ok_or_else(|| ConductorError::Internal("exit on an empty stack".to_string()))?;
                }

                Op::Push { field } => {
                    let snapshot = match field {
                        Some(name) => params.get(name).cloned().unwrap_or(Value::Null),
                        None => params.clone(),
                    };
                    stack.push(Frame::Params { params: snapshot });
                }

                Op::Pop { collect } => {
                    let frame = stack
                        .pop()
                        .ok_or_else(|| ConductorError::Internal("pop on an empty stack".to_string()))?;
                    let saved = match frame {
                        Frame::Params { params } => params,
                        Frame::Catch { .. } | Frame::Let { .. } => {
                            return Err(ConductorError::Internal(
                                "pop on a frame that is not a save frame".to_string(),
                            ));
                        }
                    };
                    params = if *collect {
                        json!({ "params": saved, "result": params })
                    } else {
                        saved
                    };
                }

                Op::Action { name } => {
                    tracing::debug!(action = %name, state = ?state, "suspending for action");
                    return Ok(Outcome::Action {
                        name: name.clone(),
                        params,
                        resume: Resume { state, stack },
                    });
                }

                Op::Literal { value } => {
                    params = value.clone();
                    inspect(&mut params, &mut state, &mut stack);
                }

                Op::Function { exec } => {
                    self.apply(exec, &mut params, &mut stack);
                    inspect(&mut params, &mut state, &mut stack);
                }
            }
        }

        if params.get("error").is_some() {
            Ok(Outcome::Error(params))
        } else {
            Ok(Outcome::Params(params))
        }
    }

    /// Wire-level entry point: [`invoke`](Conductor::invoke) with failures
    /// rendered as `{code, error}` objects.
    pub fn handle(&self, params: Value) -> Value {
        match self.invoke(params) {
            Ok(outcome) => outcome.into_value(),
            Err(err) => json!({ "code": err.code(), "error": err.to_string() }),
        }
    }

    fn target(&self, current: usize, offset: i64) -> Result<usize> {
        let target = current as i64 + offset;
        if target < 0 || target >= self.program.len() as i64 {
            Err(ConductorError::Internal(format!(
                "jump from {} by {} lands outside the program",
                current, offset
            )))
        } else {
            Ok(target as usize)
        }
    }

    fn apply(&self, exec: &Exec, params: &mut Value, stack: &mut [Frame]) {
        // Collect the visible environment bottom-up so inner frames shadow
        // outer ones once flattened.
        let mut scope = Map::new();
        for frame in stack.iter() {
            if let Frame::Let { bindings } = frame {
                for (name, value) in bindings {
                    scope.insert(name.clone(), value.clone());
                }
            }
        }

        match self.evaluator.evaluate(exec, params, &mut scope) {
            Ok(Some(result)) => *params = result,
            Ok(None) => {}
            Err(err) => *params = json!({ "error": err.to_string() }),
        }

        // Write each binding back to the innermost frame declaring it.
        for (name, value) in scope {
            for frame in stack.iter_mut().rev() {
                if let Frame::Let { bindings } = frame {
                    if let Some(slot) = bindings.get_mut(&name) {
                        *slot = value;
                        break;
                    }
                }
            }
        }
    }
}

/// Normalize the pipeline value and unwind on error.
///
/// Non-objects are wrapped as `{value: ...}`. If an `error` field is
/// present the value is reduced to just that field and the stack is popped
/// down to (and including) the nearest catch frame, which becomes the next
/// state; with no catch frame the program is terminal.
fn inspect(params: &mut Value, state: &mut Option<usize>, stack: &mut Vec<Frame>) {
    if !params.is_object() {
        *params = json!({ "value": params.take() });
    }
    let error = params
        .as_object_mut()
        .and_then(|object| object.remove("error"));
    if let Some(error) = error {
        *params = json!({ "error": error });
        *state = None;
        while let Some(frame) = stack.pop() {
            if let Frame::Catch { catch } = frame {
                *state = Some(catch);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ir::{Instruction, Op};

    fn program(ops: Vec<(Op, Option<i64>)>) -> FsmProgram {
        FsmProgram::new(
            ops.into_iter()
                .map(|(op, next)| {
                    let mut ins = Instruction::new(op, "");
                    ins.next = next;
                    ins
                })
                .collect(),
        )
    }

    #[test]
    fn inspect_wraps_non_objects() {
        let mut params = json!(42);
        let mut state = Some(0);
        let mut stack = Vec::new();
        inspect(&mut params, &mut state, &mut stack);
        assert_eq!(params, json!({ "value": 42 }));
        assert_eq!(state, Some(0));
    }

    #[test]
    fn inspect_unwinds_to_the_nearest_catch_frame() {
        let mut params = json!({ "error": "boom", "extra": true });
        let mut state = Some(7);
        let mut stack = vec![
            Frame::Catch { catch: 1 },
            Frame::Let {
                bindings: Map::new(),
            },
            Frame::Catch { catch: 4 },
            Frame::Params {
                params: json!({ "saved": true }),
            },
        ];
        inspect(&mut params, &mut state, &mut stack);
        assert_eq!(params, json!({ "error": "boom" }), "extra fields are dropped");
        assert_eq!(state, Some(4), "nearest catch frame wins");
        assert_eq!(stack.len(), 2, "frames above the handler are discarded");
    }

    #[test]
    fn inspect_terminates_without_a_catch_frame() {
        let mut params = json!({ "error": "boom" });
        let mut state = Some(3);
        let mut stack = vec![Frame::Params {
            params: json!({}),
        }];
        inspect(&mut params, &mut state, &mut stack);
        assert_eq!(state, None);
        assert!(stack.is_empty());
    }

    #[test]
    fn pop_on_a_let_frame_is_an_internal_error() {
        let conductor = Conductor::new(program(vec![
            (
                Op::Let {
                    declarations: Map::new(),
                },
                Some(1),
            ),
            (Op::Pop { collect: false }, None),
        ]))
        .expect("conductor");
        match conductor.invoke(json!({})) {
            Err(ConductorError::Internal(message)) => {
                assert!(message.contains("save frame"), "got {:?}", message)
            }
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[test]
    fn exit_on_empty_stack_is_an_internal_error() {
        let conductor =
            Conductor::new(program(vec![(Op::Exit, None)])).expect("conductor");
        assert!(matches!(
            conductor.invoke(json!({})),
            Err(ConductorError::Internal(_))
        ));
    }

    #[test]
    fn malformed_resume_is_a_bad_request() {
        let conductor = Conductor::new(program(vec![(Op::Pass, None)])).expect("conductor");
        let err = conductor
            .invoke(json!({ "$resume": { "state": "nope", "stack": [] } }))
            .expect_err("malformed state");
        assert_eq!(err.code(), 400);

        let err = conductor
            .invoke(json!({ "$resume": { "state": 9, "stack": [] } }))
            .expect_err("state out of range");
        assert_eq!(err.code(), 400);

        let err = conductor
            .invoke(json!({ "$resume": 17 }))
            .expect_err("token not an object");
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn frames_round_trip_through_json() {
        let frames = vec![
            Frame::Catch { catch: 3 },
            Frame::Let {
                bindings: {
                    let mut map = Map::new();
                    map.insert("count".to_string(), json!(2));
                    map
                },
            },
            Frame::Params {
                params: json!({ "n": 1 }),
            },
        ];
        let encoded = serde_json::to_value(&frames).expect("serialize");
        assert_eq!(encoded[0], json!({ "catch": 3 }));
        assert_eq!(encoded[1], json!({ "let": { "count": 2 } }));
        let back: Vec<Frame> = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(back, frames);
    }
}
