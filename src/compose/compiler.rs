//! Lowering from the composition tree to the flat instruction array.
//!
//! All jumps in the emitted program are offsets relative to the instruction
//! that carries them. [`chain`] therefore composes fragments by pure
//! concatenation: the front fragment's last instruction is pointed at the
//! back fragment and the arrays are appended. Each emitted instruction
//! records the tree path it was lowered from (`.body.consequent[2]` style)
//! for diagnostics.

use super::ast::{Composition, Node};
use super::ir::{FsmProgram, Instruction, Op};

/// Compile a composition into a finite-state program.
///
/// Compilation runs over the flattened document form (the top-level node
/// array), so a composition and its serialization round trip compile to
/// structurally identical programs.
pub fn compile_composition(composition: &Composition) -> FsmProgram {
    let node = Node::Sequence {
        components: composition.node().clone().into_components(),
    };
    FsmProgram::new(compile(&node, ""))
}

/// Link two fragments: the front's last instruction falls through to the
/// back, and the arrays are concatenated.
pub fn chain(mut front: Vec<Instruction>, back: Vec<Instruction>) -> Vec<Instruction> {
    if let Some(last) = front.last_mut() {
        last.next = Some(1);
    }
    front.extend(back);
    front
}

/// Compile one node, recording `path` on every emitted instruction.
pub fn compile(node: &Node, path: &str) -> Vec<Instruction> {
    match node {
        Node::Sequence { components } => {
            if components.is_empty() {
                return vec![Instruction::new(Op::Pass, path)];
            }
            components
                .iter()
                .enumerate()
                .map(|(i, child)| compile(child, &format!("{}[{}]", path, i)))
                .reduce(chain)
                .unwrap_or_default()
        }

        Node::Action { name } => vec![Instruction::new(
            Op::Action { name: name.clone() },
            path,
        )],

        Node::Function { exec } => vec![Instruction::new(
            Op::Function { exec: exec.clone() },
            path,
        )],

        Node::Literal { value } => vec![Instruction::new(
            Op::Literal {
                value: value.clone(),
            },
            path,
        )],

        Node::Let { declarations, body } => {
            let body = compile(body, &format!("{}.body", path));
            let frag = chain(
                vec![Instruction::new(
                    Op::Let {
                        declarations: declarations.clone(),
                    },
                    path,
                )],
                body,
            );
            chain(frag, vec![Instruction::new(Op::Exit, path)])
        }

        Node::Retain { body, field } => {
            let body = compile(body, &format!("{}.body", path));
            let frag = chain(
                vec![Instruction::new(
                    Op::Push {
                        field: field.clone(),
                    },
                    path,
                )],
                body,
            );
            chain(
                frag,
                vec![Instruction::new(Op::Pop { collect: true }, path)],
            )
        }

        Node::Try { body, handler } => {
            let body = compile(body, &format!("{}.body", path));
            let handler = chain(
                compile(handler, &format!("{}.handler", path)),
                vec![Instruction::new(Op::Pass, path)],
            );
            let mut frag = chain(
                chain(vec![Instruction::new(Op::Try { catch: 0 }, path)], body),
                vec![Instruction::new(Op::Exit, path)],
            );
            // The catch frame targets the handler, which starts right after
            // the exit; on success the exit skips the handler entirely.
            frag[0].op = Op::Try {
                catch: frag.len() as i64,
            };
            if let Some(exit) = frag.last_mut() {
                exit.next = Some(handler.len() as i64);
            }
            frag.extend(handler);
            frag
        }

        Node::Finally { body, finalizer } => {
            let body = compile(body, &format!("{}.body", path));
            let finalizer = compile(finalizer, &format!("{}.finalizer", path));
            let mut frag = chain(
                chain(vec![Instruction::new(Op::Try { catch: 0 }, path)], body),
                vec![Instruction::new(Op::Exit, path)],
            );
            // On error the catch frame jumps over the exit to the finalizer;
            // on success the exit falls through to it.
            frag[0].op = Op::Try {
                catch: frag.len() as i64,
            };
            chain(frag, finalizer)
        }

        Node::If {
            test,
            consequent,
            alternate,
            nosave,
        } => {
            let test = compile(test, &format!("{}.test", path));
            let mut consequent = compile(consequent, &format!("{}.consequent", path));
            let mut alternate = compile(alternate, &format!("{}.alternate", path));
            if !nosave {
                consequent = chain(
                    vec![Instruction::new(Op::Pop { collect: false }, path)],
                    consequent,
                );
                alternate = chain(
                    vec![Instruction::new(Op::Pop { collect: false }, path)],
                    alternate,
                );
            }
            let alternate = chain(alternate, vec![Instruction::new(Op::Pass, path)]);

            let front = if *nosave {
                test
            } else {
                chain(
                    vec![Instruction::new(Op::Push { field: None }, path)],
                    test,
                )
            };
            let mut frag = chain(
                front,
                vec![Instruction::new(
                    Op::Choice {
                        then: 1,
                        otherwise: consequent.len() as i64 + 1,
                    },
                    path,
                )],
            );
            if let Some(last) = consequent.last_mut() {
                last.next = Some(alternate.len() as i64);
            }
            frag.extend(consequent);
            frag.extend(alternate);
            frag
        }

        Node::While { test, body, nosave } => {
            let test = compile(test, &format!("{}.test", path));
            let mut body = compile(body, &format!("{}.body", path));
            if !nosave {
                body = chain(
                    vec![Instruction::new(Op::Pop { collect: false }, path)],
                    body,
                );
            }
            let alternate = if *nosave {
                vec![Instruction::new(Op::Pass, path)]
            } else {
                chain(
                    vec![Instruction::new(Op::Pop { collect: false }, path)],
                    vec![Instruction::new(Op::Pass, path)],
                )
            };

            let front = if *nosave {
                test
            } else {
                chain(
                    vec![Instruction::new(Op::Push { field: None }, path)],
                    test,
                )
            };
            let mut frag = chain(
                front,
                vec![Instruction::new(
                    Op::Choice {
                        then: 1,
                        otherwise: body.len() as i64 + 1,
                    },
                    path,
                )],
            );
            // After the body, jump back to the top of the loop.
            let last_index = frag.len() + body.len() - 1;
            if let Some(last) = body.last_mut() {
                last.next = Some(-(last_index as i64));
            }
            frag.extend(body);
            frag.extend(alternate);
            frag
        }

        Node::Dowhile { body, test, nosave } => {
            let body = compile(body, &format!("{}.body", path));
            let test = compile(test, &format!("{}.test", path));
            let front = if *nosave {
                chain(body, test)
            } else {
                chain(
                    body,
                    chain(
                        vec![Instruction::new(Op::Push { field: None }, path)],
                        test,
                    ),
                )
            };
            let mut frag = chain(
                front,
                vec![Instruction::new(Op::Choice { then: 1, otherwise: 1 }, path)],
            );
            let choice_index = frag.len() - 1;
            if *nosave {
                frag[choice_index].op = Op::Choice {
                    then: -(choice_index as i64),
                    otherwise: 1,
                };
                frag.push(Instruction::new(Op::Pass, path));
            } else {
                frag[choice_index].op = Op::Choice {
                    then: 1,
                    otherwise: 2,
                };
                let mut loop_pop = Instruction::new(Op::Pop { collect: false }, path);
                loop_pop.next = Some(-(frag.len() as i64));
                frag.push(loop_pop);
                let mut exit_pop = Instruction::new(Op::Pop { collect: false }, path);
                exit_pop.next = Some(1);
                frag.push(exit_pop);
                frag.push(Instruction::new(Op::Pass, path));
            }
            frag
        }
    }
}
