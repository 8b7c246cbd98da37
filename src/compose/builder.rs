//! Combinator API for assembling compositions.
//!
//! Each constructor validates its arguments, merges the attached actions of
//! its children (duplicate names are rejected globally), and produces a
//! [`Composition`] whose node tree the compiler can lower. The convenience
//! combinators (`repeat`, `retry`, `retain` with `catch`/`filter`) expand to
//! the primitive nodes at construction time, so the compiler only ever sees
//! primitives.

use serde_json::{json, Value};

use super::ast::{ActionDef, AttachedAction, Composition, Exec, Node};
use super::name::canonicalize;
use super::{ComposeError, Result};
use crate::conductor::expr;

/// Anything coercible into a composition: nothing, a composition, an action
/// name, or inline expression source.
#[derive(Debug, Clone)]
pub enum Task {
    /// Absent task; coerces to the empty sequence.
    None,
    /// A composition used as-is.
    Composition(Composition),
    /// A qualified or shorthand action name.
    Action(String),
    /// Inline expression source elevated to a function node.
    Function(String),
}

impl From<Composition> for Task {
    fn from(value: Composition) -> Task {
        Task::Composition(value)
    }
}

impl From<&str> for Task {
    fn from(value: &str) -> Task {
        Task::Action(value.to_string())
    }
}

impl From<String> for Task {
    fn from(value: String) -> Task {
        Task::Action(value)
    }
}

/// Coerce a task into a composition.
pub fn task(task: impl Into<Task>) -> Result<Composition> {
    match task.into() {
        Task::None => seq(Vec::new()),
        Task::Composition(composition) => Ok(composition),
        Task::Action(name) => action(&name),
        Task::Function(code) => function(&code),
    }
}

/// Options shared by `if`, `while`, and `dowhile`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchOptions {
    /// Skip the parameter save/restore around the test; the test's output
    /// must then itself carry the full parameters forward.
    pub nosave: bool,
}

/// Options accepted by [`retain_with`].
#[derive(Debug, Clone, Default)]
pub struct RetainOptions {
    /// Snapshot only this field of the parameters.
    pub field: Option<String>,
    /// Capture a thrown error as a normal `result`.
    pub catch: bool,
    /// Save `filter(params)` instead of the parameters themselves.
    pub filter: Option<Task>,
}

/// Invoke a named action.
pub fn action(name: &str) -> Result<Composition> {
    let qname = canonicalize(name)?;
    Ok(Composition::new(Node::Action { name: qname }, Vec::new()))
}

/// Invoke a named action, attaching a definition to deploy under that name.
pub fn action_with(name: &str, exec: Exec) -> Result<Composition> {
    let qname = canonicalize(name)?;
    let record = AttachedAction {
        name: qname.clone(),
        action: ActionDef {
            exec,
            annotations: Vec::new(),
        },
    };
    Ok(Composition::new(
        Node::Action { name: qname },
        vec![record],
    ))
}

/// Invoke a named action defined as a native sequence of other actions.
pub fn action_sequence(name: &str, components: &[&str]) -> Result<Composition> {
    let canonical = components
        .iter()
        .map(|component| canonicalize(component))
        .collect::<Result<Vec<_>>>()?;
    action_with(name, Exec::sequence(canonical))
}

/// Evaluate inline expression source on the current parameters.
pub fn function(code: &str) -> Result<Composition> {
    expr::parse(code)
        .map_err(|err| ComposeError::invalid_argument("function", format!("{:?} ({})", code, err)))?;
    Ok(Composition::new(
        Node::Function {
            exec: Exec::expression(code),
        },
        Vec::new(),
    ))
}

/// Replace the parameters with a constant value.
pub fn literal(value: impl Into<Value>) -> Result<Composition> {
    Ok(Composition::new(
        Node::Literal {
            value: value.into(),
        },
        Vec::new(),
    ))
}

/// Alias for [`literal`].
pub fn value(value: impl Into<Value>) -> Result<Composition> {
    literal(value)
}

/// Run components left to right.
pub fn seq(components: Vec<Composition>) -> Result<Composition> {
    let mut actions = Vec::new();
    let mut nodes = Vec::new();
    for component in components {
        merge_actions(&mut actions, component.actions)?;
        nodes.push(component.node);
    }
    Ok(Composition::new(
        Node::Sequence { components: nodes },
        actions,
    ))
}

/// Alias for [`seq`].
pub fn sequence(components: Vec<Composition>) -> Result<Composition> {
    seq(components)
}

/// Branch on the test's truthiness.
pub fn if_(
    test: impl Into<Task>,
    consequent: impl Into<Task>,
    alternate: impl Into<Task>,
) -> Result<Composition> {
    if_with(test, consequent, alternate, BranchOptions::default())
}

/// Branch on the test's truthiness, with explicit options.
pub fn if_with(
    test: impl Into<Task>,
    consequent: impl Into<Task>,
    alternate: impl Into<Task>,
    options: BranchOptions,
) -> Result<Composition> {
    let test = task(test)?;
    let consequent = task(consequent)?;
    let alternate = task(alternate)?;
    let mut actions = test.actions;
    merge_actions(&mut actions, consequent.actions)?;
    merge_actions(&mut actions, alternate.actions)?;
    Ok(Composition::new(
        Node::If {
            test: Box::new(test.node),
            consequent: Box::new(consequent.node),
            alternate: Box::new(alternate.node),
            nosave: options.nosave,
        },
        actions,
    ))
}

/// Run the body while the test holds.
pub fn while_(test: impl Into<Task>, body: impl Into<Task>) -> Result<Composition> {
    while_with(test, body, BranchOptions::default())
}

/// Run the body while the test holds, with explicit options.
pub fn while_with(
    test: impl Into<Task>,
    body: impl Into<Task>,
    options: BranchOptions,
) -> Result<Composition> {
    let test = task(test)?;
    let body = task(body)?;
    let mut actions = test.actions;
    merge_actions(&mut actions, body.actions)?;
    Ok(Composition::new(
        Node::While {
            test: Box::new(test.node),
            body: Box::new(body.node),
            nosave: options.nosave,
        },
        actions,
    ))
}

/// Run the body, then repeat while the test holds.
pub fn dowhile(body: impl Into<Task>, test: impl Into<Task>) -> Result<Composition> {
    dowhile_with(body, test, BranchOptions::default())
}

/// Run the body, then repeat while the test holds, with explicit options.
pub fn dowhile_with(
    body: impl Into<Task>,
    test: impl Into<Task>,
    options: BranchOptions,
) -> Result<Composition> {
    let body = task(body)?;
    let test = task(test)?;
    let mut actions = body.actions;
    merge_actions(&mut actions, test.actions)?;
    Ok(Composition::new(
        Node::Dowhile {
            body: Box::new(body.node),
            test: Box::new(test.node),
            nosave: options.nosave,
        },
        actions,
    ))
}

/// Run the body; on error, divert to the handler.
pub fn try_(body: impl Into<Task>, handler: impl Into<Task>) -> Result<Composition> {
    let body = task(body)?;
    let handler = task(handler)?;
    let mut actions = body.actions;
    merge_actions(&mut actions, handler.actions)?;
    Ok(Composition::new(
        Node::Try {
            body: Box::new(body.node),
            handler: Box::new(handler.node),
        },
        actions,
    ))
}

/// Run the body; run the finalizer whether the body succeeds or throws.
pub fn finally(body: impl Into<Task>, finalizer: impl Into<Task>) -> Result<Composition> {
    let body = task(body)?;
    let finalizer = task(finalizer)?;
    let mut actions = body.actions;
    merge_actions(&mut actions, finalizer.actions)?;
    Ok(Composition::new(
        Node::Finally {
            body: Box::new(body.node),
            finalizer: Box::new(finalizer.node),
        },
        actions,
    ))
}

/// Bind names for the dynamic extent of the body.
///
/// `declarations` must be a JSON object; its fields become let-bound names
/// visible to inline functions inside the body.
pub fn let_(declarations: Value, body: impl Into<Task>) -> Result<Composition> {
    let declarations = match declarations {
        Value::Object(map) => map,
        other => return Err(ComposeError::invalid_argument("let", other)),
    };
    let body = task(body)?;
    Ok(Composition::new(
        Node::Let {
            declarations,
            body: Box::new(body.node),
        },
        body.actions,
    ))
}

/// Capture the input parameters alongside the body's result.
pub fn retain(body: impl Into<Task>) -> Result<Composition> {
    retain_with(body, RetainOptions::default())
}

/// Capture the input parameters alongside the body's result, with options.
///
/// `catch` and `filter` expand to primitives here: a caught error is carried
/// through a `finally` wrapper so it round-trips as a normal `result`, and a
/// filter first computes the saved side before the body runs on the original
/// parameters.
pub fn retain_with(body: impl Into<Task>, options: RetainOptions) -> Result<Composition> {
    let body = task(body)?;

    if let Some(filter) = options.filter {
        let filter = task(filter)?;
        return seq(vec![
            retain_plain(filter, None),
            function("{ params: params.result, result: params.params }")?,
            retain_with(
                seq(vec![function("params.result")?, body])?,
                RetainOptions {
                    field: Some("params".to_string()),
                    catch: options.catch,
                    filter: None,
                },
            )?,
        ]);
    }

    if options.catch {
        let wrapped = finally(body, function("{ result: params }")?)?;
        return seq(vec![
            retain_plain(wrapped, options.field),
            function("{ params: params.params, result: params.result.result }")?,
        ]);
    }

    Ok(retain_plain(body, options.field))
}

fn retain_plain(body: Composition, field: Option<String>) -> Composition {
    Composition::new(
        Node::Retain {
            body: Box::new(body.node),
            field,
        },
        body.actions,
    )
}

/// Run the body `count` times.
pub fn repeat(count: i64, body: impl Into<Task>) -> Result<Composition> {
    let_(
        json!({ "count": count }),
        while_(function("(count = count - 1) >= 0")?, task(body)?)?,
    )
}

/// Run the body up to `count + 1` times, stopping at the first non-error
/// result; the final result (or last error) becomes the pipeline value.
pub fn retry(count: i64, body: impl Into<Task>) -> Result<Composition> {
    let body = task(body)?;
    let attempt = retain_with(
        body.clone(),
        RetainOptions {
            catch: true,
            ..RetainOptions::default()
        },
    )?;
    let_(
        json!({ "count": count }),
        seq(vec![
            attempt.clone(),
            while_(
                function("params.result.error != null && (count = count - 1) >= 0")?,
                seq(vec![function("params.params")?, attempt])?,
            )?,
            function("params.result")?,
        ])?,
    )
}

/// Wrap the whole composition under a single named action, attaching the
/// original tree as a deployable sub-composition.
pub fn named(name: &str, composition: Composition) -> Result<Composition> {
    let qname = canonicalize(name)?;
    let Composition { node, mut actions } = composition;
    if actions.iter().any(|record| record.name == qname) {
        return Err(ComposeError::DuplicateAction(qname));
    }
    actions.push(AttachedAction {
        name: qname.clone(),
        action: ActionDef {
            exec: Exec::composition(node.into_components()),
            annotations: Vec::new(),
        },
    });
    Ok(Composition::new(Node::Action { name: qname }, actions))
}

fn merge_actions(into: &mut Vec<AttachedAction>, from: Vec<AttachedAction>) -> Result<()> {
    for record in from {
        match into.iter().position(|existing| existing.name == record.name) {
            Some(index) if into[index] == record => {}
            Some(_) => return Err(ComposeError::DuplicateAction(record.name)),
            None => into.push(record),
        }
    }
    Ok(())
}
