//! Composition node tree and attached-action records.
//!
//! A [`Composition`] pairs a [`Node`] tree with the actions that must be
//! deployed alongside it. Nodes serialize with a `type` tag so that the
//! serialized document (spec'd as `{"composition": [...], "actions": [...]}`)
//! round-trips losslessly; the top-level tree is flattened to an array of
//! sibling nodes on the way out and rebuilt as a sequence on the way in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Exec kind for inline expression functions.
pub const KIND_EXPRESSION: &str = "expression";
/// Exec kind for native sequences of actions.
pub const KIND_SEQUENCE: &str = "sequence";
/// Exec kind for not-yet-encoded sub-compositions.
pub const KIND_COMPOSITION: &str = "composition";
/// Exec kind for encoded conductor actions.
pub const KIND_CONDUCTOR: &str = "conductor";

/// Annotation key under which an encoded action preserves its source tree.
pub const CONDUCTOR_ANNOTATION: &str = "conductor";

/// One node of a composition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    /// Invoke a named action.
    Action {
        /// Canonical qualified name of the action.
        name: String,
    },
    /// Evaluate inline source on the current parameters.
    Function {
        /// Source payload evaluated by the conductor.
        exec: Exec,
    },
    /// Replace the parameters with a constant value.
    Literal {
        /// Constant substituted for the pipeline value.
        value: Value,
    },
    /// Run children left to right.
    Sequence {
        /// Ordered child nodes.
        components: Vec<Node>,
    },
    /// Branch on the truthiness of the test's `value` field.
    If {
        /// Test producing `{value: bool}`.
        test: Box<Node>,
        /// Branch taken on a truthy test.
        consequent: Box<Node>,
        /// Branch taken on a falsy test.
        alternate: Box<Node>,
        /// Skip the parameter save/restore around the test.
        #[serde(default, skip_serializing_if = "is_false")]
        nosave: bool,
    },
    /// Run the body while the test holds.
    While {
        /// Test producing `{value: bool}`.
        test: Box<Node>,
        /// Loop body.
        body: Box<Node>,
        /// Skip the parameter save/restore around the test.
        #[serde(default, skip_serializing_if = "is_false")]
        nosave: bool,
    },
    /// Run the body, then repeat while the test holds.
    Dowhile {
        /// Loop body, executed at least once.
        body: Box<Node>,
        /// Test producing `{value: bool}`.
        test: Box<Node>,
        /// Skip the parameter save/restore around the test.
        #[serde(default, skip_serializing_if = "is_false")]
        nosave: bool,
    },
    /// Run the body; on error, divert to the handler.
    Try {
        /// Protected body.
        body: Box<Node>,
        /// Handler receiving `{error: ...}`.
        handler: Box<Node>,
    },
    /// Run the body; run the finalizer whether it succeeds or throws.
    Finally {
        /// Protected body.
        body: Box<Node>,
        /// Finalizer receiving the body's outcome.
        finalizer: Box<Node>,
    },
    /// Bind names for the dynamic extent of the body.
    Let {
        /// Name/value bindings visible inside the body.
        declarations: Map<String, Value>,
        /// Scoped body.
        body: Box<Node>,
    },
    /// Capture the input parameters alongside the body's result.
    Retain {
        /// Body whose result is paired with the saved parameters.
        body: Box<Node>,
        /// Save only this field of the parameters instead of the whole object.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl Node {
    /// An empty sequence, the unit of composition.
    pub fn empty() -> Node {
        Node::Sequence {
            components: Vec::new(),
        }
    }

    /// Flatten the node into the serialized top-level array form.
    pub fn into_components(self) -> Vec<Node> {
        match self {
            Node::Sequence { components } => components,
            other => vec![other],
        }
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Executable payload of an action definition or inline function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exec {
    /// Payload kind (`expression`, `sequence`, `composition`, `conductor`, …).
    pub kind: String,
    /// Source text, for code-bearing kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Component action names, for native sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<String>>,
    /// Node tree, for not-yet-encoded sub-compositions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<Vec<Node>>,
}

impl Exec {
    /// Inline expression source.
    pub fn expression(code: impl Into<String>) -> Exec {
        Exec {
            kind: KIND_EXPRESSION.to_string(),
            code: Some(code.into()),
            components: None,
            composition: None,
        }
    }

    /// Source text under an explicit kind.
    pub fn code(kind: impl Into<String>, code: impl Into<String>) -> Exec {
        Exec {
            kind: kind.into(),
            code: Some(code.into()),
            components: None,
            composition: None,
        }
    }

    /// Native sequence over canonical action names.
    pub fn sequence(components: Vec<String>) -> Exec {
        Exec {
            kind: KIND_SEQUENCE.to_string(),
            code: None,
            components: Some(components),
            composition: None,
        }
    }

    /// Sub-composition payload awaiting encoding.
    pub fn composition(components: Vec<Node>) -> Exec {
        Exec {
            kind: KIND_COMPOSITION.to_string(),
            code: None,
            components: None,
            composition: Some(components),
        }
    }
}

/// Key/value annotation attached to a deployed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation key.
    pub key: String,
    /// Annotation value.
    pub value: Value,
}

/// Deployable definition of an attached action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    /// Executable payload.
    pub exec: Exec,
    /// Annotations published with the action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

/// An action record carried alongside a composition and published at deploy
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedAction {
    /// Canonical qualified name.
    pub name: String,
    /// Definition to publish under that name.
    pub action: ActionDef,
}

/// A workflow assembled from combinators, ready to serialize or compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CompositionDoc", into = "CompositionDoc")]
pub struct Composition {
    pub(crate) node: Node,
    pub(crate) actions: Vec<AttachedAction>,
}

impl Composition {
    pub(crate) fn new(node: Node, actions: Vec<AttachedAction>) -> Composition {
        Composition { node, actions }
    }

    /// The root of the node tree.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Actions that must be deployed alongside this composition.
    pub fn actions(&self) -> &[AttachedAction] {
        &self.actions
    }
}

/// Serialized document form: top-level sequence flattened to an array.
#[derive(Serialize, Deserialize)]
struct CompositionDoc {
    composition: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    actions: Vec<AttachedAction>,
}

impl From<Composition> for CompositionDoc {
    fn from(value: Composition) -> CompositionDoc {
        CompositionDoc {
            composition: value.node.into_components(),
            actions: value.actions,
        }
    }
}

impl From<CompositionDoc> for Composition {
    fn from(doc: CompositionDoc) -> Composition {
        Composition {
            node: Node::Sequence {
                components: doc.composition,
            },
            actions: doc.actions,
        }
    }
}
