//! Conductor-source emission and the `encode` transformation.
//!
//! A composition attachment of kind `composition` is a raw node tree; to
//! deploy it, `encode` compiles the tree and wraps the resulting program in
//! a code payload of kind `conductor` that a conductor-enabled runtime can
//! instantiate directly ([`crate::conductor::Conductor::from_source`]). The
//! original tree is preserved as a `conductor` annotation so the
//! composition can be recovered from the deployed action.

use serde_json::json;

use crate::compose::ast::{
    ActionDef, Annotation, AttachedAction, Composition, Exec, Node, CONDUCTOR_ANNOTATION,
    KIND_COMPOSITION, KIND_CONDUCTOR,
};
use crate::compose::builder::named;
use crate::compose::compiler::compile_composition;
use crate::compose::{ComposeError, Result};

/// Render the deployable code payload for a composition.
pub fn conductor_source(composition: &Composition) -> std::result::Result<String, serde_json::Error> {
    let program = compile_composition(composition);
    let doc = json!({ "fsm": program });
    serde_json::to_string_pretty(&doc)
}

/// Transform every attached sub-composition into a deployable conductor
/// action.
///
/// With a name, the composition is first wrapped with
/// [`named`](crate::compose::builder::named); without one it must already
/// be reduced to a single named action, otherwise the result is
/// [`ComposeError::CannotEncode`].
pub fn encode(composition: Composition, name: Option<&str>) -> Result<Composition> {
    let composition = match name {
        Some(name) => named(name, composition)?,
        None => composition,
    };
    if !matches!(composition.node(), Node::Action { .. }) {
        return Err(ComposeError::CannotEncode(
            "composition is not a single named action".to_string(),
        ));
    }

    let Composition { node, actions } = composition;
    let mut encoded = Vec::with_capacity(actions.len());
    for record in actions {
        if record.action.exec.kind != KIND_COMPOSITION {
            encoded.push(record);
            continue;
        }
        let components = record.action.exec.composition.unwrap_or_default();
        let tree = serde_json::to_value(&components)
            .map_err(|err| ComposeError::CannotEncode(err.to_string()))?;
        let inner = Composition::new(
            Node::Sequence { components },
            Vec::new(),
        );
        let code = conductor_source(&inner)
            .map_err(|err| ComposeError::CannotEncode(err.to_string()))?;
        let mut annotations = record.action.annotations;
        annotations.push(Annotation {
            key: CONDUCTOR_ANNOTATION.to_string(),
            value: tree,
        });
        encoded.push(AttachedAction {
            name: record.name,
            action: ActionDef {
                exec: Exec::code(KIND_CONDUCTOR, code),
                annotations,
            },
        });
    }
    Ok(Composition::new(node, encoded))
}
