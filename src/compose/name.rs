//! Qualified action-name resolution.
//!
//! Canonical names have the form `/namespace/[package/]action`. The resolver
//! accepts the shorthands `a`, `p/a`, `/ns/a`, and `/ns/p/a`; unqualified
//! names are placed in the default namespace, written as a single underscore.

use super::{ComposeError, Result};

/// Default namespace token used when a name carries no explicit namespace.
pub const DEFAULT_NAMESPACE: &str = "_";

/// Canonicalize a raw action name.
///
/// Leading and trailing whitespace is trimmed. A name that begins with `/`
/// must already spell out its namespace (`/ns/a` or `/ns/p/a`); a bare name
/// or `package/action` pair is prefixed with the default namespace. The
/// shapes `/x` (namespace without an action) and `a/b/c/d` (four parts with
/// no namespace) are rejected, as is any empty or whitespace-only segment.
pub fn canonicalize(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ComposeError::InvalidName(raw.to_string()));
    }

    let qualified = name.starts_with('/');
    let parts: Vec<&str> = name.split('/').collect();
    let n = parts.len();

    if n > 4 || (qualified && n == 2) || (!qualified && n == 4) {
        return Err(ComposeError::InvalidName(raw.to_string()));
    }

    // The segment before a leading slash is empty by construction; every
    // other segment must have content.
    for (i, part) in parts.iter().enumerate() {
        if (i > 0 || !qualified) && part.trim().is_empty() {
            return Err(ComposeError::InvalidName(raw.to_string()));
        }
    }

    if qualified {
        Ok(name.to_string())
    } else if n == 3 {
        Ok(format!("/{}", name))
    } else {
        Ok(format!("/{}/{}", DEFAULT_NAMESPACE, name))
    }
}
