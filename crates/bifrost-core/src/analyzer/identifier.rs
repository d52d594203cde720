//! Central identifier resolution.
//!
//! Every identifier the analyzer reads goes through [`resolve_ident`], which
//! enforces the reserved-keyword rule in one place: an unquoted identifier
//! that collides with a reserved keyword is rejected, a quoted one passes.

use crate::error::Error;
use sqlparser::ast::{Ident, ObjectName, ObjectNamePart};
use std::collections::HashSet;

/// Returns the textual identifier, rejecting unquoted reserved keywords.
pub(crate) fn resolve_ident(ident: &Ident, reserved: &HashSet<String>) -> Result<String, Error> {
    if ident.quote_style.is_none() && reserved.contains(&ident.value.to_uppercase()) {
        return Err(Error::ReservedKeyword {
            keyword: ident.value.clone(),
        });
    }
    Ok(ident.value.clone())
}

/// Renders a possibly-qualified object name (`schema.table`) as dotted text,
/// applying the reserved-keyword rule to each part.
pub(crate) fn object_name_text(name: &ObjectName, reserved: &HashSet<String>) -> Result<String, Error> {
    let mut parts = Vec::with_capacity(name.0.len());
    for part in &name.0 {
        match part {
            ObjectNamePart::Identifier(ident) => parts.push(resolve_ident(ident, reserved)?),
            other => {
                return Err(Error::UnsupportedQuery {
                    reason: format!("unsupported name segment `{other}`"),
                })
            }
        }
    }
    Ok(parts.join("."))
}
