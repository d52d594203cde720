//! Static analysis of a parsed `SELECT`: alias collection, then facet
//! extraction. Both passes run over the same immutable tree; the scope map
//! built by the first pass is consulted by the second through a node-identity
//! side-table.

pub(crate) mod expression;
pub(crate) mod facets;
pub(crate) mod identifier;
pub(crate) mod scopes;

use crate::error::Error;
use facets::{FacetCollector, Facets};
use scopes::ScopeMap;
use sqlparser::ast::Query;
use std::collections::HashSet;

/// The result of both analysis passes.
pub(crate) struct Analysis {
    pub(crate) scopes: ScopeMap,
    pub(crate) facets: Facets,
}

/// Runs alias collection and facet extraction over one parsed query.
pub(crate) fn analyze(query: &Query, reserved: &HashSet<String>) -> Result<Analysis, Error> {
    let scopes = ScopeMap::build(query, reserved)?;
    let facets = FacetCollector::collect(query, &scopes, reserved)?;
    Ok(Analysis { scopes, facets })
}
