//! Statistics definition model.
//!
//! Definitions are described by a [`ColumnSet`] of user attribute numbers, an ordered list of
//! host expressions and a set of [`StatKind`]s. The catalog representation of these (character
//! arrays, serialized expression trees) is decoded once at the catalog boundary and never seen
//! here.

mod column_set;
pub use column_set::*;
mod kind;
pub use kind::*;
mod definition;
pub use definition::*;

use derive_more::{Display, From, Into};
use std::fmt::Debug;

/// Range table index of a relation inside one query. Starts from 1.
pub type RelIndex = u32;

/// Identifier of a relation (table or index) in the host catalog.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Display, From, Into)]
pub struct RelationId(u32);

/// Identifier of a stored statistics definition.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Display, From, Into)]
pub struct CatalogId(u32);

/// Expression handle supplied by the host planner.
///
/// Handles are borrowed from the host for one planning/execution cycle. They are compared with
/// `PartialEq`, which must be structural equality, and hashed through their canonical text.
pub trait HostExpr: Clone + Debug + PartialEq {
    /// Canonical textual form. Structurally equal expressions must produce equal strings.
    fn canonical_string(&self) -> String;
}

/// Appends every expression of `other` not yet present (structurally) in `target`.
pub fn union_expressions<E, I>(target: &mut Vec<E>, other: I)
where
    E: HostExpr,
    I: IntoIterator<Item = E>,
{
    for expr in other {
        if !target.contains(&expr) {
            target.push(expr);
        }
    }
}
