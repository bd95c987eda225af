use std::collections::BTreeSet;

use strum_macros::AsRefStr;

use crate::stat::{RelIndex, RelationId};

/// Reference to a column of some range table entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub rel_index: RelIndex,
    /// Attribute number. Zero is a whole-row reference, negatives are system columns.
    pub attno: i16,
    /// Number of query levels up, 0 for the current level.
    pub levels_up: u32,
}

impl ColumnRef {
    pub fn new(rel_index: RelIndex, attno: i16) -> Self {
        Self {
            rel_index,
            attno,
            levels_up: 0,
        }
    }
}

/// Selectivity estimator attached to an operator.
///
/// Operators are judged by how they are estimated rather than by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum RestrictionEstimator {
    Eq,
    Neq,
    ScalarLt,
    ScalarLe,
    ScalarGt,
    ScalarGe,
    Other,
}

impl RestrictionEstimator {
    /// Equality, inequality and the four orderings can be estimated by MCV lists.
    pub fn is_supported(self) -> bool {
        !matches!(self, RestrictionEstimator::Other)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OperatorInfo {
    pub name: String,
    pub estimator: RestrictionEstimator,
    /// Whether the operator's function can't reveal its arguments (through errors etc).
    pub leakproof: bool,
}

impl OperatorInfo {
    pub fn new<S: Into<String>>(name: S, estimator: RestrictionEstimator) -> Self {
        Self {
            name: name.into(),
            estimator,
            leakproof: true,
        }
    }

    pub fn leaky(mut self) -> Self {
        self.leakproof = false;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

/// Shape of one node of a filter expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum ClauseKind<E> {
    Column(ColumnRef),
    /// Pseudo-constant: no column references and no volatile functions.
    Const,
    /// Binary-compatible relabeling, looked through during classification.
    Relabel(Box<Clause<E>>),
    /// Operator with its arguments, e.g. `a = 1` or `a + b`.
    Comparison {
        op: OperatorInfo,
        args: Vec<Clause<E>>,
    },
    /// `expr op ANY (array)`, e.g. `a IN (1, 2)`.
    SetMembership {
        op: OperatorInfo,
        args: Vec<Clause<E>>,
    },
    Bool {
        op: BoolOp,
        args: Vec<Clause<E>>,
    },
    /// `expr IS [NOT] NULL`.
    NullTest { arg: Box<Clause<E>> },
    /// Anything else. Matched against statistics expressions as a whole.
    Opaque,
}

/// A node of a filter expression tree paired with the host's handle for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Clause<E> {
    expr: E,
    kind: ClauseKind<E>,
}

impl<E> Clause<E> {
    pub fn new(expr: E, kind: ClauseKind<E>) -> Self {
        Self { expr, kind }
    }

    pub fn expr(&self) -> &E {
        &self.expr
    }

    pub fn kind(&self) -> &ClauseKind<E> {
        &self.kind
    }

    pub fn strip_relabel(&self) -> &Clause<E> {
        let mut clause = self;
        while let ClauseKind::Relabel(inner) = &clause.kind {
            clause = inner;
        }
        clause
    }

    pub fn is_pseudo_constant(&self) -> bool {
        matches!(self.kind, ClauseKind::Const)
    }
}

/// A restriction clause attached to a base relation by the planner.
#[derive(Clone, Debug, PartialEq)]
pub struct RestrictInfo<E> {
    pub clause: Clause<E>,
    /// Clause references no relation at all (e.g. `WHERE $1 > 0`).
    pub pseudoconstant: bool,
    /// Range table indexes referenced by the clause.
    pub clause_relids: BTreeSet<RelIndex>,
}

impl<E> RestrictInfo<E> {
    pub fn new(clause: Clause<E>, rel_index: RelIndex) -> Self {
        Self {
            clause,
            pseudoconstant: false,
            clause_relids: BTreeSet::from([rel_index]),
        }
    }
}

/// Planner-level filter: a restriction, or a bare AND of them.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterClause<E> {
    Restrict(RestrictInfo<E>),
    And(Vec<FilterClause<E>>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum RelationKind {
    Table,
    PartitionedTable,
    Index,
    PartitionedIndex,
    View,
    MaterializedView,
    ForeignTable,
    Other,
}

/// Range table entry of a relation referenced by a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeTableEntry {
    pub relation: RelationId,
    pub kind: RelationKind,
    /// Row-security policies or security barrier quals apply to this entry.
    pub has_security_quals: bool,
}

impl RangeTableEntry {
    pub fn table(relation: RelationId) -> Self {
        Self {
            relation,
            kind: RelationKind::Table,
            has_security_quals: false,
        }
    }
}

/// Planner services needed by classification. Privilege checks are on behalf of the
/// principal the query is planned for.
pub trait PlannerContext<E> {
    fn range_table_entry(&self, rel_index: RelIndex) -> Option<&RangeTableEntry>;

    /// Attribute numbers of `rel_index` referenced anywhere inside `expr`.
    fn referenced_attributes(&self, expr: &E, rel_index: RelIndex) -> Vec<i16>;

    fn has_table_privilege(&self, relation: RelationId) -> bool;

    fn has_column_privilege(&self, relation: RelationId, attno: i16) -> bool;

    fn has_all_columns_privilege(&self, relation: RelationId) -> bool;
}
