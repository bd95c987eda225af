use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use prettytable::Table;

use crate::stat::{ColumnSet, HostExpr, RelIndex, RelationId};

/// Columns and expressions of a relation whose scan was badly estimated. Statistics over them
/// would probably fix the estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct Recommendation<E> {
    pub relation: RelationId,
    pub rel_index: RelIndex,
    /// Label of the plan node that revealed the estimation error.
    pub node: String,
    pub planned_rows: f64,
    pub actual_rows: f64,
    pub estimation_error: f64,
    pub columns: ColumnSet,
    pub expressions: Vec<E>,
}

impl<E: HostExpr> Recommendation<E> {
    fn expressions_text(&self) -> String {
        self.expressions
            .iter()
            .map(HostExpr::canonical_string)
            .join(", ")
    }
}

impl<E: HostExpr> Display for Recommendation<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "relation {} (rte {}): columns {:?}, expressions [{}], {} planned {} rows, got {} (error {:.2})",
            self.relation,
            self.rel_index,
            self.columns,
            self.expressions_text(),
            self.node,
            self.planned_rows,
            self.actual_rows,
            self.estimation_error
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Recommendations<E>(Vec<Recommendation<E>>);

impl<E> Default for Recommendations<E> {
    fn default() -> Self {
        Self(vec![])
    }
}

impl<E: HostExpr> Recommendations<E> {
    /// Keeps the list ordered by descending estimation error. Equal errors keep arrival
    /// order.
    pub fn push(&mut self, recommendation: Recommendation<E>) {
        let pos = self.0.partition_point(|r| {
            r.estimation_error
                .partial_cmp(&recommendation.estimation_error)
                .map(|ord| ord != Ordering::Less)
                .unwrap_or(true)
        });
        self.0.insert(pos, recommendation);
    }

    pub fn extend(&mut self, other: Recommendations<E>) {
        for recommendation in other.0 {
            self.push(recommendation);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recommendation<E>> + '_ {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Recommendation<E>> {
        self.0
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row![
            "Relation",
            "Rte",
            "Node",
            "Planned rows",
            "Actual rows",
            "Error",
            "Columns",
            "Expressions"
        ]);
        for r in &self.0 {
            table.add_row(row![
                r.relation,
                r.rel_index,
                r.node,
                r.planned_rows,
                r.actual_rows,
                format!("{:.2}", r.estimation_error),
                format!("{:?}", r.columns),
                r.expressions_text()
            ]);
        }
        table
    }
}
