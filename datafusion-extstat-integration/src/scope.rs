use std::collections::{BTreeMap, HashSet};

use datafusion_common::{Column, DataFusionError};
use datafusion_expr::utils::expr_to_columns;
use datafusion_optimizer::utils::split_conjunction;
use datafusion_expr::Expr;
use extstat::classifier::{
    ColumnRef, FilterClause, PlannerContext, RangeTableEntry, RelationKind,
};
use extstat::collector::BaseRelation;
use extstat::stat::{RelIndex, RelationId};
use log::debug;

use crate::{ClauseConverter, DFResult, DfExpr};

/// A relation referenced by a query, with its columns in attribute number order.
#[derive(Clone, Debug)]
pub struct RelationScope {
    /// Name or alias qualifying the relation's columns.
    pub name: String,
    pub entry: RangeTableEntry,
    pub columns: Vec<String>,
}

impl RelationScope {
    pub fn table(name: &str, relation: RelationId, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            entry: RangeTableEntry::table(relation),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_kind(mut self, kind: RelationKind) -> Self {
        self.entry.kind = kind;
        self
    }

    pub fn with_security_quals(mut self) -> Self {
        self.entry.has_security_quals = true;
        self
    }

    /// Attribute number of a column, starting from 1.
    pub fn attno(&self, column: &str) -> Option<i16> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| (idx + 1) as i16)
    }
}

/// Relations of one query and the privileges of the user running it.
///
/// Range table index `i` refers to the `i`-th relation added, starting from 1.
#[derive(Clone, Debug, Default)]
pub struct QueryScope {
    relations: Vec<RelationScope>,
    table_grants: HashSet<RelationId>,
    column_grants: HashSet<(RelationId, i16)>,
}

impl QueryScope {
    /// Adds a relation readable by the user.
    pub fn with_relation(mut self, relation: RelationScope) -> Self {
        self.table_grants.insert(relation.entry.relation);
        self.relations.push(relation);
        self
    }

    /// Takes back table level read access, column grants stay.
    pub fn revoke_table(mut self, relation: RelationId) -> Self {
        self.table_grants.remove(&relation);
        self
    }

    pub fn grant_column(mut self, relation: RelationId, attno: i16) -> Self {
        self.column_grants.insert((relation, attno));
        self
    }

    pub fn range_table(&self) -> Vec<RangeTableEntry> {
        self.relations.iter().map(|r| r.entry.clone()).collect()
    }

    pub fn rel_index(&self, name: &str) -> Option<RelIndex> {
        self.relations
            .iter()
            .position(|r| r.name == name)
            .map(|idx| (idx + 1) as RelIndex)
    }

    /// Finds the relation a column belongs to. Unqualified names must be unique.
    pub fn resolve(&self, column: &Column) -> DFResult<ColumnRef> {
        let mut found = self
            .relations
            .iter()
            .enumerate()
            .filter(|(_, r)| match &column.relation {
                Some(qualifier) => qualifier.table() == r.name,
                None => true,
            })
            .filter_map(|(idx, r)| {
                r.attno(&column.name)
                    .map(|attno| ColumnRef::new((idx + 1) as RelIndex, attno))
            });

        match (found.next(), found.next()) {
            (Some(column_ref), None) => Ok(column_ref),
            (None, _) => Err(DataFusionError::Plan(format!(
                "Column {} not found in query scope",
                column
            ))),
            (Some(_), Some(_)) => Err(DataFusionError::Plan(format!(
                "Column {} is ambiguous",
                column
            ))),
        }
    }

    /// Splits filters into conjuncts and attaches those referencing a single relation to it.
    /// Join clauses and pseudoconstant clauses are left out.
    pub fn base_relations(&self, filters: &[Expr]) -> DFResult<Vec<BaseRelation<DfExpr>>> {
        let converter = ClauseConverter::new(self);
        let mut restrictions: BTreeMap<RelIndex, Vec<FilterClause<DfExpr>>> = BTreeMap::new();

        for conjunct in filters.iter().flat_map(|filter| split_conjunction(filter)) {
            let rinfo = converter.restrict_info(conjunct)?;
            match rinfo.clause_relids.iter().next() {
                Some(rel_index) if rinfo.clause_relids.len() == 1 => {
                    restrictions
                        .entry(*rel_index)
                        .or_default()
                        .push(FilterClause::Restrict(rinfo));
                }
                _ => debug!("{} is not a restriction of a single relation", conjunct),
            }
        }

        Ok(restrictions
            .into_iter()
            .map(|(rel_index, clauses)| BaseRelation::new(rel_index, clauses))
            .collect())
    }
}

impl PlannerContext<DfExpr> for QueryScope {
    fn range_table_entry(&self, rel_index: RelIndex) -> Option<&RangeTableEntry> {
        (rel_index as usize)
            .checked_sub(1)
            .and_then(|idx| self.relations.get(idx))
            .map(|r| &r.entry)
    }

    fn referenced_attributes(&self, expr: &DfExpr, rel_index: RelIndex) -> Vec<i16> {
        let mut columns: HashSet<Column> = HashSet::new();
        if expr_to_columns(expr.inner(), &mut columns).is_err() {
            return vec![];
        }

        columns
            .iter()
            .filter_map(|column| self.resolve(column).ok())
            .filter(|column_ref| column_ref.rel_index == rel_index)
            .map(|column_ref| column_ref.attno)
            .collect()
    }

    fn has_table_privilege(&self, relation: RelationId) -> bool {
        self.table_grants.contains(&relation)
    }

    fn has_column_privilege(&self, relation: RelationId, attno: i16) -> bool {
        self.column_grants.contains(&(relation, attno))
    }

    fn has_all_columns_privilege(&self, relation: RelationId) -> bool {
        self.relations
            .iter()
            .filter(|r| r.entry.relation == relation)
            .all(|r| {
                (1..=r.columns.len() as i16)
                    .all(|attno| self.has_column_privilege(relation, attno))
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::{QueryScope, RelationScope};
    use datafusion_common::Column;
    use datafusion_expr::{col, lit};
    use extstat::classifier::ColumnRef;
    use extstat::stat::RelationId;

    #[test]
    fn test_resolve() {
        let scope = QueryScope::default()
            .with_relation(RelationScope::table("t", RelationId::from(1), &["a", "b"]))
            .with_relation(RelationScope::table("u", RelationId::from(2), &["b", "c"]));

        assert_eq!(ColumnRef::new(1, 1), scope.resolve(&Column::from_name("a")).unwrap());
        let qualified = Column::from_qualified_name("u.b");
        assert_eq!(ColumnRef::new(2, 1), scope.resolve(&qualified).unwrap());
        assert!(scope.resolve(&Column::from_name("b")).is_err());
        assert!(scope.resolve(&Column::from_name("z")).is_err());
        assert_eq!(Some(2), scope.rel_index("u"));
    }

    #[test]
    fn test_base_relations() {
        let scope = QueryScope::default()
            .with_relation(RelationScope::table("t", RelationId::from(1), &["a", "b"]))
            .with_relation(RelationScope::table("u", RelationId::from(2), &["c", "d"]));

        let filters = vec![
            col("a").eq(lit(1i32)).and(col("b").gt(lit(2i32))),
            col("a").eq(col("c")),
            col("d").is_not_null(),
        ];
        let relations = scope.base_relations(&filters).unwrap();

        assert_eq!(2, relations.len());
        assert_eq!(1, relations[0].rel_index);
        assert_eq!(2, relations[0].restrictions.len());
        assert_eq!(2, relations[1].rel_index);
        assert_eq!(1, relations[1].restrictions.len());
    }
}
