//! Test doubles for the host: a string-backed expression, a planner context with a simple
//! grant table and an in-memory statistics catalog.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;

use crate::catalog::{DefinitionBody, IndexProvider, NewStatDefinition, StatisticsCatalog};
use crate::classifier::{
    BoolOp, Clause, ClauseKind, ColumnRef, FilterClause, OperatorInfo, PlannerContext,
    RangeTableEntry, RelationKind, RestrictInfo, RestrictionEstimator,
};
use crate::error::ExtStatResult;
use crate::generator::IndexDefinition;
use crate::stat::{
    CatalogId, ColumnSet, ExistingStatDefinition, HostExpr, RelIndex, RelationId, StatKinds,
};

/// Expression identified by its text. Remembers the columns it references.
#[derive(Clone, Debug)]
pub struct TestExpr {
    text: String,
    references: Vec<(RelIndex, i16)>,
}

impl TestExpr {
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl PartialEq for TestExpr {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl HostExpr for TestExpr {
    fn canonical_string(&self) -> String {
        self.text.clone()
    }
}

pub fn expr<S: Into<String>>(text: S) -> TestExpr {
    TestExpr {
        text: text.into(),
        references: vec![],
    }
}

pub fn expr_over<S: Into<String>>(text: S, rel_index: RelIndex, attnos: &[i16]) -> TestExpr {
    TestExpr {
        text: text.into(),
        references: attnos.iter().map(|attno| (rel_index, *attno)).collect(),
    }
}

fn composite(text: String, args: &[&Clause<TestExpr>]) -> TestExpr {
    TestExpr {
        text,
        references: args
            .iter()
            .flat_map(|arg| arg.expr().references.iter().copied())
            .collect(),
    }
}

pub fn column_ref(column: ColumnRef) -> Clause<TestExpr> {
    let text = format!("t{}.c{}", column.rel_index, column.attno);
    Clause::new(
        expr_over(text, column.rel_index, &[column.attno]),
        ClauseKind::Column(column),
    )
}

pub fn column(rel_index: RelIndex, attno: i16) -> Clause<TestExpr> {
    column_ref(ColumnRef::new(rel_index, attno))
}

pub fn constant(text: &str) -> Clause<TestExpr> {
    Clause::new(expr(text), ClauseKind::Const)
}

pub fn opaque(text: &str) -> Clause<TestExpr> {
    Clause::new(expr(text), ClauseKind::Opaque)
}

pub fn opaque_over(text: &str, rel_index: RelIndex, attnos: &[i16]) -> Clause<TestExpr> {
    Clause::new(expr_over(text, rel_index, attnos), ClauseKind::Opaque)
}

pub fn relabel(arg: Clause<TestExpr>) -> Clause<TestExpr> {
    let expr = composite(format!("{}::relabel", arg.expr().text), &[&arg]);
    Clause::new(expr, ClauseKind::Relabel(Box::new(arg)))
}

pub fn comparison(
    op: OperatorInfo,
    left: Clause<TestExpr>,
    right: Clause<TestExpr>,
) -> Clause<TestExpr> {
    let expr = composite(
        format!("{} {} {}", left.expr().text, op.name, right.expr().text),
        &[&left, &right],
    );
    Clause::new(
        expr,
        ClauseKind::Comparison {
            op,
            args: vec![left, right],
        },
    )
}

pub fn eq(left: Clause<TestExpr>, right: Clause<TestExpr>) -> Clause<TestExpr> {
    comparison(OperatorInfo::new("=", RestrictionEstimator::Eq), left, right)
}

pub fn gt(left: Clause<TestExpr>, right: Clause<TestExpr>) -> Clause<TestExpr> {
    comparison(OperatorInfo::new(">", RestrictionEstimator::ScalarGt), left, right)
}

pub fn in_array(left: Clause<TestExpr>, right: Clause<TestExpr>) -> Clause<TestExpr> {
    let expr = composite(
        format!("{} = ANY ({})", left.expr().text, right.expr().text),
        &[&left, &right],
    );
    Clause::new(
        expr,
        ClauseKind::SetMembership {
            op: OperatorInfo::new("=", RestrictionEstimator::Eq),
            args: vec![left, right],
        },
    )
}

fn bool_clause(op: BoolOp, args: Vec<Clause<TestExpr>>) -> Clause<TestExpr> {
    let separator = format!(" {} ", op.as_ref().to_uppercase());
    let text = args
        .iter()
        .map(|arg| arg.expr().text.clone())
        .collect::<Vec<_>>()
        .join(separator.as_str());
    let refs = args.iter().collect::<Vec<_>>();
    let expr = composite(format!("({})", text), &refs);
    Clause::new(expr, ClauseKind::Bool { op, args })
}

pub fn and(args: Vec<Clause<TestExpr>>) -> Clause<TestExpr> {
    bool_clause(BoolOp::And, args)
}

pub fn or(args: Vec<Clause<TestExpr>>) -> Clause<TestExpr> {
    bool_clause(BoolOp::Or, args)
}

pub fn not(arg: Clause<TestExpr>) -> Clause<TestExpr> {
    let expr = composite(format!("NOT {}", arg.expr().text), &[&arg]);
    Clause::new(
        expr,
        ClauseKind::Bool {
            op: BoolOp::Not,
            args: vec![arg],
        },
    )
}

pub fn is_null(arg: Clause<TestExpr>) -> Clause<TestExpr> {
    let expr = composite(format!("{} IS NULL", arg.expr().text), &[&arg]);
    Clause::new(expr, ClauseKind::NullTest { arg: Box::new(arg) })
}

pub fn restrict(clause: Clause<TestExpr>, rel_index: RelIndex) -> FilterClause<TestExpr> {
    FilterClause::Restrict(RestrictInfo::new(clause, rel_index))
}

/// Planner context over a fixed range table. Tables are readable unless revoked.
#[derive(Clone, Debug, Default)]
pub struct TestPlannerContext {
    range_table: HashMap<RelIndex, RangeTableEntry>,
    table_grants: HashSet<RelationId>,
    all_column_grants: HashSet<RelationId>,
    column_grants: HashSet<(RelationId, i16)>,
}

impl TestPlannerContext {
    pub fn with_table(mut self, rel_index: RelIndex, relation: RelationId) -> Self {
        self.range_table
            .insert(rel_index, RangeTableEntry::table(relation));
        self.table_grants.insert(relation);
        self
    }

    pub fn with_relation_kind(mut self, rel_index: RelIndex, kind: RelationKind) -> Self {
        if let Some(rte) = self.range_table.get_mut(&rel_index) {
            rte.kind = kind;
        }
        self
    }

    pub fn with_security_quals(mut self, rel_index: RelIndex) -> Self {
        if let Some(rte) = self.range_table.get_mut(&rel_index) {
            rte.has_security_quals = true;
        }
        self
    }

    pub fn revoke_table(mut self, relation: RelationId) -> Self {
        self.table_grants.remove(&relation);
        self
    }

    pub fn grant_column(mut self, relation: RelationId, attno: i16) -> Self {
        self.column_grants.insert((relation, attno));
        self
    }

    pub fn grant_all_columns(mut self, relation: RelationId) -> Self {
        self.all_column_grants.insert(relation);
        self
    }
}

impl PlannerContext<TestExpr> for TestPlannerContext {
    fn range_table_entry(&self, rel_index: RelIndex) -> Option<&RangeTableEntry> {
        self.range_table.get(&rel_index)
    }

    fn referenced_attributes(&self, expr: &TestExpr, rel_index: RelIndex) -> Vec<i16> {
        expr.references
            .iter()
            .filter(|(rel, _)| *rel == rel_index)
            .map(|(_, attno)| *attno)
            .collect()
    }

    fn has_table_privilege(&self, relation: RelationId) -> bool {
        self.table_grants.contains(&relation)
    }

    fn has_column_privilege(&self, relation: RelationId, attno: i16) -> bool {
        self.all_column_grants.contains(&relation)
            || self.column_grants.contains(&(relation, attno))
    }

    fn has_all_columns_privilege(&self, relation: RelationId) -> bool {
        self.all_column_grants.contains(&relation)
    }
}

/// Every call the in-memory catalog received, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum CatalogCall {
    Create(CatalogId),
    Drop(CatalogId),
    AlterKinds(CatalogId, StatKinds),
    MakeVisible,
}

/// Statistics catalog kept in memory.
///
/// Changes become visible to `list_definitions` only after `make_visible`, like catalog
/// changes inside one transaction.
#[derive(Debug)]
pub struct MemoryCatalog<E> {
    next_id: u32,
    visible: Vec<(RelationId, ExistingStatDefinition<E>)>,
    pending: Vec<(RelationId, ExistingStatDefinition<E>)>,
    created: Vec<NewStatDefinition<E>>,
    indexes: HashMap<RelationId, IndexDefinition<E>>,
    pub calls: Vec<CatalogCall>,
    pub fail_create: bool,
}

impl<E> Default for MemoryCatalog<E> {
    fn default() -> Self {
        Self {
            next_id: 100,
            visible: vec![],
            pending: vec![],
            created: vec![],
            indexes: HashMap::new(),
            calls: vec![],
            fail_create: false,
        }
    }
}

impl<E: HostExpr> MemoryCatalog<E> {
    /// Adds an already committed definition.
    pub fn with_definition(
        mut self,
        relation: RelationId,
        columns: &[u16],
        expressions: Vec<E>,
        kinds: StatKinds,
    ) -> Self {
        let catalog_id = CatalogId::from(self.next_id);
        self.next_id += 1;
        self.visible.push((
            relation,
            ExistingStatDefinition {
                catalog_id,
                name: format!("stat_{}", catalog_id),
                columns: columns.iter().copied().collect(),
                expressions,
                enabled_kinds: kinds,
                stat_target: -1,
            },
        ));
        self
    }

    pub fn with_index(mut self, index: IndexDefinition<E>) -> Self {
        self.indexes.insert(index.index, index);
        self
    }

    pub fn definitions(&self, relation: RelationId) -> Vec<&ExistingStatDefinition<E>> {
        self.visible
            .iter()
            .filter(|(rel, _)| *rel == relation)
            .map(|(_, def)| def)
            .collect()
    }

    pub fn created(&self) -> &[NewStatDefinition<E>] {
        &self.created
    }
}

impl<E: HostExpr> StatisticsCatalog<E> for MemoryCatalog<E> {
    fn list_definitions(
        &self,
        relation: RelationId,
    ) -> ExtStatResult<Vec<ExistingStatDefinition<E>>> {
        Ok(self.definitions(relation).into_iter().cloned().collect())
    }

    fn create(&mut self, definition: NewStatDefinition<E>) -> ExtStatResult<CatalogId> {
        if self.fail_create {
            return Err(anyhow!(
                "statistics object on relation {} already exists",
                definition.relation
            )
            .into());
        }

        let catalog_id = CatalogId::from(self.next_id);
        self.next_id += 1;
        // A row statistic is a single expression, it never overlaps a multivariate one.
        if let DefinitionBody::Multivariate { .. } = &definition.body {
            let (columns, expressions) = definition.body.dimensions();
            self.pending.push((
                definition.relation,
                ExistingStatDefinition {
                    catalog_id,
                    name: format!("stat_{}", catalog_id),
                    columns,
                    expressions,
                    enabled_kinds: definition.kinds,
                    stat_target: -1,
                },
            ));
        }
        self.created.push(definition);
        self.calls.push(CatalogCall::Create(catalog_id));
        Ok(catalog_id)
    }

    fn drop_definition(&mut self, id: CatalogId) -> ExtStatResult<()> {
        let before = self.visible.len();
        self.visible.retain(|(_, def)| def.catalog_id != id);
        if before == self.visible.len() {
            return Err(anyhow!("statistics object {} does not exist", id).into());
        }
        self.calls.push(CatalogCall::Drop(id));
        Ok(())
    }

    fn alter_kinds(&mut self, id: CatalogId, kinds: StatKinds) -> ExtStatResult<()> {
        let def = self
            .visible
            .iter_mut()
            .map(|(_, def)| def)
            .find(|def| def.catalog_id == id)
            .ok_or_else(|| anyhow!("statistics object {} does not exist", id))?;
        def.enabled_kinds = kinds;
        self.calls.push(CatalogCall::AlterKinds(id, kinds));
        Ok(())
    }

    fn make_visible(&mut self) {
        self.visible.append(&mut self.pending);
        self.calls.push(CatalogCall::MakeVisible);
    }
}

impl<E: HostExpr> IndexProvider<E> for MemoryCatalog<E> {
    fn index_definition(&self, index: RelationId) -> ExtStatResult<Option<IndexDefinition<E>>> {
        Ok(self.indexes.get(&index).cloned())
    }
}

/// Shorthand for a column set literal.
pub fn column_set(attnums: &[u16]) -> ColumnSet {
    attnums.iter().copied().collect()
}
