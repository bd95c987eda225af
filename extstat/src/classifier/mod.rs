//! Extraction of columns and expressions usable by multivariate statistics from filter clauses.
//!
//! A clause is either compatible as a whole, contributing all of its columns and
//! sub-expressions, or rejected as a whole. Compound clauses (AND/OR/NOT) are compatible only
//! when every argument is; a partially compatible compound contributes nothing.
//!
//! Two checks follow shape analysis:
//!
//! 1. On relations with security quals only leakproof operators are accepted, otherwise the
//! statistics could reveal values hidden from the user.
//! 2. The principal must be able to read every column the clause touches, including columns
//! nested inside contributed expressions.

mod clause;
pub use clause::*;

use std::collections::BTreeSet;

use log::trace;
use thiserror::Error;

use crate::stat::{union_expressions, ColumnSet, HostExpr, RelIndex, RelationId};

/// Columns and expressions a compatible clause contributes. The two never overlap: a bare
/// column lands in `columns`, everything else in `expressions`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClauseContribution<E> {
    pub columns: ColumnSet,
    pub expressions: Vec<E>,
}

impl<E> Default for ClauseContribution<E> {
    fn default() -> Self {
        Self {
            columns: ColumnSet::new(),
            expressions: vec![],
        }
    }
}

impl<E: HostExpr> ClauseContribution<E> {
    pub fn merge(&mut self, other: ClauseContribution<E>) {
        self.columns.union_with(&other.columns);
        union_expressions(&mut self.expressions, other.expressions);
    }

    pub fn dimensions(&self) -> usize {
        self.columns.len() + self.expressions.len()
    }
}

/// Reason a clause can't be used for multivariate statistics.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IncompatibleClause {
    #[error("range table entry {0} is unknown")]
    UnknownRelation(RelIndex),
    #[error("column belongs to range table entry {found}, expected {expected}")]
    ForeignRelation { expected: RelIndex, found: RelIndex },
    #[error("column references an outer query level")]
    OuterReference,
    #[error("attribute {0} is not a user column")]
    NonUserAttribute(i16),
    #[error("operator {0} takes {1} arguments, expected 2")]
    ArgumentCount(String, usize),
    #[error("operator {0} has no constant operand")]
    NoConstantOperand(String),
    #[error("array operator {0} needs the expression on its left side")]
    ExpressionOnRight(String),
    #[error("operator {0} is not estimated by an equality or ordering estimator")]
    UnsupportedOperator(String),
    #[error("operator {0} is not leakproof and the relation has security quals")]
    LeakyOperator(String),
    #[error("clause is pseudoconstant")]
    Pseudoconstant,
    #[error("clause references relations {0:?}")]
    MultipleRelations(BTreeSet<RelIndex>),
    #[error("no read privilege on attribute {attno} of relation {relation}")]
    PermissionDenied { relation: RelationId, attno: i16 },
}

type ClassifyResult<T> = Result<T, IncompatibleClause>;

/// Classifies one planner filter clause of the relation `rel_index`.
///
/// Pure function of its inputs; a rejected clause leaves no trace.
pub fn classify<E, C>(
    clause: &FilterClause<E>,
    rel_index: RelIndex,
    ctx: &C,
) -> ClassifyResult<ClauseContribution<E>>
where
    E: HostExpr,
    C: PlannerContext<E> + ?Sized,
{
    let mut contribution = ClauseContribution::default();
    classify_filter(clause, rel_index, ctx, &mut contribution)?;
    Ok(contribution)
}

/// Classifies all clauses, merging contributions of the compatible ones.
pub fn classify_all<'a, E, C, I>(clauses: I, rel_index: RelIndex, ctx: &C) -> ClauseContribution<E>
where
    E: HostExpr + 'a,
    C: PlannerContext<E> + ?Sized,
    I: IntoIterator<Item = &'a FilterClause<E>>,
{
    let mut gathered = ClauseContribution::default();
    for clause in clauses {
        match classify(clause, rel_index, ctx) {
            Ok(contribution) => gathered.merge(contribution),
            Err(reason) => trace!("Skipped clause of relation {}: {}", rel_index, reason),
        }
    }
    gathered
}

fn classify_filter<E, C>(
    clause: &FilterClause<E>,
    rel_index: RelIndex,
    ctx: &C,
    acc: &mut ClauseContribution<E>,
) -> ClassifyResult<()>
where
    E: HostExpr,
    C: PlannerContext<E> + ?Sized,
{
    match clause {
        // The planner doesn't wrap bare AND clauses into restrictions.
        FilterClause::And(args) => {
            for arg in args {
                classify_filter(arg, rel_index, ctx, acc)?;
            }
            Ok(())
        }
        FilterClause::Restrict(rinfo) => {
            if rinfo.pseudoconstant {
                return Err(IncompatibleClause::Pseudoconstant);
            }
            if rinfo.clause_relids.len() != 1 || !rinfo.clause_relids.contains(&rel_index) {
                return Err(IncompatibleClause::MultipleRelations(rinfo.clause_relids.clone()));
            }

            classify_clause(&rinfo.clause, rel_index, ctx, acc)?;
            check_privileges(rel_index, ctx, acc)
        }
    }
}

fn classify_clause<E, C>(
    clause: &Clause<E>,
    rel_index: RelIndex,
    ctx: &C,
    acc: &mut ClauseContribution<E>,
) -> ClassifyResult<()>
where
    E: HostExpr,
    C: PlannerContext<E> + ?Sized,
{
    let clause = clause.strip_relabel();

    match clause.kind() {
        ClauseKind::Column(column) => add_column(column, rel_index, acc),
        ClauseKind::Comparison { op, args } => {
            let (operand, _) = examine_operator_args(op, args)?;
            check_operator::<E, C>(op, rel_index, ctx)?;
            add_operand(operand, rel_index, ctx, acc)
        }
        ClauseKind::SetMembership { op, args } => {
            let (operand, operand_on_left) = examine_operator_args(op, args)?;
            if !operand_on_left {
                return Err(IncompatibleClause::ExpressionOnRight(op.name.clone()));
            }
            check_operator::<E, C>(op, rel_index, ctx)?;
            add_operand(operand, rel_index, ctx, acc)
        }
        ClauseKind::Bool { args, .. } => {
            for arg in args {
                classify_clause(arg, rel_index, ctx, acc)?;
            }
            Ok(())
        }
        ClauseKind::NullTest { arg } => match arg.kind() {
            ClauseKind::Column(_) => classify_clause(arg, rel_index, ctx, acc),
            _ => {
                union_expressions(&mut acc.expressions, [arg.expr().clone()]);
                Ok(())
            }
        },
        ClauseKind::Const | ClauseKind::Opaque | ClauseKind::Relabel(_) => {
            union_expressions(&mut acc.expressions, [clause.expr().clone()]);
            Ok(())
        }
    }
}

fn add_column<E>(
    column: &ColumnRef,
    rel_index: RelIndex,
    acc: &mut ClauseContribution<E>,
) -> ClassifyResult<()> {
    if column.rel_index != rel_index {
        return Err(IncompatibleClause::ForeignRelation {
            expected: rel_index,
            found: column.rel_index,
        });
    }
    if column.levels_up > 0 {
        return Err(IncompatibleClause::OuterReference);
    }
    if column.attno <= 0 {
        return Err(IncompatibleClause::NonUserAttribute(column.attno));
    }

    acc.columns.insert(column.attno as u16);
    Ok(())
}

/// Finds the non-constant operand of a two-argument operator. Returns it with a flag telling
/// whether it is the left one.
fn examine_operator_args<'a, E>(
    op: &OperatorInfo,
    args: &'a [Clause<E>],
) -> ClassifyResult<(&'a Clause<E>, bool)> {
    if args.len() != 2 {
        return Err(IncompatibleClause::ArgumentCount(op.name.clone(), args.len()));
    }

    let left = args[0].strip_relabel();
    let right = args[1].strip_relabel();

    if right.is_pseudo_constant() {
        Ok((left, true))
    } else if left.is_pseudo_constant() {
        Ok((right, false))
    } else {
        Err(IncompatibleClause::NoConstantOperand(op.name.clone()))
    }
}

fn check_operator<E, C>(op: &OperatorInfo, rel_index: RelIndex, ctx: &C) -> ClassifyResult<()>
where
    C: PlannerContext<E> + ?Sized,
{
    if !op.estimator.is_supported() {
        return Err(IncompatibleClause::UnsupportedOperator(op.name.clone()));
    }

    let rte = ctx
        .range_table_entry(rel_index)
        .ok_or(IncompatibleClause::UnknownRelation(rel_index))?;
    if rte.has_security_quals && !op.leakproof {
        return Err(IncompatibleClause::LeakyOperator(op.name.clone()));
    }

    Ok(())
}

fn add_operand<E, C>(
    operand: &Clause<E>,
    rel_index: RelIndex,
    ctx: &C,
    acc: &mut ClauseContribution<E>,
) -> ClassifyResult<()>
where
    E: HostExpr,
    C: PlannerContext<E> + ?Sized,
{
    match operand.kind() {
        ClauseKind::Column(_) => classify_clause(operand, rel_index, ctx, acc),
        _ => {
            union_expressions(&mut acc.expressions, [operand.expr().clone()]);
            Ok(())
        }
    }
}

fn check_privileges<E, C>(
    rel_index: RelIndex,
    ctx: &C,
    acc: &ClauseContribution<E>,
) -> ClassifyResult<()>
where
    C: PlannerContext<E> + ?Sized,
{
    let rte = ctx
        .range_table_entry(rel_index)
        .ok_or(IncompatibleClause::UnknownRelation(rel_index))?;

    // Table-level read privilege covers every column.
    if ctx.has_table_privilege(rte.relation) {
        return Ok(());
    }

    let attnos: BTreeSet<i16> = acc
        .columns
        .iter()
        .map(|attnum| attnum as i16)
        .chain(
            acc.expressions
                .iter()
                .flat_map(|expr| ctx.referenced_attributes(expr, rel_index)),
        )
        .collect();

    for attno in attnos {
        let permitted = if attno == 0 {
            ctx.has_all_columns_privilege(rte.relation)
        } else {
            ctx.has_column_privilege(rte.relation, attno)
        };

        if !permitted {
            return Err(IncompatibleClause::PermissionDenied {
                relation: rte.relation,
                attno,
            });
        }
    }

    Ok(())
}
