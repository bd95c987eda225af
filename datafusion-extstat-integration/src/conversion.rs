//! Conversion from datafusion filter expressions to extstat clauses.
use std::collections::{BTreeSet, HashSet};

use datafusion_common::tree_node::{TreeNode, VisitRecursion};
use datafusion_common::Column;
use datafusion_expr::expr::{Between, InList};
use datafusion_expr::utils::expr_to_columns;
use datafusion_expr::{BinaryExpr, Expr, Operator, Volatility};
use extstat::classifier::{
    BoolOp, Clause, ClauseKind, OperatorInfo, RestrictInfo, RestrictionEstimator,
};
use extstat::stat::RelIndex;

use crate::{DFResult, DfExpr, QueryScope};

/// Converts datafusion expressions of one query, resolving columns against its scope.
pub struct ClauseConverter<'a> {
    scope: &'a QueryScope,
}

impl<'a> ClauseConverter<'a> {
    pub fn new(scope: &'a QueryScope) -> Self {
        Self { scope }
    }

    /// Wraps a conjunct of a filter into a restriction on the relations it references.
    pub fn restrict_info(&self, expr: &Expr) -> DFResult<RestrictInfo<DfExpr>> {
        let clause_relids = self.referenced_relations(expr)?;

        Ok(RestrictInfo {
            clause: self.convert(expr)?,
            pseudoconstant: clause_relids.is_empty(),
            clause_relids,
        })
    }

    pub fn convert(&self, expr: &Expr) -> DFResult<Clause<DfExpr>> {
        let kind = match expr {
            Expr::Column(column) => ClauseKind::Column(self.scope.resolve(column)?),
            _ if is_pseudo_constant(expr)? => ClauseKind::Const,
            Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
                let args = vec![self.convert(left)?, self.convert(right)?];
                match op {
                    Operator::And => ClauseKind::Bool {
                        op: BoolOp::And,
                        args,
                    },
                    Operator::Or => ClauseKind::Bool {
                        op: BoolOp::Or,
                        args,
                    },
                    op => ClauseKind::Comparison {
                        op: operator_info(*op),
                        args,
                    },
                }
            }
            Expr::Not(arg) => ClauseKind::Bool {
                op: BoolOp::Not,
                args: vec![self.convert(arg)?],
            },
            Expr::IsNull(arg) | Expr::IsNotNull(arg) => ClauseKind::NullTest {
                arg: Box::new(self.convert(arg)?),
            },
            Expr::InList(InList {
                expr: arg,
                list,
                negated,
            }) if all_pseudo_constant(list)? => {
                // `a IN (..)` is `a = ANY (array)`, `a NOT IN (..)` is `a <> ALL (array)`.
                let op = if *negated {
                    operator_info(Operator::NotEq)
                } else {
                    operator_info(Operator::Eq)
                };
                let array = Clause::new(DfExpr::new(expr.clone()), ClauseKind::Const);
                ClauseKind::SetMembership {
                    op,
                    args: vec![self.convert(arg)?, array],
                }
            }
            Expr::Between(between) => return self.convert_between(expr, between),
            _ => ClauseKind::Opaque,
        };

        Ok(Clause::new(DfExpr::new(expr.clone()), kind))
    }

    /// `a BETWEEN x AND y` is estimated as `a >= x AND a <= y`.
    fn convert_between(&self, expr: &Expr, between: &Between) -> DFResult<Clause<DfExpr>> {
        let arg = (*between.expr).clone();
        let low = (*between.low).clone();
        let high = (*between.high).clone();

        let (op, args) = if between.negated {
            (BoolOp::Or, vec![arg.clone().lt(low), arg.gt(high)])
        } else {
            (BoolOp::And, vec![arg.clone().gt_eq(low), arg.lt_eq(high)])
        };

        let args = args
            .iter()
            .map(|arg| self.convert(arg))
            .collect::<DFResult<Vec<_>>>()?;
        Ok(Clause::new(
            DfExpr::new(expr.clone()),
            ClauseKind::Bool { op, args },
        ))
    }

    fn referenced_relations(&self, expr: &Expr) -> DFResult<BTreeSet<RelIndex>> {
        let mut columns: HashSet<Column> = HashSet::new();
        expr_to_columns(expr, &mut columns)?;

        columns
            .iter()
            .map(|column| self.scope.resolve(column).map(|c| c.rel_index))
            .collect()
    }
}

/// Whether the value of `expr` is fixed for one execution: it reads no column of the query
/// and calls no volatile function. Parameters count as constants.
fn is_pseudo_constant(expr: &Expr) -> DFResult<bool> {
    let mut constant = true;
    expr.apply(&mut |e| {
        constant = match e {
            Expr::Column(_)
            | Expr::OuterReferenceColumn(..)
            | Expr::AggregateFunction(_)
            | Expr::AggregateUDF(_)
            | Expr::WindowFunction(_)
            | Expr::Exists(_)
            | Expr::InSubquery(_)
            | Expr::ScalarSubquery(_)
            | Expr::Wildcard
            | Expr::QualifiedWildcard { .. }
            | Expr::GroupingSet(_) => false,
            Expr::ScalarFunction(function) => function.fun.volatility() != Volatility::Volatile,
            Expr::ScalarUDF(udf) => udf.fun.signature.volatility != Volatility::Volatile,
            _ => true,
        };
        Ok(if constant {
            VisitRecursion::Continue
        } else {
            VisitRecursion::Stop
        })
    })?;

    Ok(constant)
}

fn all_pseudo_constant(list: &[Expr]) -> DFResult<bool> {
    for item in list {
        if !is_pseudo_constant(item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn operator_info(op: Operator) -> OperatorInfo {
    let estimator = match op {
        Operator::Eq => RestrictionEstimator::Eq,
        Operator::NotEq => RestrictionEstimator::Neq,
        Operator::Lt => RestrictionEstimator::ScalarLt,
        Operator::LtEq => RestrictionEstimator::ScalarLe,
        Operator::Gt => RestrictionEstimator::ScalarGt,
        Operator::GtEq => RestrictionEstimator::ScalarGe,
        _ => RestrictionEstimator::Other,
    };

    let info = OperatorInfo::new(op.to_string(), estimator);
    // Arithmetic may fail on overflow or division by zero, and the error shows the value.
    if estimator.is_supported() {
        info
    } else {
        info.leaky()
    }
}
