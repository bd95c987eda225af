use std::fmt::{Display, Formatter};

use datafusion_expr::Expr;
use extstat::stat::HostExpr;

/// DataFusion expression handed to `extstat`.
///
/// Expressions are compared structurally and identified by their display form, which is
/// deterministic for a given tree.
#[derive(Clone, Debug, PartialEq)]
pub struct DfExpr(Expr);

impl DfExpr {
    pub fn new(expr: Expr) -> Self {
        Self(expr)
    }

    pub fn inner(&self) -> &Expr {
        &self.0
    }
}

impl From<Expr> for DfExpr {
    fn from(expr: Expr) -> Self {
        Self(expr)
    }
}

impl Display for DfExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl HostExpr for DfExpr {
    fn canonical_string(&self) -> String {
        self.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::DfExpr;
    use datafusion_expr::{col, lit};
    use extstat::stat::HostExpr;

    #[test]
    fn test_canonical_string() {
        let left = DfExpr::new(col("a") + col("b"));
        let right = DfExpr::new(col("a") + col("b"));

        assert_eq!(left, right);
        assert_eq!(left.canonical_string(), right.canonical_string());
        assert_ne!(
            left.canonical_string(),
            DfExpr::new(col("a") + lit(1i32)).canonical_string()
        );
    }
}
