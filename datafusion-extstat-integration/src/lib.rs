//! Contains code to integrate with datafusion.
//!
//! DataFusion filter expressions are converted into the clause trees `extstat` classifies, and
//! a [`QueryScope`] answers the planner questions the classifier asks.
mod conversion;
pub use conversion::*;
mod expr;
pub use expr::*;
mod scope;
pub use scope::*;

pub type DFResult<T> = datafusion_common::Result<T>;
