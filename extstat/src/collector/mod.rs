//! Query driven discovery of extended statistics candidates.
//!
//! While a query is planned, the filters of every base relation are classified and the
//! compatible columns and expressions are remembered per relation. When the query has run,
//! the scans of these relations are checked for badly estimated row counts. A relation with a
//! candidate and a bad estimate is reported as a [`Recommendation`]. Nothing is created here;
//! acting on recommendations is left to the operator.

mod instrument;
pub use instrument::*;
mod report;
pub use report::*;
mod session;
pub use session::*;
