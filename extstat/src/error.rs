use thiserror::Error;

/// Errors surfaced to the caller of this crate.
///
/// Clause classification failures are not part of this type, see
/// [`crate::classifier::IncompatibleClause`]. They never leave the planner.
#[derive(Debug, Error)]
pub enum ExtStatError {
    /// The statistics catalog refused a create, alter or drop request.
    #[error("catalog operation failed: {0:#}")]
    Catalog(#[from] anyhow::Error),
    #[error("invalid value for option \"{option}\": {message}")]
    Configuration { option: String, message: String },
    #[error("instrumentation is needed to analyze plan node {node}")]
    InstrumentationMissing { node: String },
    #[error("invalid statistics definition: {0}")]
    InvalidDefinition(String),
}

impl ExtStatError {
    pub fn configuration<O: Into<String>, M: Into<String>>(option: O, message: M) -> Self {
        Self::Configuration {
            option: option.into(),
            message: message.into(),
        }
    }
}

pub type ExtStatResult<T> = Result<T, ExtStatError>;
