use thiserror::Error;

use crate::engine::EngineError;
use crate::parse::ParseError;
use crate::types::{BuildError, ErrorKind, NotFoundError};

/// Unified error type for the convenience entry points.
///
/// Returned by convenience methods like
/// [`KnowledgeBase::from_grl()`](crate::KnowledgeBase::from_grl) and
/// [`KnowledgeLibrary::load_grl()`](crate::KnowledgeLibrary::load_grl).
#[derive(Debug, Error)]
pub enum RulekeeperError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[cfg(feature = "catalog")]
    #[error(transparent)]
    Export(#[from] crate::catalog::ExportError),

    #[cfg(feature = "catalog")]
    #[error(transparent)]
    Decode(#[from] crate::catalog::DecodeError),
}

impl RulekeeperError {
    /// Engine classification of the failure. `None` for export failures,
    /// which happen outside the engine.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RulekeeperError::Parse(_) => Some(ErrorKind::ParseDependency),
            RulekeeperError::Build(e) => Some(e.kind()),
            RulekeeperError::NotFound(e) => Some(e.kind()),
            RulekeeperError::Engine(e) => Some(e.kind()),
            #[cfg(feature = "catalog")]
            RulekeeperError::Export(_) => None,
            #[cfg(feature = "catalog")]
            RulekeeperError::Decode(e) => Some(e.kind()),
        }
    }
}
