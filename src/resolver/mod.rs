//! Memoized lookups of cluster facts
//!
//! A resolver caches the first outcome, success or failure, for its whole
//! lifetime. Each reconcile pass builds fresh resolvers, so a pass sees a
//! consistent answer and the next pass always asks the cluster again.

mod external_access;
mod node_port;

pub use external_access::{ExternalAccessResolver, ResolvedAccess, parse_gateway};
pub use node_port::{
    DEFAULT_NODE_PORT, MAX_NODE_PORT, MIN_NODE_PORT, NodePortResolver, PortSource,
    RandomPortSource,
};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Input can never resolve without a spec change
    #[error("{0}")]
    Invalid(String),

    /// The referenced object does not exist (yet)
    #[error("{0}")]
    Unavailable(String),

    /// API server call failed
    #[error("{0}")]
    Cluster(String),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResolveError::Invalid(_))
    }
}

/// First outcome of a lookup
#[derive(Clone, Debug)]
pub(crate) struct Memo<T: Clone> {
    outcome: Option<Result<T, ResolveError>>,
}

impl<T: Clone> Default for Memo<T> {
    fn default() -> Self {
        Self { outcome: None }
    }
}

impl<T: Clone> Memo<T> {
    pub(crate) fn cached(&self) -> Option<Result<T, ResolveError>> {
        self.outcome.clone()
    }

    pub(crate) fn store(&mut self, outcome: Result<T, ResolveError>) -> Result<T, ResolveError> {
        self.outcome = Some(outcome.clone());
        outcome
    }
}
