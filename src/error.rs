//! Error types for eksops operations
//!
//! Errors carry enough context to be logged once at the edge: the bootstrap
//! step that failed, or the operation and target of a failed API call. The
//! original Kubernetes status code and reason are kept so the HTTP layer can
//! map them.

use std::fmt;

use eksops_auth::{AuthError, TrustAnchorError};
use thiserror::Error;

/// Category of a Kubernetes API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The resource does not exist (404)
    NotFound,
    /// The resource already exists or was modified concurrently (409)
    Conflict,
    /// The bearer identity may not perform the call (403)
    Forbidden,
    /// The bearer token was rejected, e.g. after it expired (401)
    Unauthorized,
    /// The submitted object is malformed (400/422)
    Invalid,
    /// The API server could not be reached or returned garbage
    Transport,
    /// Any other API status
    Other,
}

/// A failed call against the Kubernetes API
#[derive(Debug, Error)]
pub struct OrchestratorError {
    /// Failure category
    pub kind: ApiErrorKind,
    /// HTTP status from the API server, if one was received
    pub code: Option<u16>,
    /// Machine-readable reason (e.g. `NotFound`, `AlreadyExists`)
    pub reason: String,
    /// Human-readable message from the API server
    pub message: String,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({}): {}", self.reason, code, self.message),
            None => write!(f, "{}: {}", self.reason, self.message),
        }
    }
}

impl OrchestratorError {
    /// Build an error from an API status response
    pub fn from_status(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = match code {
            404 => ApiErrorKind::NotFound,
            409 => ApiErrorKind::Conflict,
            403 => ApiErrorKind::Forbidden,
            401 => ApiErrorKind::Unauthorized,
            400 | 422 => ApiErrorKind::Invalid,
            _ => ApiErrorKind::Other,
        };
        Self {
            kind,
            code: Some(code),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// A manifest rejected before it reached the API server
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Invalid,
            code: None,
            reason: "Invalid".to_string(),
            message: message.into(),
        }
    }

    /// Whether the target resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }
}

impl From<kube::Error> for OrchestratorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => Self::from_status(ae.code, ae.reason, ae.message),
            other => Self {
                kind: ApiErrorKind::Transport,
                code: None,
                reason: "Transport".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Bootstrap stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    /// Resolving the ambient AWS identity
    ResolveIdentity,
    /// Fetching the cluster endpoint and CA
    DescribeCluster,
    /// Minting the bearer token
    MintToken,
    /// Building the Kubernetes client and sub-clients
    ConfigureClient,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootstrapStep::ResolveIdentity => "resolve-identity",
            BootstrapStep::DescribeCluster => "describe-cluster",
            BootstrapStep::MintToken => "mint-token",
            BootstrapStep::ConfigureClient => "configure-client",
        };
        f.write_str(s)
    }
}

/// Why a Kubernetes client could not be built for a cluster
#[derive(Debug, Error)]
pub enum ClientConfigError {
    /// The API server URL does not parse as a URI
    #[error("invalid cluster endpoint '{url}': {source}")]
    InvalidEndpoint {
        /// URL as returned by the cluster lookup
        url: String,
        /// Parse failure
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The CA bundle is unusable
    #[error(transparent)]
    TrustAnchor(#[from] TrustAnchorError),

    /// kube rejected the assembled configuration
    #[error("failed to build Kubernetes client: {0}")]
    Client(#[source] kube::Error),
}

/// What went wrong inside a bootstrap step
#[derive(Debug, Error)]
pub enum BootstrapCause {
    /// Identity, lookup or token failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The client configuration could not be built from the fetched pieces
    #[error("client configuration failed: {0}")]
    ClientConfig(#[from] ClientConfigError),
}

/// Main error type for eksops
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Required settings are missing or invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// What is missing
        message: String,
    },

    /// Building the authenticated client failed
    #[error("bootstrap failed at {step}: {source}")]
    Bootstrap {
        /// Step that failed
        step: BootstrapStep,
        /// Originating error
        #[source]
        source: BootstrapCause,
    },

    /// A Kubernetes API call failed
    #[error("{operation} failed for {target} after {elapsed_ms}ms: {source}")]
    Orchestrator {
        /// Operation being performed (e.g. `delete_job`)
        operation: &'static str,
        /// Resource the call targeted (`namespace/name` or `name`)
        target: String,
        /// Time spent in the operation before it failed
        elapsed_ms: u64,
        /// API error
        #[source]
        source: OrchestratorError,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a bootstrap error for a step
    pub fn bootstrap(step: BootstrapStep, cause: impl Into<BootstrapCause>) -> Self {
        Self::Bootstrap {
            step,
            source: cause.into(),
        }
    }

    /// Wrap an API error with operation context
    pub fn orchestrator(
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<OrchestratorError>,
    ) -> Self {
        Self::Orchestrator {
            operation,
            target: target.into(),
            elapsed_ms: 0,
            source: source.into(),
        }
    }

    /// Record how long the failing operation ran
    ///
    /// Only API failures carry a duration; other errors pass through.
    pub fn with_elapsed(mut self, ms: u64) -> Self {
        if let Error::Orchestrator { elapsed_ms, .. } = &mut self {
            *elapsed_ms = ms;
        }
        self
    }

    /// API error category, if this is an API failure
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Error::Orchestrator { source, .. } => Some(source.kind),
            _ => None,
        }
    }

    /// Whether the target resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::NotFound)
    }

    /// The credential-derivation error behind a bootstrap failure
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            Error::Bootstrap {
                source: BootstrapCause::Auth(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}
