//! Error types for credential derivation
//!
//! Each variant corresponds to one stage of the pipeline: resolving an ambient
//! identity, looking up the cluster, and minting the bearer token. Causes are
//! kept as rendered text so the full chain survives being logged or returned.

use std::fmt;

use thiserror::Error;

/// Why a cluster lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    /// The cluster does not exist in the requested region
    NotFound,
    /// The identity is not allowed to describe the cluster
    Unauthorized,
    /// The control plane could not be reached (network, timeout)
    Unreachable,
    /// The response was missing the endpoint or carried an unusable CA bundle
    Malformed,
    /// Any other service-side failure
    Other,
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LookupFailure::NotFound => "not found",
            LookupFailure::Unauthorized => "unauthorized",
            LookupFailure::Unreachable => "unreachable",
            LookupFailure::Malformed => "malformed response",
            LookupFailure::Other => "service error",
        };
        f.write_str(s)
    }
}

/// Why a cluster endpoint or its CA bundle is unusable
#[derive(Debug, Error)]
pub enum TrustAnchorError {
    /// The API server URL is empty
    #[error("cluster endpoint is empty")]
    EmptyEndpoint,

    /// The CA data is not valid base64
    #[error("invalid base64 CA certificate: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A PEM block in the bundle could not be parsed
    #[error("invalid PEM in CA bundle: {message}")]
    Pem {
        /// Parser message
        message: String,
    },

    /// The bundle holds no `CERTIFICATE` blocks
    #[error("CA bundle contains no certificates")]
    NoCertificates,
}

/// Errors raised while deriving cluster credentials
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential source produced a usable identity
    #[error("no AWS credentials could be resolved: {message}")]
    NoCredentials {
        /// Per-source reasons, in precedence order
        message: String,
    },

    /// The cluster endpoint and CA could not be fetched
    #[error("cluster lookup failed for {cluster} in {region} ({failure}): {message}")]
    ClusterLookup {
        /// Cluster that was described
        cluster: String,
        /// Region the lookup targeted
        region: String,
        /// Failure category
        failure: LookupFailure,
        /// Underlying cause
        message: String,
    },

    /// The bearer token could not be constructed
    #[error("token mint failed for {cluster}: {message}")]
    TokenMint {
        /// Cluster the token was being bound to
        cluster: String,
        /// Underlying cause
        message: String,
    },
}

impl AuthError {
    /// Create a no-credentials error
    pub fn no_credentials(msg: impl Into<String>) -> Self {
        Self::NoCredentials {
            message: msg.into(),
        }
    }

    /// Create a cluster lookup error
    pub fn cluster_lookup(
        cluster: impl Into<String>,
        region: impl Into<String>,
        failure: LookupFailure,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterLookup {
            cluster: cluster.into(),
            region: region.into(),
            failure,
            message: msg.into(),
        }
    }

    /// Create a token mint error
    pub fn token_mint(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TokenMint {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// The lookup failure category, if this is a cluster lookup error
    pub fn lookup_failure(&self) -> Option<LookupFailure> {
        match self {
            AuthError::ClusterLookup { failure, .. } => Some(*failure),
            _ => None,
        }
    }
}
