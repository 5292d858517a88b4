//! EKS cluster discovery
//!
//! One `DescribeCluster` call yields the API server URL and the cluster CA
//! bundle. The CA arrives base64-encoded; it is decoded here and checked for
//! at least one PEM certificate so a bad bundle fails the lookup rather than
//! the first TLS handshake.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_eks::config::timeout::TimeoutConfig;
use aws_sdk_eks::config::{BehaviorVersion, Region};
use aws_sdk_eks::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};
use x509_parser::pem::Pem;

use crate::error::{AuthError, LookupFailure, TrustAnchorError};
use crate::identity::SigningIdentity;

/// Default timeout for the whole `DescribeCluster` operation
pub const DEFAULT_DESCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters for a cluster's API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    /// API server URL
    pub url: String,
    /// CA bundle in PEM form
    pub trust_anchor_pem: Vec<u8>,
}

impl ClusterEndpoint {
    /// Build an endpoint from the wire form returned by EKS
    ///
    /// `ca_data` is the base64-encoded PEM bundle.
    pub fn from_wire(url: impl Into<String>, ca_data: &str) -> Result<Self, TrustAnchorError> {
        let url = url.into();
        if url.is_empty() {
            return Err(TrustAnchorError::EmptyEndpoint);
        }
        let pem = STANDARD.decode(ca_data.trim())?;

        let endpoint = Self {
            url,
            trust_anchor_pem: pem,
        };
        endpoint.trust_anchor_der()?;
        Ok(endpoint)
    }

    /// DER-encoded certificates of the CA bundle
    pub fn trust_anchor_der(&self) -> Result<Vec<Vec<u8>>, TrustAnchorError> {
        let mut certs = Vec::new();
        for pem in Pem::iter_from_buffer(&self.trust_anchor_pem) {
            let pem = pem.map_err(|e| TrustAnchorError::Pem {
                message: e.to_string(),
            })?;
            if pem.label == "CERTIFICATE" {
                certs.push(pem.contents);
            }
        }
        if certs.is_empty() {
            return Err(TrustAnchorError::NoCertificates);
        }
        Ok(certs)
    }
}

/// Looks up a cluster's endpoint and trust anchor
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDescriptor: Send + Sync {
    /// Describe `cluster_name` in `region` using `identity`
    async fn describe(
        &self,
        cluster_name: &str,
        region: &str,
        identity: &SigningIdentity,
    ) -> Result<ClusterEndpoint, AuthError>;
}

/// Map an EKS error code to a lookup failure category
pub fn classify_error_code(code: Option<&str>) -> LookupFailure {
    match code {
        Some("ResourceNotFoundException") => LookupFailure::NotFound,
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "ExpiredTokenException"
            | "InvalidClientTokenId",
        ) => LookupFailure::Unauthorized,
        Some("ServiceUnavailableException") => LookupFailure::Unreachable,
        _ => LookupFailure::Other,
    }
}

/// Describes clusters through the EKS API
#[derive(Debug, Clone)]
pub struct EksClusterDescriptor {
    timeout: Duration,
}

impl Default for EksClusterDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIBE_TIMEOUT)
    }
}

impl EksClusterDescriptor {
    /// Create a descriptor with the given operation timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, region: &str, identity: &SigningIdentity) -> aws_sdk_eks::Client {
        let config = aws_sdk_eks::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(identity.to_credentials())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.timeout)
                    .build(),
            )
            .build();
        aws_sdk_eks::Client::from_conf(config)
    }
}

#[async_trait]
impl ClusterDescriptor for EksClusterDescriptor {
    async fn describe(
        &self,
        cluster_name: &str,
        region: &str,
        identity: &SigningIdentity,
    ) -> Result<ClusterEndpoint, AuthError> {
        info!(cluster = %cluster_name, region = %region, "describing EKS cluster");

        let lookup_err =
            |failure, msg: String| AuthError::cluster_lookup(cluster_name, region, failure, msg);

        let output = self
            .client(region, identity)
            .describe_cluster()
            .name(cluster_name)
            .send()
            .await
            .map_err(|err| {
                let failure = match &err {
                    SdkError::ServiceError(ctx) => classify_error_code(ctx.err().code()),
                    SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                        LookupFailure::Unreachable
                    }
                    _ => LookupFailure::Other,
                };
                lookup_err(failure, DisplayErrorContext(&err).to_string())
            })?;

        let cluster = output.cluster().ok_or_else(|| {
            lookup_err(
                LookupFailure::Malformed,
                "response has no cluster".to_string(),
            )
        })?;
        let url = cluster.endpoint().ok_or_else(|| {
            lookup_err(
                LookupFailure::Malformed,
                "cluster has no endpoint (still creating?)".to_string(),
            )
        })?;
        let ca_data = cluster
            .certificate_authority()
            .and_then(|ca| ca.data())
            .ok_or_else(|| {
                lookup_err(
                    LookupFailure::Malformed,
                    "cluster has no certificate authority data".to_string(),
                )
            })?;

        let endpoint = ClusterEndpoint::from_wire(url, ca_data)
            .map_err(|e| lookup_err(LookupFailure::Malformed, e.to_string()))?;

        debug!(
            cluster = %cluster_name,
            endpoint = %endpoint.url,
            ca_bytes = endpoint.trust_anchor_pem.len(),
            "fetched cluster endpoint"
        );
        Ok(endpoint)
    }
}
