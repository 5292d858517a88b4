//! Credential derivation for EKS clusters
//!
//! Turns ambient AWS credentials into what a Kubernetes client needs to talk
//! to an EKS API server, without a kubeconfig:
//!
//! - [`identity`] - resolve the ambient signing identity (instance role, env, profile)
//! - [`cluster`] - fetch the API server URL and CA bundle with `DescribeCluster`
//! - [`token`] - mint a cluster-scoped bearer token from a presigned STS request
//! - [`sigv4`] - the local SigV4 query presigning behind the token

#![deny(missing_docs)]

pub mod cluster;
pub mod error;
pub mod identity;
pub mod sigv4;
pub mod token;

pub use cluster::{ClusterDescriptor, ClusterEndpoint, EksClusterDescriptor};
pub use error::{AuthError, LookupFailure, TrustAnchorError};
pub use identity::{ChainIdentityResolver, CredentialSource, IdentityResolver, SigningIdentity};
pub use token::{BearerToken, StsTokenMinter, TokenMinter};
