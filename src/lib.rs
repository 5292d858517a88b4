//! eksops - job and namespace operations on an EKS cluster
//!
//! The service holds no kubeconfig. On first use it resolves the ambient AWS
//! identity, describes the configured cluster, mints an IAM bearer token and
//! builds a Kubernetes client from those; every operation reuses that one
//! client.
//!
//! - [`bootstrap`] - the ordered bootstrap and the process-wide lazy client
//! - [`operations`] - create/delete/status for jobs, create/delete for namespaces
//! - [`reconciler`] - reduce a job's raw status to a coarse state
//! - [`api`] - the HTTP surface

#![deny(missing_docs)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod manifest;
pub mod operations;
pub mod orchestrator;
pub mod reconciler;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use bootstrap::{AuthenticatedClient, BootstrapState, ClientBootstrapper, LazyClient};
pub use config::{ClusterSettings, ClusterTarget, Settings};
pub use error::{ApiErrorKind, BootstrapStep, ClientConfigError, Error, OrchestratorError};
pub use operations::{NamespacePolicy, Operations};
pub use reconciler::{classify, JobState, JobStatusSnapshot};

/// Result type using eksops's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
