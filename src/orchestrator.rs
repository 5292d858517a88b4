//! Kubernetes API access
//!
//! The batch and core sub-clients sit behind traits so operations can be
//! exercised without a cluster. [`KubeClientFactory`] builds the real ones
//! from a cluster endpoint and bearer token; no kubeconfig is read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eksops_auth::{BearerToken, ClusterEndpoint};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::{ClientConfigError, OrchestratorError};

/// Job calls against the `batch/v1` API group
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchApi: Send + Sync {
    /// Create a job in `namespace`
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, OrchestratorError>;

    /// Read a job; the returned object includes its status
    async fn read_job(&self, namespace: &str, name: &str) -> Result<Job, OrchestratorError>;

    /// Delete a job and, in the foreground, the pods it owns
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError>;
}

/// Namespace calls against the core API group
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoreApi: Send + Sync {
    /// Read a namespace
    async fn read_namespace(&self, name: &str) -> Result<Namespace, OrchestratorError>;

    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace)
        -> Result<Namespace, OrchestratorError>;

    /// Delete a namespace and everything in it
    async fn delete_namespace(&self, name: &str) -> Result<(), OrchestratorError>;
}

/// The sub-clients of one authenticated connection
#[derive(Clone)]
pub struct ResourceClients {
    /// Job API
    pub batch: Arc<dyn BatchApi>,
    /// Namespace API
    pub core: Arc<dyn CoreApi>,
}

/// Builds sub-clients from a cluster endpoint and bearer token
#[cfg_attr(test, automock)]
pub trait ClientFactory: Send + Sync {
    /// Connect to `endpoint` authenticating with `token`
    fn connect(
        &self,
        endpoint: &ClusterEndpoint,
        token: &BearerToken,
    ) -> Result<ResourceClients, ClientConfigError>;
}

/// Build a kube client configuration for an EKS endpoint
///
/// The cluster CA is the only trust anchor and the bearer token is the only
/// credential.
pub fn client_config(
    endpoint: &ClusterEndpoint,
    token: &BearerToken,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<kube::Config, ClientConfigError> {
    let cluster_url: http::Uri = endpoint
        .url
        .parse()
        .map_err(|source| ClientConfigError::InvalidEndpoint {
            url: endpoint.url.clone(),
            source,
        })?;

    let mut config = kube::Config::new(cluster_url);
    config.root_cert = Some(endpoint.trust_anchor_der()?);
    config.auth_info.token = Some(token.as_str().to_string().into());
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Ok(config)
}

/// Factory for clients backed by kube-rs
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl KubeClientFactory {
    /// Create a factory with the given timeouts
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

impl ClientFactory for KubeClientFactory {
    fn connect(
        &self,
        endpoint: &ClusterEndpoint,
        token: &BearerToken,
    ) -> Result<ResourceClients, ClientConfigError> {
        let config = client_config(endpoint, token, self.connect_timeout, self.read_timeout)?;
        let client = Client::try_from(config).map_err(ClientConfigError::Client)?;
        debug!(endpoint = %endpoint.url, "Kubernetes client configured");

        Ok(ResourceClients {
            batch: Arc::new(KubeBatchApi::new(client.clone())),
            core: Arc::new(KubeCoreApi::new(client)),
        })
    }
}

/// Job API over a kube client
#[derive(Clone)]
pub struct KubeBatchApi {
    client: Client,
}

impl KubeBatchApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl BatchApi for KubeBatchApi {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, OrchestratorError> {
        Ok(self.jobs(namespace).create(&PostParams::default(), job).await?)
    }

    async fn read_job(&self, namespace: &str, name: &str) -> Result<Job, OrchestratorError> {
        Ok(self.jobs(namespace).get(name).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::foreground())
            .await?;
        Ok(())
    }
}

/// Namespace API over a kube client
#[derive(Clone)]
pub struct KubeCoreApi {
    client: Client,
}

impl KubeCoreApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl CoreApi for KubeCoreApi {
    async fn read_namespace(&self, name: &str) -> Result<Namespace, OrchestratorError> {
        Ok(self.namespaces().get(name).await?)
    }

    async fn create_namespace(
        &self,
        namespace: &Namespace,
    ) -> Result<Namespace, OrchestratorError> {
        Ok(self
            .namespaces()
            .create(&PostParams::default(), namespace)
            .await?)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), OrchestratorError> {
        self.namespaces()
            .delete(name, &DeleteParams::foreground())
            .await?;
        Ok(())
    }
}
