//! Job and namespace operations
//!
//! Each operation gets the process-wide client (bootstrapping it on first
//! use), makes its API calls, and logs a START and an END record with
//! the operation name, target, outcome and duration. Errors come back with
//! the operation, target and elapsed time attached.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bootstrap::{AuthenticatedClient, LazyClient};
use crate::error::{ApiErrorKind, Error};
use crate::manifest::{build_job, namespace_object, JobDescriptor};
use crate::reconciler::{JobState, JobStatusSnapshot};

/// What job submission does when the target namespace does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespacePolicy {
    /// Create the namespace, then the job
    #[default]
    AutoCreate,
    /// Fail with the not-found error
    Require,
}

/// Result of creating a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobCreated {
    /// Name the job was created under
    pub job_name: String,
    /// Namespace of the job
    pub namespace: String,
    /// Server-side creation time, RFC 3339
    pub creation_timestamp: Option<String>,
    /// Always `created`
    pub status: &'static str,
}

/// Reconciled status of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusReport {
    /// Job name
    pub job_name: String,
    /// Job namespace
    pub namespace: String,
    /// Coarse state
    pub state: JobState,
    /// Pods currently running
    pub active: u32,
    /// Pods that succeeded
    pub succeeded: u32,
    /// Pods that failed
    pub failed: u32,
    /// Start time, RFC 3339
    pub start_time: Option<String>,
    /// Completion time, RFC 3339
    pub completion_time: Option<String>,
}

impl From<JobStatusSnapshot> for JobStatusReport {
    fn from(snapshot: JobStatusSnapshot) -> Self {
        Self {
            state: snapshot.state(),
            job_name: snapshot.name,
            namespace: snapshot.namespace,
            active: snapshot.active,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            start_time: snapshot.start_time.map(|t| rfc3339(&t)),
            completion_time: snapshot.completion_time.map(|t| rfc3339(&t)),
        }
    }
}

/// Result of creating a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceCreated {
    /// Namespace name
    pub namespace_name: String,
    /// Server-side creation time, RFC 3339
    pub creation_timestamp: Option<String>,
    /// Always `created`
    pub status: &'static str,
}

/// Acknowledgement of a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deleted {
    /// What was deleted
    pub message: String,
    /// Always `success`
    pub status: &'static str,
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Log START/END around an operation
async fn observe<T, F>(operation: &'static str, target: &str, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    info!(operation, target, "START");
    let started = Instant::now();
    let result = fut.await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let result = result.map_err(|e| e.with_elapsed(duration_ms));

    match &result {
        Ok(_) => info!(operation, target, success = true, duration_ms, "END"),
        Err(e) if e.is_not_found() => {
            warn!(operation, target, success = false, duration_ms, error = %e, "END")
        }
        Err(e) => error!(operation, target, success = false, duration_ms, error = %e, "END"),
    }
    result
}

/// Facade over the cluster client
pub struct Operations {
    client: Arc<LazyClient>,
    namespace_policy: NamespacePolicy,
}

impl Operations {
    /// Create the facade
    pub fn new(client: Arc<LazyClient>, namespace_policy: NamespacePolicy) -> Self {
        Self {
            client,
            namespace_policy,
        }
    }

    /// The underlying lazily-built client
    pub fn client(&self) -> &Arc<LazyClient> {
        &self.client
    }

    /// Submit a job
    ///
    /// The manifest is validated before the cluster is contacted. A missing
    /// namespace is handled per the configured [`NamespacePolicy`].
    pub async fn create_job(&self, job: JobDescriptor) -> Result<JobCreated, Error> {
        const OP: &str = "create_job";
        let name = job.resolve_name(Utc::now());
        let target = format!("{}/{}", job.namespace, name);

        observe(OP, &target, async {
            let body = build_job(&name, &job.namespace, &job.manifest)
                .map_err(|e| Error::orchestrator(OP, target.as_str(), e))?;
            let client = self.client.get().await?;
            self.ensure_namespace(&client, &job.namespace).await?;

            let created = client
                .batch()
                .create_job(&job.namespace, &body)
                .await
                .map_err(|e| Error::orchestrator(OP, target.as_str(), e))?;

            Ok(JobCreated {
                job_name: created.metadata.name.unwrap_or_else(|| name.clone()),
                namespace: created
                    .metadata
                    .namespace
                    .unwrap_or_else(|| job.namespace.clone()),
                creation_timestamp: created.metadata.creation_timestamp.map(|t| rfc3339(&t.0)),
                status: "created",
            })
        })
        .await
    }

    async fn ensure_namespace(
        &self,
        client: &AuthenticatedClient,
        namespace: &str,
    ) -> Result<(), Error> {
        const OP: &str = "ensure_namespace";
        match client.core().read_namespace(namespace).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() && self.namespace_policy == NamespacePolicy::AutoCreate => {
                warn!(namespace, "namespace not found, creating it");
                match client.core().create_namespace(&namespace_object(namespace)).await {
                    Ok(_) => Ok(()),
                    // created by a concurrent submission
                    Err(e) if e.kind == ApiErrorKind::Conflict => Ok(()),
                    Err(e) => Err(Error::orchestrator(OP, namespace, e)),
                }
            }
            Err(e) => Err(Error::orchestrator(OP, namespace, e)),
        }
    }

    /// Delete a job and its pods
    pub async fn delete_job(&self, name: &str, namespace: &str) -> Result<Deleted, Error> {
        const OP: &str = "delete_job";
        let target = format!("{}/{}", namespace, name);

        observe(OP, &target, async {
            let client = self.client.get().await?;
            client
                .batch()
                .delete_job(namespace, name)
                .await
                .map_err(|e| Error::orchestrator(OP, target.as_str(), e))?;
            Ok(Deleted {
                message: format!("Job {} deleted successfully from namespace {}", name, namespace),
                status: "success",
            })
        })
        .await
    }

    /// Read and classify a job's status
    pub async fn get_job_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<JobStatusReport, Error> {
        const OP: &str = "get_job_status";
        let target = format!("{}/{}", namespace, name);

        observe(OP, &target, async {
            let client = self.client.get().await?;
            let job = client
                .batch()
                .read_job(namespace, name)
                .await
                .map_err(|e| Error::orchestrator(OP, target.as_str(), e))?;

            let mut snapshot = JobStatusSnapshot::from_job(&job);
            if snapshot.name.is_empty() {
                snapshot.name = name.to_string();
            }
            if snapshot.namespace.is_empty() {
                snapshot.namespace = namespace.to_string();
            }
            Ok(JobStatusReport::from(snapshot))
        })
        .await
    }

    /// Create a namespace
    pub async fn create_namespace(&self, name: &str) -> Result<NamespaceCreated, Error> {
        const OP: &str = "create_namespace";

        observe(OP, name, async {
            let client = self.client.get().await?;
            let created = client
                .core()
                .create_namespace(&namespace_object(name))
                .await
                .map_err(|e| Error::orchestrator(OP, name, e))?;
            Ok(NamespaceCreated {
                namespace_name: created.metadata.name.unwrap_or_else(|| name.to_string()),
                creation_timestamp: created.metadata.creation_timestamp.map(|t| rfc3339(&t.0)),
                status: "created",
            })
        })
        .await
    }

    /// Delete a namespace and everything in it
    pub async fn delete_namespace(&self, name: &str) -> Result<Deleted, Error> {
        const OP: &str = "delete_namespace";

        observe(OP, name, async {
            let client = self.client.get().await?;
            client
                .core()
                .delete_namespace(name)
                .await
                .map_err(|e| Error::orchestrator(OP, name, e))?;
            Ok(Deleted {
                message: format!("Namespace {} deleted successfully", name),
                status: "success",
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterSettings;
    use crate::error::OrchestratorError;
    use crate::manifest::{APP_LABEL, JOB_ID_LABEL};
    use crate::orchestrator::{MockBatchApi, MockCoreApi, ResourceClients};
    use crate::testing::{endpoint, token};
    use chrono::TimeZone;
    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use serde_json::json;

    fn ops(batch: MockBatchApi, core: MockCoreApi, policy: NamespacePolicy) -> Operations {
        let client = AuthenticatedClient::new(
            endpoint(),
            token(),
            ResourceClients {
                batch: Arc::new(batch),
                core: Arc::new(core),
            },
        );
        let settings = ClusterSettings::new(Some("prod"), Some("us-east-1"));
        Operations::new(Arc::new(LazyClient::ready(settings, client)), policy)
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn manifest() -> serde_json::Value {
        json!({
            "spec": {
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{"name": "main", "image": "busybox"}]
                    }
                }
            }
        })
    }

    fn not_found(what: &str) -> OrchestratorError {
        OrchestratorError::from_status(404, "NotFound", format!("{} not found", what))
    }

    fn echo_job(_: &str, job: &Job) -> Result<Job, OrchestratorError> {
        let mut job = job.clone();
        job.metadata.creation_timestamp = Some(Time(created_at()));
        Ok(job)
    }

    #[tokio::test]
    async fn job_lands_in_existing_namespace() {
        let mut batch = MockBatchApi::new();
        let mut core = MockCoreApi::new();
        core.expect_read_namespace()
            .returning(|name| Ok(namespace_object(name)));
        core.expect_create_namespace().never();
        batch
            .expect_create_job()
            .withf(|ns, job| {
                let labels = job.metadata.labels.clone().unwrap_or_default();
                ns == "batch"
                    && job.metadata.name.as_deref() == Some("nightly")
                    && labels.get(APP_LABEL).is_some()
                    && labels.get(JOB_ID_LABEL).map(String::as_str) == Some("nightly")
            })
            .times(1)
            .returning(echo_job);

        let result = ops(batch, core, NamespacePolicy::AutoCreate)
            .create_job(JobDescriptor::new("batch", manifest()).with_name("nightly"))
            .await
            .unwrap();

        assert_eq!(result.job_name, "nightly");
        assert_eq!(result.namespace, "batch");
        assert_eq!(result.status, "created");
        assert_eq!(
            result.creation_timestamp.as_deref(),
            Some("2026-03-02T08:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn missing_namespace_is_created_before_the_job() {
        let mut batch = MockBatchApi::new();
        let mut core = MockCoreApi::new();
        let mut seq = mockall::Sequence::new();
        core.expect_read_namespace()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Err(not_found(name)));
        core.expect_create_namespace()
            .withf(|ns: &Namespace| ns.metadata.name.as_deref() == Some("team-a"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns| Ok(ns.clone()));
        batch
            .expect_create_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(echo_job);

        let result = ops(batch, core, NamespacePolicy::AutoCreate)
            .create_job(JobDescriptor::new("team-a", manifest()))
            .await
            .unwrap();

        assert!(result.job_name.starts_with("job-"));
        assert_eq!(result.namespace, "team-a");
    }

    #[tokio::test]
    async fn namespace_created_concurrently_is_not_an_error() {
        let mut batch = MockBatchApi::new();
        let mut core = MockCoreApi::new();
        core.expect_read_namespace()
            .returning(|name| Err(not_found(name)));
        core.expect_create_namespace().returning(|_| {
            Err(OrchestratorError::from_status(409, "AlreadyExists", "already exists"))
        });
        batch.expect_create_job().times(1).returning(echo_job);

        let result = ops(batch, core, NamespacePolicy::AutoCreate)
            .create_job(JobDescriptor::new("team-a", manifest()).with_name("nightly"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn required_namespace_must_exist() {
        let mut batch = MockBatchApi::new();
        let mut core = MockCoreApi::new();
        core.expect_read_namespace()
            .returning(|name| Err(not_found(name)));
        core.expect_create_namespace().never();
        batch.expect_create_job().never();

        let err = ops(batch, core, NamespacePolicy::Require)
            .create_job(JobDescriptor::new("team-a", manifest()).with_name("nightly"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn invalid_manifest_is_rejected_without_api_calls() {
        let mut batch = MockBatchApi::new();
        let mut core = MockCoreApi::new();
        core.expect_read_namespace().never();
        batch.expect_create_job().never();

        let err = ops(batch, core, NamespacePolicy::AutoCreate)
            .create_job(JobDescriptor::new("batch", json!("echo hi")).with_name("nightly"))
            .await
            .unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::Invalid));
    }

    #[tokio::test]
    async fn deleting_a_missing_job_is_a_distinguishable_not_found() {
        let mut batch = MockBatchApi::new();
        batch
            .expect_delete_job()
            .withf(|ns, name| ns == "batch" && name == "ghost")
            .returning(|_, name| Err(not_found(name)));

        let err = ops(batch, MockCoreApi::new(), NamespacePolicy::AutoCreate)
            .delete_job("ghost", "batch")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        match err {
            Error::Orchestrator {
                operation, target, ..
            } => {
                assert_eq!(operation, "delete_job");
                assert_eq!(target, "batch/ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failed_calls_report_how_long_they_ran() {
        let mut core = MockCoreApi::new();
        core.expect_delete_namespace().returning(|name| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            Err(not_found(name))
        });

        let err = ops(MockBatchApi::new(), core, NamespacePolicy::AutoCreate)
            .delete_namespace("team-a")
            .await
            .unwrap_err();

        match err {
            Error::Orchestrator { elapsed_ms, .. } => assert!(elapsed_ms >= 20),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn deleting_a_job_acknowledges() {
        let mut batch = MockBatchApi::new();
        batch.expect_delete_job().times(1).returning(|_, _| Ok(()));

        let ack = ops(batch, MockCoreApi::new(), NamespacePolicy::AutoCreate)
            .delete_job("nightly", "batch")
            .await
            .unwrap();
        assert_eq!(ack.status, "success");
        assert!(ack.message.contains("nightly"));
    }

    #[tokio::test]
    async fn job_status_is_reconciled() {
        let mut batch = MockBatchApi::new();
        batch.expect_read_job().returning(|ns, name| {
            Ok(Job {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(ns.to_string()),
                    ..Default::default()
                },
                status: Some(JobStatus {
                    succeeded: Some(1),
                    failed: Some(1),
                    start_time: Some(Time(created_at())),
                    completion_time: Some(Time(created_at())),
                    ..Default::default()
                }),
                ..Default::default()
            })
        });

        let report = ops(batch, MockCoreApi::new(), NamespacePolicy::AutoCreate)
            .get_job_status("nightly", "batch")
            .await
            .unwrap();

        assert_eq!(report.state, JobState::Completed);
        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert_eq!(
            report.start_time.as_deref(),
            Some("2026-03-02T08:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn creating_an_existing_namespace_is_a_conflict() {
        let mut core = MockCoreApi::new();
        core.expect_create_namespace().returning(|_| {
            Err(OrchestratorError::from_status(
                409,
                "AlreadyExists",
                "namespaces \"team-a\" already exists",
            ))
        });

        let err = ops(MockBatchApi::new(), core, NamespacePolicy::AutoCreate)
            .create_namespace("team-a")
            .await
            .unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::Conflict));
    }

    #[tokio::test]
    async fn namespace_lifecycle() {
        let mut core = MockCoreApi::new();
        core.expect_create_namespace().returning(|ns| {
            let mut ns = ns.clone();
            ns.metadata.creation_timestamp = Some(Time(created_at()));
            Ok(ns)
        });
        core.expect_delete_namespace()
            .withf(|name| name == "team-a")
            .returning(|_| Ok(()));
        let ops = ops(MockBatchApi::new(), core, NamespacePolicy::AutoCreate);

        let created = ops.create_namespace("team-a").await.unwrap();
        assert_eq!(created.namespace_name, "team-a");
        assert_eq!(created.status, "created");

        let ack = ops.delete_namespace("team-a").await.unwrap();
        assert_eq!(ack.message, "Namespace team-a deleted successfully");
    }

    #[tokio::test]
    async fn unconfigured_cluster_surfaces_configuration_error() {
        let lazy = LazyClient::production(ClusterSettings::new(None, None));
        let ops = Operations::new(Arc::new(lazy), NamespacePolicy::AutoCreate);

        let err = ops.delete_namespace("team-a").await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
