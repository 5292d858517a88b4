//! Route handlers
//!
//! Thin adapters: parse the request, call [`Operations`], serialize the
//! result. Defaults (namespace `default`) are applied here.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use super::server::AppState;
use crate::bootstrap::BootstrapState;
use crate::manifest::{JobDescriptor, DEFAULT_NAMESPACE};
use crate::operations::{Deleted, JobCreated, JobStatusReport, NamespaceCreated};

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Body of `POST /api/eks-create-job`
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Job manifest; at minimum a `spec` with a pod template
    pub job_manifest: Value,
    /// Target namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Query of the job delete and status routes
#[derive(Debug, Deserialize)]
pub struct JobQuery {
    /// Job name
    pub job_name: String,
    /// Job namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Body of `POST /api/eks-create-namespace`
#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    /// Namespace to create
    pub namespace_name: String,
}

/// Query of `DELETE /api/eks-delete-namespace`
#[derive(Debug, Deserialize)]
pub struct NamespaceQuery {
    /// Namespace to delete
    pub namespace_name: String,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// Always `healthy` while the process serves requests
    pub status: &'static str,
    /// Configured cluster name
    pub cluster: Option<String>,
    /// Configured region
    pub region: Option<String>,
    /// State of the cluster client
    pub bootstrap: BootstrapState,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let lazy = state.ops.client();
    Json(HealthReport {
        status: "healthy",
        cluster: lazy.settings().cluster_name.clone(),
        region: lazy.settings().region.clone(),
        bootstrap: lazy.state(),
    })
}

pub(crate) async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<JobCreated>, ApiError> {
    let job = JobDescriptor::new(req.namespace, req.job_manifest);
    Ok(Json(state.ops.create_job(job).await?))
}

pub(crate) async fn delete_job(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Deleted>, ApiError> {
    Ok(Json(
        state
            .ops
            .delete_job(&query.job_name, &query.namespace)
            .await?,
    ))
}

pub(crate) async fn get_job_status(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobStatusReport>, ApiError> {
    Ok(Json(
        state
            .ops
            .get_job_status(&query.job_name, &query.namespace)
            .await?,
    ))
}

pub(crate) async fn create_namespace(
    State(state): State<AppState>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Result<Json<NamespaceCreated>, ApiError> {
    Ok(Json(state.ops.create_namespace(&req.namespace_name).await?))
}

pub(crate) async fn delete_namespace(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Deleted>, ApiError> {
    Ok(Json(state.ops.delete_namespace(&query.namespace_name).await?))
}
