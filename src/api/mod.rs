//! HTTP API
//!
//! Routes:
//! - `POST /api/eks-create-job`
//! - `DELETE /api/eks-delete-job?job_name=..&namespace=..`
//! - `GET /api/eks-get-job-status?job_name=..&namespace=..`
//! - `POST /api/eks-create-namespace`
//! - `DELETE /api/eks-delete-namespace?namespace_name=..`
//! - `GET /health`

mod error;
mod handlers;
mod server;

pub use error::{status_for, ApiError};
pub use handlers::{CreateJobRequest, CreateNamespaceRequest, HealthReport, JobQuery, NamespaceQuery};
pub use server::{router, serve, AppState, REQUEST_ID_HEADER};
