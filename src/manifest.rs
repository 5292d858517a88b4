//! Job request bodies
//!
//! Callers submit a loose JSON manifest (at minimum a `spec`). It is wrapped
//! into a `batch/v1` Job with the resolved name and namespace and the
//! tracking labels every job carries.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Label marking objects created by this service
pub const APP_LABEL: &str = "app";
/// Value of [`APP_LABEL`]
pub const APP_LABEL_VALUE: &str = "eksops";
/// Label carrying the job name, for selecting its pods
pub const JOB_ID_LABEL: &str = "job-id";

/// Namespace used when a request names none
pub const DEFAULT_NAMESPACE: &str = "default";

/// A job submission
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Target namespace
    pub namespace: String,
    /// Explicit job name, overriding the manifest
    pub name: Option<String>,
    /// Caller-supplied manifest
    pub manifest: Value,
}

impl JobDescriptor {
    /// Describe a job from a manifest
    pub fn new(namespace: impl Into<String>, manifest: Value) -> Self {
        Self {
            namespace: namespace.into(),
            name: None,
            manifest,
        }
    }

    /// Set an explicit job name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name the job will be created under
    ///
    /// Explicit name first, then `metadata.name` from the manifest, then a
    /// generated one.
    pub fn resolve_name(&self, now: DateTime<Utc>) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                self.manifest
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| generate_job_name(now))
    }
}

/// Generate a unique job name like `job-20260302-080000-3fa2c1`
pub fn generate_job_name(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("job-{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..6])
}

/// Build the Job to submit
///
/// Labels and annotations from the manifest are kept; the tracking labels
/// are added on top. The manifest's own name and namespace are replaced.
pub fn build_job(name: &str, namespace: &str, manifest: &Value) -> Result<Job, OrchestratorError> {
    let Some(fields) = manifest.as_object() else {
        return Err(OrchestratorError::invalid("job manifest must be a JSON object"));
    };
    let spec = fields.get("spec").cloned().unwrap_or_else(|| json!({}));
    if !spec.is_object() {
        return Err(OrchestratorError::invalid("job manifest 'spec' must be an object"));
    }

    let mut labels = manifest
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    labels.insert(APP_LABEL.to_string(), json!(APP_LABEL_VALUE));
    labels.insert(JOB_ID_LABEL.to_string(), json!(name));

    let mut metadata = Map::new();
    metadata.insert("name".to_string(), json!(name));
    metadata.insert("namespace".to_string(), json!(namespace));
    metadata.insert("labels".to_string(), Value::Object(labels));
    if let Some(annotations) = manifest.pointer("/metadata/annotations") {
        metadata.insert("annotations".to_string(), annotations.clone());
    }

    let body = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": metadata,
        "spec": spec,
    });
    serde_json::from_value(body)
        .map_err(|e| OrchestratorError::invalid(format!("malformed job manifest: {}", e)))
}

/// Build a bare Namespace object
pub fn namespace_object(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn manifest() -> Value {
        json!({
            "metadata": {
                "name": "ignored-namespace-holder",
                "namespace": "elsewhere",
                "labels": {"team": "data"},
                "annotations": {"owner": "data-eng"}
            },
            "spec": {
                "backoffLimit": 2,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{"name": "main", "image": "busybox", "command": ["true"]}]
                    }
                }
            }
        })
    }

    #[test]
    fn generated_names_carry_timestamp_and_random_suffix() {
        let name = generate_job_name(now());
        assert!(name.starts_with("job-20260302-080000-"));
        assert_eq!(name.len(), "job-20260302-080000-".len() + 6);
        assert_ne!(name, generate_job_name(now()));
    }

    #[test]
    fn explicit_name_wins_over_manifest_name() {
        let job = JobDescriptor::new("batch", manifest()).with_name("nightly");
        assert_eq!(job.resolve_name(now()), "nightly");

        let job = JobDescriptor::new("batch", manifest());
        assert_eq!(job.resolve_name(now()), "ignored-namespace-holder");

        let job = JobDescriptor::new("batch", json!({"spec": {}}));
        assert!(job.resolve_name(now()).starts_with("job-20260302-080000-"));
    }

    #[test]
    fn built_job_has_tracking_labels_and_target_namespace() {
        let job = build_job("nightly", "batch", &manifest()).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("nightly"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("batch"));
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get(APP_LABEL).map(String::as_str), Some(APP_LABEL_VALUE));
        assert_eq!(labels.get(JOB_ID_LABEL).map(String::as_str), Some("nightly"));
        assert_eq!(labels.get("team").map(String::as_str), Some("data"));
        assert_eq!(
            job.metadata
                .annotations
                .unwrap()
                .get("owner")
                .map(String::as_str),
            Some("data-eng")
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(2));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("busybox"));
    }

    #[test]
    fn non_object_manifests_are_invalid() {
        let err = build_job("nightly", "batch", &json!(["not", "a", "job"])).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Invalid);

        let err = build_job("nightly", "batch", &json!({"spec": "run"})).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Invalid);
    }

    #[test]
    fn mistyped_spec_fields_are_invalid() {
        let err =
            build_job("nightly", "batch", &json!({"spec": {"backoffLimit": "lots"}})).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Invalid);
        assert!(err.message.contains("malformed job manifest"));
    }

    #[test]
    fn namespace_object_is_named() {
        assert_eq!(
            namespace_object("team-a").metadata.name.as_deref(),
            Some("team-a")
        );
    }
}
