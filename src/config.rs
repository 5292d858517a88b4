//! Process configuration
//!
//! Everything comes from flags or their environment variables, optionally
//! seeded from a `.env` file. The cluster name and region are optional at
//! parse time: the service starts without them and reports a configuration
//! error on the first operation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser};

use crate::error::Error;
use crate::operations::NamespacePolicy;
use crate::telemetry::{LogFormat, TelemetryConfig};

/// Load a `.env` file from the working directory or the nearest parent
///
/// Variables already present in the process environment are kept. Returns
/// the file that was loaded, if one was found.
pub fn load_env_file() -> Result<Option<PathBuf>, dotenvy::Error> {
    let cwd = std::env::current_dir().map_err(dotenvy::Error::Io)?;
    load_env_file_from(&cwd)
}

/// Like [`load_env_file`], searching upwards from `dir`
pub fn load_env_file_from(dir: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    for candidate in dir.ancestors().map(|d| d.join(".env")) {
        if candidate.is_file() {
            dotenvy::from_path(&candidate)?;
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Cluster target and client timeouts
#[derive(Debug, Clone, Args)]
pub struct ClusterSettings {
    /// EKS cluster name
    #[arg(long, env = "EKS_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// AWS region of the cluster
    #[arg(long, env = "EKS_REGION")]
    pub region: Option<String>,

    /// Timeout for the DescribeCluster call, in seconds
    #[arg(long, env = "EKSOPS_DESCRIBE_TIMEOUT_SECS", default_value_t = 30)]
    pub describe_timeout_secs: u64,

    /// TCP connect timeout to the API server, in seconds
    #[arg(long, env = "EKSOPS_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Read timeout for API server responses, in seconds
    #[arg(long, env = "EKSOPS_READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,
}

/// A validated cluster name and region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    /// EKS cluster name
    pub cluster_name: String,
    /// AWS region
    pub region: String,
}

impl ClusterSettings {
    /// Settings for a cluster with default timeouts
    pub fn new(cluster_name: Option<&str>, region: Option<&str>) -> Self {
        Self {
            cluster_name: cluster_name.map(str::to_string),
            region: region.map(str::to_string),
            describe_timeout_secs: 30,
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
        }
    }

    /// Validate that both cluster name and region are present
    ///
    /// Blank values count as missing.
    pub fn target(&self) -> Result<ClusterTarget, Error> {
        let cluster_name = non_blank(&self.cluster_name);
        let region = non_blank(&self.region);
        match (cluster_name, region) {
            (Some(cluster_name), Some(region)) => Ok(ClusterTarget {
                cluster_name,
                region,
            }),
            (None, None) => Err(Error::configuration(
                "EKS_CLUSTER_NAME and EKS_REGION must be set",
            )),
            (None, Some(_)) => Err(Error::configuration("EKS_CLUSTER_NAME must be set")),
            (Some(_), None) => Err(Error::configuration("EKS_REGION must be set")),
        }
    }

    /// DescribeCluster timeout
    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs(self.describe_timeout_secs)
    }

    /// API server connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// API server read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// eksops - run jobs and manage namespaces on an EKS cluster
#[derive(Debug, Clone, Parser)]
#[command(name = "eksops", version, about, long_about = None)]
pub struct Settings {
    /// Cluster target
    #[command(flatten)]
    pub cluster: ClusterSettings,

    /// Address for the HTTP API
    #[arg(long, env = "EKSOPS_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Create missing namespaces when submitting jobs
    #[arg(
        long,
        env = "EKSOPS_AUTO_CREATE_NAMESPACE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub auto_create_namespace: bool,

    /// Log level or filter directive
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "EKSOPS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Settings {
    /// Namespace handling for job submission
    pub fn namespace_policy(&self) -> NamespacePolicy {
        if self.auto_create_namespace {
            NamespacePolicy::AutoCreate
        } else {
            NamespacePolicy::Require
        }
    }

    /// Logging configuration
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level.clone(),
            format: self.log_format,
        }
    }
}
