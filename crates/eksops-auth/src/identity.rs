//! Ambient AWS identity resolution
//!
//! Credentials are never read from a stored kubeconfig. They come from the
//! environment the process runs in, tried in a fixed order:
//!
//! 1. the instance role attached to the host (IMDS)
//! 2. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//! 3. the shared credentials/config profile (`AWS_PROFILE` or `default`)

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::error::AuthError;

/// Where a signing identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Role attached to the compute instance
    InstanceRole,
    /// Key pair supplied through environment variables
    Environment,
    /// Shared credentials/config file profile
    Profile,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialSource::InstanceRole => "instance-role",
            CredentialSource::Environment => "environment",
            CredentialSource::Profile => "profile",
        };
        f.write_str(s)
    }
}

/// Resolved AWS credential material used to sign requests
#[derive(Clone)]
pub struct SigningIdentity {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    source: CredentialSource,
    expires_at: Option<DateTime<Utc>>,
}

impl SigningIdentity {
    /// Build an identity from raw credential parts
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        source: CredentialSource,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            source,
            expires_at,
        }
    }

    /// Build an identity from SDK credentials
    pub fn from_credentials(creds: &Credentials, source: CredentialSource) -> Self {
        Self::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            creds.session_token().map(str::to_string),
            source,
            creds.expiry().map(DateTime::<Utc>::from),
        )
    }

    /// Convert back into SDK credentials for use with an AWS client
    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            self.session_token.clone(),
            self.expires_at.map(SystemTime::from),
            "eksops",
        )
    }

    /// Access key id
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Secret access key
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Session token for temporary credentials
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Source the identity was resolved from
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Expiry of the underlying credentials, when they are temporary
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credentials have expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret material stays out of logs
        f.debug_struct("SigningIdentity")
            .field("access_key_id", &self.access_key_id)
            .field("source", &self.source)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Resolves the ambient signing identity
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve credentials from the first source that has them
    async fn resolve(&self) -> Result<SigningIdentity, AuthError>;
}

/// Identity resolver that walks an ordered list of credential providers
pub struct ChainIdentityResolver {
    sources: Vec<(CredentialSource, SharedCredentialsProvider)>,
}

impl ChainIdentityResolver {
    /// Instance role, then environment, then profile
    pub fn from_environment(profile: Option<&str>) -> Self {
        let mut profile_provider = ProfileFileCredentialsProvider::builder();
        if let Some(name) = profile {
            profile_provider = profile_provider.profile_name(name);
        }

        Self::with_sources(vec![
            (
                CredentialSource::InstanceRole,
                SharedCredentialsProvider::new(ImdsCredentialsProvider::builder().build()),
            ),
            (
                CredentialSource::Environment,
                SharedCredentialsProvider::new(EnvironmentVariableCredentialsProvider::new()),
            ),
            (
                CredentialSource::Profile,
                SharedCredentialsProvider::new(profile_provider.build()),
            ),
        ])
    }

    /// Build a resolver from explicit sources, tried in the given order
    pub fn with_sources(sources: Vec<(CredentialSource, SharedCredentialsProvider)>) -> Self {
        Self { sources }
    }
}

/// Whether resolution should move on to the next source after this error
fn is_skippable(err: &CredentialsError) -> bool {
    matches!(
        err,
        CredentialsError::CredentialsNotLoaded(_) | CredentialsError::ProviderTimedOut(_)
    )
}

#[async_trait]
impl IdentityResolver for ChainIdentityResolver {
    async fn resolve(&self) -> Result<SigningIdentity, AuthError> {
        let mut skipped = Vec::with_capacity(self.sources.len());

        for (source, provider) in &self.sources {
            match provider.provide_credentials().await {
                Ok(creds) => {
                    info!(source = %source, "resolved AWS credentials");
                    return Ok(SigningIdentity::from_credentials(&creds, *source));
                }
                Err(e) if is_skippable(&e) => {
                    debug!(source = %source, error = %e, "credential source unavailable");
                    skipped.push(format!("{}: {}", source, e));
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "credential source failed");
                    return Err(AuthError::no_credentials(format!("{}: {}", source, e)));
                }
            }
        }

        Err(AuthError::no_credentials(if skipped.is_empty() {
            "no credential sources configured".to_string()
        } else {
            skipped.join("; ")
        }))
    }
}
