//! EKS bearer token minting
//!
//! A token is a presigned STS `GetCallerIdentity` URL with the cluster name
//! bound in as the signed `x-k8s-aws-id` header, base64url-encoded behind the
//! `k8s-aws-v1.` prefix. The cluster's authenticator webhook replays the URL
//! against STS to learn who the caller is.
//!
//! Tokens are good for 15 minutes from signing. That window belongs to the
//! signing scheme; nothing here refreshes a token.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::identity::SigningIdentity;
use crate::sigv4::Presigner;

/// Prefix the authenticator webhook expects on every token
pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/// Signed header that binds a token to one cluster
pub const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";

/// Token validity from mint time, in seconds
pub const TOKEN_VALIDITY_SECS: i64 = 15 * 60;

/// `X-Amz-Expires` on the presigned URL
const PRESIGN_EXPIRES_SECS: u64 = 60;

/// A minted bearer token
#[derive(Clone)]
pub struct BearerToken {
    value: String,
    minted_at: DateTime<Utc>,
}

impl BearerToken {
    /// Wrap a token value minted at `minted_at`
    pub fn new(value: impl Into<String>, minted_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            minted_at,
        }
    }

    /// Token value for the `Authorization: Bearer` header
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// When the token was signed
    pub fn minted_at(&self) -> DateTime<Utc> {
        self.minted_at
    }

    /// When the cluster stops accepting the token
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.minted_at + TimeDelta::seconds(TOKEN_VALIDITY_SECS)
    }

    /// Whether the token is past its validity window at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("len", &self.value.len())
            .field("minted_at", &self.minted_at)
            .finish()
    }
}

/// Mints cluster-scoped bearer tokens
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenMinter: Send + Sync {
    /// Mint a token for `cluster_name` signed by `identity`
    async fn mint(
        &self,
        cluster_name: &str,
        identity: &SigningIdentity,
    ) -> Result<BearerToken, AuthError>;
}

/// Mints tokens by presigning against the regional STS endpoint
#[derive(Debug, Clone)]
pub struct StsTokenMinter {
    region: String,
}

impl StsTokenMinter {
    /// Create a minter signing for `region`
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    /// STS host for the configured region
    pub fn sts_host(&self) -> String {
        if self.region.starts_with("cn-") {
            format!("sts.{}.amazonaws.com.cn", self.region)
        } else {
            format!("sts.{}.amazonaws.com", self.region)
        }
    }

    /// Mint a token as of `now`
    pub fn mint_at(
        &self,
        cluster_name: &str,
        identity: &SigningIdentity,
        now: DateTime<Utc>,
    ) -> Result<BearerToken, AuthError> {
        if cluster_name.is_empty() {
            return Err(AuthError::token_mint(cluster_name, "cluster name is empty"));
        }
        if identity.access_key_id().is_empty() || identity.secret_access_key().is_empty() {
            return Err(AuthError::token_mint(
                cluster_name,
                format!("{} credentials have an empty key pair", identity.source()),
            ));
        }
        if identity.is_expired_at(now) {
            return Err(AuthError::token_mint(
                cluster_name,
                format!(
                    "{} credentials expired at {}",
                    identity.source(),
                    identity
                        .expires_at()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                ),
            ));
        }

        let presigner = Presigner {
            access_key_id: identity.access_key_id(),
            secret_access_key: identity.secret_access_key(),
            session_token: identity.session_token(),
            region: &self.region,
            service: "sts",
        };
        let url = presigner.presign_get(
            &self.sts_host(),
            &[("Action", "GetCallerIdentity"), ("Version", "2011-06-15")],
            &[(CLUSTER_ID_HEADER, cluster_name)],
            PRESIGN_EXPIRES_SECS,
            now,
        );

        let token = BearerToken::new(format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(url)), now);
        debug!(cluster = %cluster_name, len = token.as_str().len(), "presigned STS request");
        Ok(token)
    }
}

#[async_trait]
impl TokenMinter for StsTokenMinter {
    async fn mint(
        &self,
        cluster_name: &str,
        identity: &SigningIdentity,
    ) -> Result<BearerToken, AuthError> {
        let token = self.mint_at(cluster_name, identity, Utc::now())?;
        info!(
            cluster = %cluster_name,
            expires_at = %token.expires_at().to_rfc3339(),
            "minted IAM bearer token"
        );
        Ok(token)
    }
}
