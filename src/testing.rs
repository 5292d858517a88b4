//! Shared test doubles for the credential traits of `eksops-auth`

use async_trait::async_trait;
use chrono::Utc;
use eksops_auth::{
    AuthError, BearerToken, ClusterDescriptor, ClusterEndpoint, CredentialSource,
    IdentityResolver, SigningIdentity, TokenMinter,
};
use mockall::mock;

mock! {
    pub Resolver {}

    #[async_trait]
    impl IdentityResolver for Resolver {
        async fn resolve(&self) -> Result<SigningIdentity, AuthError>;
    }
}

mock! {
    pub Descriptor {}

    #[async_trait]
    impl ClusterDescriptor for Descriptor {
        async fn describe(
            &self,
            cluster_name: &str,
            region: &str,
            identity: &SigningIdentity,
        ) -> Result<ClusterEndpoint, AuthError>;
    }
}

mock! {
    pub Minter {}

    #[async_trait]
    impl TokenMinter for Minter {
        async fn mint(
            &self,
            cluster_name: &str,
            identity: &SigningIdentity,
        ) -> Result<BearerToken, AuthError>;
    }
}

pub fn identity() -> SigningIdentity {
    SigningIdentity::new(
        "AKIDEXAMPLE",
        "secret",
        Some("session".to_string()),
        CredentialSource::InstanceRole,
        None,
    )
}

pub fn endpoint() -> ClusterEndpoint {
    ClusterEndpoint {
        url: "https://ABC.gr7.us-east-1.eks.amazonaws.com".to_string(),
        trust_anchor_pem: b"-----BEGIN CERTIFICATE-----\nAQIDBA==\n-----END CERTIFICATE-----\n"
            .to_vec(),
    }
}

/// A token minted just now, so it is inside its validity window
pub fn token() -> BearerToken {
    BearerToken::new("k8s-aws-v1.dGVzdA", Utc::now())
}
