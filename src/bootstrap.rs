//! Authenticated client bootstrap
//!
//! Building a client takes four dependent steps: resolve the ambient AWS
//! identity, describe the cluster, mint a bearer token, then configure the
//! Kubernetes client and its sub-clients. Each step only runs once the
//! previous one has succeeded.
//!
//! [`LazyClient`] runs the bootstrap at most once per process and only on
//! first use. Concurrent first callers wait on the same attempt. A failed
//! attempt is not cached; the next caller starts a fresh one.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eksops_auth::{
    BearerToken, ChainIdentityResolver, ClusterDescriptor, ClusterEndpoint, EksClusterDescriptor,
    IdentityResolver, StsTokenMinter, TokenMinter,
};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{ClusterSettings, ClusterTarget};
use crate::error::{BootstrapStep, Error};
use crate::orchestrator::{BatchApi, ClientFactory, CoreApi, KubeClientFactory, ResourceClients};

/// A bootstrapped connection to the cluster
///
/// Immutable once built. The token is never refreshed.
pub struct AuthenticatedClient {
    endpoint: ClusterEndpoint,
    token: BearerToken,
    clients: ResourceClients,
}

impl AuthenticatedClient {
    /// Assemble a client from its parts
    pub fn new(endpoint: ClusterEndpoint, token: BearerToken, clients: ResourceClients) -> Self {
        Self {
            endpoint,
            token,
            clients,
        }
    }

    /// The cluster endpoint this client talks to
    pub fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    /// The bearer token the client authenticates with
    pub fn token(&self) -> &BearerToken {
        &self.token
    }

    /// Job sub-client
    pub fn batch(&self) -> &dyn BatchApi {
        self.clients.batch.as_ref()
    }

    /// Namespace sub-client
    pub fn core(&self) -> &dyn CoreApi {
        self.clients.core.as_ref()
    }

    /// Whether the token has aged out at `now`
    pub fn token_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token.is_expired_at(now)
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("endpoint", &self.endpoint.url)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Runs the bootstrap steps in order
pub struct ClientBootstrapper {
    identity: Arc<dyn IdentityResolver>,
    descriptor: Arc<dyn ClusterDescriptor>,
    minter: Arc<dyn TokenMinter>,
    factory: Arc<dyn ClientFactory>,
}

impl ClientBootstrapper {
    /// Create a bootstrapper from its step implementations
    pub fn new(
        identity: Arc<dyn IdentityResolver>,
        descriptor: Arc<dyn ClusterDescriptor>,
        minter: Arc<dyn TokenMinter>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            identity,
            descriptor,
            minter,
            factory,
        }
    }

    /// Production wiring: ambient credential chain, EKS, regional STS, kube-rs
    pub fn production(target: &ClusterTarget, settings: &ClusterSettings) -> Self {
        Self::new(
            Arc::new(ChainIdentityResolver::from_environment(None)),
            Arc::new(EksClusterDescriptor::new(settings.describe_timeout())),
            Arc::new(StsTokenMinter::new(target.region.clone())),
            Arc::new(KubeClientFactory::new(
                settings.connect_timeout(),
                settings.read_timeout(),
            )),
        )
    }

    /// Build an authenticated client for `target`
    ///
    /// Stops at the first failing step; the error names the step and keeps
    /// the originating error as its source.
    pub async fn bootstrap(&self, target: &ClusterTarget) -> Result<AuthenticatedClient, Error> {
        info!(
            cluster = %target.cluster_name,
            region = %target.region,
            "bootstrapping EKS client"
        );

        debug!("Step 1/4: resolving AWS identity");
        let identity = self
            .identity
            .resolve()
            .await
            .map_err(|e| Error::bootstrap(BootstrapStep::ResolveIdentity, e))?;
        info!(source = %identity.source(), "resolved AWS identity");

        debug!("Step 2/4: describing cluster");
        let endpoint = self
            .descriptor
            .describe(&target.cluster_name, &target.region, &identity)
            .await
            .map_err(|e| Error::bootstrap(BootstrapStep::DescribeCluster, e))?;

        debug!("Step 3/4: minting bearer token");
        let token = self
            .minter
            .mint(&target.cluster_name, &identity)
            .await
            .map_err(|e| Error::bootstrap(BootstrapStep::MintToken, e))?;

        debug!("Step 4/4: configuring Kubernetes client");
        let clients = self
            .factory
            .connect(&endpoint, &token)
            .map_err(|e| Error::bootstrap(BootstrapStep::ConfigureClient, e))?;

        info!(
            cluster = %target.cluster_name,
            endpoint = %endpoint.url,
            token_expires_at = %token.expires_at().to_rfc3339(),
            "EKS client ready"
        );
        Ok(AuthenticatedClient::new(endpoint, token, clients))
    }
}

/// Lifecycle of the process-wide client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    /// No operation has needed the client yet
    NotStarted,
    /// A bootstrap attempt is running
    InProgress,
    /// The client is built
    Ready,
    /// The last attempt failed; the next use retries
    Failed,
}

impl BootstrapState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BootstrapState::InProgress,
            2 => BootstrapState::Ready,
            3 => BootstrapState::Failed,
            _ => BootstrapState::NotStarted,
        }
    }
}

type BootstrapperFn = dyn Fn(&ClusterTarget) -> ClientBootstrapper + Send + Sync;

/// The process-wide client, built on first use
pub struct LazyClient {
    settings: ClusterSettings,
    build: Option<Box<BootstrapperFn>>,
    cell: OnceCell<Arc<AuthenticatedClient>>,
    state: AtomicU8,
}

impl LazyClient {
    /// Create an unbuilt client
    ///
    /// `build` produces the bootstrapper once the target has been validated.
    pub fn new<F>(settings: ClusterSettings, build: F) -> Self
    where
        F: Fn(&ClusterTarget) -> ClientBootstrapper + Send + Sync + 'static,
    {
        Self {
            settings,
            build: Some(Box::new(build)),
            cell: OnceCell::new(),
            state: AtomicU8::new(BootstrapState::NotStarted as u8),
        }
    }

    /// Lazy client with production wiring
    pub fn production(settings: ClusterSettings) -> Self {
        let wiring = settings.clone();
        Self::new(settings, move |target| {
            ClientBootstrapper::production(target, &wiring)
        })
    }

    /// A client that is already built
    pub fn ready(settings: ClusterSettings, client: AuthenticatedClient) -> Self {
        Self {
            settings,
            build: None,
            cell: OnceCell::new_with(Some(Arc::new(client))),
            state: AtomicU8::new(BootstrapState::Ready as u8),
        }
    }

    /// Cluster settings this client targets
    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Current lifecycle state
    pub fn state(&self) -> BootstrapState {
        BootstrapState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: BootstrapState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Get the client, bootstrapping it if needed
    ///
    /// Warns when the token has aged past its validity; calls will then fail
    /// with an authorization error from the API server.
    pub async fn get(&self) -> Result<Arc<AuthenticatedClient>, Error> {
        let client = self
            .cell
            .get_or_try_init(|| async {
                self.set_state(BootstrapState::InProgress);
                let result = self.initialize().await;
                match &result {
                    Ok(_) => self.set_state(BootstrapState::Ready),
                    Err(e) => {
                        warn!(error = %e, "EKS client bootstrap failed");
                        self.set_state(BootstrapState::Failed);
                    }
                }
                result
            })
            .await?
            .clone();

        if client.token_expired_at(Utc::now()) {
            warn!(
                expired_at = %client.token().expires_at().to_rfc3339(),
                "bearer token has expired; restart the service to mint a new one"
            );
        }
        Ok(client)
    }

    async fn initialize(&self) -> Result<Arc<AuthenticatedClient>, Error> {
        let target = self.settings.target()?;
        let build = self
            .build
            .as_ref()
            .ok_or_else(|| Error::configuration("no bootstrapper configured"))?;
        let bootstrapper = build(&target);
        bootstrapper.bootstrap(&target).await.map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootstrapCause;
    use crate::orchestrator::{MockBatchApi, MockClientFactory, MockCoreApi};
    use crate::testing::{endpoint, identity, token, MockDescriptor, MockMinter, MockResolver};
    use eksops_auth::{AuthError, LookupFailure, TrustAnchorError};
    use mockall::Sequence;
    use std::sync::atomic::AtomicUsize;

    fn clients() -> ResourceClients {
        ResourceClients {
            batch: Arc::new(MockBatchApi::new()),
            core: Arc::new(MockCoreApi::new()),
        }
    }

    fn target() -> ClusterTarget {
        ClusterTarget {
            cluster_name: "prod".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn settings() -> ClusterSettings {
        ClusterSettings::new(Some("prod"), Some("us-east-1"))
    }

    #[tokio::test]
    async fn steps_run_in_order_and_produce_a_client() {
        let mut seq = Sequence::new();
        let mut resolver = MockResolver::new();
        let mut descriptor = MockDescriptor::new();
        let mut minter = MockMinter::new();
        let mut factory = MockClientFactory::new();

        resolver
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(identity()));
        descriptor
            .expect_describe()
            .withf(|cluster, region, _| cluster == "prod" && region == "us-east-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(endpoint()));
        minter
            .expect_mint()
            .withf(|cluster, _| cluster == "prod")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(token()));
        factory
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(clients()));

        let bootstrapper = ClientBootstrapper::new(
            Arc::new(resolver),
            Arc::new(descriptor),
            Arc::new(minter),
            Arc::new(factory),
        );
        let client = bootstrapper.bootstrap(&target()).await.unwrap();

        assert_eq!(client.endpoint(), &endpoint());
        assert_eq!(client.token().as_str(), token().as_str());
    }

    #[tokio::test]
    async fn missing_cluster_stops_before_minting() {
        let mut resolver = MockResolver::new();
        let mut descriptor = MockDescriptor::new();
        let mut minter = MockMinter::new();
        let mut factory = MockClientFactory::new();

        resolver.expect_resolve().returning(|| Ok(identity()));
        descriptor.expect_describe().returning(|cluster, region, _| {
            Err(AuthError::cluster_lookup(
                cluster,
                region,
                LookupFailure::NotFound,
                "No cluster found for name: prod.",
            ))
        });
        minter.expect_mint().never();
        factory.expect_connect().never();

        let bootstrapper = ClientBootstrapper::new(
            Arc::new(resolver),
            Arc::new(descriptor),
            Arc::new(minter),
            Arc::new(factory),
        );
        let err = bootstrapper.bootstrap(&target()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Bootstrap {
                step: BootstrapStep::DescribeCluster,
                ..
            }
        ));
        assert_eq!(
            err.auth_error().and_then(|e| e.lookup_failure()),
            Some(LookupFailure::NotFound)
        );
    }

    #[tokio::test]
    async fn missing_credentials_stop_at_the_first_step() {
        let mut resolver = MockResolver::new();
        let mut descriptor = MockDescriptor::new();
        resolver
            .expect_resolve()
            .returning(|| Err(AuthError::no_credentials("no source produced credentials")));
        descriptor.expect_describe().never();

        let bootstrapper = ClientBootstrapper::new(
            Arc::new(resolver),
            Arc::new(descriptor),
            Arc::new(MockMinter::new()),
            Arc::new(MockClientFactory::new()),
        );
        let err = bootstrapper.bootstrap(&target()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Bootstrap {
                step: BootstrapStep::ResolveIdentity,
                source: BootstrapCause::Auth(AuthError::NoCredentials { .. }),
            }
        ));
    }

    #[tokio::test]
    async fn client_config_failure_is_reported_as_its_own_step() {
        let mut resolver = MockResolver::new();
        let mut descriptor = MockDescriptor::new();
        let mut minter = MockMinter::new();
        let mut factory = MockClientFactory::new();
        resolver.expect_resolve().returning(|| Ok(identity()));
        descriptor.expect_describe().returning(|_, _, _| Ok(endpoint()));
        minter.expect_mint().returning(|_, _| Ok(token()));
        factory
            .expect_connect()
            .returning(|_, _| Err(TrustAnchorError::NoCertificates.into()));

        let err = ClientBootstrapper::new(
            Arc::new(resolver),
            Arc::new(descriptor),
            Arc::new(minter),
            Arc::new(factory),
        )
        .bootstrap(&target())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Bootstrap {
                step: BootstrapStep::ConfigureClient,
                source: BootstrapCause::ClientConfig(_),
            }
        ));
    }

    /// Bootstrapper whose minter counts invocations
    fn counting_bootstrapper(mints: Arc<AtomicUsize>) -> ClientBootstrapper {
        bootstrapper_minting_at(mints, Utc::now())
    }

    /// Counting bootstrapper whose tokens claim to be minted at `minted_at`
    fn bootstrapper_minting_at(
        mints: Arc<AtomicUsize>,
        minted_at: DateTime<Utc>,
    ) -> ClientBootstrapper {
        let mut resolver = MockResolver::new();
        let mut descriptor = MockDescriptor::new();
        let mut minter = MockMinter::new();
        let mut factory = MockClientFactory::new();
        resolver.expect_resolve().returning(|| Ok(identity()));
        descriptor.expect_describe().returning(|_, _, _| Ok(endpoint()));
        minter.expect_mint().returning(move |_, _| {
            mints.fetch_add(1, Ordering::SeqCst);
            Ok(BearerToken::new(token().as_str(), minted_at))
        });
        factory.expect_connect().returning(|_, _| Ok(clients()));
        ClientBootstrapper::new(
            Arc::new(resolver),
            Arc::new(descriptor),
            Arc::new(minter),
            Arc::new(factory),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_callers_share_one_bootstrap() {
        let mints = Arc::new(AtomicUsize::new(0));
        let builds = Arc::new(AtomicUsize::new(0));

        let lazy = {
            let mints = mints.clone();
            let builds = builds.clone();
            Arc::new(LazyClient::new(settings(), move |_| {
                builds.fetch_add(1, Ordering::SeqCst);
                counting_bootstrapper(mints.clone())
            }))
        };
        assert_eq!(lazy.state(), BootstrapState::NotStarted);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lazy = lazy.clone();
                tokio::spawn(async move { lazy.get().await.map(|c| Arc::as_ptr(&c) as usize) })
            })
            .collect();

        let mut pointers = Vec::new();
        for handle in handles {
            pointers.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(mints.load(Ordering::SeqCst), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(lazy.state(), BootstrapState::Ready);
    }

    #[tokio::test]
    async fn missing_configuration_fails_before_any_bootstrap_step() {
        let builds = Arc::new(AtomicUsize::new(0));
        let lazy = {
            let builds = builds.clone();
            LazyClient::new(ClusterSettings::new(None, Some("us-east-1")), move |_| {
                builds.fetch_add(1, Ordering::SeqCst);
                counting_bootstrapper(Arc::new(AtomicUsize::new(0)))
            })
        };

        let err = lazy.get().await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        assert_eq!(lazy.state(), BootstrapState::Failed);
    }

    #[tokio::test]
    async fn failed_bootstrap_is_retried_on_next_use() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mints = Arc::new(AtomicUsize::new(0));
        let lazy = {
            let attempts = attempts.clone();
            let mints = mints.clone();
            LazyClient::new(settings(), move |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    let mut resolver = MockResolver::new();
                    resolver
                        .expect_resolve()
                        .returning(|| Err(AuthError::no_credentials("instance metadata timed out")));
                    ClientBootstrapper::new(
                        Arc::new(resolver),
                        Arc::new(MockDescriptor::new()),
                        Arc::new(MockMinter::new()),
                        Arc::new(MockClientFactory::new()),
                    )
                } else {
                    counting_bootstrapper(mints.clone())
                }
            })
        };

        assert!(lazy.get().await.is_err());
        assert_eq!(lazy.state(), BootstrapState::Failed);

        lazy.get().await.unwrap();
        assert_eq!(lazy.state(), BootstrapState::Ready);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_is_reused_rather_than_reminted() {
        let mints = Arc::new(AtomicUsize::new(0));
        let stale = Utc::now() - chrono::TimeDelta::minutes(16);
        let lazy = {
            let mints = mints.clone();
            LazyClient::new(settings(), move |_| {
                bootstrapper_minting_at(mints.clone(), stale)
            })
        };

        let first = lazy.get().await.unwrap();
        assert!(first.token_expired_at(Utc::now()));

        let second = lazy.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mints.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.state(), BootstrapState::Ready);
    }

    #[tokio::test]
    async fn prebuilt_client_is_ready_without_bootstrapping() {
        let lazy = LazyClient::ready(
            settings(),
            AuthenticatedClient::new(endpoint(), token(), clients()),
        );
        assert_eq!(lazy.state(), BootstrapState::Ready);
        assert!(lazy.get().await.is_ok());
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BootstrapState::NotStarted).unwrap(),
            "\"not_started\""
        );
    }
}
