//! Pool-backed environment driver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use foundry_core::environment::{
    EnvironmentDriver, EnvironmentSpec, EnvironmentState, ImageType, ProvisioningFailure,
    StartedEnvironment,
};
use foundry_core::{Error, ResourceId, Result};

use crate::backend::EnvironmentBackend;
use crate::config::EnvironmentDriverConfig;
use crate::monitor::{MonitorResult, PullingMonitor};

/// State the driver keeps per outstanding environment.
struct ActiveEnvironment {
    state: watch::Sender<EnvironmentState>,
    cancel: CancellationToken,
}

/// Provisions environments through an [`EnvironmentBackend`], bounded by a
/// private worker pool sized independently from the orchestrator's
/// build-concurrency bound.
///
/// `start_environment` returns immediately; bring-up and readiness polling
/// run on the pool, publishing state transitions on the handle's channel.
pub struct PooledEnvironmentDriver {
    backend: Arc<dyn EnvironmentBackend>,
    config: EnvironmentDriverConfig,
    monitor: PullingMonitor,
    workers: Arc<Semaphore>,
    root_cancel: CancellationToken,
    active: Mutex<HashMap<ResourceId, ActiveEnvironment>>,
}

impl PooledEnvironmentDriver {
    pub fn new(backend: Arc<dyn EnvironmentBackend>, config: EnvironmentDriverConfig) -> Self {
        let monitor = PullingMonitor::new(config.poll_interval(), config.max_ready_wait());
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        info!(
            disabled = config.disabled,
            worker_pool_size = config.worker_pool_size,
            "environment driver initialized"
        );
        Self {
            backend,
            config,
            monitor,
            workers,
            root_cancel: CancellationToken::new(),
            active: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EnvironmentDriver for PooledEnvironmentDriver {
    fn can_provision(&self, image_type: ImageType) -> bool {
        if self.config.disabled {
            debug!("skipping driver as it is disabled by config");
            return false;
        }
        if self.root_cancel.is_cancelled() {
            return false;
        }
        self.config.compatible_image_types.contains(&image_type)
    }

    fn start_environment(&self, spec: EnvironmentSpec) -> Result<StartedEnvironment> {
        if self.root_cancel.is_cancelled() {
            return Err(Error::Internal(
                "environment driver is shut down".to_string(),
            ));
        }
        if !self.can_provision(spec.image_type) {
            return Err(Error::UnsupportedEnvironment(spec.image_type.to_string()));
        }

        let id = ResourceId::new();
        let image = resolve_image_reference(&spec.image_repository_url, &spec.image_id);
        let (state_tx, state_rx) = watch::channel(EnvironmentState::Starting);
        let cancel = self.root_cancel.child_token();

        self.active
            .lock()
            .expect("environment table lock poisoned")
            .insert(
                id,
                ActiveEnvironment {
                    state: state_tx.clone(),
                    cancel: cancel.clone(),
                },
            );

        info!(environment = %id, image = %image, "starting environment");
        tokio::spawn(provision(
            self.backend.clone(),
            self.workers.clone(),
            self.monitor,
            id,
            image.clone(),
            spec,
            state_tx,
            cancel.clone(),
        ));

        Ok(StartedEnvironment::new(id, image, state_rx, cancel))
    }

    async fn destroy(&self, environment: &StartedEnvironment) -> Result<()> {
        let entry = self
            .active
            .lock()
            .expect("environment table lock poisoned")
            .remove(&environment.id());
        let Some(entry) = entry else {
            debug!(environment = %environment.id(), "destroy on already destroyed environment");
            return Ok(());
        };

        entry.cancel.cancel();
        let _ = entry.state.send(EnvironmentState::Destroyed);
        info!(environment = %environment.id(), "destroying environment");
        if let Err(error) = self.backend.teardown(environment.id()).await {
            warn!(environment = %environment.id(), %error, "environment teardown failed");
        }
        Ok(())
    }

    async fn shutdown(&self) {
        info!("shutting down environment driver");
        self.root_cancel.cancel();
        self.workers.close();

        let outstanding: Vec<(ResourceId, ActiveEnvironment)> = self
            .active
            .lock()
            .expect("environment table lock poisoned")
            .drain()
            .collect();
        for (id, entry) in outstanding {
            let _ = entry.state.send(EnvironmentState::Destroyed);
            if let Err(error) = self.backend.teardown(id).await {
                warn!(environment = %id, %error, "environment teardown failed during shutdown");
            }
        }
    }
}

/// Bring-up chain for one environment: pool slot, backend create, readiness
/// polling. Publishes every transition on the handle's state channel; never
/// overwrites `Destroyed`.
#[allow(clippy::too_many_arguments)]
async fn provision(
    backend: Arc<dyn EnvironmentBackend>,
    workers: Arc<Semaphore>,
    monitor: PullingMonitor,
    id: ResourceId,
    image: String,
    spec: EnvironmentSpec,
    state: watch::Sender<EnvironmentState>,
    cancel: CancellationToken,
) {
    let permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = workers.acquire_owned() => match permit {
            Ok(permit) => permit,
            // Pool closed by shutdown.
            Err(_) => return,
        },
    };

    if let Err(error) = backend.create(id, &image, &spec).await {
        warn!(environment = %id, %error, "environment creation failed");
        publish(
            &state,
            EnvironmentState::Failed(ProvisioningFailure::Error(error.to_string())),
        );
        return;
    }
    // The slot covers bring-up only; waiting for readiness is scheduled and
    // must not hold pool capacity.
    drop(permit);
    if cancel.is_cancelled() {
        return;
    }
    publish(&state, EnvironmentState::Running);

    let outcome = monitor
        .watch(&cancel, || {
            let backend = backend.clone();
            async move { backend.health(id).await }
        })
        .await;
    match outcome {
        MonitorResult::Ready => {
            info!(environment = %id, "environment ready");
            publish(&state, EnvironmentState::Ready);
        }
        MonitorResult::TimedOut(wait) => {
            warn!(environment = %id, ?wait, "environment not ready within ceiling");
            publish(
                &state,
                EnvironmentState::Failed(ProvisioningFailure::TimedOut(wait)),
            );
        }
        MonitorResult::Failed(message) => {
            warn!(environment = %id, %message, "environment provisioning failed");
            publish(
                &state,
                EnvironmentState::Failed(ProvisioningFailure::Error(message)),
            );
        }
        // Destroy or shutdown owns the final state.
        MonitorResult::Cancelled => {}
    }
}

fn publish(state: &watch::Sender<EnvironmentState>, next: EnvironmentState) {
    state.send_if_modified(|current| {
        if matches!(current, EnvironmentState::Destroyed) {
            return false;
        }
        *current = next;
        true
    });
}

/// Join repository URL and image id with exactly one separator.
fn resolve_image_reference(repository_url: &str, image_id: &str) -> String {
    format!(
        "{}/{}",
        repository_url.trim_end_matches('/'),
        image_id.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Health;
    use foundry_core::environment::DebugOptions;
    use foundry_core::repository::RepositoryHandle;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn image_reference_has_exactly_one_separator() {
        assert_eq!(
            resolve_image_reference("registry.example.com/builders", "jdk17"),
            "registry.example.com/builders/jdk17"
        );
        assert_eq!(
            resolve_image_reference("registry.example.com/builders/", "jdk17"),
            "registry.example.com/builders/jdk17"
        );
        assert_eq!(
            resolve_image_reference("registry.example.com/builders/", "/jdk17"),
            "registry.example.com/builders/jdk17"
        );
    }

    /// Backend that reports `NotReady` a configurable number of times before
    /// `Ready`, or fails permanently.
    struct FakeBackend {
        ready_after: u32,
        fail_with: Option<String>,
        health_calls: AtomicU32,
        torn_down: Mutex<Vec<ResourceId>>,
    }

    impl FakeBackend {
        fn ready_after(checks: u32) -> Self {
            Self {
                ready_after: checks,
                fail_with: None,
                health_calls: AtomicU32::new(0),
                torn_down: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                ready_after: u32::MAX,
                fail_with: Some(message.to_string()),
                health_calls: AtomicU32::new(0),
                torn_down: Mutex::new(Vec::new()),
            }
        }

        fn never_ready() -> Self {
            Self {
                ready_after: u32::MAX,
                fail_with: None,
                health_calls: AtomicU32::new(0),
                torn_down: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EnvironmentBackend for FakeBackend {
        async fn create(
            &self,
            _environment_id: ResourceId,
            _image: &str,
            _spec: &EnvironmentSpec,
        ) -> Result<()> {
            Ok(())
        }

        async fn health(&self, _environment_id: ResourceId) -> Health {
            if let Some(message) = &self.fail_with {
                return Health::Failed(message.clone());
            }
            if self.health_calls.fetch_add(1, Ordering::SeqCst) >= self.ready_after {
                Health::Ready
            } else {
                Health::NotReady
            }
        }

        async fn teardown(&self, environment_id: ResourceId) -> Result<()> {
            self.torn_down.lock().unwrap().push(environment_id);
            Ok(())
        }
    }

    fn spec() -> EnvironmentSpec {
        let unit_id = ResourceId::new();
        let collection_id = ResourceId::new();
        EnvironmentSpec {
            image_id: "builder-jdk17".to_string(),
            image_repository_url: "registry.example.com/builders/".to_string(),
            image_type: ImageType::DockerImage,
            workspace: RepositoryHandle {
                id: ResourceId::new(),
                unit_id,
                collection_id,
                connection_url: "https://repo.example.com/build-1".to_string(),
            },
            debug: DebugOptions::default(),
            access_token: None,
        }
    }

    fn config() -> EnvironmentDriverConfig {
        EnvironmentDriverConfig {
            poll_interval_millis: 100,
            max_ready_wait_secs: 5,
            ..EnvironmentDriverConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn environment_becomes_ready_after_polling() {
        let backend = Arc::new(FakeBackend::ready_after(2));
        let driver = PooledEnvironmentDriver::new(backend.clone(), config());

        let environment = driver.start_environment(spec()).unwrap();
        assert_eq!(environment.state(), EnvironmentState::Starting);
        assert_eq!(
            environment.image(),
            "registry.example.com/builders/builder-jdk17"
        );

        environment.await_ready().await.unwrap();
        assert_eq!(environment.state(), EnvironmentState::Ready);
        assert!(backend.health_calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecoverable_backend_condition_fails_provisioning() {
        let backend = Arc::new(FakeBackend::failing("image pull back-off"));
        let driver = PooledEnvironmentDriver::new(backend, config());

        let environment = driver.start_environment(spec()).unwrap();
        let error = environment.await_ready().await.unwrap_err();
        assert!(matches!(error, Error::ProvisioningFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_ceiling_elapses_into_timeout() {
        let backend = Arc::new(FakeBackend::never_ready());
        let driver = PooledEnvironmentDriver::new(backend, config());

        let environment = driver.start_environment(spec()).unwrap();
        let error = environment.await_ready().await.unwrap_err();
        assert!(matches!(
            error,
            Error::ProvisioningTimeout(wait) if wait == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn unsupported_image_type_is_rejected() {
        let driver = PooledEnvironmentDriver::new(Arc::new(FakeBackend::ready_after(0)), config());

        assert!(!driver.can_provision(ImageType::VirtualMachine));
        let mut vm_spec = spec();
        vm_spec.image_type = ImageType::VirtualMachine;
        let error = driver.start_environment(vm_spec).unwrap_err();
        assert!(matches!(error, Error::UnsupportedEnvironment(_)));
    }

    #[tokio::test]
    async fn disabled_driver_provisions_nothing() {
        let driver = PooledEnvironmentDriver::new(
            Arc::new(FakeBackend::ready_after(0)),
            EnvironmentDriverConfig {
                disabled: true,
                ..config()
            },
        );

        assert!(!driver.can_provision(ImageType::DockerImage));
        assert!(driver.start_environment(spec()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_mid_poll_stops_further_checks() {
        let backend = Arc::new(FakeBackend::never_ready());
        let driver = PooledEnvironmentDriver::new(backend.clone(), config());

        let environment = driver.start_environment(spec()).unwrap();
        // Let a few checks fire.
        tokio::time::sleep(Duration::from_millis(350)).await;
        driver.destroy(&environment).await.unwrap();
        assert_eq!(environment.state(), EnvironmentState::Destroyed);

        let checks_at_destroy = backend.health_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.health_calls.load(Ordering::SeqCst), checks_at_destroy);
        assert_eq!(backend.torn_down.lock().unwrap().as_slice(), &[environment.id()]);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent() {
        let backend = Arc::new(FakeBackend::ready_after(0));
        let driver = PooledEnvironmentDriver::new(backend.clone(), config());

        let environment = driver.start_environment(spec()).unwrap();
        environment.await_ready().await.unwrap();

        driver.destroy(&environment).await.unwrap();
        driver.destroy(&environment).await.unwrap();
        assert_eq!(backend.torn_down.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_new_starts_and_tears_down_outstanding() {
        let backend = Arc::new(FakeBackend::never_ready());
        let driver = PooledEnvironmentDriver::new(backend.clone(), config());

        let environment = driver.start_environment(spec()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        driver.shutdown().await;
        assert_eq!(environment.state(), EnvironmentState::Destroyed);
        assert_eq!(backend.torn_down.lock().unwrap().as_slice(), &[environment.id()]);
        assert!(driver.start_environment(spec()).is_err());

        let checks_at_shutdown = backend.health_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            backend.health_calls.load(Ordering::SeqCst),
            checks_at_shutdown
        );
    }
}
