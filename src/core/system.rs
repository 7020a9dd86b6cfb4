use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::core::alerts::AlertEngine;
use crate::core::bus::EventBus;
use crate::core::clock::{Clock, TimerService};
use crate::core::lifecycle::LifecycleManager;
use crate::core::linear::LinearIngest;
use crate::core::store::Store;

/// Composition root. Every subsystem is a constructed service handed its
/// dependencies here; nothing reaches for globals. The alert engine is wired
/// with the store and bus only, so the one-way dependency chain is
/// lifecycle → alerts → bus and never the reverse.
#[derive(Clone)]
pub struct ControlPlane {
    pub config: Config,
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub clock: Clock,
    pub timers: TimerService,
    pub alerts: Arc<AlertEngine>,
    pub lifecycle: Arc<LifecycleManager>,
    pub ingest: Arc<LinearIngest>,
}

impl ControlPlane {
    /// Open the store, seed alert rules, build the services, and reconcile
    /// process-local state against persisted rows. Runs before the HTTP
    /// listener binds.
    pub async fn init(config: Config) -> Result<Self> {
        let store = Arc::new(Store::open(&config.data_dir).context("opening store")?);
        let seeded = store.seed_default_alert_rules().await?;
        if seeded > 0 {
            info!("Seeded {seeded} default alert rules");
        }

        let clock = Clock::new();
        let timers = TimerService::new();
        let bus = Arc::new(EventBus::new(clock.clone()));
        let alerts = AlertEngine::new(store.clone(), bus.clone(), timers.clone(), clock.clone());
        let lifecycle = LifecycleManager::new(
            store.clone(),
            bus.clone(),
            alerts.clone(),
            clock.clone(),
            timers.clone(),
        );

        lifecycle
            .reconcile()
            .await
            .context("reconciling lifecycle state")?;

        let ingest = Arc::new(LinearIngest::new(
            store.clone(),
            lifecycle.clone(),
            clock.clone(),
            config.linear_webhook_secret.clone(),
        ));

        Ok(Self {
            config,
            store,
            bus,
            clock,
            timers,
            alerts,
            lifecycle,
            ingest,
        })
    }

    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
        info!("Control plane shut down");
    }
}
