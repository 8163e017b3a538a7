//! Daemon lifecycle: publish an acquired device, wait, then tear down.
//!
//! Teardown runs in reverse of startup: unpublish, drop sessions, release
//! lines. If publishing fails, the lines are released before returning.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use sevenseg_hw::{PinRegistry, SegmentDevice};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::{AppState, Provider};

/// Makes a device reachable by clients.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    /// Handle that keeps the device published until unpublished.
    type Registration: Published;

    /// Publishes the device. `shutdown_tx` lets clients request shutdown.
    ///
    /// On failure nothing stays published.
    async fn publish(
        &self,
        state: Arc<AppState>,
        shutdown_tx: mpsc::Sender<()>,
    ) -> sevenseg_hw::Result<Self::Registration>;
}

/// A published device.
#[allow(async_fn_in_trait)]
pub trait Published {
    /// Withdraws the device. Errors are logged, never returned.
    async fn unpublish(self);
}

/// Publishes `registry` as `name` and serves it until `stop` completes or a
/// client requests shutdown.
pub async fn run<P: Publisher>(
    registry: PinRegistry<Provider>,
    name: &str,
    publisher: &P,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    let registry = Arc::new(registry);
    let device = SegmentDevice::new(Arc::clone(&registry));
    let state = Arc::new(AppState::new(device, name));

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    // Publish only once the lines are fully acquired
    let registration = match publisher.publish(Arc::clone(&state), shutdown_tx).await {
        Ok(registration) => registration,
        Err(e) => {
            drop(state);
            release(registry);
            return Err(e).context("Failed to publish device");
        }
    };
    info!("sevenseg: device '{}' ready", name);

    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested via D-Bus");
        }
        _ = stop => {}
    }

    registration.unpublish().await;
    state.close_all();
    drop(state);
    release(registry);

    info!("sevenseg: shutting down");
    Ok(())
}

/// Releases the lines once the last device handle is gone.
fn release(registry: Arc<PinRegistry<Provider>>) {
    match Arc::try_unwrap(registry) {
        Ok(registry) => registry.release_all(),
        Err(shared) => {
            warn!(
                "GPIO registry still has {} other handles; lines are released when the last one drops",
                Arc::strong_count(&shared) - 1
            );
        }
    }
}
