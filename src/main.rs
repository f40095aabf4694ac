//! upchain - broadcast resume entry point
//!
//! Loads the persisted unbroadcast set and drives broadcast passes until it
//! is empty, abandoned, or the pass limit is reached.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upchain::{
    config::Config,
    store::create_record_store,
    BroadcastDriver, BroadcastOutcome, UploadError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upchain=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: data_dir={} store={:?}",
        config.data_dir.display(),
        config.store_type
    );

    let store = create_record_store(config.store_type, config.data_dir.clone())
        .await
        .map_err(anyhow::Error::msg)?;
    if !store.is_persistent() {
        warn!("Record store is not persistent; there is nothing to resume");
    }
    let backends = config.backend_directory()?;
    let driver = BroadcastDriver::new(&backends, store.as_ref())
        .with_retry_interval(config.retry_interval);

    if let Err(e) = driver.reconcile_pending().await {
        warn!("Could not reconcile pending transactions: {}", e);
    }

    for pass in 1..=config.max_passes {
        let report = driver.run_pass().await?;
        match report.outcome {
            BroadcastOutcome::Complete => {
                info!(pass, "Nothing left to broadcast");
                return Ok(());
            }
            BroadcastOutcome::Abandoned => {
                return Err(UploadError::Abandoned {
                    count: report.abandoned.len(),
                }
                .into());
            }
            BroadcastOutcome::RetryLater(delay) => {
                if pass == config.max_passes {
                    break;
                }
                info!(
                    pass,
                    remaining = report.remaining.len(),
                    "Retrying in {}s",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    let remaining = driver.unbroadcast().await?.len();
    anyhow::bail!(
        "Gave up after {} passes with {} transactions still unbroadcast",
        config.max_passes,
        remaining
    )
}
