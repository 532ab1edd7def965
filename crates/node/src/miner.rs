//! Interval mining task

use crate::block_builder::BlockBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A running interval miner.
///
/// The first block is mined immediately. A tick that falls due while a block
/// is still being built waits for it, so mining runs never overlap and
/// missed ticks are not made up in a burst.
pub(crate) struct IntervalMiner {
    period: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalMiner {
    /// Spawns the mining loop on the current runtime.
    pub(crate) fn spawn(builder: Arc<BlockBuilder>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => {
                        debug!("Interval miner stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = builder.mine_block().await {
                            warn!(error = %err, kind = err.kind(), "Interval mining failed");
                        }
                    }
                }
            }
        });

        info!(period_secs = period.as_secs(), "Interval mining started");
        Self {
            period,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    /// Stops the loop and waits for it to exit. No block is sealed by this
    /// miner once the call returns.
    pub(crate) async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Interval miner task failed");
            }
        }
        info!("Interval mining stopped");
    }
}

impl Drop for IntervalMiner {
    fn drop(&mut self) {
        // Dropped without stop(): signal the loop, it exits after the current block
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}
