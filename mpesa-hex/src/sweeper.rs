//! Background worker that times out operations whose result never arrived.

use std::sync::Arc;
use std::time::Duration;

use mpesa_types::OperationRepository;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::MpesaService;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct StaleSweeper<R: OperationRepository> {
    service: Arc<MpesaService<R>>,
    stale_after: Duration,
    interval: Duration,
}

impl<R: OperationRepository> StaleSweeper<R> {
    pub fn new(service: Arc<MpesaService<R>>) -> Self {
        Self {
            service,
            stale_after: DEFAULT_STALE_AFTER,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_schedule(mut self, stale_after: Duration, interval: Duration) -> Self {
        self.stale_after = stale_after;
        self.interval = interval;
        self
    }

    /// Runs forever; spawn it.
    #[instrument(skip(self))]
    pub async fn run(self) {
        info!(
            stale_after_secs = self.stale_after.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting stale operation sweeper"
        );
        loop {
            sleep(self.interval).await;
            self.sweep_once().await;
        }
    }

    /// One sweep pass. Returns how many operations were timed out.
    pub async fn sweep_once(&self) -> usize {
        let threshold = match chrono::Duration::from_std(self.stale_after) {
            Ok(threshold) => threshold,
            Err(e) => {
                error!("Invalid sweep threshold: {}", e);
                return 0;
            }
        };
        match self.service.sweep_stale(threshold).await {
            Ok(swept) => {
                if !swept.is_empty() {
                    warn!("Timed out {} stale operations", swept.len());
                }
                swept.len()
            }
            Err(e) => {
                error!("Stale sweep failed: {}", e);
                0
            }
        }
    }
}
