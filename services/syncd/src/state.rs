use std::sync::Arc;

use crate::config::AppConfig;
use crate::job_store::JobStore;
use crate::provider::ProviderFactory;
use crate::queue::TaskQueue;
use crate::quota::QuotaLedger;

pub type SharedState = Arc<AppState>;

/// Everything a worker or request handler needs. All cross-job coordination
/// lives behind the store/ledger/queue seams; there is no in-process
/// cross-job state.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn JobStore>,
    pub ledger: Arc<dyn QuotaLedger>,
    pub queue: Arc<dyn TaskQueue>,
    pub providers: Arc<dyn ProviderFactory>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn QuotaLedger>,
        queue: Arc<dyn TaskQueue>,
        providers: Arc<dyn ProviderFactory>,
    ) -> SharedState {
        Arc::new(Self {
            config,
            store,
            ledger,
            queue,
            providers,
        })
    }
}
