use std::sync::Arc;
use std::time::Duration;

use crate::auth::IdentityVerifier;
use crate::cases::TestCaseStore;
use crate::config::AppConfig;
use crate::notify::{Dispatcher, PreferenceStore};
use crate::reconcile::{CompletionNotifier, Reconciler};
use crate::runs::execute::Executor;
use crate::runs::RunStore;
use crate::storage::Pool;
use crate::telephony::TelephonyGateway;

#[derive(Clone)]
pub struct AppState {
    pub runs: RunStore,
    pub preferences: PreferenceStore,
    pub executor: Arc<Executor>,
    pub reconciler: Reconciler,
    pub gateway: Option<Arc<dyn TelephonyGateway>>,
    pub verifier: Option<Arc<dyn IdentityVerifier>>,
}

impl AppState {
    pub fn new(
        pool: Pool,
        gateway: Option<Arc<dyn TelephonyGateway>>,
        dispatcher: Arc<Dispatcher>,
        verifier: Option<Arc<dyn IdentityVerifier>>,
        config: &AppConfig,
    ) -> Self {
        let cases = TestCaseStore::new(pool.clone());
        let runs = RunStore::new(pool.clone());
        let preferences = PreferenceStore::new(pool);

        let executor = Executor::new(
            cases.clone(),
            runs.clone(),
            gateway.clone(),
            config.telephony.default_timeout_secs,
        );
        let reconciler = Reconciler::new(
            runs.clone(),
            gateway.clone(),
            Duration::from_secs(config.reconcile.quality_poll_delay_secs),
        )
        .with_notifier(CompletionNotifier {
            dispatcher,
            preferences: preferences.clone(),
            cases,
        });

        Self {
            runs,
            preferences,
            executor: Arc::new(executor),
            reconciler,
            gateway,
            verifier,
        }
    }
}
