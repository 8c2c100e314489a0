use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::{
    domain::{environment::Environment, intake::IntakeKind},
    infrastructure::{
        config::Config,
        http::build_client,
        kissflow::KissflowClient,
        netsuite::NetSuiteClient,
        sheets::SheetsClient,
        store::Stores,
    },
    services::errors::ServiceError,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    netsuite: HashMap<Environment, Arc<NetSuiteClient>>,
    sheets: Option<Arc<SheetsClient>>,
    kissflow: Option<Arc<KissflowClient>>,
    intake_locks: Arc<Mutex<HashMap<(IntakeKind, Environment), Arc<AsyncMutex<()>>>>>,
}

impl AppState {
    /// Builds every client the configuration has credentials for.
    pub fn new(config: Arc<Config>, stores: Stores) -> anyhow::Result<Self> {
        let http = build_client(config.request_timeout())?;

        let mut netsuite = HashMap::new();
        for env in Environment::ALL {
            if let Some(account) = config.netsuite_account(env) {
                let client = NetSuiteClient::from_config(env, http.clone(), account)?;
                info!(environment = %env, account = %account.account_id, "netsuite client ready");
                netsuite.insert(env, Arc::new(client));
            }
        }

        let sheets = if config.sheets.is_configured() {
            Some(Arc::new(SheetsClient::from_config(http.clone(), &config.sheets)?))
        } else {
            None
        };

        let kissflow = config
            .kissflow
            .is_configured()
            .then(|| Arc::new(KissflowClient::new(http.clone(), &config.kissflow)));

        Ok(Self::from_parts(config, stores, netsuite, sheets, kissflow))
    }

    pub fn from_parts(
        config: Arc<Config>,
        stores: Stores,
        netsuite: HashMap<Environment, Arc<NetSuiteClient>>,
        sheets: Option<Arc<SheetsClient>>,
        kissflow: Option<Arc<KissflowClient>>,
    ) -> Self {
        Self {
            config,
            stores,
            netsuite,
            sheets,
            kissflow,
            intake_locks: Arc::default(),
        }
    }

    /// One lock per sheet and environment. Pushes of the same sheet never overlap,
    /// whether they come from the scheduler or the API.
    pub fn intake_lock(&self, kind: IntakeKind, env: Environment) -> Arc<AsyncMutex<()>> {
        self.intake_locks
            .lock()
            .entry((kind, env))
            .or_default()
            .clone()
    }

    pub fn netsuite(&self, env: Environment) -> Result<Arc<NetSuiteClient>, ServiceError> {
        self.netsuite
            .get(&env)
            .cloned()
            .ok_or_else(|| ServiceError::NotConfigured(format!("netsuite {env}")))
    }

    pub fn sheets(&self) -> Result<Arc<SheetsClient>, ServiceError> {
        self.sheets
            .clone()
            .ok_or_else(|| ServiceError::NotConfigured("google sheets".into()))
    }

    pub fn kissflow(&self) -> Result<Arc<KissflowClient>, ServiceError> {
        self.kissflow
            .clone()
            .ok_or_else(|| ServiceError::NotConfigured("kissflow".into()))
    }
}
