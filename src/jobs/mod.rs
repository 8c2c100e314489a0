use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, warn};

use crate::{
    domain::environment::Environment,
    infrastructure::state::AppState,
    services::{budget::BudgetService, intake::IntakeService, reference_sync::ReferenceSyncService},
};

pub fn spawn_reference_sync_worker(state: Arc<AppState>) -> JoinHandle<()> {
    let period = minutes(state.config.schedule.reference_sync_minutes);
    let environments = state.config.schedule.environments.clone();
    let service = ReferenceSyncService::new(state);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            for env in &environments {
                match service.sync_all(*env).await {
                    Ok(summaries) => {
                        let failed = summaries.iter().filter(|s| s.error.is_some()).count();
                        info!(environment = %env, lists = summaries.len(), failed, "scheduled reference sync done");
                    }
                    Err(err) => warn!(environment = %env, error = %err, "scheduled reference sync skipped"),
                }
            }
        }
    })
}

pub fn spawn_intake_worker(state: Arc<AppState>) -> JoinHandle<()> {
    let period = minutes(state.config.schedule.intake_minutes);
    let environments = state.config.schedule.environments.clone();
    let service = IntakeService::new(state);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            for env in &environments {
                // push_all logs its own failures
                let results = service.push_all(*env).await;
                let pushed: usize = results.iter().flatten().map(|s| s.pushed).sum();
                info!(environment = %env, pushed, "scheduled intake run done");
            }
        }
    })
}

pub fn spawn_budget_worker(state: Arc<AppState>) -> JoinHandle<()> {
    let period = minutes(state.config.schedule.budget_minutes);
    let environments = state.config.schedule.environments.clone();
    let service = BudgetService::new(state);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            for env in &environments {
                if let Err(err) = service.reconcile(*env).await {
                    warn!(environment = %env, error = %err, "scheduled budget reconciliation failed");
                }
            }
        }
    })
}

/// Starts the workers the configuration enables. Returns no handles when
/// scheduling is switched off.
pub fn spawn_all(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let schedule = &state.config.schedule;
    if !schedule.enabled {
        info!("scheduled jobs disabled");
        return Vec::new();
    }
    let configured: Vec<Environment> = schedule
        .environments
        .iter()
        .copied()
        .filter(|env| state.netsuite(*env).is_ok())
        .collect();
    if configured.is_empty() {
        warn!("no scheduled environment has netsuite credentials; workers not started");
        return Vec::new();
    }

    let mut handles = vec![spawn_reference_sync_worker(Arc::clone(&state))];
    if state.sheets().is_ok() {
        handles.push(spawn_intake_worker(Arc::clone(&state)));
    }
    if state.kissflow().is_ok() {
        handles.push(spawn_budget_worker(state));
    }
    handles
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.max(1) * 60)
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
