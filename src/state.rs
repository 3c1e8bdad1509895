use std::sync::Arc;

use crate::alarm::AlarmStateStore;
use crate::broadcast::Broadcaster;
use crate::config::CoreConfig;
use crate::dispatcher::RuleDispatcher;
use crate::gateways::ActionGateways;
use crate::rules::engine::RulesEngine;
use crate::signals::Signals;
use crate::store::{Stores, SystemConfigStore};
use crate::time::Clock;

#[derive(Clone)]
pub struct AppState {
    pub config: CoreConfig,
    pub clock: Clock,
    pub stores: Stores,
    pub system_config: Arc<SystemConfigStore>,
    pub signals: Signals,
    pub alarm: Arc<AlarmStateStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub gateways: ActionGateways,
    pub engine: Arc<RulesEngine>,
    pub dispatcher: Arc<RuleDispatcher>,
}
