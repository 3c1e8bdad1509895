use alarm_server_rs::alarm::AlarmStateStore;
use alarm_server_rs::broadcast::Broadcaster;
use alarm_server_rs::dispatcher::RuleDispatcher;
use alarm_server_rs::gateways::{
    ActionGateways, HttpHomeAssistantGateway, MqttZigbee2mqttGateway, NotificationOutbox,
    UnconfiguredZwavejsGateway,
};
use alarm_server_rs::rules::engine::RulesEngine;
use alarm_server_rs::services::cleanup::RetentionCleanupService;
use alarm_server_rs::services::entity_sync::EntitySyncService;
use alarm_server_rs::services::timers::AlarmTimerService;
use alarm_server_rs::signals::Signals;
use alarm_server_rs::state::AppState;
use alarm_server_rs::store::{Stores, SystemConfigStore};
use alarm_server_rs::time::Clock;
use alarm_server_rs::{cli, config, openapi, routes};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind alarm-server-rs listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind alarm-server-rs listener on {addr}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!("{}", serde_json::to_string_pretty(&openapi::openapi_json())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::CoreConfig::from_env()?;
    let clock = Clock::system();
    let stores = Stores::new();
    let system_config = Arc::new(SystemConfigStore::load(&config.system_config_path));
    let signals = Signals::new();
    stores.profiles.ensure_active(clock.now());
    let alarm = Arc::new(AlarmStateStore::new(stores.profiles.clone(), signals.clone()));

    let http = reqwest::Client::new();
    let zigbee2mqtt = match config.mqtt_host.as_deref() {
        Some(host) => {
            let (gateway, _session) = MqttZigbee2mqttGateway::connect(
                &config.zigbee2mqtt_base_topic,
                "alarm-server-rs",
                host,
                config.mqtt_port,
                config.mqtt_username.as_deref(),
                config.mqtt_password.as_deref(),
            )?;
            gateway
        }
        None => MqttZigbee2mqttGateway::disconnected(&config.zigbee2mqtt_base_topic),
    };
    let gateways = ActionGateways {
        ha: Arc::new(HttpHomeAssistantGateway::new(
            http,
            config.ha_base_url.as_deref(),
            config.ha_token.as_deref(),
            config.ha_timeout_seconds,
        )),
        zigbee2mqtt: Arc::new(zigbee2mqtt),
        zwavejs: Arc::new(UnconfiguredZwavejsGateway),
        notifications: Arc::new(NotificationOutbox::new()),
    };

    let broadcaster = Arc::new(Broadcaster::new(clock.clone()));
    let engine = Arc::new(RulesEngine::new(
        stores.clone(),
        alarm.clone(),
        gateways.clone(),
    ));
    let dispatcher = Arc::new(RuleDispatcher::new(
        system_config.dispatcher_config(),
        clock.clone(),
        stores.clone(),
        engine.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        clock: clock.clone(),
        stores,
        system_config,
        signals: signals.clone(),
        alarm: alarm.clone(),
        broadcaster: broadcaster.clone(),
        gateways,
        engine,
        dispatcher: dispatcher.clone(),
    };

    let cancel = CancellationToken::new();
    dispatcher.start(cancel.clone());
    AlarmTimerService::new(state.clone()).start(cancel.clone());
    EntitySyncService::new(state.clone()).start(cancel.clone());
    RetentionCleanupService::new(state.clone()).start(cancel.clone());

    // Committed alarm transitions fan out to websocket clients.
    {
        let mut rx = signals.subscribe_alarm_state();
        let alarm = alarm.clone();
        let broadcaster = broadcaster.clone();
        let clock = clock.clone();
        let forward_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Ok(_) => {
                                let snapshot = alarm.current_snapshot(false, clock.now());
                                broadcaster.broadcast_alarm_state(&snapshot);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    let app = routes::router(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    tracing::info!(addr = %addr, "alarm-server-rs listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown_cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to listen for shutdown signal");
                }
            }
        }
    })
    .await?;
    cancel.cancel();
    Ok(())
}
