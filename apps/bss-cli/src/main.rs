use std::{env, sync::Arc, time::Duration};

use anyhow::Result;
use bss_media::SimulatedMedia;
use bss_network::{
    Connector, DashboardApi, HttpApi, LocalConnector, MemoryApi, SocketIoConnector,
};
use bss_ops::init_tracing;
use bss_session::{DashboardSession, OperatorCommand};
use bss_types::{
    config::DashboardConfig,
    events::{DashboardEvent, DashboardPayload},
    session::{Operator, Role, TargetMode, TestSelection},
};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

mod ui;

#[derive(Debug, Parser)]
#[command(name = "bss-cli", about = "Operator console for the BSS surveillance backend")]
struct Args {
    /// TOML config file; falls back to BSS_CONFIG, then configs/dev.toml.
    config: Option<String>,
    /// Bearer token for the backend. Overrides the config file.
    #[arg(long)]
    token: Option<String>,
    /// Log dashboard events instead of drawing the terminal UI.
    #[arg(long)]
    headless: bool,
    /// Run against an in-process backend with no network access.
    #[arg(long)]
    offline: bool,
    #[arg(long)]
    rgb: Option<String>,
    #[arg(long)]
    tir: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.clone());
    if let Some(token) = args.token.clone().or_else(|| env::var("BSS_TOKEN").ok()) {
        config.backend.auth_token = Some(token);
    }
    if args.offline && config.backend.auth_token.is_none() {
        config.backend.auth_token = Some("offline".into());
    }
    // The terminal UI owns stdout, so log lines are only emitted headless.
    if args.headless {
        init_tracing(&config.ops)?;
    }

    let (connector, api) = backend(&config, args.offline)?;
    let mut session = DashboardSession::new(
        &config,
        connector,
        api,
        SimulatedMedia::new("rgb", 0.0),
        SimulatedMedia::new("tir", 0.0),
    );
    let bus = session.subscribe();
    session.boot().await;

    let (commands, commands_rx) = mpsc::channel(32);
    let runner = tokio::spawn(async move { session.run(commands_rx).await });

    let selection = TestSelection {
        rgb_source: args.rgb,
        thermal_source: args.tir,
        model: args.model,
    };
    let summary = format!(
        "{} / cameras {:?}",
        config.backend.ws_url,
        config.dashboard.camera_ids.iter().map(|c| c.0).collect::<Vec<_>>()
    );

    if args.headless {
        headless(bus, commands.clone(), selection, &config.backend.api_url).await?;
    } else {
        let ui_commands = commands.clone();
        let (ui_tx, ui_rx) = std::sync::mpsc::channel();
        let forwarder = tokio::spawn(ui::forward_bus(bus, ui_tx));
        let api_base = config.backend.api_url.clone();
        tokio::task::spawn_blocking(move || {
            ui::run(ui_rx, ui_commands, selection, summary, api_base)
        })
        .await??;
        forwarder.abort();
    }

    let _ = commands.send(OperatorCommand::Shutdown).await;
    runner.await??;
    Ok(())
}

fn backend(
    config: &DashboardConfig,
    offline: bool,
) -> Result<(Arc<dyn Connector>, Arc<dyn DashboardApi>)> {
    if offline {
        let operator = Operator {
            id: 1,
            username: "offline".into(),
            role: Role::Admin,
        };
        let api = MemoryApi::new(operator, config.dashboard.fallback_model.clone()).with_catalog(
            vec![config.dashboard.fallback_model.clone()],
            vec!["sample_rgb.mp4".into(), "sample_tir.mp4".into()],
        );
        return Ok((Arc::new(LocalConnector::new()), Arc::new(api)));
    }

    let api = HttpApi::new(
        config.backend.api_url.clone(),
        config.backend.auth_token.clone(),
        Duration::from_millis(config.backend.request_timeout_ms),
    )?;
    Ok((
        Arc::new(SocketIoConnector::new(config.backend.ws_url.clone())),
        Arc::new(api),
    ))
}

async fn headless(
    mut bus: broadcast::Receiver<DashboardEvent>,
    commands: mpsc::Sender<OperatorCommand>,
    selection: TestSelection,
    api_base: &str,
) -> Result<()> {
    if selection != TestSelection::default() {
        commands
            .send(OperatorCommand::SwitchMode(TargetMode::Test))
            .await?;
        commands.send(OperatorCommand::StartTest(selection)).await?;
    }

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupt received; shutting down");
                break;
            }
            event = bus.recv() => match event {
                Ok(event) => match &event.payload {
                    DashboardPayload::Alarm(_) => warn!("{}", ui::format_event(&event)),
                    DashboardPayload::LiveFrame(_) | DashboardPayload::TestFrame(_) => {
                        debug!("{}", ui::format_event(&event))
                    }
                    DashboardPayload::FeedUpdated(feed) => {
                        let recording = feed
                            .entries
                            .first()
                            .and_then(|newest| newest.recording_url(api_base));
                        match recording {
                            Some(url) => info!(recording = %url, "{}", ui::format_event(&event)),
                            None => info!("{}", ui::format_event(&event)),
                        }
                    }
                    _ => info!("{}", ui::format_event(&event)),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

fn load_config(from_args: Option<String>) -> DashboardConfig {
    let from_env = env::var("BSS_CONFIG").ok();
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| "configs/dev.toml".into());
    match DashboardConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                default_config()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            default_config()
        }
    }
}

fn default_config() -> DashboardConfig {
    let config = DashboardConfig::default();
    debug_assert!(config.validate().is_ok());
    config
}
