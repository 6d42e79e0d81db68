//! `patrol` – runs the waypoint patrol.
//!
//! 1. Loads `~/.patrol/config.toml`, writing the defaults on first run.
//! 2. Connects to the navigation service (rosbridge, or the built-in
//!    simulator with `PATROL_GATEWAY=sim`).
//! 3. Visits the configured waypoints in order, forever, announcing each
//!    one it reaches over UDP.
//! 4. On **Ctrl-C**, cancels the goal in flight and exits.

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tracing::warn;

use patrol_cli::config::{self, Config, GatewayKind};
use patrol_middleware::{ActionGateway, EventBus, NavBridgeGateway, SimNavigator, UdpTelemetryEmitter};
use patrol_runtime::{PatrolLoop, init_tracing};
use patrol_types::{EventPayload, GoalOutcome};

fn main() -> ExitCode {
    let _tracing = init_tracing("patrol");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok(cfg) => cfg,
        Err(e) => return fatal(&format!("Config error: {e}")),
    };
    println!(
        "  Config: {}",
        config::config_path().display().to_string().bold()
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – cancelling the active goal …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the patrol can only be killed");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return fatal(&format!("Failed to start async runtime: {e}")),
    };

    match runtime.block_on(run(cfg, stop_rx)) {
        Ok(()) => {
            println!("{}", "  ✓ Patrol stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => fatal(&e),
    }
}

async fn run(cfg: Config, shutdown: watch::Receiver<bool>) -> Result<(), String> {
    let loop_config = cfg.loop_config()?;
    let target = cfg.telemetry_target()?;
    let emitter = UdpTelemetryEmitter::bind(target)
        .await
        .map_err(|e| e.to_string())?;

    let nav = &cfg.navigation;
    let gateway: Arc<dyn ActionGateway> = match nav.gateway {
        GatewayKind::Bridge => Arc::new(NavBridgeGateway::new(
            nav.bridge_url.clone(),
            nav.action_name.clone(),
            nav.action_type.clone(),
        )),
        GatewayKind::Sim => Arc::new(SimNavigator::new()),
    };

    println!(
        "  Gateway: {} {}",
        nav.gateway.to_string().bold(),
        match nav.gateway {
            GatewayKind::Bridge => nav.bridge_url.dimmed().to_string(),
            GatewayKind::Sim => String::new(),
        }
    );
    println!("  Telemetry → {}", target.to_string().bold());
    println!("  {} waypoint(s) in the cycle\n", loop_config.waypoints.len());

    let bus = EventBus::default();
    let progress = tokio::spawn(print_progress(bus.clone()));

    let mut patrol = PatrolLoop::new(loop_config, gateway, Arc::new(emitter))
        .map_err(|e| e.to_string())?
        .with_bus(bus);
    let result = patrol.run(shutdown).await.map_err(|e| e.to_string());
    progress.abort();
    result
}

fn is_progress(payload: &EventPayload) -> bool {
    matches!(
        payload,
        EventPayload::GoalFinished(_)
            | EventPayload::CycleWrapped { .. }
            | EventPayload::FailureStreak { .. }
    )
}

/// One line per finished goal, plus streak and wrap notices.
async fn print_progress(bus: EventBus) {
    let mut progress = bus.subscribe_where(is_progress);
    while let Some(event) = progress.recv().await {
        match event.payload {
            EventPayload::GoalFinished(report) => {
                let outcome = report.outcome.to_string();
                let outcome = match report.outcome {
                    GoalOutcome::Completed => outcome.green(),
                    GoalOutcome::TimedOut => outcome.yellow(),
                    _ => outcome.red(),
                };
                println!(
                    "  [{:>2}] ({:.2}, {:.2}) {} in {:.1}s",
                    report.waypoint_index,
                    report.waypoint.x,
                    report.waypoint.y,
                    outcome,
                    report.elapsed.as_secs_f64()
                );
            }
            EventPayload::CycleWrapped { laps } => {
                println!("{}", format!("  ↺ lap {laps} complete").cyan());
            }
            EventPayload::FailureStreak { count } => {
                println!(
                    "{}",
                    format!("  ⚠ {count} goals in a row missed their waypoint").yellow()
                );
            }
            _ => {}
        }
    }
}

fn fatal(message: &str) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), message);
    ExitCode::FAILURE
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___       __           __"#.bold().cyan());
    println!("{}", r#"  / _ \___ _/ /________  / /"#.bold().cyan());
    println!("{}", r#" / ___/ _ `/ __/ __/ _ \/ / "#.bold().cyan());
    println!("{}", r#"/_/   \_,_/\__/_/  \___/_/  "#.bold().cyan());
    println!();
    println!("  {} {}", "patrol".bold(), env!("CARGO_PKG_VERSION").dimmed());
    println!("  Waypoint patrol with per-leg deadlines");
    println!();
}
