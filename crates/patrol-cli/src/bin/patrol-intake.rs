//! `patrol-intake` – pairs patrol coordinates with environment readings and
//! appends them to a CSV log.
//!
//! Reads the `[intake]` section of the shared config file.  Stops on Ctrl-C.

use std::process::ExitCode;

use colored::Colorize;
use tokio::sync::watch;
use tracing::warn;

use patrol_cli::config;
use patrol_intake::IntakeListener;
use patrol_runtime::init_tracing;

fn main() -> ExitCode {
    let _tracing = init_tracing("patrol-intake");

    let intake = match config::load_or_init() {
        Ok(cfg) => cfg.intake_config(),
        Err(e) => return fatal(&format!("Config error: {e}")),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the log …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return fatal(&format!("Failed to start async runtime: {e}")),
    };

    let result = runtime.block_on(async {
        let mut listener = IntakeListener::bind(&intake).await?;
        println!(
            "  Listening: coordinates on {}, readings on {}",
            listener.coordinate_addr()?.to_string().bold(),
            listener.environment_addr()?.to_string().bold()
        );
        println!("  Logging to {}\n", intake.log_path.display().to_string().bold());
        listener.run(stop_rx).await?;
        Ok::<_, patrol_intake::IntakeError>(listener.rows_written())
    });

    match result {
        Ok(rows) => {
            println!("{}", format!("  ✓ {rows} row(s) written.").green());
            ExitCode::SUCCESS
        }
        Err(e) => fatal(&e.to_string()),
    }
}

fn fatal(message: &str) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), message);
    ExitCode::FAILURE
}
