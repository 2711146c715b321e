use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, warn};
use zoomin::config::Cli;
use zoomin::signals::ControlSignals;

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new().filter_level(cli.log_level).parse_default_env().init();

    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid Settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let signals = Arc::new(ControlSignals::new());

    // Ctrl+C behaves like Shift+Esc.
    {
        let signals = signals.clone();
        if let Err(e) = ctrlc::set_handler(move || signals.request_exit()) {
            warn!("Failed To Set Ctrl+C Handler: {e}");
        }
    }

    run(&settings, signals)
}

#[cfg(windows)]
fn run(settings: &zoomin::config::Settings, signals: Arc<ControlSignals>) -> ExitCode {
    match zoomin::app::run(settings, signals) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

#[cfg(not(windows))]
fn run(_settings: &zoomin::config::Settings, _signals: Arc<ControlSignals>) -> ExitCode {
    error!("Zoomin Requires Windows 10 Or Later");
    ExitCode::FAILURE
}
