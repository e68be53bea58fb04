//! Driver: evaluate a pipeline configuration file.
use std::process::ExitCode;

use log::error;

use libtrace_pipeline::config::evaluate;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = std::env::args();
    let prog = args.next().unwrap_or_else(|| "libtrace_evaluate".into());
    let config = match (args.next(), args.next()) {
        (Some(path), None) => path,
        _ => {
            error!("Usage: {} [cfg filename]", prog);
            return ExitCode::FAILURE;
        }
    };

    let text = match std::fs::read_to_string(&config) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to open config file {}: {}", config, e);
            return ExitCode::FAILURE;
        }
    };

    match evaluate(&text) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("pipeline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
