//! `script` — records a terminal session to a typescript file.

use clap::Parser;

use script_tty::cli::{RecorderConfig, ScriptArgs};
use script_tty::recorder::Recorder;

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = ScriptArgs::parse();
    init_logging(&args.log_level);

    let propagate_exit = args.propagate_exit;
    let cfg: RecorderConfig = args.into();

    let code = match Recorder::new(cfg) {
        Ok(recorder) => match recorder.run() {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "recorder failed");
                e.exit_code(propagate_exit)
            }
        },
        Err(e) => {
            eprintln!("script: {}", e);
            e.exit_code(propagate_exit)
        }
    };

    std::process::exit(code);
}
