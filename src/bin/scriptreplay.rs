//! `scriptreplay` — replays a typescript recorded by `script`.

use clap::Parser;

use script_tty::cli::{ReplayArgs, ReplayConfig, ReplayMode};
use script_tty::error::ScriptError;
use script_tty::replay::{run_inline, run_sidecar};

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cfg: ReplayConfig) -> Result<(), ScriptError> {
    match cfg.mode {
        ReplayMode::Inline { typescript, divisor } => {
            tracing::debug!(?typescript, divisor, "replaying inline-marker typescript");
            run_inline(&typescript, divisor)
        }
        ReplayMode::Sidecar {
            timing_file,
            typescript,
            divisor,
        } => {
            tracing::debug!(?timing_file, ?typescript, divisor, "replaying via sidecar timing file");
            run_sidecar(&timing_file, &typescript, divisor)
        }
    }
}

fn main() {
    let args = ReplayArgs::parse();
    init_logging(&args.log_level);

    let code = match ReplayConfig::try_from(args) {
        Ok(cfg) => match run(cfg) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("scriptreplay: {}", e);
                e.exit_code(false)
            }
        },
        Err(e) => {
            eprintln!("scriptreplay: {}", e);
            e.exit_code(false)
        }
    };

    std::process::exit(code);
}
