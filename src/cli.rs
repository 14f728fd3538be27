//! CLI surface (C9): `clap`-derived argument structs for both binaries,
//! mapped onto the runtime config structs the recorder/replayer consume.

use std::path::PathBuf;

use clap::Parser;

use crate::error::ScriptError;

/// Record a terminal session to a typescript file.
#[derive(Parser, Debug)]
#[command(name = "script", version, about = "Record a terminal session")]
pub struct ScriptArgs {
    /// Append the output to the file instead of truncating it
    #[arg(short = 'a', long = "append")]
    pub append: bool,

    /// Run <command> instead of an interactive shell
    #[arg(short = 'c', long = "command", value_name = "command")]
    pub command: Option<String>,

    /// Return the same exit code as the recorded command
    #[arg(short = 'e', long = "return")]
    pub propagate_exit: bool,

    /// Flush the typescript to disk after every write
    #[arg(short = 'f', long = "flush")]
    pub flush: bool,

    /// Suppress the start/stop messages and the typescript header/footer
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Emit `sec.usec nbytes` timing lines on stderr for each pty read
    #[arg(short = 't', long = "timing")]
    pub timing_trace: bool,

    /// Diagnostic log verbosity (error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Typescript file to write (default: `typescript`)
    pub file: Option<PathBuf>,
}

/// Configuration consumed by the recorder event loop, derived from
/// [`ScriptArgs`] once at startup (I6).
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub path: PathBuf,
    pub path_was_default: bool,
    pub append: bool,
    pub command: Option<String>,
    pub propagate_exit: bool,
    pub flush_each_write: bool,
    pub quiet: bool,
    pub timing_trace: bool,
}

impl From<ScriptArgs> for RecorderConfig {
    fn from(args: ScriptArgs) -> Self {
        let path_was_default = args.file.is_none();
        let path = args.file.unwrap_or_else(|| PathBuf::from("typescript"));
        RecorderConfig {
            path,
            path_was_default,
            append: args.append,
            command: args.command,
            propagate_exit: args.propagate_exit,
            flush_each_write: args.flush,
            quiet: args.quiet,
            timing_trace: args.timing_trace,
        }
    }
}

/// Replay a recorded typescript file.
///
/// Three forms are accepted, matching `original_source/scriptreplay.c`
/// and `SPEC_FULL.md` §4.8:
///   `scriptreplay <timingfile> <typescript> [<divisor>]` — legacy
///   sidecar-timing mode; `scriptreplay <typescript>` when the sole
///   positional is itself a typescript carrying inline delay markers;
///   or `scriptreplay --typescript <path> [<divisor>]` to select inline
///   mode explicitly while still supplying a divisor (the plain
///   two-positional form `<typescript> <divisor>` is indistinguishable
///   from sidecar mode's `<timingfile> <typescript>`, so the flag is the
///   unambiguous way to reach "inline mode at divisor N").
#[derive(Parser, Debug)]
#[command(name = "scriptreplay", version, about = "Replay a recorded terminal session")]
pub struct ReplayArgs {
    /// Replay this typescript in inline-marker mode; the sole positional
    /// (if any) is then the divisor rather than a timing file
    #[arg(long = "typescript", value_name = "typescript")]
    pub typescript_flag: Option<PathBuf>,

    /// Legacy timing file, a bare inline-marker typescript, or (with
    /// `--typescript`) the divisor
    pub first: Option<String>,

    /// Typescript file, when `first` is a legacy timing file
    pub second: Option<String>,

    /// Scale all delays by this divisor (larger = faster playback)
    pub third: Option<String>,

    /// Diagnostic log verbosity (error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub enum ReplayMode {
    /// Single typescript, inline APC markers drive pacing.
    Inline { typescript: PathBuf, divisor: f64 },
    /// Legacy sidecar timing file paces fixed-size emits.
    Sidecar {
        timing_file: PathBuf,
        typescript: PathBuf,
        divisor: f64,
    },
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub mode: ReplayMode,
}

fn parse_divisor(s: &str) -> Result<f64, ScriptError> {
    s.parse().map_err(|_| ScriptError::Usage(format!("invalid divisor: {}", s)))
}

fn validate_divisor(divisor: f64) -> Result<(), ScriptError> {
    if divisor <= 0.0 || !divisor.is_finite() {
        return Err(ScriptError::Usage(format!("invalid divisor: {}", divisor)));
    }
    Ok(())
}

impl TryFrom<ReplayArgs> for ReplayConfig {
    type Error = ScriptError;

    fn try_from(args: ReplayArgs) -> Result<Self, ScriptError> {
        let mode = if let Some(typescript) = args.typescript_flag {
            // `--typescript <path>` selects inline mode explicitly; a
            // lone leftover positional is the divisor, not a timing file.
            if args.second.is_some() || args.third.is_some() {
                return Err(ScriptError::Usage(
                    "--typescript accepts at most one positional (the divisor)".into(),
                ));
            }
            let divisor = match args.first {
                Some(d) => parse_divisor(&d)?,
                None => 1.0,
            };
            ReplayMode::Inline { typescript, divisor }
        } else {
            let first = args
                .first
                .ok_or_else(|| ScriptError::Usage("a timing file or typescript is required".into()))?;
            match (args.second, args.third) {
                (None, None) => ReplayMode::Inline {
                    typescript: PathBuf::from(first),
                    divisor: 1.0,
                },
                (Some(typescript), divisor) => ReplayMode::Sidecar {
                    timing_file: PathBuf::from(first),
                    typescript: PathBuf::from(typescript),
                    divisor: match divisor {
                        Some(d) => parse_divisor(&d)?,
                        None => 1.0,
                    },
                },
                (None, Some(_)) => {
                    return Err(ScriptError::Usage(
                        "a divisor requires both a timing file and a typescript".into(),
                    ))
                }
            }
        };
        if let ReplayMode::Inline { divisor, .. } | ReplayMode::Sidecar { divisor, .. } = &mode {
            validate_divisor(*divisor)?;
        }
        Ok(ReplayConfig { mode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(
        typescript_flag: Option<&str>,
        first: Option<&str>,
        second: Option<&str>,
        third: Option<&str>,
    ) -> ReplayArgs {
        ReplayArgs {
            typescript_flag: typescript_flag.map(PathBuf::from),
            first: first.map(String::from),
            second: second.map(String::from),
            third: third.map(String::from),
            log_level: "info".into(),
        }
    }

    #[test]
    fn single_positional_is_inline_mode() {
        let cfg = ReplayConfig::try_from(args(None, Some("typescript"), None, None)).unwrap();
        assert!(matches!(cfg.mode, ReplayMode::Inline { divisor, .. } if divisor == 1.0));
    }

    #[test]
    fn two_positionals_is_sidecar_mode() {
        let cfg =
            ReplayConfig::try_from(args(None, Some("timing"), Some("typescript"), Some("2.0")))
                .unwrap();
        match cfg.mode {
            ReplayMode::Sidecar { divisor, .. } => assert_eq!(divisor, 2.0),
            _ => panic!("expected sidecar mode"),
        }
    }

    #[test]
    fn typescript_flag_with_divisor_is_inline_mode() {
        // The form SPEC_FULL.md §4.8 requires: `--typescript <path> <divisor>`
        // must reach inline mode at that divisor, not sidecar mode.
        let cfg = ReplayConfig::try_from(args(Some("out.ts"), Some("2.0"), None, None)).unwrap();
        match cfg.mode {
            ReplayMode::Inline { typescript, divisor } => {
                assert_eq!(typescript, PathBuf::from("out.ts"));
                assert_eq!(divisor, 2.0);
            }
            _ => panic!("expected inline mode"),
        }
    }

    #[test]
    fn typescript_flag_without_divisor_defaults_to_one() {
        let cfg = ReplayConfig::try_from(args(Some("out.ts"), None, None, None)).unwrap();
        assert!(matches!(cfg.mode, ReplayMode::Inline { divisor, .. } if divisor == 1.0));
    }

    #[test]
    fn typescript_flag_rejects_extra_positionals() {
        assert!(ReplayConfig::try_from(args(Some("out.ts"), Some("2.0"), Some("extra"), None))
            .is_err());
    }

    #[test]
    fn divisor_without_typescript_is_usage_error() {
        let cfg = ReplayConfig::try_from(args(None, Some("timing"), None, Some("2.0")));
        assert!(cfg.is_err());
    }

    #[test]
    fn non_positive_divisor_is_usage_error() {
        let cfg = ReplayConfig::try_from(args(None, Some("typescript"), Some("ts"), Some("0.0")));
        assert!(cfg.is_err());
    }

    #[test]
    fn non_numeric_divisor_is_usage_error() {
        let cfg = ReplayConfig::try_from(args(None, Some("typescript"), Some("ts"), Some("nope")));
        assert!(cfg.is_err());
    }

    #[test]
    fn missing_first_positional_is_usage_error() {
        assert!(ReplayConfig::try_from(args(None, None, None, None)).is_err());
    }
}
