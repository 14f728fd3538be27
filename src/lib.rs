//! Terminal session recorder and replayer: a from-scratch `script` /
//! `scriptreplay` pair. See `SPEC_FULL.md` for the full behavioral spec.

pub mod buffer;
pub mod cli;
pub mod error;
pub mod markers;
pub mod pty;
pub mod recorder;
pub mod replay;
pub mod signal;
pub mod term;
pub mod writer;

pub use error::ScriptError;
