//! The determinism agent itself (spec.md OVERVIEW, component C6 + process
//! entry point): the piece every other crate in this workspace is a
//! building block for. `tas-agent` owns process-wide startup (logging,
//! reading the environment the controller set up), wires the other nine
//! crates together into one [`orchestrator::Agent`], and runs the
//! frame-boundary pseudo-contract for every intercepted present call.
//!
//! Logging is initialized once at startup with `simplelog::TermLogger`,
//! matching `scx_gamer`'s and `scx_chaos`'s own `ConfigBuilder` setup
//! (timestamps and source location suppressed, level driven by a verbosity
//! count) — the one difference is the agent suppresses its own log calls
//! entirely while [`tas_globalstate::is_no_log`] is set, so the logger can
//! never recursively trip the very hooks it is logging about.

pub mod env;
pub mod error;
pub mod messages;
pub mod orchestrator;

pub use error::AgentError;
pub use orchestrator::Agent;

use log::LevelFilter;

/// Install the process-wide logger. `verbosity` follows the teacher's own
/// `-v`-repeated-flag convention (0 = warn, 1 = info, 2 = debug, 3+ = trace).
pub fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = simplelog::ConfigBuilder::new();
    builder
        .set_time_level(LevelFilter::Error)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off);
    simplelog::TermLogger::init(level, builder.build(), simplelog::TerminalMode::Stderr, simplelog::ColorChoice::Auto)?;
    Ok(())
}

/// A thin wrapper around `log::<level>!` that drops the message entirely
/// while [`tas_globalstate::is_no_log`] is set (spec.md §5 "the logger must
/// not itself trigger the intercepted calls it is trying to log about").
#[macro_export]
macro_rules! agent_log {
    ($level:ident, $($arg:tt)+) => {
        if !tas_globalstate::is_no_log() {
            log::$level!($($arg)+);
        }
    };
}
