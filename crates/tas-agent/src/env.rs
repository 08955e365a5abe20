//! Narrow, typed environment-variable reads the agent performs at startup
//! (spec.md §6: "Path to itself (for re-exec on 32-bit child processes)";
//! "Initial `SharedConfig` delivered over the control socket before any
//! game code runs" implies the socket *address* itself must come from the
//! environment, since the agent has no argv of its own to repurpose).
//!
//! Grounded on the narrow, typed environment accessors the teacher uses for
//! its own startup configuration (e.g. `scx_utils::build_id`), rather than
//! a general-purpose config/env crate — there are only three variables to
//! read, and each has exactly one valid shape.

use std::path::PathBuf;

const SELF_PATH_VAR: &str = "TAS_AGENT_SELF_PATH";
const CONTROL_SOCKET_VAR: &str = "TAS_CONTROL_SOCKET";
const SIGNAL_BASE_VAR: &str = "TAS_BARRIER_SIGNAL_BASE";

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("{0} is not set; the controller must set it before exec'ing the game")]
    Missing(&'static str),
    #[error("{0}={1:?} is not a valid signal number")]
    InvalidSignalBase(&'static str, String),
}

/// Absolute path to the agent's own shared object, used to re-exec a
/// 32-bit child process with the matching 32-bit build preloaded (spec.md
/// §6).
pub fn self_path() -> Result<PathBuf, EnvError> {
    std::env::var_os(SELF_PATH_VAR).map(PathBuf::from).ok_or(EnvError::Missing(SELF_PATH_VAR))
}

/// Filesystem or abstract path of the control socket the controller is
/// already listening on when the agent starts.
pub fn control_socket_path() -> Result<String, EnvError> {
    std::env::var(CONTROL_SOCKET_VAR).map_err(|_| EnvError::Missing(CONTROL_SOCKET_VAR))
}

/// The lowest free realtime signal the controller has announced for this
/// run (spec.md §6: "the lowest free one at startup, announced to the
/// controller"). Defaults to `SIGRTMIN` if unset, matching a
/// controller-less manual run against the harness.
pub fn barrier_signal_base() -> Result<i32, EnvError> {
    match std::env::var(SIGNAL_BASE_VAR) {
        Err(_) => Ok(unsafe { libc::SIGRTMIN() }),
        Ok(raw) => raw.parse::<i32>().map_err(|_| EnvError::InvalidSignalBase(SIGNAL_BASE_VAR, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_self_path_is_reported() {
        std::env::remove_var(SELF_PATH_VAR);
        assert!(matches!(self_path(), Err(EnvError::Missing(SELF_PATH_VAR))));
    }

    #[test]
    fn missing_control_socket_is_reported() {
        std::env::remove_var(CONTROL_SOCKET_VAR);
        assert!(matches!(control_socket_path(), Err(EnvError::Missing(CONTROL_SOCKET_VAR))));
    }

    #[test]
    fn signal_base_defaults_when_unset() {
        std::env::remove_var(SIGNAL_BASE_VAR);
        assert!(barrier_signal_base().is_ok());
    }

    #[test]
    fn signal_base_rejects_non_numeric_values() {
        std::env::set_var(SIGNAL_BASE_VAR, "not-a-number");
        assert!(barrier_signal_base().is_err());
        std::env::remove_var(SIGNAL_BASE_VAR);
    }
}
