//! Symbol-hook layer (spec.md §4.1, component C1): divert a fixed list of
//! symbol names to agent-provided replacements, by two techniques tried in
//! order — dynamic-linker symbol shadowing, then prologue patching with a
//! trampoline — plus byte-signature scanning for symbols absent from
//! stripped binaries.

pub mod error;
pub mod signature;
pub mod symbol;
pub mod trampoline;

pub use error::HookInstallError;
pub use signature::{MatchResult, Signature};
pub use symbol::{is_main_executable_symbol, HookRegistry};
pub use trampoline::{validate_patch_site, Trampoline};
