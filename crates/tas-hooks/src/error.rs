//! `HookInstallError` (spec.md §7): a patch site is unsuitable, the feature
//! it would have enabled is disabled and the process continues.

#[derive(Debug, thiserror::Error)]
pub enum HookInstallError {
    #[error("symbol {0} could not be resolved via dlsym(RTLD_NEXT, ...) or any dlopen'd library")]
    SymbolNotFound(String),
    #[error("prologue of {symbol} is only {available} bytes; need at least {needed} to patch safely")]
    PrologueTooShort { symbol: String, available: usize, needed: usize },
    #[error("byte-signature scan for {0} matched {1} sites; ambiguous matches are never patched")]
    AmbiguousSignature(String, usize),
    #[error("byte-signature scan for {0} found no candidate sites")]
    SignatureNotFound(String),
    #[error("failed to allocate an executable trampoline page: {0}")]
    TrampolineAlloc(#[source] std::io::Error),
    #[error("failed to make the patch site writable: {0}")]
    MprotectFailed(#[source] std::io::Error),
}
