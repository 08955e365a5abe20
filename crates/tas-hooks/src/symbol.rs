//! Symbol shadowing: the agent is preloaded ahead of every other library, so
//! its own definition of a hooked name wins the dynamic linker's first-hit
//! rule (spec.md §4.1). The original is recovered via a two-phase
//! resolution ported from `hook.cpp`'s `link_function`: `dlsym(RTLD_NEXT,
//! ...)` first, then a library the game itself has `dlopen`ed (tracked via
//! `dlhook.cpp`'s `find_lib`/`add_lib`), then `dlopen`ing the named library
//! directly.

use std::collections::HashSet;
use std::ffi::{c_void, CStr, CString};
use std::sync::{Mutex, RwLock};

/// Tracks libraries the game has `dlopen`ed (`dlhook.cpp`'s `get_lib_set`)
/// and the resolved address of every original function the hook layer has
/// looked up so far.
#[derive(Default)]
pub struct HookRegistry {
    dlopened_libs: Mutex<HashSet<String>>,
    originals: RwLock<std::collections::HashMap<String, usize>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry::default()
    }

    /// Record a library the game itself opened, so later symbol resolution
    /// can fall back to it (`dlhook.cpp`'s `add_lib`).
    pub fn note_dlopen(&self, path: &str) {
        self.dlopened_libs.lock().unwrap().insert(path.to_owned());
    }

    /// First previously-noted library path containing `substr`
    /// (`dlhook.cpp`'s `find_lib`).
    pub fn find_lib(&self, substr: &str) -> Option<String> {
        self.dlopened_libs.lock().unwrap().iter().find(|lib| lib.contains(substr)).cloned()
    }

    /// Two-phase resolution of `name`'s real implementation, mirroring
    /// `link_function`: try the global namespace first via
    /// `dlsym(RTLD_NEXT, ...)`; on failure, try a library the game has
    /// already `dlopen`ed that matches `fallback_lib`; finally try
    /// `dlopen`ing `fallback_lib` directly.
    ///
    /// # Safety
    /// Calls into libc's dynamic linker; `name` must be the C name of an
    /// actual exported symbol. Must be called under the agent's `native`
    /// scope so the resolution itself doesn't recurse into the hook layer
    /// (spec.md §4.2).
    pub unsafe fn resolve(&self, name: &str, fallback_lib: Option<&str>) -> Result<*mut c_void, crate::error::HookInstallError> {
        let cname = CString::new(name).expect("symbol name must not contain an interior NUL");

        let addr = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
        if !addr.is_null() {
            self.record_original(name, addr);
            return Ok(addr);
        }

        if let Some(lib) = fallback_lib {
            if let Some(known_path) = self.find_lib(lib) {
                if let Some(addr) = self.try_dlopen_and_sym(&known_path, &cname) {
                    self.record_original(name, addr);
                    return Ok(addr);
                }
            }
            if let Some(addr) = self.try_dlopen_and_sym(lib, &cname) {
                self.note_dlopen(lib);
                self.record_original(name, addr);
                return Ok(addr);
            }
        }

        Err(crate::error::HookInstallError::SymbolNotFound(name.to_owned()))
    }

    unsafe fn try_dlopen_and_sym(&self, lib_path: &str, symbol: &CStr) -> Option<*mut c_void> {
        let lib_cstr = CString::new(lib_path).ok()?;
        let handle = libc::dlopen(lib_cstr.as_ptr(), libc::RTLD_LAZY);
        if handle.is_null() {
            return None;
        }
        let addr = libc::dlsym(handle, symbol.as_ptr());
        if addr.is_null() {
            None
        } else {
            Some(addr)
        }
    }

    fn record_original(&self, name: &str, addr: *mut c_void) {
        self.originals.write().unwrap().insert(name.to_owned(), addr as usize);
    }

    pub fn original(&self, name: &str) -> Option<*mut c_void> {
        self.originals.read().unwrap().get(name).map(|&a| a as *mut c_void)
    }
}

/// Whether `name`, as the dynamic linker would resolve it from inside the
/// game (`dlsym(RTLD_DEFAULT, ...)`), lives in the main executable rather
/// than a shared library (spec.md §8 scenario 6: a statically-linked,
/// directly-called copy of a symbol is immune to shadowing and must be
/// reached by patching its prologue instead). Classifies by asking
/// `dladdr` which mapped object the resolved address falls inside and
/// checking whether that object's path looks like a shared library.
///
/// # Safety
/// Calls into libc's dynamic linker; must be run under the agent's
/// `native` scope like [`HookRegistry::resolve`].
pub unsafe fn is_main_executable_symbol(name: &str) -> Result<bool, crate::error::HookInstallError> {
    let cname = CString::new(name).expect("symbol name must not contain an interior NUL");
    let addr = libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr());
    if addr.is_null() {
        return Err(crate::error::HookInstallError::SymbolNotFound(name.to_owned()));
    }

    let mut info: libc::Dl_info = std::mem::zeroed();
    if libc::dladdr(addr, &mut info) == 0 || info.dli_fname.is_null() {
        return Err(crate::error::HookInstallError::SymbolNotFound(name.to_owned()));
    }
    let containing_path = CStr::from_ptr(info.dli_fname).to_string_lossy();
    Ok(!is_shared_object_path(&containing_path))
}

fn is_shared_object_path(path: &str) -> bool {
    path.contains(".so")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_and_find_lib_substring_match() {
        let registry = HookRegistry::new();
        registry.note_dlopen("/usr/lib/x86_64-linux-gnu/libSDL2-2.0.so.0");
        assert_eq!(registry.find_lib("libSDL2").as_deref(), Some("/usr/lib/x86_64-linux-gnu/libSDL2-2.0.so.0"));
        assert_eq!(registry.find_lib("libnonexistent"), None);
    }

    #[test]
    fn resolve_finds_a_real_libc_symbol_via_rtld_next() {
        let registry = HookRegistry::new();
        // `abs` is guaranteed present in the C library this test process is
        // already linked against, so RTLD_NEXT resolution succeeds without
        // needing any fallback library.
        let addr = unsafe { registry.resolve("abs", None) };
        assert!(addr.is_ok());
        assert!(registry.original("abs").is_some());
    }

    #[test]
    fn resolve_reports_symbol_not_found_for_garbage_name() {
        let registry = HookRegistry::new();
        let result = unsafe { registry.resolve("definitely_not_a_real_symbol_xyz123", None) };
        assert!(result.is_err());
    }
}
