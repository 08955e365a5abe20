//! A thread's saved register file (spec.md §3 "Thread"; §4.8 restore step 5).
//!
//! One-to-one port of `ThreadInfo`'s `struct user_regs_struct regs` field:
//! the checkpoint barrier's signal handler (`tas-checkpoint`) fills this in
//! via `PTRACE_GETREGS`-equivalent in-process register capture (the
//! signal-handler's own `ucontext_t`, since the agent is in-process rather
//! than a ptrace controller of a separate process — spec.md §4.8's restore
//! step 5 "via the parked handler's sigreturn frame").

/// Raw general-purpose register file, `#[repr(C)]` so it can be written
/// verbatim into a snapshot's `threads` section (spec.md §4.8 "Snapshot
/// layout on disk per slot").
#[derive(Clone, Copy)]
#[repr(C)]
pub struct RegisterFile {
    #[cfg(target_arch = "x86_64")]
    pub regs: libc::user_regs_struct,
    #[cfg(not(target_arch = "x86_64"))]
    pub regs: [u8; 0],
}

impl Default for RegisterFile {
    fn default() -> Self {
        // SAFETY: an all-zero register file is a valid (if meaningless)
        // bit pattern for `user_regs_struct`; it is only ever replaced by a
        // real capture before being read back.
        unsafe { std::mem::zeroed() }
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile").finish_non_exhaustive()
    }
}

impl PartialEq for RegisterFile {
    fn eq(&self, other: &Self) -> bool {
        let a: &[u8] = unsafe { std::slice::from_raw_parts((self as *const Self).cast::<u8>(), std::mem::size_of::<Self>()) };
        let b: &[u8] = unsafe { std::slice::from_raw_parts((other as *const Self).cast::<u8>(), std::mem::size_of::<Self>()) };
        a == b
    }
}
impl Eq for RegisterFile {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_bitwise_zero_and_equal() {
        let a = RegisterFile::default();
        let b = RegisterFile::default();
        assert_eq!(a, b);
    }
}
