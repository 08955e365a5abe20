//! Checkpoint barrier: park every non-main thread in a signal handler so the
//! checkpoint engine can capture a consistent snapshot in-process, without
//! forking or ptracing the game (spec.md §4.8 "Barrier", §5 concurrency
//! model).
//!
//! Grounded on `AltStack.cpp`'s save/prepare/restore-stack sequence: this
//! port keeps the same three-step shape (save the game's existing
//! `sigaltstack`, install the agent's own reserved alternate stack before
//! raising the barrier signal, restore the game's on release) even though
//! the reserved memory here is a plain heap allocation leaked for the
//! process lifetime rather than the original's fixed reserved-memory
//! region, since this port has no need for a fixed address.

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use tas_threads::registers::RegisterFile;
use tas_threads::registry::{Tid, ThreadRegistry};
use tas_threads::state::ThreadState;

use crate::error::RestoreError;

const ALT_STACK_SIZE: usize = 64 * 1024;

/// Real-time signal used to park threads at the barrier, chosen past the
/// handful of signals glibc's NPTL reserves for its own internal use.
fn barrier_signal() -> c_int {
    unsafe { libc::SIGRTMIN() + 3 }
}

static PARKED_REGISTERS: Lazy<Mutex<HashMap<Tid, RegisterFile>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static PENDING_RESTORE: Lazy<Mutex<HashMap<Tid, RegisterFile>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static PARKED_COUNT: AtomicUsize = AtomicUsize::new(0);
static RELEASE: AtomicBool = AtomicBool::new(false);

/// Queue `regs` to be written back into `tid`'s own ucontext the next time
/// it is parked at (or parks at) the barrier, so that when its handler
/// returns the kernel's sigreturn resumes it with the restored register
/// file rather than the one it parked with (spec.md §4.8 restore step 5:
/// "each parked thread's saved registers are written back... and it
/// resumes past the point where it parked").
pub fn queue_register_restore(tid: Tid, regs: RegisterFile) {
    PENDING_RESTORE.lock().unwrap().insert(tid, regs);
}

extern "C" fn handle_barrier_signal(_sig: c_int, _info: *mut libc::siginfo_t, ctx: *mut c_void) {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) as Tid };
    let regs = unsafe { capture_registers(ctx) };
    if let Ok(mut map) = PARKED_REGISTERS.lock() {
        map.insert(tid, regs);
    }
    PARKED_COUNT.fetch_add(1, Ordering::SeqCst);
    while !RELEASE.load(Ordering::Acquire) {
        std::hint::spin_loop();
    }
    if let Some(restored) = PENDING_RESTORE.lock().unwrap().remove(&tid) {
        unsafe { apply_registers(ctx, &restored) };
    }
    PARKED_COUNT.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(target_arch = "x86_64")]
unsafe fn capture_registers(ctx: *mut c_void) -> RegisterFile {
    // The kernel pushes the interrupted thread's general-purpose registers
    // into the signal frame's `ucontext_t` before invoking the handler;
    // reading them back here is this port's in-process substitute for
    // `PTRACE_GETREGS` (spec.md §4.8 restore step 5).
    let ucontext = ctx.cast::<libc::ucontext_t>();
    let gregs = &(*ucontext).uc_mcontext.gregs;
    let mut file = RegisterFile::default();
    let src = std::slice::from_raw_parts(gregs.as_ptr().cast::<u8>(), std::mem::size_of_val(gregs));
    let dst = std::slice::from_raw_parts_mut((&mut file.regs as *mut libc::user_regs_struct).cast::<u8>(), std::mem::size_of::<libc::user_regs_struct>());
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    file
}

/// Inverse of [`capture_registers`]: overwrite the signal frame's
/// `ucontext_t` so the kernel's sigreturn resumes the thread with
/// `restored`'s register values instead of the ones it actually parked
/// with. This is this port's in-process substitute for `PTRACE_SETREGS`
/// followed by `PTRACE_CONT` (spec.md §4.8 restore step 5).
#[cfg(target_arch = "x86_64")]
unsafe fn apply_registers(ctx: *mut c_void, restored: &RegisterFile) {
    let ucontext = ctx.cast::<libc::ucontext_t>();
    let gregs = &mut (*ucontext).uc_mcontext.gregs;
    let src = std::slice::from_raw_parts((&restored.regs as *const libc::user_regs_struct).cast::<u8>(), std::mem::size_of::<libc::user_regs_struct>());
    let dst = std::slice::from_raw_parts_mut(gregs.as_mut_ptr().cast::<u8>(), std::mem::size_of_val(gregs));
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn apply_registers(_ctx: *mut c_void, _restored: &RegisterFile) {}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn capture_registers(_ctx: *mut c_void) -> RegisterFile {
    RegisterFile::default()
}

/// Owns the reserved alternate signal stack and the previously-installed
/// handler/altstack the barrier temporarily displaces, so both can be
/// restored once a checkpoint round is over.
pub struct CheckpointBarrier {
    alt_stack: Vec<u8>,
    saved_altstack: libc::stack_t,
    installed: bool,
}

impl CheckpointBarrier {
    pub fn new() -> Self {
        CheckpointBarrier {
            alt_stack: vec![0u8; ALT_STACK_SIZE],
            saved_altstack: libc::stack_t { ss_sp: std::ptr::null_mut(), ss_flags: 0, ss_size: 0 },
            installed: false,
        }
    }

    /// Install the barrier's signal handler and alternate stack. Must run
    /// once before the first [`raise`](Self::raise) call; idempotent.
    pub fn install(&mut self) -> std::io::Result<()> {
        if self.installed {
            return Ok(());
        }
        unsafe {
            let mut oss: libc::stack_t = std::mem::zeroed();
            if libc::sigaltstack(std::ptr::null(), &mut oss) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            self.saved_altstack = oss;

            let ss = libc::stack_t {
                ss_sp: self.alt_stack.as_mut_ptr().cast::<c_void>(),
                ss_flags: 0,
                ss_size: self.alt_stack.len(),
            };
            if libc::sigaltstack(&ss, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_barrier_signal as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(barrier_signal(), &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        self.installed = true;
        Ok(())
    }

    /// Send the barrier signal to every `other_tids` of `registry`, and
    /// busy-wait (with the polling interval the spec leaves unspecified
    /// fixed at 100us) until either all of them have parked or `timeout`
    /// elapses.
    pub fn raise(&self, registry: &ThreadRegistry, own_tid: Tid, timeout: Duration) -> Result<(), RestoreError> {
        RELEASE.store(false, Ordering::SeqCst);
        PARKED_COUNT.store(0, Ordering::SeqCst);
        PARKED_REGISTERS.lock().unwrap().clear();

        let targets = registry.other_tids(own_tid);
        for tid in &targets {
            registry.set_state(*tid, ThreadState::AtCheckpointBarrier);
            unsafe {
                libc::syscall(libc::SYS_tgkill, libc::getpid(), *tid, barrier_signal());
            }
        }

        let deadline = Instant::now() + timeout;
        while PARKED_COUNT.load(Ordering::SeqCst) < targets.len() {
            if Instant::now() >= deadline {
                return Err(RestoreError::BarrierTimeout { expected: targets.len(), parked: PARKED_COUNT.load(Ordering::SeqCst) });
            }
            std::thread::sleep(Duration::from_micros(100));
        }

        for tid in &targets {
            if let Some(regs) = PARKED_REGISTERS.lock().unwrap().get(tid) {
                registry.save_registers(*tid, *regs);
            }
        }
        Ok(())
    }

    /// Release every thread parked by the last [`raise`](Self::raise) call
    /// and wait for them to leave the handler.
    pub fn release(&self, registry: &ThreadRegistry, own_tid: Tid) {
        RELEASE.store(true, Ordering::Release);
        while PARKED_COUNT.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_micros(100));
        }
        for tid in registry.other_tids(own_tid) {
            registry.set_state(tid, ThreadState::Running);
        }
    }

    /// Restore whatever alternate stack the game had installed before
    /// [`install`](Self::install) ran.
    pub fn uninstall(&mut self) {
        if !self.installed {
            return;
        }
        unsafe {
            libc::sigaltstack(&self.saved_altstack, std::ptr::null_mut());
        }
        self.installed = false;
    }
}

impl Default for CheckpointBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CheckpointBarrier {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_times_out_when_no_thread_is_registered_to_park() {
        let registry = ThreadRegistry::new();
        registry.register_thread(std::process::id() as Tid, (0, 0), 0);
        let barrier = CheckpointBarrier::new();
        // No other tids are registered, so this must succeed immediately
        // with nothing to wait for.
        let result = barrier.raise(&registry, std::process::id() as Tid, Duration::from_millis(10));
        assert!(result.is_ok());
    }

    #[test]
    fn install_and_uninstall_round_trip_without_error() {
        let mut barrier = CheckpointBarrier::new();
        barrier.install().unwrap();
        barrier.uninstall();
    }
}
