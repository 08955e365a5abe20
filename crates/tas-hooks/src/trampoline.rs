//! Prologue patching (spec.md §4.1): overwrite a target function's first
//! bytes with a jump to the agent's replacement, and preserve the
//! overwritten bytes plus a jump back into the target in a trampoline
//! buffer so the replacement can still invoke the original.
//!
//! Ground truth is `hookpatch.h`'s `hook_patch`/`HOOK_PATCH_ORIG` contract
//! ("changing the first instructions of the function with a jmp
//! instruction... save those instructions into a trampoline function, which
//! then jumps to the original function"). No x86 disassembler is used —
//! only the fixed jump-encoding lengths spec.md §4.1 names are trusted, and
//! a site shorter than that is rejected outright rather than guessed at.

use std::ffi::c_void;

use crate::error::HookInstallError;

/// `E9 rel32` — a 5-byte relative jump, usable when the patch site and the
/// replacement are within a 32-bit signed displacement of each other
/// (spec.md §4.1: "5 bytes on 32-bit").
pub const JUMP_PATCH_LEN_32: usize = 5;

/// `FF 25 00000000` (`jmp qword ptr [rip+0]`) followed by the 8-byte
/// absolute target — 14 bytes total, used whenever the displacement can't
/// be trusted to fit in 32 bits (spec.md §4.1: "14 bytes on 64-bit when
/// using a 6-byte indirect jump plus 8-byte target").
pub const JUMP_PATCH_LEN_64: usize = 14;

/// Reject a patch site whose prologue is shorter than the jump it would
/// need to hold, or one that the caller has determined ends inside an
/// instruction boundary (spec.md §4.1: "If the prologue is shorter...or
/// ends inside an instruction boundary mid-jump, the site is rejected").
pub fn validate_patch_site(symbol: &str, prologue_len: usize, straddles_instruction: bool, use_64bit_jump: bool) -> Result<(), HookInstallError> {
    let needed = if use_64bit_jump { JUMP_PATCH_LEN_64 } else { JUMP_PATCH_LEN_32 };
    if prologue_len < needed || straddles_instruction {
        return Err(HookInstallError::PrologueTooShort {
            symbol: symbol.to_owned(),
            available: prologue_len,
            needed,
        });
    }
    Ok(())
}

/// `E9 rel32` relative jump from the end of the patch (`from + 5`) to `to`.
pub fn encode_relative_jump_32(from: usize, to: usize) -> [u8; JUMP_PATCH_LEN_32] {
    let rel = (to as i64) - (from as i64 + JUMP_PATCH_LEN_32 as i64);
    let rel = rel as i32;
    let mut buf = [0u8; JUMP_PATCH_LEN_32];
    buf[0] = 0xE9;
    buf[1..5].copy_from_slice(&rel.to_le_bytes());
    buf
}

/// `FF 25 00000000` + absolute 8-byte `to`.
pub fn encode_absolute_jump_64(to: usize) -> [u8; JUMP_PATCH_LEN_64] {
    let mut buf = [0u8; JUMP_PATCH_LEN_64];
    buf[0] = 0xFF;
    buf[1] = 0x25;
    buf[2..6].copy_from_slice(&0u32.to_le_bytes());
    buf[6..14].copy_from_slice(&(to as u64).to_le_bytes());
    buf
}

/// An executable buffer holding a copied prologue followed by a jump back
/// into the patched function just past the overwritten bytes. The
/// replacement hook calls through [`Trampoline::entry`] to invoke the real
/// original (spec.md §4.1, GLOSSARY "Trampoline").
pub struct Trampoline {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the buffer is never mutated after `build`; concurrent execution of
// the trampoline's code from multiple threads is exactly what it's for.
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    /// Allocate an executable page, copy `original_prologue` into it
    /// followed by an absolute jump back to `resume_addr` (the original
    /// function's address plus the number of bytes patched).
    pub fn build(original_prologue: &[u8], resume_addr: usize) -> Result<Self, HookInstallError> {
        let jump_back = encode_absolute_jump_64(resume_addr);
        let total = original_prologue.len() + jump_back.len();

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(HookInstallError::TrampolineAlloc(std::io::Error::last_os_error()));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(original_prologue.as_ptr(), ptr.cast::<u8>(), original_prologue.len());
            std::ptr::copy_nonoverlapping(jump_back.as_ptr(), ptr.cast::<u8>().add(original_prologue.len()), jump_back.len());
        }

        Ok(Trampoline { ptr: ptr.cast::<u8>(), len: total })
    }

    /// Address the replacement hook should call through to run the original
    /// prologue bytes followed by the jump back into the target.
    pub fn entry(&self) -> usize {
        self.ptr as usize
    }

    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast::<c_void>(), self.len);
        }
    }
}

/// Make `len` bytes starting at `addr` writable, patch them with the jump
/// encoded by the caller, then restore the original protection. Mirrors
/// `hook_patch`'s "overwrite the first bytes of the real function"
/// (spec.md §4.1).
///
/// # Safety
/// `addr` must point to `len` bytes of mapped, executable memory belonging
/// to the target function, and the caller must have already built the
/// trampoline that preserves those bytes before calling this (spec.md
/// §4.1's ordering requirement: "all patches [installed] before yielding
/// control back to the game's entry point").
pub unsafe fn write_patch(addr: *mut u8, patch: &[u8]) -> Result<(), HookInstallError> {
    let page_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;
    let page_start = (addr as usize) & !(page_size - 1);
    let page_end = ((addr as usize + patch.len()) + page_size - 1) & !(page_size - 1);
    let region_len = page_end - page_start;

    let rc = libc::mprotect(page_start as *mut c_void, region_len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC);
    if rc != 0 {
        return Err(HookInstallError::MprotectFailed(std::io::Error::last_os_error()));
    }

    std::ptr::copy_nonoverlapping(patch.as_ptr(), addr, patch.len());

    let rc = libc::mprotect(page_start as *mut c_void, region_len, libc::PROT_READ | libc::PROT_EXEC);
    if rc != 0 {
        return Err(HookInstallError::MprotectFailed(std::io::Error::last_os_error()));
    }
    Ok(())
}
