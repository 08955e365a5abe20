//! Per-thread scoping flags that tell the hook layer whether the code
//! currently running is the game's own code or the agent's, and whether the
//! timer/log layers should treat the current call specially.
//!
//! Three independent flags, each with unbounded nesting via a depth counter:
//!
//! - `native`: calls made here should hit the real libc/OS function, not the
//!   hook.
//! - `own_code`: the agent is executing its own code, not the game's; calls
//!   made while this is set are never attributed to the game for anti-livelock
//!   accounting ([`CallTypeCounter`](tas_protocol::CallTypeCounter)).
//! - `no_log`: suppress logging for the duration, so the logger itself
//!   doesn't recursively trip the hooks it's trying to log about.
//!
//! Each flag lives in thread-local storage; there is no cross-thread lock,
//! matching the single-threaded-per-flag nature of the original `GlobalState`.

use std::cell::Cell;

#[derive(Default)]
struct ThreadState {
    native: Cell<u32>,
    own_code: Cell<u32>,
    no_log: Cell<u32>,
}

thread_local! {
    static STATE: ThreadState = ThreadState::default();
}

fn depth(select: fn(&ThreadState) -> &Cell<u32>) -> u32 {
    STATE.with(|s| select(s).get())
}

fn enter(select: fn(&ThreadState) -> &Cell<u32>) {
    STATE.with(|s| {
        let cell = select(s);
        cell.set(cell.get() + 1);
    });
}

fn leave(select: fn(&ThreadState) -> &Cell<u32>) {
    STATE.with(|s| {
        let cell = select(s);
        cell.set(cell.get().saturating_sub(1));
    });
}

pub fn is_native() -> bool {
    depth(|s| &s.native) > 0
}

pub fn is_own_code() -> bool {
    depth(|s| &s.own_code) > 0
}

pub fn is_no_log() -> bool {
    depth(|s| &s.no_log) > 0
}

macro_rules! scoped_flag {
    ($enter_fn:ident, $guard:ident, $field:ident) => {
        #[must_use = "the flag reverts as soon as this guard is dropped"]
        pub struct $guard {
            _private: (),
        }

        impl $guard {
            fn acquire() -> Self {
                enter(|s| &s.$field);
                $guard { _private: () }
            }
        }

        impl Drop for $guard {
            fn drop(&mut self) {
                leave(|s| &s.$field);
            }
        }

        /// Enter this scope; the flag is cleared once the returned guard
        /// drops, including on panic unwind. Nests: the flag stays set until
        /// the outermost guard for this thread drops.
        pub fn $enter_fn() -> $guard {
            $guard::acquire()
        }
    };
}

scoped_flag!(enter_native, NativeGuard, native);
scoped_flag!(enter_own_code, OwnCodeGuard, own_code);
scoped_flag!(enter_no_log, NoLogGuard, no_log);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_set_only_within_guard_scope() {
        assert!(!is_native());
        {
            let _g = enter_native();
            assert!(is_native());
        }
        assert!(!is_native());
    }

    #[test]
    fn nested_guards_require_all_to_drop() {
        assert!(!is_own_code());
        let outer = enter_own_code();
        let inner = enter_own_code();
        assert!(is_own_code());
        drop(inner);
        assert!(is_own_code(), "outer guard should still hold the flag");
        drop(outer);
        assert!(!is_own_code());
    }

    #[test]
    fn flag_releases_on_panic_unwind() {
        assert!(!is_no_log());
        let result = std::panic::catch_unwind(|| {
            let _g = enter_no_log();
            assert!(is_no_log());
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!is_no_log(), "guard must release even when dropped during unwind");
    }

    #[test]
    fn flags_are_independent() {
        let _native = enter_native();
        assert!(is_native());
        assert!(!is_own_code());
        assert!(!is_no_log());
    }
}
