//! The frame-boundary orchestrator itself (spec.md §4.6, component C6): the
//! one place every intercepted present primitive calls into, and the only
//! place that talks to the controller.
//!
//! Grounded on `DeterministicTimer.cpp`'s `enterFrameBoundary` real-time
//! pacing sleep (`tas_timer::DeterministicTimer::pace_real_time`) combined
//! with the teacher's single-writer event-loop shape in `scx_gamer`'s
//! scheduler dispatch loop — one thread owns the frame mutex and a
//! sequential receive/dispatch loop, generalized here from "dispatch BPF
//! ring-buffer events" to "dispatch control-link messages".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tas_checkpoint::CheckpointEngine;
use tas_control::ControlLink;
use tas_hooks::HookRegistry;
use tas_input::InputChannel;
use tas_protocol::{Frame, SharedConfig, Tag, VirtualTime};
use tas_threads::registry::{Tid, ThreadRegistry};
use tas_timer::DeterministicTimer;

use crate::error::AgentError;
use crate::messages::{
    self, loadstate_result_ok_bytes, parse_input_frame, parse_shared_config, parse_slot, result_err_bytes,
    result_ok_bytes, FrameBegin,
};

/// Everything one frame boundary needs, owned by the agent for the lifetime
/// of the preloaded process. `Mutex`-wrapped pieces are exactly the ones
/// more than one thread can reach concurrently; the control link and
/// checkpoint engine are only ever touched from inside the boundary, which
/// `frame_mutex` already serializes (spec.md §4.6 step 1: "no concurrent
/// boundaries").
pub struct Agent<S> {
    frame_mutex: Mutex<()>,
    timer: DeterministicTimer,
    threads: ThreadRegistry,
    input: InputChannel,
    checkpoint: Mutex<CheckpointEngine>,
    control: Mutex<ControlLink<S>>,
    config: Mutex<SharedConfig>,
    frame_count: AtomicU64,
    /// Process-wide symbol-resolution cache the hook layer consults outside
    /// the frame boundary (spec.md §4.1); the orchestrator only owns it so
    /// there is exactly one instance per process.
    hooks: HookRegistry,
}

impl<S: std::io::Read + std::io::Write> Agent<S> {
    pub fn new(
        timer: DeterministicTimer,
        threads: ThreadRegistry,
        input: InputChannel,
        checkpoint: CheckpointEngine,
        control: ControlLink<S>,
        config: SharedConfig,
    ) -> Self {
        Agent {
            frame_mutex: Mutex::new(()),
            timer,
            threads,
            input,
            checkpoint: Mutex::new(checkpoint),
            control: Mutex::new(control),
            config: Mutex::new(config),
            frame_count: AtomicU64::new(0),
            hooks: HookRegistry::new(),
        }
    }

    pub fn timer(&self) -> &DeterministicTimer {
        &self.timer
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub fn input(&self) -> &InputChannel {
        &self.input
    }

    /// Runs one full frame boundary `B(draw)` (spec.md §4.6's eight-step
    /// pseudo-contract). `own_tid` is the calling thread's tid, needed by
    /// the checkpoint engine's barrier; `capture_draw` performs steps 3's
    /// screen-capture/HUD/AV-dump work when `draw` is set — it is an
    /// external collaborator the orchestrator only invokes, never
    /// implements (spec.md §4.6 step 3 "external collaborator").
    pub fn frame_boundary(
        &self,
        draw: bool,
        own_tid: Tid,
        capture_draw: impl FnOnce(),
    ) -> Result<(), AgentError> {
        // Step 1: acquire the global agent mutex.
        let _guard = self.frame_mutex.lock().unwrap();

        // Step 2.
        let one_frame = self.timer.enter_frame_boundary();

        // Step 3.
        if draw {
            capture_draw();
        }

        // Step 4.
        let frame_count = self.frame_count.load(Ordering::Relaxed);
        let begin = FrameBegin { frame_count, draw, virtual_time: self.timer.current_ticks() };
        {
            let mut control = self.control.lock().unwrap();
            control.send(Frame::new(Tag::FrameBegin, begin.to_bytes()))?;
        }

        // Step 5: dispatch loop.
        let quit = self.dispatch_loop(own_tid)?;

        // Step 6: apply per-frame SharedConfig changes (framerate et al.)
        // to the timer; anything the config layer itself owns (audio,
        // quirks) is read directly off `self.config` by the hook layer.
        let (speed_divisor, fastforward) = {
            let config = self.config.lock().unwrap();
            (config.speed_divisor, config.fastforward)
        };
        self.timer.set_fastforward(fastforward);

        // Step 7.
        if draw {
            self.timer.pace_real_time(one_frame, speed_divisor, fastforward);
        }

        // Step 8.
        self.timer.exit_frame_boundary();
        self.frame_count.fetch_add(1, Ordering::Relaxed);

        if quit {
            return Err(AgentError::QuitRequested);
        }
        Ok(())
    }

    /// Step 5's receive/dispatch loop. Returns `Ok(true)` if `QUIT` was
    /// received (spec.md §4.6 step 5's "begin orderly shutdown"), `Ok(false)`
    /// on a clean `FRAME_END`.
    fn dispatch_loop(&self, own_tid: Tid) -> Result<bool, AgentError> {
        loop {
            let frame = {
                let mut control = self.control.lock().unwrap();
                control.recv()?
            };
            match frame.tag {
                Tag::ConfigUpdate => {
                    let new_config = parse_shared_config(&frame.payload)?;
                    *self.config.lock().unwrap() = new_config;
                }
                Tag::InputUpdate => {
                    let new_input = parse_input_frame(&frame.payload)?;
                    self.input.replace_frame(new_input);
                }
                Tag::Savestate => {
                    let slot = parse_slot(frame.tag, &frame.payload)?;
                    let frame_count = self.frame_count.load(Ordering::Relaxed);
                    let vt = self.timer.current_ticks();
                    let result = self.checkpoint.lock().unwrap().save(slot, frame_count, vt, &self.threads, own_tid);
                    let reply = match result {
                        Ok(()) => result_ok_bytes(),
                        Err(e) => {
                            log::warn!("savestate into slot {slot} failed: {e}");
                            result_err_bytes()
                        }
                    };
                    self.control.lock().unwrap().send(Frame::new(Tag::SavestateResult, reply))?;
                }
                Tag::Loadstate => {
                    let slot = parse_slot(frame.tag, &frame.payload)?;
                    let result = self.checkpoint.lock().unwrap().load(slot, &self.threads, own_tid);
                    let reply = match result {
                        Ok((frame_count, vt)) => {
                            self.frame_count.store(frame_count, Ordering::Relaxed);
                            self.timer.restore_ticks(vt);
                            loadstate_result_ok_bytes(frame_count, vt)
                        }
                        Err(e) => {
                            log::warn!("loadstate from slot {slot} failed: {e}");
                            result_err_bytes()
                        }
                    };
                    self.control.lock().unwrap().send(Frame::new(Tag::LoadstateResult, reply))?;
                }
                Tag::FrameEnd => return Ok(false),
                Tag::Quit => return Ok(true),
                other => return Err(AgentError::UnexpectedTag(other)),
            }
        }
    }

    /// Replaces the whole `SharedConfig` out of band, used at startup before
    /// the first frame boundary (spec.md §6 "Initial `SharedConfig`
    /// delivered over the control socket before any game code runs").
    pub fn adopt_initial_config(&self, config: SharedConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn current_config(&self) -> SharedConfig {
        *self.config.lock().unwrap()
    }

    pub fn current_virtual_time(&self) -> VirtualTime {
        self.timer.current_ticks()
    }
}
