//! Session state and scoped guards
//!
//! Host-session toggles (autokey, viewport refresh, current time) live
//! outside the scene so RAII guards can hold them while the scene itself
//! is mutated through `&mut Scene`. Every guard restores its state in
//! `Drop`, so restoration happens on every exit path, including panics.
//!
//! Undo chunks are recorded, not implemented: the crate notes chunk
//! open/close so a host with a native undo stack can group the enclosed
//! edits into one step.

use std::cell::{Cell, RefCell};

/// Per-session host state the guards toggle.
#[derive(Debug, Default)]
pub struct SessionState {
    autokey: Cell<bool>,
    /// Nested pause counter; refresh is enabled only at zero
    refresh_paused: Cell<u32>,
    current_time: Cell<f32>,
    undo_depth: Cell<u32>,
    undo_log: RefCell<Vec<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn autokey(&self) -> bool {
        self.autokey.get()
    }

    pub fn set_autokey(&self, on: bool) {
        self.autokey.set(on);
    }

    pub fn refresh_enabled(&self) -> bool {
        self.refresh_paused.get() == 0
    }

    pub fn current_time(&self) -> f32 {
        self.current_time.get()
    }

    pub fn set_current_time(&self, time: f32) {
        self.current_time.set(time);
    }

    /// Undo chunk labels recorded so far, outermost first.
    pub fn undo_log(&self) -> Vec<String> {
        self.undo_log.borrow().clone()
    }
}

/// Suspends autokey for a scope, restoring the prior value on drop.
pub struct AutokeySuspend<'a> {
    session: &'a SessionState,
    was_on: bool,
}

impl<'a> AutokeySuspend<'a> {
    pub fn new(session: &'a SessionState) -> Self {
        let was_on = session.autokey.get();
        session.autokey.set(false);
        Self { session, was_on }
    }
}

impl Drop for AutokeySuspend<'_> {
    fn drop(&mut self) {
        self.session.autokey.set(self.was_on);
    }
}

/// Pauses viewport refresh for a scope. Nests; refresh resumes when the
/// outermost pause drops.
pub struct ViewportPause<'a> {
    session: &'a SessionState,
}

impl<'a> ViewportPause<'a> {
    pub fn new(session: &'a SessionState) -> Self {
        session.refresh_paused.set(session.refresh_paused.get() + 1);
        Self { session }
    }
}

impl Drop for ViewportPause<'_> {
    fn drop(&mut self) {
        let n = self.session.refresh_paused.get();
        self.session.refresh_paused.set(n.saturating_sub(1));
    }
}

/// Restores the session's current time on drop, whatever a time-scrubbing
/// operation did in between.
pub struct PreserveCurrentTime<'a> {
    session: &'a SessionState,
    time: f32,
}

impl<'a> PreserveCurrentTime<'a> {
    pub fn new(session: &'a SessionState) -> Self {
        Self { session, time: session.current_time.get() }
    }
}

impl Drop for PreserveCurrentTime<'_> {
    fn drop(&mut self) {
        self.session.current_time.set(self.time);
    }
}

/// Groups the enclosed edits under one labeled undo step.
pub struct UndoChunk<'a> {
    session: &'a SessionState,
}

impl<'a> UndoChunk<'a> {
    pub fn open(session: &'a SessionState, label: &str) -> Self {
        let depth = session.undo_depth.get();
        session.undo_depth.set(depth + 1);
        // Only the outermost chunk names the undo step
        if depth == 0 {
            session.undo_log.borrow_mut().push(label.to_string());
        }
        Self { session }
    }
}

impl Drop for UndoChunk<'_> {
    fn drop(&mut self) {
        let n = self.session.undo_depth.get();
        self.session.undo_depth.set(n.saturating_sub(1));
    }
}
