use std::time::Duration;

use crate::audio::{AudioGate, ChimeShape, COMPLETION_NOTES};
use crate::session::{SessionConfig, SessionEvent, SessionState, Snapshot};

/// Owns the breathing session and turns its events into chimes
#[derive(Debug)]
pub struct Engine {
    state: SessionState,
    audio: AudioGate,
}

impl Engine {
    pub fn new(config: SessionConfig, audio: AudioGate) -> Self {
        Self {
            state: SessionState::idle(config),
            audio,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn audio(&self) -> &AudioGate {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioGate {
        &mut self.audio
    }

    fn transition(&mut self, f: impl FnOnce(SessionState) -> SessionState) {
        self.state = f(std::mem::take(&mut self.state));
    }

    /// Unlocks audio on this gesture, then starts or resumes with the current phase's chime.
    pub fn start(&mut self) {
        if !self.state.can_start() {
            return;
        }
        self.audio.unlock();
        self.transition(SessionState::start);
        tracing::debug!(phase = %self.state.phase(), "session running");
        self.audio
            .play(self.state.phase().frequency(), ChimeShape::Single);
    }

    pub fn pause(&mut self) {
        self.transition(SessionState::pause);
    }

    pub fn toggle(&mut self) {
        if self.state.is_running() {
            self.pause();
        } else {
            self.start();
        }
    }

    pub fn reset(&mut self) {
        self.transition(SessionState::reset);
    }

    pub fn restart(&mut self) {
        self.reset();
        self.start();
    }

    /// Returns false when the new settings were ignored because a session is running.
    pub fn configure(&mut self, config: SessionConfig) -> bool {
        if self.state.is_running() {
            return false;
        }
        self.transition(|s| s.reconfigure(config));
        true
    }

    pub fn on_tick(&mut self, dt: Duration) -> Option<SessionEvent> {
        let advance = std::mem::take(&mut self.state).tick(dt);
        self.state = advance.state;

        match advance.event {
            Some(SessionEvent::PhaseChanged {
                from,
                to,
                cycles_completed,
            }) => {
                tracing::debug!(%from, %to, cycles_completed, "phase changed");
                self.audio.play(to.frequency(), ChimeShape::Single);
            }
            Some(SessionEvent::Completed { cycles_completed }) => {
                tracing::info!(cycles_completed, "session complete");
                self.audio
                    .play(COMPLETION_NOTES[0], ChimeShape::CompletionSequence);
            }
            None => {}
        }

        advance.event
    }
}
