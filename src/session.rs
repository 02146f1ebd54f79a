use std::time::Duration;

use crate::pattern::{BreathPattern, Phase, PatternId, PhaseDurations};

pub const DEFAULT_BOX_SECS: u64 = 4;
pub const MIN_BOX_SECS: u64 = 2;
pub const MAX_BOX_SECS: u64 = 8;
pub const DEFAULT_SESSION_MINUTES: u32 = 5;
pub const MIN_SESSION_MINUTES: u32 = 1;
pub const MAX_SESSION_MINUTES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Complete,
}

/// Configuration captured when a session starts
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub pattern_id: PatternId,
    pub phases: PhaseDurations,
    pub box_duration: Duration,
    pub session_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let box_duration = Duration::from_secs(DEFAULT_BOX_SECS);
        Self {
            pattern_id: PatternId::Box,
            phases: PhaseDurations::uniform(box_duration),
            box_duration,
            session_minutes: DEFAULT_SESSION_MINUTES,
        }
    }
}

impl SessionConfig {
    /// Builds a config for `pattern`, clamping the user settings to their ranges.
    pub fn for_pattern(pattern: &BreathPattern, box_secs: u64, session_minutes: u32) -> Self {
        let box_duration = Duration::from_secs(box_secs.clamp(MIN_BOX_SECS, MAX_BOX_SECS));
        Self {
            pattern_id: pattern.id.clone(),
            phases: pattern.durations_for(box_duration),
            box_duration,
            session_minutes: session_minutes.clamp(MIN_SESSION_MINUTES, MAX_SESSION_MINUTES),
        }
    }

    pub fn session_length(&self) -> Duration {
        Duration::from_secs(u64::from(self.session_minutes) * 60)
    }

    pub fn first_phase(&self) -> Phase {
        self.phases.first_active().unwrap_or(Phase::Inhale)
    }
}

/// Emitted by [`SessionState::tick`] for the audio side to react to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
        cycles_completed: u32,
    },
    Completed {
        cycles_completed: u32,
    },
}

/// What the screen needs to draw one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub phase: Phase,
    pub phase_progress: f64,
    pub remaining_seconds: f64,
    pub elapsed_seconds: f64,
    pub running: bool,
    pub complete: bool,
    pub cycles_completed: u32,
}

/// Result of one tick: the next state and at most one event
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub state: SessionState,
    pub event: Option<SessionEvent>,
}

impl Advance {
    fn quiet(state: SessionState) -> Self {
        Self { state, event: None }
    }
}

/// The whole breathing session as a value. Every transition consumes the
/// current state and returns the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    status: SessionStatus,
    config: SessionConfig,
    phase: Phase,
    phase_elapsed: Duration,
    elapsed: Duration,
    cycles_completed: u32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle(SessionConfig::default())
    }
}

impl SessionState {
    pub fn idle(config: SessionConfig) -> Self {
        Self {
            status: SessionStatus::Idle,
            phase: config.first_phase(),
            config,
            phase_elapsed: Duration::ZERO,
            elapsed: Duration::ZERO,
            cycles_completed: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cycles_completed(&self) -> u32 {
        self.cycles_completed
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Complete
    }

    pub fn can_start(&self) -> bool {
        matches!(self.status, SessionStatus::Idle | SessionStatus::Paused)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn remaining(&self) -> Duration {
        self.config.session_length().saturating_sub(self.elapsed)
    }

    /// Fraction of the current phase already breathed, in `[0, 1)` after any tick.
    pub fn phase_progress(&self) -> f64 {
        let len = self.config.phases.get(self.phase);
        if len.is_zero() {
            return 0.0;
        }
        (self.phase_elapsed.as_secs_f64() / len.as_secs_f64()).min(1.0)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            phase_progress: self.phase_progress(),
            remaining_seconds: self.remaining().as_secs_f64(),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            running: self.is_running(),
            complete: self.is_complete(),
            cycles_completed: self.cycles_completed,
        }
    }

    pub fn start(mut self) -> Self {
        if self.can_start() {
            self.status = SessionStatus::Running;
        }
        self
    }

    pub fn pause(mut self) -> Self {
        if self.is_running() {
            self.status = SessionStatus::Paused;
        }
        self
    }

    pub fn reset(self) -> Self {
        Self::idle(self.config)
    }

    /// Applies new settings unless a session is running. Switching pattern
    /// moves back to the first active phase with no progress.
    pub fn reconfigure(mut self, config: SessionConfig) -> Self {
        if self.is_running() {
            return self;
        }

        let pattern_changed = config.pattern_id != self.config.pattern_id;
        self.config = config;
        if pattern_changed || !self.config.phases.is_active(self.phase) {
            self.phase = self.config.first_phase();
            self.phase_elapsed = Duration::ZERO;
        }
        self
    }

    /// Advance a running session by `dt`. At most one phase change happens
    /// per tick and any overshoot past the phase boundary is dropped.
    pub fn tick(self, dt: Duration) -> Advance {
        if !self.is_running() {
            return Advance::quiet(self);
        }

        let mut next = self;
        next.elapsed += dt;
        if next.elapsed >= next.config.session_length() {
            next.status = SessionStatus::Complete;
            let event = SessionEvent::Completed {
                cycles_completed: next.cycles_completed,
            };
            return Advance {
                state: next,
                event: Some(event),
            };
        }

        next.phase_elapsed += dt;
        if next.phase_elapsed < next.config.phases.get(next.phase) {
            return Advance::quiet(next);
        }

        let from = next.phase;
        let to = next.config.phases.successor(from);
        if to == next.config.first_phase() {
            next.cycles_completed += 1;
        }
        next.phase = to;
        next.phase_elapsed = Duration::ZERO;

        let event = SessionEvent::PhaseChanged {
            from,
            to,
            cycles_completed: next.cycles_completed,
        };
        Advance {
            state: next,
            event: Some(event),
        }
    }
}

/// `m:ss`, rounding down
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternCatalog;

    const TICK: Duration = Duration::from_millis(50);

    fn config(id: PatternId, box_secs: u64, minutes: u32) -> SessionConfig {
        let catalog = PatternCatalog::builtin();
        SessionConfig::for_pattern(catalog.get(&id).unwrap(), box_secs, minutes)
    }

    fn running(config: SessionConfig) -> SessionState {
        SessionState::idle(config).start()
    }

    #[test]
    fn test_default_state_is_idle_box() {
        let state = SessionState::default();

        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(state.config().pattern_id, PatternId::Box);
        assert_eq!(state.config().box_duration, Duration::from_secs(4));
        assert_eq!(state.config().session_minutes, 5);
        assert_eq!(state.phase(), Phase::Inhale);
        assert_eq!(state.phase_progress(), 0.0);
        assert_eq!(state.remaining(), Duration::from_secs(300));
    }

    #[test]
    fn test_tick_ignored_unless_running() {
        let idle = SessionState::default();
        let advance = idle.clone().tick(TICK);
        assert_eq!(advance.state, idle);
        assert!(advance.event.is_none());

        let paused = SessionState::default().start().pause();
        let advance = paused.clone().tick(TICK);
        assert_eq!(advance.state, paused);
    }

    #[test]
    fn test_tick_accumulates_progress() {
        let state = running(config(PatternId::Box, 4, 5));
        let advance = state.tick(TICK);

        assert!(advance.event.is_none());
        assert_eq!(advance.state.phase_progress(), 0.0125);
        assert_eq!(advance.state.elapsed(), TICK);
    }

    #[test]
    fn test_phase_advances_at_boundary() {
        let mut state = running(config(PatternId::Box, 2, 5));
        let mut events = vec![];
        for _ in 0..40 {
            let advance = state.tick(TICK);
            state = advance.state;
            events.extend(advance.event);
        }

        assert_eq!(
            events,
            vec![SessionEvent::PhaseChanged {
                from: Phase::Inhale,
                to: Phase::HoldIn,
                cycles_completed: 0
            }]
        );
        assert_eq!(state.phase(), Phase::HoldIn);
        assert_eq!(state.phase_progress(), 0.0);
    }

    #[test]
    fn test_large_dt_advances_only_one_phase() {
        let state = running(config(PatternId::Box, 2, 5));
        let advance = state.tick(Duration::from_secs(7));

        assert_eq!(advance.state.phase(), Phase::HoldIn);
        assert_eq!(advance.state.phase_progress(), 0.0);
        assert_eq!(advance.state.cycles_completed(), 0);
    }

    #[test]
    fn test_cycle_counted_when_sequence_wraps() {
        let mut state = running(config(PatternId::FourSevenEight, 4, 5));
        let mut seen = vec![state.phase()];
        // one full 4-7-8 cycle is 19 s = 380 ticks
        for _ in 0..380 {
            let advance = state.tick(TICK);
            state = advance.state;
            if let Some(SessionEvent::PhaseChanged { to, .. }) = advance.event {
                seen.push(to);
            }
            assert!(state.phase_progress() < 1.0);
        }

        assert_eq!(
            seen,
            vec![Phase::Inhale, Phase::HoldIn, Phase::Exhale, Phase::Inhale]
        );
        assert_eq!(state.cycles_completed(), 1);
    }

    #[test]
    fn test_coherent_cycle_counted_after_exhale() {
        let mut state = running(config(PatternId::Coherent, 4, 5));
        let mut seen = vec![state.phase()];
        // 5.5 s in, 5.5 s out = 220 ticks
        for tick in 1..=220 {
            let advance = state.tick(TICK);
            state = advance.state;
            if let Some(SessionEvent::PhaseChanged { to, .. }) = advance.event {
                seen.push(to);
            }
            assert!(state.phase_progress() < 1.0);
            if tick == 110 {
                assert_eq!(state.phase(), Phase::Exhale);
                assert_eq!(state.cycles_completed(), 0);
            }
        }

        assert_eq!(seen, vec![Phase::Inhale, Phase::Exhale, Phase::Inhale]);
        assert_eq!(state.cycles_completed(), 1);
    }

    #[test]
    fn test_completes_at_session_length() {
        let mut state = running(config(PatternId::Box, 4, 1));
        let mut ticks = 0;
        let event = loop {
            let advance = state.tick(TICK);
            state = advance.state;
            ticks += 1;
            if let Some(ev @ SessionEvent::Completed { .. }) = advance.event {
                break ev;
            }
            assert!(!state.is_complete());
        };

        assert_eq!(ticks, 1200);
        assert_eq!(event, SessionEvent::Completed { cycles_completed: 3 });
        assert!(state.is_complete());
        assert!(!state.is_running());
        assert_eq!(state.snapshot().remaining_seconds, 0.0);
        assert_eq!(state.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn test_elapsed_not_clamped_on_overshoot() {
        let state = running(config(PatternId::Box, 4, 1));
        let advance = state.tick(Duration::from_secs(61));

        assert!(advance.state.is_complete());
        assert_eq!(advance.state.elapsed(), Duration::from_secs(61));
        assert_eq!(advance.state.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut state = running(config(PatternId::Box, 4, 5));
        for _ in 0..200 {
            state = state.tick(TICK).state;
        }

        let once = state.reset();
        let twice = once.clone().reset();

        assert_eq!(once, twice);
        assert_eq!(once.status(), SessionStatus::Idle);
        assert_eq!(once.elapsed(), Duration::ZERO);
        assert_eq!(once.cycles_completed(), 0);
        assert_eq!(once.phase(), Phase::Inhale);
    }

    #[test]
    fn test_reconfigure_ignored_while_running() {
        let state = running(config(PatternId::Box, 4, 5));
        let next = state.clone().reconfigure(config(PatternId::Coherent, 4, 5));

        assert_eq!(next, state);
    }

    #[test]
    fn test_pattern_switch_while_paused_resets_phase() {
        let mut state = running(config(PatternId::Box, 2, 5));
        for _ in 0..50 {
            state = state.tick(TICK).state;
        }
        let paused = state.pause();
        assert_eq!(paused.phase(), Phase::HoldIn);

        let switched = paused.reconfigure(config(PatternId::Coherent, 2, 5));

        assert_eq!(switched.status(), SessionStatus::Paused);
        assert_eq!(switched.phase(), Phase::Inhale);
        assert_eq!(switched.phase_progress(), 0.0);
    }

    #[test]
    fn test_start_only_from_idle_or_paused() {
        let complete = running(config(PatternId::Box, 4, 1))
            .tick(Duration::from_secs(60))
            .state;
        assert!(complete.is_complete());
        assert!(complete.clone().start().is_complete());

        let resumed = SessionState::default().start().pause().start();
        assert!(resumed.is_running());
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(300.0), "5:00");
        assert_eq!(format_clock(59.99), "0:59");
        assert_eq!(format_clock(61.5), "1:01");
        assert_eq!(format_clock(-1.0), "0:00");
    }

    #[test]
    fn test_settings_are_clamped() {
        let cfg = config(PatternId::Box, 30, 0);

        assert_eq!(cfg.box_duration, Duration::from_secs(MAX_BOX_SECS));
        assert_eq!(cfg.session_minutes, MIN_SESSION_MINUTES);
    }
}
