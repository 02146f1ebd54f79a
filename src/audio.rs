//! Chime capability consumed by the breathing engine.
//!
//! Output devices usually refuse to make sound before the user has done
//! something, so the capability starts `Locked` and only becomes `Ready`
//! after [`AudioGate::unlock`] succeeds. Chimes requested while locked or
//! muted are dropped without error.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::tty::IsTty;

const BEL: u8 = 0x07;

/// C5, E5 and G5, played as an ascending arpeggio when a session completes.
pub const COMPLETION_NOTES: [f64; 3] = [523.25, 659.25, 783.99];

const SINGLE_GAIN: f64 = 0.3;
const SINGLE_DECAY: Duration = Duration::from_millis(500);
const COMPLETION_GAIN: f64 = 0.25;
const COMPLETION_STEP: Duration = Duration::from_millis(300);
const COMPLETION_ATTACK: Duration = Duration::from_millis(20);
const COMPLETION_DECAY: Duration = Duration::from_millis(1400);
const SILENCE_GAIN: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeShape {
    Single,
    CompletionSequence,
}

/// One scheduled note: a linear attack up to `peak_gain`, then an
/// exponential decay down to near silence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f64,
    pub offset: Duration,
    pub attack: Duration,
    pub decay: Duration,
    pub peak_gain: f64,
}

impl Tone {
    pub fn end(&self) -> Duration {
        self.offset + self.attack + self.decay
    }

    /// Envelope gain at `t`, measured from the start of the chime.
    pub fn gain_at(&self, t: Duration) -> f64 {
        if t < self.offset || t >= self.end() {
            return 0.0;
        }

        let local = (t - self.offset).as_secs_f64();
        let attack = self.attack.as_secs_f64();
        if local < attack {
            return self.peak_gain * local / attack;
        }

        let fraction = (local - attack) / self.decay.as_secs_f64();
        self.peak_gain * (SILENCE_GAIN / self.peak_gain).powf(fraction)
    }
}

impl ChimeShape {
    pub fn tones(self, frequency: f64) -> Vec<Tone> {
        match self {
            ChimeShape::Single => vec![Tone {
                frequency,
                offset: Duration::ZERO,
                attack: Duration::ZERO,
                decay: SINGLE_DECAY,
                peak_gain: SINGLE_GAIN,
            }],
            ChimeShape::CompletionSequence => COMPLETION_NOTES
                .iter()
                .enumerate()
                .map(|(i, &frequency)| Tone {
                    frequency,
                    offset: COMPLETION_STEP * i as u32,
                    attack: COMPLETION_ATTACK,
                    decay: COMPLETION_DECAY,
                    peak_gain: COMPLETION_GAIN,
                })
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Something that can make a sound at a frequency.
pub trait Chime: Send {
    /// Prepare the output. Called on the first user gesture, possibly again
    /// on later gestures if it failed before.
    fn init(&mut self) -> Result<(), AudioError>;

    fn play(&mut self, frequency: f64, shape: ChimeShape);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Locked,
    Ready,
}

pub struct AudioGate {
    chime: Box<dyn Chime>,
    state: AudioState,
    muted: bool,
}

impl std::fmt::Debug for AudioGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGate")
            .field("state", &self.state)
            .field("muted", &self.muted)
            .finish()
    }
}

impl AudioGate {
    pub fn new(chime: impl Chime + 'static) -> Self {
        Self {
            chime: Box::new(chime),
            state: AudioState::Locked,
            muted: false,
        }
    }

    pub fn state(&self) -> AudioState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn unlock(&mut self) -> AudioState {
        if self.state == AudioState::Locked {
            match self.chime.init() {
                Ok(()) => {
                    tracing::debug!("audio unlocked");
                    self.state = AudioState::Ready;
                }
                Err(e) => tracing::debug!(error = %e, "audio stays locked"),
            }
        }
        self.state
    }

    /// Fire and forget.
    pub fn play(&mut self, frequency: f64, shape: ChimeShape) {
        if self.muted || self.state != AudioState::Ready {
            tracing::trace!(frequency, ?shape, "chime dropped");
            return;
        }
        self.chime.play(frequency, shape);
    }
}

/// Rings the terminal bell once per scheduled tone. Pitch is lost, timing is kept.
///
/// Tones are queued rather than written, and the loop that owns the terminal
/// calls [`TerminalBell::ring_due`] between frames so a BEL never lands inside
/// a half-written frame. Clones share one queue.
#[derive(Debug, Clone, Default)]
pub struct TerminalBell {
    due: Arc<Mutex<Vec<Instant>>>,
}

impl TerminalBell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one BEL per tone whose time has come and returns how many rang.
    pub fn ring_due<W: Write>(&self, out: &mut W, now: Instant) -> io::Result<usize> {
        let rung = match self.due.lock() {
            Ok(mut due) => {
                let before = due.len();
                due.retain(|at| *at > now);
                before - due.len()
            }
            Err(_) => 0,
        };
        if rung > 0 {
            out.write_all(&vec![BEL; rung])?;
            out.flush()?;
        }
        Ok(rung)
    }

    pub fn pending(&self) -> usize {
        self.due.lock().map(|due| due.len()).unwrap_or(0)
    }
}

impl Chime for TerminalBell {
    fn init(&mut self) -> Result<(), AudioError> {
        if io::stdout().is_tty() {
            Ok(())
        } else {
            Err(AudioError::Unavailable("stdout is not a terminal".into()))
        }
    }

    fn play(&mut self, frequency: f64, shape: ChimeShape) {
        let now = Instant::now();
        if let Ok(mut due) = self.due.lock() {
            due.extend(shape.tones(frequency).iter().map(|t| now + t.offset));
        }
    }
}

/// A chime played through [`RecordingChime`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayedChime {
    pub frequency: f64,
    pub shape: ChimeShape,
}

/// Keeps every chime it is asked to play. Clones share the same log, so a
/// test can hand one to the engine and inspect the other.
#[derive(Debug, Clone)]
pub struct RecordingChime {
    played: Arc<Mutex<Vec<PlayedChime>>>,
    available: bool,
}

impl RecordingChime {
    pub fn new() -> Self {
        Self {
            played: Arc::new(Mutex::new(Vec::new())),
            available: true,
        }
    }

    /// A chime whose output can never be initialized.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn played(&self) -> Vec<PlayedChime> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for RecordingChime {
    fn default() -> Self {
        Self::new()
    }
}

impl Chime for RecordingChime {
    fn init(&mut self) -> Result<(), AudioError> {
        if self.available {
            Ok(())
        } else {
            Err(AudioError::Unavailable("recording chime disabled".into()))
        }
    }

    fn play(&mut self, frequency: f64, shape: ChimeShape) {
        if let Ok(mut played) = self.played.lock() {
            played.push(PlayedChime { frequency, shape });
        }
    }
}
