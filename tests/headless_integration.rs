use std::sync::mpsc;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use resonant::app::{Action, App};
use resonant::audio::{AudioGate, ChimeShape, RecordingChime};
use resonant::config::Config;
use resonant::pattern::{PatternCatalog, Phase};
use resonant::runtime::{AppEvent, FixedTicker, Runner, TestEventSource};
use resonant::session::SessionStatus;

const TICK: Duration = Duration::from_millis(50);

fn key(code: KeyCode) -> AppEvent {
    AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
}

fn app(config: Config, chime: RecordingChime) -> App {
    App::new(config, PatternCatalog::builtin(), AudioGate::new(chime))
}

// Headless run through Runner/TestEventSource without a TTY.
// Each runner tick is fed to the engine as a nominal 50 ms step.
#[test]
fn headless_one_minute_box_session_completes() {
    let chime = RecordingChime::new();
    let mut app = app(
        Config {
            session_minutes: 1,
            ..Config::default()
        },
        chime.clone(),
    );

    let (tx, rx) = mpsc::channel();
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        FixedTicker::new(Duration::from_micros(200)),
    );
    tx.send(key(KeyCode::Char(' '))).unwrap();

    let mut ticks = 0u32;
    for _ in 0..5_000u32 {
        match runner.step() {
            AppEvent::Tick => {
                if app.engine.state().is_running() {
                    ticks += 1;
                }
                app.on_tick(TICK);
                if app.engine.state().is_complete() {
                    break;
                }
            }
            AppEvent::Key(k) => {
                assert_eq!(app.handle_key(k), Action::None);
            }
            _ => {}
        }
    }

    assert_eq!(app.engine.state().status(), SessionStatus::Complete);
    assert_eq!(ticks, 1200);

    let snapshot = app.engine.snapshot();
    assert_eq!(snapshot.cycles_completed, 3);
    assert_eq!(snapshot.remaining_seconds, 0.0);

    let played = chime.played();
    let singles = played
        .iter()
        .filter(|c| c.shape == ChimeShape::Single)
        .count();
    assert_eq!(singles, 15);
    assert_eq!(
        played.last().map(|c| c.shape),
        Some(ChimeShape::CompletionSequence)
    );
}

#[test]
fn headless_pause_then_resume_keeps_progress() {
    let chime = RecordingChime::new();
    let mut app = app(Config::default(), chime.clone());

    app.handle_key(KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE));
    for _ in 0..40 {
        app.on_tick(TICK);
    }
    app.handle_key(KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE));
    let paused = app.engine.snapshot();

    for _ in 0..100 {
        app.on_tick(TICK);
    }
    assert_eq!(app.engine.snapshot(), paused);
    assert_eq!(paused.phase, Phase::Inhale);
    assert!((paused.phase_progress - 0.5).abs() < 1e-9);

    // Resuming chimes the current phase again.
    app.handle_key(KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE));
    assert!(app.engine.state().is_running());
    assert_eq!(chime.played().len(), 2);
}

#[test]
fn headless_four_seven_eight_never_holds_out() {
    let mut app = app(
        Config {
            pattern: resonant::pattern::PatternId::FourSevenEight,
            session_minutes: 2,
            ..Config::default()
        },
        RecordingChime::new(),
    );
    app.handle_key(KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE));

    let mut seen = Vec::new();
    while !app.engine.state().is_complete() {
        app.on_tick(TICK);
        let phase = app.engine.snapshot().phase;
        if seen.last() != Some(&phase) {
            seen.push(phase);
        }
    }

    assert!(!seen.contains(&Phase::HoldOut));
    assert_eq!(&seen[..3], &[Phase::Inhale, Phase::HoldIn, Phase::Exhale]);
    // 120 s over a 19 s cycle
    assert_eq!(app.engine.snapshot().cycles_completed, 6);
}

#[test]
fn headless_reset_is_idempotent() {
    let mut app = app(Config::default(), RecordingChime::new());
    app.handle_key(KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE));
    for _ in 0..123 {
        app.on_tick(TICK);
    }

    app.handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE));
    let once = app.engine.state().clone();
    app.handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE));

    assert_eq!(app.engine.state(), &once);
    assert_eq!(once.status(), SessionStatus::Idle);
    assert_eq!(once.elapsed(), Duration::ZERO);
    assert_eq!(once.cycles_completed(), 0);
    assert_eq!(once.phase(), Phase::Inhale);
}
