use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::audio::AudioGate;
use crate::config::Config;
use crate::engine::Engine;
use crate::offline::{ControllerNotice, PageMessage};
use crate::page::{PageAction, ShellLoad, ShellPage};
use crate::pattern::{BreathPattern, PatternCatalog};
use crate::session::{
    SessionConfig, SessionEvent, MAX_BOX_SECS, MAX_SESSION_MINUTES, MIN_BOX_SECS,
    MIN_SESSION_MINUTES,
};

/// What the outer loop has to do after the app handled an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    /// Forward to the shell controller
    PostMessage(PageMessage),
    /// The controller changed under us; load the shell again.
    Reload,
    OpenOrigin(url::Url),
}

#[derive(Debug)]
pub struct App {
    pub engine: Engine,
    pub catalog: PatternCatalog,
    pub page: ShellPage,
    pub config: Config,
}

impl App {
    pub fn new(config: Config, catalog: PatternCatalog, audio: AudioGate) -> Self {
        let session = Self::session_config(&catalog, &config);
        let mut engine = Engine::new(session, audio);
        engine.audio_mut().set_muted(!config.sound);

        Self {
            engine,
            catalog,
            page: ShellPage::new(),
            config,
        }
    }

    fn session_config(catalog: &PatternCatalog, config: &Config) -> SessionConfig {
        SessionConfig::for_pattern(
            catalog.resolve(&config.pattern),
            config.box_duration_secs,
            config.session_minutes,
        )
    }

    pub fn pattern(&self) -> &BreathPattern {
        self.catalog.resolve(&self.engine.state().config().pattern_id)
    }

    /// Pushes settings into the engine. Ignored while a session runs.
    fn apply_settings(&mut self) -> bool {
        let session = Self::session_config(&self.catalog, &self.config);
        self.engine.configure(session)
    }

    fn update_settings(&mut self, f: impl FnOnce(&mut Config)) {
        if self.engine.state().is_running() {
            return;
        }
        f(&mut self.config);
        self.apply_settings();
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Action::Quit;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Action::Quit,
            KeyCode::Char(' ') => self.engine.toggle(),
            KeyCode::Char('r') => self.engine.reset(),
            KeyCode::Enter if self.engine.state().is_complete() => self.engine.restart(),
            KeyCode::Char('p') => {
                let next = self.catalog.next_after(&self.config.pattern).id.clone();
                self.update_settings(|c| c.pattern = next);
            }
            KeyCode::Char('P') => {
                let prev = self.catalog.previous_before(&self.config.pattern).id.clone();
                self.update_settings(|c| c.pattern = prev);
            }
            KeyCode::Left => self.update_settings(|c| {
                c.box_duration_secs = c.box_duration_secs.saturating_sub(1).max(MIN_BOX_SECS)
            }),
            KeyCode::Right => self.update_settings(|c| {
                c.box_duration_secs = (c.box_duration_secs + 1).min(MAX_BOX_SECS)
            }),
            KeyCode::Up => self.update_settings(|c| {
                c.session_minutes = (c.session_minutes + 1).min(MAX_SESSION_MINUTES)
            }),
            KeyCode::Down => self.update_settings(|c| {
                c.session_minutes = c.session_minutes.saturating_sub(1).max(MIN_SESSION_MINUTES)
            }),
            KeyCode::Char('m') => {
                self.config.sound = !self.config.sound;
                self.engine.audio_mut().set_muted(!self.config.sound);
            }
            KeyCode::Char('u') if self.page.show_banner() => {
                if let Some(msg) = self.page.apply_update() {
                    return Action::PostMessage(msg);
                }
            }
            KeyCode::Char('l') => self.page.dismiss(),
            KeyCode::Char('w') => {
                if let Some(origin) = &self.config.shell.origin {
                    return Action::OpenOrigin(origin.clone());
                }
            }
            _ => {}
        }
        Action::None
    }

    pub fn on_tick(&mut self, dt: Duration) -> Option<SessionEvent> {
        self.engine.on_tick(dt)
    }

    pub fn on_notice(&mut self, notice: &ControllerNotice) -> Action {
        match self.page.on_notice(notice) {
            PageAction::Reload => Action::Reload,
            PageAction::ShowUpdate | PageAction::None => Action::None,
        }
    }

    /// Adds catalog patterns. A saved custom pattern that only now resolves
    /// is picked up when the engine is idle.
    pub fn merge_patterns(&mut self, patterns: Vec<BreathPattern>) {
        if patterns.is_empty() {
            return;
        }
        self.catalog.merge(patterns);
        self.apply_settings();
    }

    /// Takes the shell section of a re-read config file. Settings changed in
    /// the TUI are not clobbered. Returns true when the shell version changed,
    /// which means a new deploy should be installed.
    pub fn reload_shell_config(&mut self, fresh: &Config) -> bool {
        if fresh.shell == self.config.shell {
            return false;
        }
        let version_changed = fresh.shell.version != self.config.shell.version;
        self.config.shell = fresh.shell.clone();
        version_changed
    }

    /// Catalog patterns and connectivity from a finished shell load
    pub fn apply_shell_load(&mut self, load: ShellLoad) {
        self.page.apply_load(&load);
        self.merge_patterns(load.patterns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingChime;
    use crate::pattern::{PatternId, PhaseDurations};

    fn app() -> App {
        App::new(
            Config::default(),
            PatternCatalog::builtin(),
            AudioGate::new(RecordingChime::new()),
        )
    }

    fn press(app: &mut App, code: KeyCode) -> Action {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app();
        assert_eq!(press(&mut app, KeyCode::Char('q')), Action::Quit);
        assert_eq!(press(&mut app, KeyCode::Esc), Action::Quit);
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Action::Quit
        );
    }

    #[test]
    fn test_pattern_cycles_only_when_not_running() {
        let mut app = app();

        press(&mut app, KeyCode::Char('p'));
        assert_eq!(app.pattern().id, PatternId::FourSevenEight);
        press(&mut app, KeyCode::Char('P'));
        assert_eq!(app.pattern().id, PatternId::Box);

        press(&mut app, KeyCode::Char(' '));
        press(&mut app, KeyCode::Char('p'));
        assert_eq!(app.pattern().id, PatternId::Box);
        assert_eq!(app.config.pattern, PatternId::Box);
    }

    #[test]
    fn test_settings_are_clamped() {
        let mut app = app();
        for _ in 0..10 {
            press(&mut app, KeyCode::Right);
            press(&mut app, KeyCode::Down);
        }
        assert_eq!(app.config.box_duration_secs, MAX_BOX_SECS);
        assert_eq!(app.config.session_minutes, MIN_SESSION_MINUTES);
        assert_eq!(
            app.engine.state().config().box_duration,
            Duration::from_secs(MAX_BOX_SECS)
        );
    }

    #[test]
    fn test_open_origin_needs_configured_origin() {
        let mut app = app();
        assert_eq!(press(&mut app, KeyCode::Char('w')), Action::None);

        let origin = url::Url::parse("https://resonant.example/").unwrap();
        app.config.shell.origin = Some(origin.clone());
        assert_eq!(press(&mut app, KeyCode::Char('w')), Action::OpenOrigin(origin));
    }

    #[test]
    fn test_mute_toggles_sound() {
        let mut app = app();
        press(&mut app, KeyCode::Char('m'));
        assert!(!app.config.sound);
        assert!(app.engine.audio().is_muted());
    }

    #[test]
    fn test_update_key_posts_skip_waiting() {
        let mut app = app();
        assert_eq!(press(&mut app, KeyCode::Char('u')), Action::None);

        app.on_notice(&ControllerNotice::UpdateReady {
            version: "v2".parse().unwrap(),
        });
        assert_eq!(
            press(&mut app, KeyCode::Char('u')),
            Action::PostMessage(PageMessage::SkipWaiting)
        );

        let action = app.on_notice(&ControllerNotice::ControllerChanged {
            previous: Some("v1".parse().unwrap()),
            current: "v2".parse().unwrap(),
        });
        assert_eq!(action, Action::Reload);
    }

    #[test]
    fn test_saved_custom_pattern_resolves_after_merge() {
        let config = Config {
            pattern: PatternId::Custom("triangle".into()),
            ..Config::default()
        };
        let mut app = App::new(
            config,
            PatternCatalog::builtin(),
            AudioGate::new(RecordingChime::new()),
        );
        assert_eq!(app.pattern().id, PatternId::Box);

        let triangle = BreathPattern::new(
            PatternId::Custom("triangle".into()),
            "Triangle",
            "",
            PhaseDurations::uniform(Duration::from_secs(3)),
        )
        .unwrap();
        app.merge_patterns(vec![triangle]);

        assert_eq!(app.pattern().id, PatternId::Custom("triangle".into()));
    }

    #[test]
    fn test_reload_shell_config_reports_new_version() {
        let mut app = app();
        press(&mut app, KeyCode::Up);
        let mut fresh = Config::default();
        assert!(!app.reload_shell_config(&fresh));

        fresh.shell.catalog_path = "/custom.json".into();
        assert!(!app.reload_shell_config(&fresh));
        assert_eq!(app.config.shell.catalog_path, "/custom.json");

        fresh.shell.version = "resonant-v2".into();
        assert!(app.reload_shell_config(&fresh));
        assert_eq!(app.config.session_minutes, 6);
    }
}
