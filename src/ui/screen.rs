use ratatui::Frame;

use crate::app::App;
use crate::ui::CompleteView;

/// A UI Screen boundary: responsible for rendering one state of the app
pub trait Screen {
    fn render(&self, app: &App, f: &mut Frame);
}

/// Circle, clock and settings; used while idle, running or paused
pub struct BreathingScreen;

impl Screen for BreathingScreen {
    fn render(&self, app: &App, f: &mut Frame) {
        f.render_widget(app, f.area());
    }
}

pub struct CompleteScreen;

impl Screen for CompleteScreen {
    fn render(&self, app: &App, f: &mut Frame) {
        f.render_widget(CompleteView(app), f.area());
    }
}

/// Helper to construct the appropriate screen for the current state
pub fn current_screen(app: &App) -> Box<dyn Screen> {
    if app.engine.state().is_complete() {
        Box::new(CompleteScreen)
    } else {
        Box::new(BreathingScreen)
    }
}

/// Draws whichever screen fits the app state
pub fn draw(app: &App, f: &mut Frame) {
    current_screen(app).render(app, f);
}
