pub mod screen;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle},
        Paragraph, Widget,
    },
};

use unicode_width::UnicodeWidthStr;

use crate::app::App;
use crate::pattern::{scale, Phase, MAX_SCALE};
use crate::session::format_clock;

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;
/// Room around the largest circle
const CANVAS_PAD: f64 = 1.1;

fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Inhale => Color::LightBlue,
        Phase::HoldIn => Color::Magenta,
        Phase::Exhale => Color::Cyan,
        Phase::HoldOut => Color::Blue,
    }
}

/// Canvas bounds that keep circles round. Terminal cells are about twice as
/// tall as they are wide.
fn canvas_bounds(area: Rect) -> ([f64; 2], [f64; 2]) {
    if area.width == 0 || area.height == 0 {
        return ([-CANVAS_PAD, CANVAS_PAD], [-CANVAS_PAD, CANVAS_PAD]);
    }
    let aspect = area.width as f64 / (area.height as f64 * 2.0);
    if aspect >= 1.0 {
        let x = CANVAS_PAD * aspect;
        ([-x, x], [-CANVAS_PAD, CANVAS_PAD])
    } else {
        let y = CANVAS_PAD / aspect;
        ([-CANVAS_PAD, CANVAS_PAD], [-y, y])
    }
}

fn render_header(app: &App, area: Rect, buf: &mut Buffer) {
    let bold_style = Style::default().add_modifier(Modifier::BOLD);
    let dim_style = Style::default().add_modifier(Modifier::DIM);

    const TITLE: &str = "Resonant";
    const TAGLINE: &str = "  Breathe with intention";
    const OFFLINE: &str = "  [offline]";

    let offline = !app.page.is_online();
    let mut needed = TITLE.width() + TAGLINE.width();
    if offline {
        needed += OFFLINE.width();
    }

    let mut spans = vec![Span::styled(TITLE, bold_style)];
    // The tagline goes first on narrow terminals.
    if needed <= area.width as usize {
        spans.push(Span::styled(TAGLINE, dim_style));
    }
    if offline {
        spans.push(Span::styled(OFFLINE, Style::default().fg(Color::Yellow)));
    }

    Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .render(area, buf);
}

fn render_banner(app: &App, area: Rect, buf: &mut Buffer) {
    let version = app
        .page
        .update_available()
        .map(|v| format!(" ({v})"))
        .unwrap_or_default();

    Paragraph::new(Span::styled(
        format!("Update available{version}: (u)pdate / (l)ater"),
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    ))
    .alignment(Alignment::Center)
    .render(area, buf);
}

fn render_circle(app: &App, area: Rect, buf: &mut Buffer) {
    let snapshot = app.engine.snapshot();
    let radius = scale(snapshot.phase, snapshot.phase_progress);
    let color = phase_color(snapshot.phase);
    let (x_bounds, y_bounds) = canvas_bounds(area);

    Canvas::default()
        .marker(Marker::Braille)
        .x_bounds(x_bounds)
        .y_bounds(y_bounds)
        .paint(move |ctx| {
            ctx.draw(&Circle {
                x: 0.0,
                y: 0.0,
                radius: MAX_SCALE,
                color: Color::DarkGray,
            });
            ctx.layer();
            ctx.draw(&Circle {
                x: 0.0,
                y: 0.0,
                radius,
                color,
            });
        })
        .render(area, buf);
}

impl App {
    pub fn legend(&self) -> &'static str {
        let state = self.engine.state();
        if state.is_complete() {
            "(enter) again / (r)eset / (q)uit"
        } else if state.is_running() {
            "(space) pause / (r)eset / (m)ute / (q)uit"
        } else {
            "(space) start / (p)attern / (←→) breath / (↑↓) minutes / (m)ute / (q)uit"
        }
    }
}

/// The breathing screen
impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let bold_style = Style::default().add_modifier(Modifier::BOLD);
        let dim_style = Style::default().add_modifier(Modifier::DIM);
        let italic_style = Style::default().add_modifier(Modifier::ITALIC);

        let snapshot = self.engine.snapshot();
        let banner = self.page.show_banner();
        let session = self.engine.state().config();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Length(1),                          // header
                Constraint::Length(if banner { 1 } else { 0 }), // update banner
                Constraint::Min(3),                             // circle
                Constraint::Length(1),                          // phase
                Constraint::Length(1),                          // clock
                Constraint::Length(1),                          // cycles
                Constraint::Length(1),                          // padding
                Constraint::Length(1),                          // settings
                Constraint::Length(1),                          // pattern summary
                Constraint::Length(1),                          // legend
            ])
            .split(area);

        render_header(self, chunks[0], buf);
        if banner {
            render_banner(self, chunks[1], buf);
        }
        render_circle(self, chunks[2], buf);

        let phase = if snapshot.running || snapshot.elapsed_seconds > 0.0 {
            Span::styled(
                snapshot.phase.label(),
                bold_style.fg(phase_color(snapshot.phase)),
            )
        } else {
            Span::styled("Ready", bold_style)
        };
        Paragraph::new(phase)
            .alignment(Alignment::Center)
            .render(chunks[3], buf);

        let mut clock = vec![
            Span::styled(format_clock(snapshot.remaining_seconds), bold_style),
            Span::styled(" remaining", dim_style),
        ];
        if self.engine.state().status() == crate::session::SessionStatus::Paused {
            clock.push(Span::styled("  (paused)", italic_style));
        }
        Paragraph::new(Line::from(clock))
            .alignment(Alignment::Center)
            .render(chunks[4], buf);

        Paragraph::new(Span::styled(
            format!("{} cycles", snapshot.cycles_completed),
            dim_style,
        ))
        .alignment(Alignment::Center)
        .render(chunks[5], buf);

        let muted = if self.engine.audio().is_muted() {
            "muted"
        } else {
            "sound on"
        };
        Paragraph::new(Span::styled(
            format!(
                "{} | {}s per phase | {} minutes | {}",
                self.pattern().name,
                session.box_duration.as_secs(),
                session.session_minutes,
                muted
            ),
            Style::default().fg(Color::Gray),
        ))
        .alignment(Alignment::Center)
        .render(chunks[7], buf);

        Paragraph::new(Span::styled(
            self.pattern().summary(session.box_duration),
            dim_style,
        ))
        .alignment(Alignment::Center)
        .render(chunks[8], buf);

        Paragraph::new(Span::styled(self.legend(), italic_style)).render(chunks[9], buf);
    }
}

/// Shown once the session ran its full length
pub struct CompleteView<'a>(pub &'a App);

impl Widget for CompleteView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let app = self.0;
        let snapshot = app.engine.snapshot();
        let bold_style = Style::default().add_modifier(Modifier::BOLD);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(1),
            ])
            .split(area);

        render_header(app, chunks[0], buf);

        Paragraph::new(Span::styled(
            "Session complete",
            bold_style.fg(Color::LightBlue),
        ))
        .alignment(Alignment::Center)
        .render(chunks[2], buf);

        Paragraph::new(format!(
            "{} cycles of {} breathing in {} minutes",
            snapshot.cycles_completed,
            app.pattern().name,
            app.engine.state().config().session_minutes
        ))
        .alignment(Alignment::Center)
        .render(chunks[3], buf);

        Paragraph::new(Span::styled(
            app.legend(),
            Style::default().add_modifier(Modifier::ITALIC),
        ))
        .render(chunks[6], buf);
    }
}
