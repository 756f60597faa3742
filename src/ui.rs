use crate::controller::{StationController, StationView};
use crate::error::RadioError;
use crate::player::{HandleFactory, PlayerEvent};
use crate::station::StationState;
use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use rand::Rng;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame, Terminal,
};
use std::io::stdout;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

const VOLUME_STEP: f32 = 0.1;
const ROW_BARS: usize = 6;

// set_active drives the last three fields together
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StationRow {
    pub frequency_label: String,
    pub title: String,
    pub highlighted: bool,
    pub live: bool,
    pub animating: bool,
}

#[derive(Debug, Default)]
pub struct TuiView {
    rows: Vec<StationRow>,
    last_error: Option<String>,
}

impl TuiView {
    pub fn rows(&self) -> &[StationRow] {
        &self.rows
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn row_mut(&mut self, index: usize) -> &mut StationRow {
        if index >= self.rows.len() {
            self.rows.resize_with(index + 1, StationRow::default);
        }
        &mut self.rows[index]
    }
}

impl StationView for TuiView {
    fn render_label(&mut self, index: usize, frequency_label: &str, title: &str) {
        let row = self.row_mut(index);
        row.frequency_label = frequency_label.to_string();
        row.title = title.to_string();
    }

    fn set_active(&mut self, index: usize, active: bool) {
        let row = self.row_mut(index);
        row.highlighted = active;
        row.live = active;
        row.animating = active;
        if active {
            self.last_error = None;
        }
    }

    fn playback_failed(&mut self, index: usize, reason: &str) {
        let name = self
            .rows
            .get(index)
            .map(|r| r.frequency_label.clone())
            .unwrap_or_else(|| format!("station {}", index + 1));
        self.last_error = Some(format!("{}: {}", name, reason));
    }
}

pub struct UIState {
    wave_phase: f32,
    last_volume_change: Instant,
    saved_volume: Option<f32>,
    cursor: usize,
    list_area: Rect,
}

impl UIState {
    fn new() -> Self {
        Self {
            wave_phase: 0.0,
            last_volume_change: Instant::now() - Duration::from_secs(60),
            saved_volume: None,
            cursor: 0,
            list_area: Rect::default(),
        }
    }
}

pub fn row_at(list_area: Rect, station_count: usize, column: u16, row: u16) -> Option<usize> {
    let inner = Block::default().borders(Borders::ALL).inner(list_area);
    let inside_x = column >= inner.x && column < inner.x + inner.width;
    let inside_y = row >= inner.y && row < inner.y + inner.height;
    if !inside_x || !inside_y {
        return None;
    }
    let index = (row - inner.y) as usize;
    (index < station_count).then_some(index)
}

pub fn run_ui<F: HandleFactory>(
    controller: &mut StationController<TuiView, F>,
    mut events: UnboundedReceiver<PlayerEvent>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, controller, &mut events);

    disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    result
}

fn event_loop<B: Backend, F: HandleFactory>(
    terminal: &mut Terminal<B>,
    controller: &mut StationController<TuiView, F>,
    events: &mut UnboundedReceiver<PlayerEvent>,
) -> Result<()> {
    let mut ui_state = UIState::new();

    loop {
        while let Ok(event) = events.try_recv() {
            match event {
                PlayerEvent::Ended { index } => controller.report_failure(index, "stream ended"),
                PlayerEvent::Failed { index, reason } => controller.report_failure(index, &reason),
            }
        }

        terminal.draw(|f| draw(f, controller, &mut ui_state))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => {
                    controller.stop();
                    break;
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    ui_state.cursor = ui_state.cursor.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    ui_state.cursor = (ui_state.cursor + 1).min(controller.len() - 1);
                }
                KeyCode::Enter | KeyCode::Char(' ') => {
                    click(controller, ui_state.cursor);
                }
                KeyCode::Char(c @ '1'..='9') => {
                    let index = c as usize - '1' as usize;
                    ui_state.cursor = index.min(controller.len() - 1);
                    click(controller, index);
                }
                KeyCode::Char('p') => play_last(controller),
                KeyCode::Char('s') => controller.stop(),
                KeyCode::Char('+') | KeyCode::Char('=') => {
                    controller.set_volume(controller.volume() + VOLUME_STEP);
                    ui_state.last_volume_change = Instant::now();
                }
                KeyCode::Char('-') => {
                    controller.set_volume(controller.volume() - VOLUME_STEP);
                    ui_state.last_volume_change = Instant::now();
                }
                KeyCode::Char('m') => {
                    let current_volume = controller.volume();
                    if current_volume > 0.0 {
                        ui_state.saved_volume = Some(current_volume);
                        controller.set_volume(0.0);
                    } else {
                        let restore_volume = ui_state.saved_volume.unwrap_or(0.5);
                        controller.set_volume(restore_volume);
                    }
                    ui_state.last_volume_change = Instant::now();
                }
                _ => {}
            },
            Event::Mouse(mouse) if mouse.kind == MouseEventKind::Down(MouseButton::Left) => {
                if let Some(index) =
                    row_at(ui_state.list_area, controller.len(), mouse.column, mouse.row)
                {
                    ui_state.cursor = index;
                    click(controller, index);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn click<F: HandleFactory>(controller: &mut StationController<TuiView, F>, index: usize) {
    log_outcome(controller.activate(index));
}

fn play_last<F: HandleFactory>(controller: &mut StationController<TuiView, F>) {
    log_outcome(controller.play(None));
}

// playback failures already reached the view through playback_failed
fn log_outcome(result: crate::error::Result<()>) {
    match result {
        Ok(()) => {}
        Err(RadioError::InvalidIndex { index, len }) => {
            debug!(index, len, "ignored input for missing row");
        }
        Err(e) => debug!(error = %e, "playback request failed"),
    }
}

fn draw<F: HandleFactory>(
    f: &mut Frame,
    controller: &StationController<TuiView, F>,
    ui_state: &mut UIState,
) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(size);
    ui_state.list_area = chunks[0];

    let playing = controller.is_playing();
    let current_volume = controller.volume();
    let wave_visual = generate_waveform(&mut ui_state.wave_phase, playing, current_volume, 40);
    let row_bars: String = wave_visual.chars().take(ROW_BARS).collect();

    let view = controller.view();
    let rows: Vec<Line> = view
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let loaded = controller.state(i) == Some(StationState::Stopped);
            station_line(i, row, i == ui_state.cursor, loaded, &row_bars)
        })
        .collect();

    let left = Paragraph::new(rows).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" Stations ")
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(left, chunks[0]);

    let status_icon = if playing { "▶" } else { "■" };
    let status_text = if playing { "Playing" } else { "Stopped" };
    let station = controller.active_station();
    let volume_bar = generate_pretty_volume_bar(current_volume);
    let volume_recently_changed = ui_state.last_volume_change.elapsed() < Duration::from_secs(2);

    let mut lines = vec![];

    lines.push(Line::from(vec![
        Span::raw("Status: "),
        Span::styled(
            format!("{} {}", status_icon, status_text),
            if playing {
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Yellow)
            },
        ),
    ]));

    lines.push(Line::from(""));

    lines.push(Line::from(vec![
        Span::styled("Station: ", Style::default().fg(Color::Cyan)),
        Span::styled(
            station.frequency_label.as_str(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  [{}/{}]", controller.active_index() + 1, controller.len()),
            Style::default().fg(Color::DarkGray),
        ),
    ]));
    lines.push(Line::from(vec![
        Span::styled("         ", Style::default()),
        Span::raw(station.title.as_str()),
    ]));

    lines.push(Line::from(""));

    lines.push(Line::from(vec![
        if volume_recently_changed {
            Span::styled("🔊 ", Style::default().fg(Color::Yellow))
        } else {
            Span::raw("")
        },
        Span::styled("Volume: ", Style::default().fg(Color::Magenta)),
        Span::styled(
            format!("{:.0}%", current_volume * 100.0),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]));

    lines.push(Line::from(volume_bar));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "♫ Waveform ♫",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(wave_visual));
    lines.push(Line::from(""));

    if let Some(err) = view.last_error() {
        lines.push(Line::from(Span::styled(
            format!("⚠ {}", err),
            Style::default().fg(Color::Red),
        )));
        lines.push(Line::from(""));
    }

    lines.push(Line::from(Span::styled(
        "─── Controls ───",
        Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
    )));
    for (keys, action) in [
        ("  click/⏎", " : play/stop station"),
        ("   ↑/↓ 1-9", " : select station"),
        ("      p/s", " : play last/stop"),
        ("      +/-", " : volume up/down"),
        ("        m", " : mute/unmute"),
    ] {
        lines.push(Line::from(vec![
            Span::styled(
                keys,
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(action),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled(
            "        q",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" : quit"),
    ]));

    let right = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" ☆ Now Playing ☆ ")
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(right, chunks[1]);
}

fn station_line<'a>(
    index: usize,
    row: &'a StationRow,
    selected: bool,
    loaded: bool,
    bars: &str,
) -> Line<'a> {
    let base = if row.highlighted {
        Style::default().bg(Color::DarkGray)
    } else {
        Style::default()
    };

    let cursor = if selected { "› " } else { "  " };
    let live = if row.live {
        Span::styled(
            "LIVE ",
            base.fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("     ", base)
    };
    let animation = if row.animating {
        Span::styled(format!(" {}", bars), base.fg(Color::Green))
    } else if loaded {
        Span::styled(" ◦", Style::default().fg(Color::DarkGray))
    } else {
        Span::raw("")
    };

    Line::from(vec![
        Span::styled(cursor, base.fg(Color::Yellow)),
        Span::styled(format!("{} ", index + 1), base.fg(Color::DarkGray)),
        live,
        Span::styled(
            row.frequency_label.as_str(),
            base.fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" {}", row.title), base),
        animation,
    ])
}

fn generate_waveform(phase: &mut f32, is_playing: bool, volume: f32, bar_count: usize) -> String {
    let mut rng = rand::thread_rng();

    if is_playing {
        *phase += 0.2;
    } else {
        *phase *= 0.95;
    }

    let mut bars = String::new();

    for i in 0..bar_count {
        let x = i as f32 / bar_count as f32;

        let wave1 = ((*phase + x * 8.0).sin() * 0.3 + 0.5).abs();
        let wave2 = (((*phase * 1.3) + x * 12.0).sin() * 0.2 + 0.5).abs();
        let wave3 = (((*phase * 0.7) + x * 4.0).cos() * 0.3 + 0.5).abs();

        let noise = rng.gen_range(-0.1..0.1);
        let combined = (wave1 + wave2 + wave3) / 3.0 + noise;
        let level = (combined * volume * 20.0).clamp(0.0, 8.0) as u8;

        let final_level = if volume == 0.0 || !is_playing {
            (level as f32 * 0.2) as u8
        } else {
            level
        };

        bars.push(bar_char(final_level));
    }

    bars
}

fn bar_char(level: u8) -> char {
    match level {
        0 => '▁',
        1 => '▂',
        2 => '▃',
        3 => '▄',
        4 => '▅',
        5 => '▆',
        6 => '▇',
        _ => '█',
    }
}

fn generate_pretty_volume_bar(volume: f32) -> String {
    let vol_percent = (volume * 100.0) as usize;
    let bar_length = 20;
    let filled = (vol_percent * bar_length / 100).min(bar_length);

    let mut bar = String::new();
    bar.push('│');

    for i in 0..bar_length {
        if i < filled {
            if volume == 0.0 {
                bar.push('✗');
            } else if i < bar_length * 60 / 100 {
                bar.push('▓');
            } else if i < bar_length * 80 / 100 {
                bar.push('▒');
            } else {
                bar.push('░');
            }
        } else {
            bar.push('·');
        }
    }

    bar.push('│');

    if volume == 0.0 {
        bar.push_str(" 🔇");
    } else if vol_percent < 30 {
        bar.push_str(" 🔈");
    } else if vol_percent < 70 {
        bar.push_str(" 🔉");
    } else {
        bar.push_str(" 🔊");
    }

    bar
}
