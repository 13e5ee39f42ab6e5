#![allow(clippy::too_many_lines, clippy::cast_possible_truncation)]

#[path = "tui_frame.rs"]
mod frame;

use self::frame::{FrameScaler, HalfBlockImage, surface_size};
use crate::api::ApiClient;
use crate::cli::LiveArgs;
use crate::config::AppConfig;
use crate::engine::LiveEngineFactory;
use crate::error::ApiResult;
use crate::grid::{GridController, GridLayout};
use crate::mapper::display_viewport;
use crate::media::{ElementView, TileOverlay};
use crate::model::Stream;
use crate::notify::{Notifier, Severity, ToastQueue};
use crate::overlay::{OverlayRenderer, composite};
use crate::player::{PlayerRegistry, SessionPhase, SessionSettings};
use crate::poller::{DetectionPoller, PollSettings};
use crate::prefs::{self, UiPrefs};
use crate::ptz::{PtzController, PtzDirection};
use crate::snapshot::{self, SnapshotFormat};
use crate::theme::{self, ThemePalette};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use image::RgbaImage;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use ratatui::backend::CrosstermBackend;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const UI_IDLE_SLEEP: Duration = Duration::from_millis(33);
const TOAST_WIDTH: u16 = 48;

const GLYPH_ACTIVE: &str = "▸";
const GLYPH_PLAY: &str = "▶";
const GLYPH_MUTED: &str = "🔇";

static THEME: OnceLock<ThemePalette> = OnceLock::new();

type AppTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type LiveGrid = GridController<LiveEngineFactory, ApiClient>;

pub async fn run_live(config: &AppConfig, api: ApiClient, args: &LiveArgs) -> Result<()> {
    let loaded_theme = match theme::load_or_create_theme() {
        Ok(palette) => palette,
        Err(err) => {
            warn!("failed to load theme config ({err:#}), using defaults");
            ThemePalette::default()
        }
    };
    let _ = THEME.set(loaded_theme);

    let saved = match prefs::load_prefs() {
        Ok(saved) => saved,
        Err(err) => {
            warn!("ignoring unreadable UI preferences: {err:#}");
            UiPrefs::default()
        }
    };
    let prefs = apply_live_args(saved, args);

    let renderer = Arc::new(OverlayRenderer::new(active_theme().overlay)?);
    let factory = LiveEngineFactory::new(api.clone(), &config.player);
    let players = PlayerRegistry::new(
        Arc::new(factory),
        SessionSettings::from_config(&config.player),
    );
    let poller = DetectionPoller::new(Arc::new(api.clone()), PollSettings::from_config(config));
    let grid = GridController::new(players, poller, prefs.view_state());

    let mut app = LiveApp::new(api, grid, renderer, config.snapshot_dir.clone());
    app.reload_streams();

    let mut terminal = init_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app).await;
    let restore_result = restore_terminal(&mut terminal);

    app.grid.shutdown();
    if let Err(err) = prefs::save_prefs(&UiPrefs::from_view(app.grid.view())) {
        warn!("failed saving UI preferences: {err:#}");
    }

    run_result?;
    restore_result?;
    Ok(())
}

/// Command-line layout flags win over the saved layout.
fn apply_live_args(mut prefs: UiPrefs, args: &LiveArgs) -> UiPrefs {
    if let (Some(columns), Some(rows)) = (args.columns, args.rows) {
        prefs.layout = GridLayout::Custom { columns, rows };
    } else if let Some(count) = args.layout.as_deref().and_then(|raw| raw.parse().ok()) {
        prefs.layout = GridLayout::preset(count);
    }
    if args.no_detections {
        prefs.show_detections = false;
    }
    prefs
}

async fn run_loop(terminal: &mut AppTerminal, app: &mut LiveApp) -> Result<()> {
    loop {
        app.poll_stream_load().await;

        terminal
            .draw(|frame| app.draw(frame))
            .context("failed drawing live view")?;

        let mut quit = false;
        while event::poll(Duration::ZERO).context("failed to poll input")? {
            if let Event::Key(key) = event::read().context("failed reading input")?
                && key.kind == KeyEventKind::Press
                && app.handle_key(key) == AppCommand::Quit
            {
                quit = true;
                break;
            }
        }
        if quit {
            break;
        }

        tokio::time::sleep(UI_IDLE_SLEEP).await;
    }
    Ok(())
}

fn active_theme() -> &'static ThemePalette {
    THEME.get_or_init(ThemePalette::default)
}

fn init_terminal() -> Result<AppTerminal> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed entering alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("failed creating terminal")
}

fn restore_terminal(terminal: &mut AppTerminal) -> Result<()> {
    disable_raw_mode().context("failed disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed leaving alternate screen")?;
    terminal.show_cursor().context("failed showing cursor")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppCommand {
    None,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Overlay canvas for one tile, repainted only when the detection set, the
/// tile size or the native frame size changes.
struct OverlayCache {
    key: (u64, u32, u32, Option<(u32, u32)>),
    canvas: RgbaImage,
}

struct LiveApp {
    api: ApiClient,
    grid: LiveGrid,
    renderer: Arc<OverlayRenderer>,
    snapshot_dir: Option<PathBuf>,
    toasts: ToastQueue,
    load: LoadState,
    pending_load: Option<JoinHandle<ApiResult<Vec<Stream>>>>,
    cursor: usize,
    restore_layout: Option<GridLayout>,
    overlays: HashMap<String, OverlayCache>,
    video: HashMap<String, RgbaImage>,
    scaler: FrameScaler,
}

impl LiveApp {
    fn new(
        api: ApiClient,
        grid: LiveGrid,
        renderer: Arc<OverlayRenderer>,
        snapshot_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            api,
            grid,
            renderer,
            snapshot_dir,
            toasts: ToastQueue::default(),
            load: LoadState::Loading,
            pending_load: None,
            cursor: 0,
            restore_layout: None,
            overlays: HashMap::new(),
            video: HashMap::new(),
            scaler: FrameScaler::default(),
        }
    }

    fn reload_streams(&mut self) {
        if let Some(pending) = self.pending_load.take() {
            pending.abort();
        }
        let api = self.api.clone();
        self.pending_load = Some(tokio::spawn(async move { api.load_live_streams().await }));
        if self.grid.streams().is_empty() {
            self.load = LoadState::Loading;
        }
    }

    async fn poll_stream_load(&mut self) {
        let finished = self
            .pending_load
            .as_ref()
            .is_some_and(JoinHandle::is_finished);
        if !finished {
            return;
        }
        let Some(pending) = self.pending_load.take() else {
            return;
        };
        match pending.await {
            Ok(Ok(streams)) => {
                info!(count = streams.len(), "stream list loaded");
                let reloaded = self.load == LoadState::Ready;
                self.grid.set_streams(streams);
                self.load = LoadState::Ready;
                self.clamp_cursor();
                self.forget_hidden_tiles();
                if reloaded {
                    self.toasts.success("Stream list reloaded");
                }
            }
            Ok(Err(err)) => {
                warn!("stream list failed: {err}");
                let message = if err.is_unauthorized() {
                    format!("{err} (check --user / --password)")
                } else {
                    err.to_string()
                };
                if self.grid.streams().is_empty() {
                    self.load = LoadState::Failed(message);
                } else {
                    self.toasts.error(&format!("Reload failed: {message}"));
                }
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => self.load = LoadState::Failed(format!("stream loader crashed: {err}")),
        }
    }

    fn selected_stream(&self) -> Option<String> {
        self.grid.visible().get(self.cursor).cloned()
    }

    fn clamp_cursor(&mut self) {
        let count = self.grid.visible().len();
        self.cursor = self.cursor.min(count.saturating_sub(1));
    }

    fn forget_hidden_tiles(&mut self) {
        let visible = self.grid.visible().to_vec();
        self.overlays.retain(|name, _| visible.contains(name));
        self.video.retain(|name, _| visible.contains(name));
    }

    fn after_view_change(&mut self) {
        self.clamp_cursor();
        self.forget_hidden_tiles();
    }

    fn handle_key(&mut self, key: KeyEvent) -> AppCommand {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return AppCommand::Quit,
            KeyCode::Char(digit @ '1'..='4') => {
                let layout = layout_for_key(digit);
                if layout == GridLayout::Single
                    && let Some(name) = self.selected_stream()
                {
                    self.grid.select(&name);
                }
                self.restore_layout = None;
                self.grid.set_layout(layout);
                self.cursor = 0;
            }
            KeyCode::Char('f') => self.toggle_focus(),
            KeyCode::Left => self.move_cursor(-1),
            KeyCode::Right => self.move_cursor(1),
            KeyCode::Up => {
                let (columns, _) = self.grid.view().layout.dimensions();
                self.move_cursor(-(columns as isize));
            }
            KeyCode::Down => {
                let (columns, _) = self.grid.view().layout.dimensions();
                self.move_cursor(columns as isize);
            }
            KeyCode::Char('[') | KeyCode::PageUp => {
                self.grid.step_page(-1);
                self.cursor = 0;
            }
            KeyCode::Char(']') | KeyCode::PageDown => {
                self.grid.step_page(1);
                self.cursor = 0;
            }
            KeyCode::Enter => {
                if let Some(name) = self.selected_stream() {
                    self.grid.players().request_play(&name);
                }
            }
            KeyCode::Char('d') => {
                let show = !self.grid.view().show_detections;
                self.grid.set_show_detections(show);
                self.overlays.clear();
                self.toasts.info(if show {
                    "Detection overlays on"
                } else {
                    "Detection overlays off"
                });
            }
            KeyCode::Char('s') => self.take_snapshot(),
            KeyCode::Char('r') => {
                self.reload_streams();
                self.toasts.info("Reloading streams");
            }
            KeyCode::Char('R') => {
                self.grid.restart_visible();
                self.toasts.info("Restarting players");
            }
            KeyCode::Char('h') => self.nudge(PtzDirection::Left),
            KeyCode::Char('l') => self.nudge(PtzDirection::Right),
            KeyCode::Char('k') => self.nudge(PtzDirection::Up),
            KeyCode::Char('j') => self.nudge(PtzDirection::Down),
            KeyCode::Char('+' | '=') => self.nudge(PtzDirection::ZoomIn),
            KeyCode::Char('-') => self.nudge(PtzDirection::ZoomOut),
            KeyCode::Char('0') => self.ptz_home(),
            _ => return AppCommand::None,
        }
        self.after_view_change();
        AppCommand::None
    }

    fn move_cursor(&mut self, delta: isize) {
        if self.grid.view().layout == GridLayout::Single {
            self.grid.step_page(delta.signum());
            return;
        }
        let count = self.grid.visible().len();
        if count == 0 {
            return;
        }
        self.cursor = self
            .cursor
            .saturating_add_signed(delta)
            .min(count - 1);
    }

    /// Single-stream view of the selected tile, and back.
    fn toggle_focus(&mut self) {
        if let Some(previous) = self.restore_layout.take() {
            self.grid.set_layout(previous);
            let selected = self.grid.view().selected.clone();
            self.cursor = selected
                .and_then(|name| self.grid.visible().iter().position(|v| *v == name))
                .unwrap_or(0);
            return;
        }
        let Some(name) = self.selected_stream() else {
            return;
        };
        let current = self.grid.view().layout;
        if current == GridLayout::Single {
            return;
        }
        self.restore_layout = Some(current);
        self.grid.select(&name);
        self.grid.set_layout(GridLayout::Single);
        self.cursor = 0;
    }

    fn take_snapshot(&mut self) {
        let Some(name) = self.selected_stream() else {
            return;
        };
        let element = self.grid.element(&name);
        let detections = if self.grid.view().show_detections {
            self.grid.feed(&name).detections()
        } else {
            Vec::new()
        };
        let renderer = Arc::clone(&self.renderer);
        let toasts = self.toasts.clone();
        let dir = self.snapshot_dir.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = snapshot::capture(
                &element,
                &detections,
                &renderer,
                SnapshotFormat::Jpeg,
                chrono::Utc::now(),
            )
            .map_err(anyhow::Error::from)
            .and_then(|shot| {
                let dir = match dir {
                    Some(dir) => dir,
                    None => std::env::current_dir().context("failed resolving current directory")?,
                };
                snapshot::save(&shot, &dir)
            });
            match outcome {
                Ok(path) => toasts.success(&format!("Snapshot saved: {}", path.display())),
                Err(err) => toasts.error(&format!("Snapshot failed: {err:#}")),
            }
        });
    }

    fn ptz_target(&self) -> Option<String> {
        let name = self.selected_stream()?;
        if self.grid.stream(&name).is_some_and(|stream| stream.ptz_enabled) {
            Some(name)
        } else {
            self.toasts
                .warning(&format!("'{name}' has no PTZ control"));
            None
        }
    }

    fn nudge(&mut self, direction: PtzDirection) {
        let Some(name) = self.ptz_target() else {
            return;
        };
        let ptz = PtzController::new(self.api.clone(), &name);
        let toasts = self.toasts.clone();
        tokio::spawn(async move {
            if let Err(err) = ptz.nudge(direction).await {
                toasts.error(&format!("{err:#}"));
            }
        });
    }

    fn ptz_home(&mut self) {
        let Some(name) = self.ptz_target() else {
            return;
        };
        let ptz = PtzController::new(self.api.clone(), &name);
        let toasts = self.toasts.clone();
        tokio::spawn(async move {
            match ptz.home().await {
                Ok(()) => toasts.info(&format!("'{}' returning home", ptz.stream())),
                Err(err) => toasts.error(&format!("{err:#}")),
            }
        });
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .split(frame.area());

        frame.render_widget(Paragraph::new(self.header_line()), chunks[0]);

        match self.load.clone() {
            LoadState::Loading => draw_message(
                frame,
                chunks[1],
                "Loading streams…",
                active_theme().muted,
            ),
            LoadState::Failed(message) => draw_message(
                frame,
                chunks[1],
                &format!("Could not load streams: {message}\n\nPress r to retry."),
                active_theme().error,
            ),
            LoadState::Ready if self.grid.visible().is_empty() => draw_message(
                frame,
                chunks[1],
                "The recorder has no live streams enabled.",
                active_theme().muted,
            ),
            LoadState::Ready => self.draw_grid(frame, chunks[1]),
        }

        frame.render_widget(Paragraph::new(Line::from(footer_spans())), chunks[2]);
        self.draw_toasts(frame, chunks[1]);
    }

    fn header_line(&self) -> Line<'static> {
        let view = self.grid.view();
        let page = format!(
            "page {}/{}",
            self.grid.current_page() + 1,
            self.grid.page_count()
        );
        let detections = if view.show_detections {
            "detections on"
        } else {
            "detections off"
        };
        Line::from(vec![
            Span::styled(
                " nvr-live ",
                Style::default()
                    .fg(active_theme().accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("{}  ", self.api.base_url()),
                Style::default().fg(active_theme().muted),
            ),
            Span::styled(
                format!("layout {}  {page}  {detections}", view.layout.label()),
                Style::default().fg(active_theme().text),
            ),
        ])
    }

    fn draw_grid(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let (columns, rows) = self.grid.view().layout.dimensions();
        let rects = build_grid_rects(area, rows, columns);
        let visible = self.grid.visible().to_vec();
        for (idx, name) in visible.iter().enumerate() {
            let Some(cell) = rects.get(idx).copied() else {
                break;
            };
            self.draw_tile(frame, cell, name, idx == self.cursor);
        }
    }

    fn draw_tile(&mut self, frame: &mut Frame<'_>, cell: Rect, name: &str, focused: bool) {
        let element = self.grid.element(name);
        let view = element.view();
        let phase = self.grid.players().phase(name);
        let polling = self.grid.is_polling(name);
        let feed = self.grid.feed(name).snapshot();

        let border = if focused {
            active_theme().border_active
        } else {
            active_theme().border
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(tile_title(name, &view, phase, focused))
            .title_bottom(detection_badge(polling, &feed));
        let inner = block.inner(cell);
        frame.render_widget(block, cell);
        if inner.width == 0 || inner.height == 0 {
            return;
        }

        match &view.overlay {
            TileOverlay::Error(message) => {
                draw_message(frame, inner, message, active_theme().error);
                return;
            }
            TileOverlay::PlayPrompt => {
                draw_message(
                    frame,
                    inner,
                    &format!("{GLYPH_PLAY} Press Enter to play"),
                    active_theme().warning,
                );
                return;
            }
            TileOverlay::None => {}
        }

        let Some(native) = element.latest_frame() else {
            draw_message(frame, inner, &view.status, active_theme().muted);
            return;
        };

        let (width, height) = surface_size(inner);
        let viewport = display_viewport(native.width, native.height, width, height);
        let surface = self
            .video
            .entry(name.to_owned())
            .or_insert_with(|| RgbaImage::new(width, height));
        if surface.dimensions() != (width, height) {
            *surface = RgbaImage::new(width, height);
        }
        if let Some(viewport) = viewport.as_ref()
            && let Err(err) = self.scaler.paint(surface, &native, viewport)
        {
            debug!(stream = name, "frame not drawn: {err:#}");
        }

        if polling {
            let key = (
                feed.generation,
                width,
                height,
                Some((native.width, native.height)),
            );
            let cache = self
                .overlays
                .entry(name.to_owned())
                .or_insert_with(|| OverlayCache {
                    key: (u64::MAX, 0, 0, None),
                    canvas: RgbaImage::new(width, height),
                });
            if cache.key != key {
                if cache.canvas.dimensions() != (width, height) {
                    cache.canvas = RgbaImage::new(width, height);
                }
                self.renderer
                    .repaint(&mut cache.canvas, viewport.as_ref(), &feed.detections);
                cache.key = key;
            }
            composite(surface, &cache.canvas);
        }

        frame.render_widget(HalfBlockImage::new(surface), inner);
    }

    fn draw_toasts(&self, frame: &mut Frame<'_>, area: Rect) {
        let toasts = self.toasts.visible();
        let width = TOAST_WIDTH.min(area.width);
        let mut y = area.y;
        for toast in toasts.iter().rev() {
            if y + 3 > area.y + area.height {
                break;
            }
            let rect = Rect {
                x: area.x + area.width - width,
                y,
                width,
                height: 3,
            };
            let color = severity_color(toast.severity);
            frame.render_widget(Clear, rect);
            frame.render_widget(
                Paragraph::new(toast.message.as_str())
                    .style(Style::default().fg(active_theme().text))
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .border_style(Style::default().fg(color))
                            .title(Span::styled(
                                format!(" {} ", toast.severity.tag()),
                                Style::default().fg(color).add_modifier(Modifier::BOLD),
                            )),
                    ),
                rect,
            );
            y += 3;
        }
    }
}

fn layout_for_key(digit: char) -> GridLayout {
    match digit {
        '1' => GridLayout::Single,
        '3' => GridLayout::preset(9),
        '4' => GridLayout::preset(16),
        _ => GridLayout::preset(4),
    }
}

fn tile_title(
    name: &str,
    view: &ElementView,
    phase: Option<SessionPhase>,
    focused: bool,
) -> Line<'static> {
    let marker = if focused { GLYPH_ACTIVE } else { " " };
    let state = match phase {
        Some(SessionPhase::Playing) if view.muted => format!("live {GLYPH_MUTED}"),
        Some(SessionPhase::Playing) => "live".to_owned(),
        Some(SessionPhase::Attaching) => "connecting".to_owned(),
        Some(SessionPhase::Recovering) => "reconnecting".to_owned(),
        Some(SessionPhase::AwaitingUser) => "paused".to_owned(),
        Some(SessionPhase::Failed) => "error".to_owned(),
        None => view.status.clone(),
    };
    let state_color = match phase {
        Some(SessionPhase::Playing) => active_theme().success,
        Some(SessionPhase::Failed) => active_theme().error,
        Some(SessionPhase::Recovering | SessionPhase::AwaitingUser) => active_theme().warning,
        _ => active_theme().muted,
    };
    Line::from(vec![
        Span::styled(
            format!("{marker} {name} "),
            Style::default()
                .fg(active_theme().text)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(state, Style::default().fg(state_color)),
        Span::raw(" "),
    ])
}

fn detection_badge(polling: bool, feed: &crate::poller::FeedSnapshot) -> Line<'static> {
    if !polling {
        return Line::default();
    }
    if feed.last_error.is_some() {
        return Line::from(Span::styled(
            format!(" detections unavailable ({}) ", feed.consecutive_errors),
            Style::default().fg(active_theme().warning),
        ));
    }
    Line::from(Span::styled(
        format!(" {} detection(s) ", feed.detections.len()),
        Style::default().fg(active_theme().muted),
    ))
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Info => active_theme().accent,
        Severity::Success => active_theme().success,
        Severity::Warning => active_theme().warning,
        Severity::Error => active_theme().error,
    }
}

fn draw_message(frame: &mut Frame<'_>, area: Rect, message: &str, color: Color) {
    let top_padding = area.height.saturating_sub(1) / 2;
    let mut lines = vec![Line::default(); usize::from(top_padding)];
    lines.extend(
        message
            .lines()
            .map(|line| Line::from(Span::styled(line.to_owned(), Style::default().fg(color)))),
    );
    frame.render_widget(
        Paragraph::new(lines)
            .alignment(ratatui::layout::Alignment::Center)
            .wrap(Wrap { trim: true }),
        area,
    );
}

fn footer_spans() -> Vec<Span<'static>> {
    let hints: [(&str, &str); 9] = [
        ("q", "quit"),
        ("1-4", "layout"),
        ("[ ]", "page"),
        ("f", "focus"),
        ("Enter", "play"),
        ("d", "detections"),
        ("s", "snapshot"),
        ("r", "reload"),
        ("hjkl +-0", "ptz"),
    ];
    let mut spans = Vec::new();
    for (idx, (key, label)) in hints.iter().enumerate() {
        if idx > 0 {
            spans.push(Span::styled(" | ", Style::default().fg(active_theme().border)));
        }
        spans.push(Span::styled(
            format!("[{key}]"),
            Style::default()
                .fg(active_theme().accent)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(" {label}"),
            Style::default().fg(active_theme().muted),
        ));
    }
    spans
}

fn build_grid_rects(area: Rect, rows: usize, columns: usize) -> Vec<Rect> {
    let row_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Fill(1); rows.max(1)])
        .split(area);

    let mut rects = Vec::with_capacity(rows.saturating_mul(columns));
    for row_area in row_chunks.iter().copied() {
        let col_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Fill(1); columns.max(1)])
            .split(row_area);
        rects.extend(col_chunks.iter().copied());
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::{apply_live_args, build_grid_rects, layout_for_key};
    use crate::cli::LiveArgs;
    use crate::grid::GridLayout;
    use crate::prefs::UiPrefs;
    use ratatui::layout::Rect;

    #[test]
    fn number_keys_pick_layout_presets() {
        assert_eq!(layout_for_key('1'), GridLayout::Single);
        assert_eq!(layout_for_key('2'), GridLayout::Count { streams: 4 });
        assert_eq!(layout_for_key('4'), GridLayout::Count { streams: 16 });
    }

    #[test]
    fn grid_rects_tile_the_area() {
        let rects = build_grid_rects(Rect::new(0, 0, 80, 24), 2, 3);
        assert_eq!(rects.len(), 6);
        assert_eq!(rects[0].x, 0);
        assert_eq!(rects[5].y + rects[5].height, 24);
        assert_eq!(rects[5].x + rects[5].width, 80);
    }

    #[test]
    fn cli_layout_overrides_saved_prefs() {
        let saved = UiPrefs::default();
        let custom = apply_live_args(
            saved.clone(),
            &LiveArgs {
                columns: Some(3),
                rows: Some(2),
                no_detections: true,
                ..LiveArgs::default()
            },
        );
        assert_eq!(custom.layout, GridLayout::Custom { columns: 3, rows: 2 });
        assert!(!custom.show_detections);

        let single = apply_live_args(
            saved,
            &LiveArgs {
                layout: Some("1".to_owned()),
                ..LiveArgs::default()
            },
        );
        assert_eq!(single.layout, GridLayout::Single);
    }
}
