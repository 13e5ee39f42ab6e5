//! Which streams are on screen, and keeping players and detection pollers in
//! step with that.

use crate::engine::EngineFactory;
use crate::media::MediaElement;
use crate::model::Stream;
use crate::player::PlayerRegistry;
use crate::poller::{DetectionFeed, DetectionPoller, DetectionSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GridLayout {
    /// One stream filling the screen, chosen by the selection.
    Single,
    /// `n` streams per page on a near-square grid.
    Count { streams: usize },
    Custom { columns: usize, rows: usize },
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::Count { streams: 4 }
    }
}

impl GridLayout {
    /// Layout for a preset key: 1 is single-stream, anything else a count.
    #[must_use]
    pub fn preset(streams: usize) -> Self {
        if streams <= 1 {
            Self::Single
        } else {
            Self::Count { streams }
        }
    }

    #[must_use]
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            Self::Single => (1, 1),
            Self::Count { streams } => compute_optimal_grid(streams),
            Self::Custom { columns, rows } => (columns.max(1), rows.max(1)),
        }
    }

    #[must_use]
    pub fn page_size(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Count { streams } => streams.max(1),
            Self::Custom { .. } => {
                let (columns, rows) = self.dimensions();
                columns * rows
            }
        }
    }

    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Single => "1x1".to_owned(),
            Self::Count { streams } => {
                let (columns, rows) = compute_optimal_grid(streams);
                format!("{streams} ({columns}x{rows})")
            }
            Self::Custom { columns, rows } => format!("{columns}x{rows}"),
        }
    }
}

/// Near-square `(columns, rows)` for `count` tiles.
#[must_use]
pub fn compute_optimal_grid(count: usize) -> (usize, usize) {
    match count {
        0 | 1 => (1, 1),
        2 => (2, 1),
        3 | 4 => (2, 2),
        5 | 6 => (3, 2),
        7..=9 => (3, 3),
        10..=12 => (4, 3),
        13..=16 => (4, 4),
        17..=20 => (5, 4),
        _ => {
            let columns = count.isqrt() + usize::from(count.isqrt().pow(2) != count);
            (columns, count.div_ceil(columns))
        }
    }
}

#[must_use]
pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

/// The page actually shown once `page` is clamped to the stream count.
#[must_use]
pub fn clamp_page(page: usize, total: usize, page_size: usize) -> usize {
    page.min(page_count(total, page_size) - 1)
}

/// Streams on screen for `layout`, in list order.
///
/// Single-stream mode shows the selected stream, or the first one when the
/// selection is missing from the list.
#[must_use]
pub fn visible_streams<'a>(
    streams: &'a [Stream],
    layout: GridLayout,
    selected: Option<&str>,
    page: usize,
) -> &'a [Stream] {
    if streams.is_empty() {
        return &[];
    }
    if layout == GridLayout::Single {
        let idx = selected
            .and_then(|name| streams.iter().position(|stream| stream.name == name))
            .unwrap_or(0);
        return &streams[idx..=idx];
    }
    let page_size = layout.page_size();
    let page = clamp_page(page, streams.len(), page_size);
    let start = page * page_size;
    let end = (start + page_size).min(streams.len());
    &streams[start..end]
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GridViewState {
    pub layout: GridLayout,
    pub selected: Option<String>,
    pub page: usize,
    pub show_detections: bool,
}

/// Owns the stream list, the view state, and the player and poller
/// registries. Nothing else mutates either registry.
pub struct GridController<F: EngineFactory, S: DetectionSource> {
    players: PlayerRegistry<F>,
    poller: DetectionPoller<S>,
    streams: Vec<Stream>,
    view: GridViewState,
    visible: Vec<String>,
}

impl<F: EngineFactory, S: DetectionSource> GridController<F, S> {
    pub fn new(players: PlayerRegistry<F>, poller: DetectionPoller<S>, view: GridViewState) -> Self {
        Self {
            players,
            poller,
            streams: Vec::new(),
            view,
            visible: Vec::new(),
        }
    }

    #[must_use]
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    #[must_use]
    pub fn view(&self) -> &GridViewState {
        &self.view
    }

    /// Names currently on screen, in display order.
    #[must_use]
    pub fn visible(&self) -> &[String] {
        &self.visible
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        match self.view.layout {
            GridLayout::Single => self.streams.len().max(1),
            layout => page_count(self.streams.len(), layout.page_size()),
        }
    }

    /// Zero-based page actually shown.
    #[must_use]
    pub fn current_page(&self) -> usize {
        match self.view.layout {
            GridLayout::Single => self
                .view
                .selected
                .as_deref()
                .and_then(|name| self.streams.iter().position(|stream| stream.name == name))
                .unwrap_or(0),
            layout => clamp_page(self.view.page, self.streams.len(), layout.page_size()),
        }
    }

    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.streams.iter().find(|stream| stream.name == name)
    }

    pub fn players(&mut self) -> &mut PlayerRegistry<F> {
        &mut self.players
    }

    pub fn element(&mut self, stream: &str) -> MediaElement {
        self.players.element(stream)
    }

    pub fn feed(&mut self, stream: &str) -> DetectionFeed {
        self.poller.feed(stream)
    }

    #[must_use]
    pub fn is_polling(&self, stream: &str) -> bool {
        self.poller.is_enabled(stream)
    }

    pub fn set_streams(&mut self, streams: Vec<Stream>) {
        self.streams = streams;
        if let Some(selected) = self.view.selected.as_deref()
            && self.stream(selected).is_none()
        {
            self.view.selected = None;
        }
        self.reconcile();
    }

    pub fn set_layout(&mut self, layout: GridLayout) {
        if layout == GridLayout::Single && self.view.selected.is_none() {
            self.view.selected = self.visible.first().cloned();
        }
        if self.view.layout == GridLayout::Single
            && layout != GridLayout::Single
            && let Some(selected) = self.view.selected.as_deref()
            && let Some(idx) = self.streams.iter().position(|stream| stream.name == selected)
        {
            // Land on the page that holds the stream we were watching.
            self.view.page = idx / layout.page_size();
        }
        self.view.layout = layout;
        self.reconcile();
    }

    pub fn select(&mut self, stream: &str) {
        if self.stream(stream).is_some() {
            self.view.selected = Some(stream.to_owned());
            if self.view.layout == GridLayout::Single {
                self.reconcile();
            }
        }
    }

    /// Moves by `delta` pages; in single-stream mode by `delta` streams.
    pub fn step_page(&mut self, delta: isize) {
        let pages = self.page_count();
        let current = self.current_page();
        let target = current.saturating_add_signed(delta).min(pages - 1);
        if target == current {
            return;
        }
        if self.view.layout == GridLayout::Single {
            self.view.selected = self.streams.get(target).map(|stream| stream.name.clone());
        } else {
            self.view.page = target;
        }
        self.reconcile();
    }

    pub fn set_show_detections(&mut self, show: bool) {
        self.view.show_detections = show;
        self.reconcile();
    }

    /// Replaces every visible player with a fresh session.
    pub fn restart_visible(&mut self) {
        for name in self.visible.clone() {
            self.players.replace(&name);
        }
    }

    /// Brings players and pollers in line with the current view: tears down
    /// streams that left the screen, attaches (idempotently) every visible
    /// stream, and polls detections only where overlays are shown and the
    /// backend runs a detector.
    pub fn reconcile(&mut self) {
        if self.view.layout != GridLayout::Single {
            self.view.page =
                clamp_page(self.view.page, self.streams.len(), self.view.layout.page_size());
        }
        let next: Vec<Stream> = visible_streams(
            &self.streams,
            self.view.layout,
            self.view.selected.as_deref(),
            self.view.page,
        )
        .to_vec();
        let next_names: HashSet<&str> = next.iter().map(|stream| stream.name.as_str()).collect();

        for name in &self.visible {
            if !next_names.contains(name.as_str()) {
                self.players.teardown(name);
            }
        }
        for stream in &next {
            self.players.attach(&stream.name);
        }

        for name in self.poller.enabled_streams() {
            let keep = next
                .iter()
                .any(|stream| stream.name == name && self.polls(stream));
            if !keep {
                self.poller.disable(&name);
            }
        }
        for stream in &next {
            if self.polls(stream) {
                self.poller.enable(&stream.name);
            }
        }

        self.visible = next.into_iter().map(|stream| stream.name).collect();
        debug!(visible = ?self.visible, layout = ?self.view.layout, "grid reconciled");
    }

    fn polls(&self, stream: &Stream) -> bool {
        self.view.show_detections && stream.detection_configured()
    }

    /// Stops everything; used when the live screen closes.
    pub fn shutdown(&mut self) {
        self.poller.disable_all();
        self.players.teardown_all();
        self.visible.clear();
    }
}
