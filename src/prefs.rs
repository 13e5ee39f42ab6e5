use crate::config::{ensure_parent_dir, scoped_path};
use crate::grid::{GridLayout, GridViewState};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Live-view state remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPrefs {
    pub layout: GridLayout,
    /// Zero-based.
    pub page: usize,
    pub selected: Option<String>,
    pub show_detections: bool,
}

impl Default for UiPrefs {
    fn default() -> Self {
        Self {
            layout: GridLayout::default(),
            page: 0,
            selected: None,
            show_detections: true,
        }
    }
}

impl UiPrefs {
    #[must_use]
    pub fn view_state(&self) -> GridViewState {
        GridViewState {
            layout: self.layout,
            selected: self.selected.clone(),
            page: self.page,
            show_detections: self.show_detections,
        }
    }

    #[must_use]
    pub fn from_view(view: &GridViewState) -> Self {
        Self {
            layout: view.layout,
            page: view.page,
            selected: view.selected.clone(),
            show_detections: view.show_detections,
        }
    }
}

pub fn prefs_path() -> Result<PathBuf> {
    scoped_path("ui_prefs.json")
}

pub fn load_prefs() -> Result<UiPrefs> {
    load_prefs_from(&prefs_path()?)
}

pub fn save_prefs(prefs: &UiPrefs) -> Result<()> {
    save_prefs_to(&prefs_path()?, prefs)
}

pub fn load_prefs_from(path: &Path) -> Result<UiPrefs> {
    if !path.exists() {
        return Ok(UiPrefs::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading UI preferences at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing UI preferences at {}", path.display()))
}

pub fn save_prefs_to(path: &Path, prefs: &UiPrefs) -> Result<()> {
    ensure_parent_dir(path)?;
    let payload =
        serde_json::to_string_pretty(prefs).context("failed serializing UI preferences")?;
    fs::write(path, payload)
        .with_context(|| format!("failed writing UI preferences at {}", path.display()))?;
    Ok(())
}
