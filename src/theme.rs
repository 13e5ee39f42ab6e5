use crate::config::{ensure_parent_dir, scoped_path};
use anyhow::{Context, Result};
use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Colours used by the live screen. Terminal colours and overlay pixels come
/// from the same `theme.json`.
#[derive(Debug, Clone, Copy)]
pub struct ThemePalette {
    pub text: Color,
    pub muted: Color,
    pub border: Color,
    pub border_active: Color,
    pub accent: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub overlay: OverlayColors,
}

/// Detection overlay colours, in RGB because they are painted onto pixel
/// surfaces rather than terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayColors {
    pub stroke: [u8; 3],
    pub label_background: [u8; 3],
    pub label_text: [u8; 3],
}

impl Default for OverlayColors {
    fn default() -> Self {
        ThemeFile::default().detections.colors()
    }
}

impl Default for ThemePalette {
    fn default() -> Self {
        ThemeFile::default().palette()
    }
}

/// `#RRGGBB` colour, parsed while the theme file is deserialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
struct HexColor([u8; 3]);

impl FromStr for HexColor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("expected a colour like #RRGGBB, got '{value}'"));
        }
        let mut rgb = [0_u8; 3];
        for (slot, idx) in rgb.iter_mut().zip([0, 2, 4]) {
            *slot = u8::from_str_radix(&hex[idx..idx + 2], 16)
                .map_err(|_| format!("expected a colour like #RRGGBB, got '{value}'"))?;
        }
        Ok(Self(rgb))
    }
}

impl TryFrom<String> for HexColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        color.to_string()
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02X}{g:02X}{b:02X}")
    }
}

impl HexColor {
    const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    fn terminal(self) -> Color {
        let [r, g, b] = self.0;
        Color::Rgb(r, g, b)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ThemeFile {
    ui: UiSection,
    detections: DetectionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct UiSection {
    text: HexColor,
    muted: HexColor,
    border: HexColor,
    border_active: HexColor,
    accent: HexColor,
    success: HexColor,
    warning: HexColor,
    error: HexColor,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            text: HexColor::rgb(0xE7, 0xEB, 0xF3),
            muted: HexColor::rgb(0x91, 0x98, 0xAA),
            border: HexColor::rgb(0x58, 0x62, 0x78),
            border_active: HexColor::rgb(0x72, 0x8C, 0xFF),
            accent: HexColor::rgb(0x66, 0xD8, 0xFF),
            success: HexColor::rgb(0x67, 0xD4, 0x8E),
            warning: HexColor::rgb(0xFF, 0xC6, 0x6D),
            error: HexColor::rgb(0xFF, 0x79, 0x86),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DetectionSection {
    stroke: HexColor,
    label_background: HexColor,
    label_text: HexColor,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            stroke: HexColor::rgb(0x00, 0xFF, 0x00),
            label_background: HexColor::rgb(0x00, 0xFF, 0x00),
            label_text: HexColor::rgb(0x00, 0x00, 0x00),
        }
    }
}

impl DetectionSection {
    fn colors(&self) -> OverlayColors {
        OverlayColors {
            stroke: self.stroke.0,
            label_background: self.label_background.0,
            label_text: self.label_text.0,
        }
    }
}

impl ThemeFile {
    fn palette(&self) -> ThemePalette {
        let ui = &self.ui;
        ThemePalette {
            text: ui.text.terminal(),
            muted: ui.muted.terminal(),
            border: ui.border.terminal(),
            border_active: ui.border_active.terminal(),
            accent: ui.accent.terminal(),
            success: ui.success.terminal(),
            warning: ui.warning.terminal(),
            error: ui.error.terminal(),
            overlay: self.detections.colors(),
        }
    }
}

pub fn theme_path() -> Result<PathBuf> {
    scoped_path("theme.json")
}

/// Reads `theme.json`, writing the default theme on first run. Missing keys
/// keep their defaults; a malformed colour fails the whole load.
pub fn load_or_create_theme() -> Result<ThemePalette> {
    load_or_create_theme_at(&theme_path()?)
}

fn load_or_create_theme_at(path: &Path) -> Result<ThemePalette> {
    if !path.exists() {
        let theme = ThemeFile::default();
        ensure_parent_dir(path)?;
        let payload =
            serde_json::to_string_pretty(&theme).context("failed serializing default theme")?;
        fs::write(path, payload)
            .with_context(|| format!("failed writing theme at {}", path.display()))?;
        return Ok(theme.palette());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading theme at {}", path.display()))?;
    let theme: ThemeFile = serde_json::from_str(&raw)
        .with_context(|| format!("invalid theme at {}", path.display()))?;
    Ok(theme.palette())
}
