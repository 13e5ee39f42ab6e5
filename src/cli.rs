use crate::snapshot::SnapshotFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "nvr-live",
    version,
    about = "Terminal live view for network video recorders, with detection overlays"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Config file (defaults to the user data directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Recorder base URL, e.g. http://nvr.local:8080.
    #[arg(long, global = true, env = "NVR_SERVER")]
    pub server: Option<String>,

    #[arg(long = "user", global = true, env = "NVR_USER")]
    pub username: Option<String>,

    #[arg(long, global = true, env = "NVR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open the live grid (default).
    Live(LiveArgs),
    /// Query the recorder's stream list.
    Streams(StreamsArgs),
    /// Save a snapshot of one stream with detections drawn in.
    Snapshot(SnapshotArgs),
    /// Drive a PTZ camera.
    Ptz(PtzArgs),
    /// Manage recordings.
    Recordings(RecordingsArgs),
}

#[derive(Debug, Args, Default)]
pub struct LiveArgs {
    /// Streams per page: 1 (single), 4, 9 or 16. Overrides the saved layout.
    #[arg(long, value_parser = ["1", "4", "9", "16"])]
    pub layout: Option<String>,

    /// Fixed grid columns; use together with --rows.
    #[arg(long, requires = "rows", conflicts_with = "layout")]
    pub columns: Option<usize>,

    /// Fixed grid rows; use together with --columns.
    #[arg(long, requires = "columns", conflicts_with = "layout")]
    pub rows: Option<usize>,

    /// Start with detection overlays hidden.
    #[arg(long, default_value_t = false)]
    pub no_detections: bool,
}

#[derive(Debug, Args)]
pub struct StreamsArgs {
    #[command(subcommand)]
    pub command: StreamsCommand,
}

#[derive(Debug, Subcommand)]
pub enum StreamsCommand {
    /// List the streams configured on the recorder.
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print machine-readable JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Stream name.
    pub stream: String,

    /// Output directory (defaults to the configured snapshot directory).
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SnapshotFormat::Jpeg)]
    pub format: SnapshotFormat,

    /// Leave detection boxes out of the image.
    #[arg(long, default_value_t = false)]
    pub no_detections: bool,
}

#[derive(Debug, Args)]
pub struct PtzArgs {
    /// Stream name.
    pub stream: String,

    #[command(subcommand)]
    pub action: PtzAction,
}

#[derive(Debug, Subcommand)]
pub enum PtzAction {
    Capabilities,
    Presets,
    Stop,
    Home,
    /// Go to a stored preset.
    Preset { token: String },
    /// Move at the given velocities, then stop.
    Move(MoveArgs),
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub pan: f32,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub tilt: f32,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub zoom: f32,

    /// How long to move before stopping.
    #[arg(long, default_value_t = 500)]
    pub duration_ms: u64,
}

#[derive(Debug, Args)]
pub struct RecordingsArgs {
    #[command(subcommand)]
    pub command: RecordingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum RecordingsCommand {
    /// Delete recordings by id, or everything matching a filter.
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Recording ids. Repeat the flag or pass a comma-separated list.
    #[arg(long = "id", value_delimiter = ',', conflicts_with_all = ["stream", "start", "end", "detection"])]
    pub ids: Vec<i64>,

    #[arg(long)]
    pub stream: Option<String>,

    /// Start of the time range, as the recorder expects it.
    #[arg(long)]
    pub start: Option<String>,

    #[arg(long)]
    pub end: Option<String>,

    /// Only recordings that contain detections.
    #[arg(long, default_value_t = false)]
    pub detection: bool,
}
