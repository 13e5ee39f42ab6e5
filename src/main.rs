mod api;
mod cli;
mod config;
mod engine;
mod error;
mod grid;
mod hls;
mod logging;
mod mapper;
mod media;
mod model;
mod mpegts;
mod notify;
mod overlay;
mod player;
mod poller;
mod prefs;
mod ptz;
mod recordings;
mod rtsp;
mod snapshot;
#[cfg(test)]
mod testing;
mod theme;
mod tui;

use anyhow::{Context, Result, anyhow};
use api::ApiClient;
use clap::Parser;
use cli::{
    Cli, Command, DeleteArgs, PtzAction, PtzArgs, RecordingsCommand, SnapshotArgs,
    StreamsCommand,
};
use config::AppConfig;
use engine::{EngineFactory, LiveEngineFactory, PlaybackEngine};
use media::MediaElement;
use model::{PtzMove, RecordingFilter};
use notify::{ConsoleNotifier, Notifier};
use overlay::OverlayRenderer;
use recordings::DeleteSelection;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = match cli.command {
        None | Some(Command::Live(_)) => Some(logging::init_file()?),
        Some(_) => {
            logging::init_stderr();
            None
        }
    };

    let mut config = config::load_or_create_config(cli.global.config.as_deref())?;
    config.apply_overrides(
        cli.global.server.as_deref(),
        cli.global.username.as_deref(),
        cli.global.password.as_deref(),
    );
    config.validate()?;
    let api = ApiClient::new(&config).context("failed creating API client")?;

    match cli.command {
        None => tui::run_live(&config, api, &cli::LiveArgs::default()).await?,
        Some(Command::Live(args)) => tui::run_live(&config, api, &args).await?,
        Some(Command::Streams(args)) => match args.command {
            StreamsCommand::List(list_args) => {
                let streams = api
                    .list_streams()
                    .await
                    .context("failed loading stream list")?;
                if list_args.json {
                    println!("{}", serde_json::to_string_pretty(&streams)?);
                    return Ok(());
                }
                if streams.is_empty() {
                    println!("The recorder has no streams configured.");
                    return Ok(());
                }
                println!(
                    "{:<20}  {:<11}  {:<8}  {:<5}  {:<9}  DETECTION",
                    "NAME", "RESOLUTION", "CODEC", "FPS", "STATE"
                );
                for stream in &streams {
                    let state = if stream.is_live_viewable() { "live" } else { "off" };
                    let detection = if stream.detection_configured() {
                        stream.detection_model.as_str()
                    } else {
                        "-"
                    };
                    println!(
                        "{:<20}  {:<11}  {:<8}  {:<5}  {:<9}  {}",
                        stream.name,
                        format!("{}x{}", stream.width, stream.height),
                        stream.codec,
                        stream.fps,
                        state,
                        detection
                    );
                }
            }
        },
        Some(Command::Snapshot(args)) => run_snapshot(&config, api, &args).await?,
        Some(Command::Ptz(args)) => run_ptz(api, &args).await?,
        Some(Command::Recordings(args)) => match args.command {
            RecordingsCommand::Delete(delete) => run_batch_delete(&api, &delete).await?,
        },
    }

    Ok(())
}

async fn run_snapshot(config: &AppConfig, api: ApiClient, args: &SnapshotArgs) -> Result<()> {
    let theme = theme::load_or_create_theme()?;
    let renderer = OverlayRenderer::new(theme.overlay)?;
    let factory = LiveEngineFactory::new(api.clone(), &config.player);

    let element = MediaElement::new(&args.stream);
    let source = factory.source_url(&args.stream)?;
    let mut engine = factory.create()?;
    let epoch = element.set_source(source.clone());
    let played = async {
        engine.attach(&element, epoch, source).await?;
        engine.play(true).await
    }
    .await;
    engine.dispose();
    played.with_context(|| format!("stream '{}' did not start", args.stream))?;

    let detections = if args.no_detections {
        Vec::new()
    } else {
        api.detection_results(&args.stream).await.unwrap_or_else(|err| {
            ConsoleNotifier.warning(&format!("snapshot taken without detections: {err}"));
            Vec::new()
        })
    };

    let shot = snapshot::capture(
        &element,
        &detections,
        &renderer,
        args.format,
        chrono::Utc::now(),
    )?;
    let dir = match (&args.out, &config.snapshot_dir) {
        (Some(dir), _) | (None, Some(dir)) => dir.clone(),
        (None, None) => std::env::current_dir().context("failed resolving current directory")?,
    };
    let path = snapshot::save(&shot, &dir)?;
    ConsoleNotifier.success(&format!(
        "Saved {}x{} snapshot with {} detection(s) to {}",
        shot.width,
        shot.height,
        detections.len(),
        path.display()
    ));
    Ok(())
}

async fn run_ptz(api: ApiClient, args: &PtzArgs) -> Result<()> {
    let ptz = ptz::PtzController::new(api, &args.stream);
    match &args.action {
        PtzAction::Capabilities => {
            println!("{}", serde_json::to_string_pretty(&ptz.capabilities().await?)?);
        }
        PtzAction::Presets => {
            let presets = ptz.presets().await?;
            if presets.is_empty() {
                println!("No presets stored on '{}'.", args.stream);
            }
            for preset in presets {
                println!("{:<8}  {}", preset.token, preset.name);
            }
        }
        PtzAction::Stop => ptz.stop().await?,
        PtzAction::Home => ptz.home().await?,
        PtzAction::Preset { token } => ptz.goto_preset(token).await?,
        PtzAction::Move(motion) => {
            ptz.move_for(
                PtzMove {
                    pan: motion.pan,
                    tilt: motion.tilt,
                    zoom: motion.zoom,
                }
                .clamped(),
                Duration::from_millis(motion.duration_ms),
            )
            .await?;
        }
    }
    Ok(())
}

async fn run_batch_delete(api: &ApiClient, args: &DeleteArgs) -> Result<()> {
    let selection = if args.ids.is_empty() {
        DeleteSelection::Filter(RecordingFilter {
            start: args.start.clone(),
            end: args.end.clone(),
            stream_name: args.stream.clone(),
            detection: args.detection.then_some(true),
        })
    } else {
        DeleteSelection::Ids(args.ids.clone())
    };

    let notifier = ConsoleNotifier;
    let Some(job_id) = recordings::submit_batch_delete(api, &selection, &notifier).await? else {
        return Err(anyhow!("nothing to delete"));
    };
    let done = recordings::track_progress(
        api,
        &job_id,
        recordings::PROGRESS_POLL_INTERVAL,
        |progress| {
            eprintln!("  {}/{} processed", progress.current, progress.total);
        },
    )
    .await?;
    let summary = recordings::summarize(&done);
    if done.is_error() {
        notifier.error(&summary);
        return Err(anyhow!("batch delete job {job_id} failed"));
    }
    if done.has_failures() {
        notifier.warning(&summary);
    } else {
        notifier.success(&summary);
    }
    Ok(())
}
