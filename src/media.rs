//! The media element a player session attaches to, and its H.264 decoder
//! thread.

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, RgbImage, RgbaImage};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

const DECODE_QUEUE_CAPACITY: usize = 8;

/// A decoded frame at the stream's native resolution, packed RGB8.
#[derive(Debug, Clone)]
pub struct NativeFrame {
    pub width: u32,
    pub height: u32,
    pub seq: u64,
    /// Attach epoch the frame was decoded for.
    pub epoch: u64,
    pub rgb: Arc<Vec<u8>>,
}

impl NativeFrame {
    #[must_use]
    pub fn to_rgba(&self) -> Option<RgbaImage> {
        let rgb = RgbImage::from_raw(self.width, self.height, self.rgb.as_ref().clone())?;
        Some(DynamicImage::ImageRgb8(rgb).to_rgba8())
    }

    /// RGB of the pixel at (`x`, `y`), black when out of range.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        match self.rgb.get(idx..idx + 3) {
            Some(px) => [px[0], px[1], px[2]],
            None => [0, 0, 0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOverlay {
    None,
    Error(String),
    PlayPrompt,
}

#[derive(Debug)]
struct ElementState {
    source: Option<Url>,
    epoch: u64,
    frame: Option<NativeFrame>,
    frame_seq: u64,
    playing: bool,
    muted: bool,
    overlay: TileOverlay,
    status: String,
}

/// What the UI needs to draw a tile, copied out under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementView {
    pub source: Option<Url>,
    pub epoch: u64,
    pub frame_seq: u64,
    pub native: Option<(u32, u32)>,
    pub playing: bool,
    pub muted: bool,
    pub overlay: TileOverlay,
    pub status: String,
}

/// Terminal counterpart of a video element: one source at a time, the latest
/// decoded frame, play state and the error / play-prompt overlay.
///
/// Every `set_source` and every effective `detach` bumps the epoch; frames
/// produced for an older epoch are refused.
#[derive(Debug, Clone)]
pub struct MediaElement {
    name: Arc<str>,
    state: Arc<RwLock<ElementState>>,
    frames: Arc<watch::Sender<u64>>,
}

impl MediaElement {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (frames, _) = watch::channel(0);
        Self {
            name: Arc::from(name),
            state: Arc::new(RwLock::new(ElementState {
                source: None,
                epoch: 0,
                frame: None,
                frame_seq: 0,
                playing: false,
                muted: false,
                overlay: TileOverlay::None,
                status: "idle".to_owned(),
            })),
            frames: Arc::new(frames),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points the element at a new source and blanks it.
    pub fn set_source(&self, url: Url) -> u64 {
        let mut state = self.state.write();
        state.epoch += 1;
        state.source = Some(url);
        state.frame = None;
        state.playing = false;
        state.overlay = TileOverlay::None;
        "connecting".clone_into(&mut state.status);
        state.epoch
    }

    /// Re-issues the source while keeping the last frame on screen until the
    /// new epoch produces one.
    pub fn refresh_source(&self, url: Url) -> u64 {
        let mut state = self.state.write();
        state.epoch += 1;
        state.source = Some(url);
        state.epoch
    }

    /// Drops the source, the last frame and any overlay. Detaching an idle
    /// element changes nothing.
    pub fn detach(&self) {
        let mut state = self.state.write();
        if state.source.is_none()
            && state.frame.is_none()
            && state.overlay == TileOverlay::None
            && !state.playing
        {
            return;
        }
        state.epoch += 1;
        state.source = None;
        state.frame = None;
        state.playing = false;
        state.overlay = TileOverlay::None;
        "idle".clone_into(&mut state.status);
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    #[must_use]
    pub fn source(&self) -> Option<Url> {
        self.state.read().source.clone()
    }

    /// Stores a decoded frame if `epoch` is still current.
    pub fn present_frame(&self, epoch: u64, width: u32, height: u32, rgb: Vec<u8>) -> bool {
        let seq = {
            let mut state = self.state.write();
            if state.epoch != epoch || state.source.is_none() {
                return false;
            }
            state.frame_seq += 1;
            let seq = state.frame_seq;
            state.frame = Some(NativeFrame {
                width,
                height,
                seq,
                epoch,
                rgb: Arc::new(rgb),
            });
            seq
        };
        self.frames.send_replace(seq);
        true
    }

    #[must_use]
    pub fn latest_frame(&self) -> Option<NativeFrame> {
        self.state.read().frame.clone()
    }

    /// Resolves true once a frame for `epoch` is available, false on
    /// timeout or when the element moves on to another epoch.
    pub async fn wait_for_frame(&self, epoch: u64, timeout: Duration) -> bool {
        let mut frames = self.frames.subscribe();
        let wait = async {
            loop {
                {
                    let state = self.state.read();
                    if state.epoch != epoch {
                        return false;
                    }
                    if state
                        .frame
                        .as_ref()
                        .is_some_and(|frame| frame.epoch == epoch)
                    {
                        return true;
                    }
                }
                if frames.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    // Session-driven updates carry the epoch they belong to so that a late
    // write from a torn-down session cannot resurrect an overlay.

    pub fn set_playing(&self, epoch: u64, muted: bool) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.playing = true;
        state.muted = muted;
        state.overlay = TileOverlay::None;
        "playing".clone_into(&mut state.status);
        true
    }

    pub fn show_error(&self, epoch: u64, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.playing = false;
        state.status.clone_from(&message);
        state.overlay = TileOverlay::Error(message);
        true
    }

    pub fn show_play_prompt(&self, epoch: u64) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.playing = false;
        state.overlay = TileOverlay::PlayPrompt;
        "waiting for play".clone_into(&mut state.status);
        true
    }

    pub fn set_status(&self, epoch: u64, status: impl Into<String>) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.status = status.into();
        true
    }

    #[must_use]
    pub fn view(&self) -> ElementView {
        let state = self.state.read();
        ElementView {
            source: state.source.clone(),
            epoch: state.epoch,
            frame_seq: state.frame_seq,
            native: state.frame.as_ref().map(|frame| (frame.width, frame.height)),
            playing: state.playing,
            muted: state.muted,
            overlay: state.overlay.clone(),
            status: state.status.clone(),
        }
    }
}

/// Whether the software H.264 decoder can be created in this process.
#[must_use]
pub fn decoder_available() -> bool {
    match Decoder::new() {
        Ok(_) => true,
        Err(err) => {
            warn!("H.264 decoder unavailable: {err}");
            false
        }
    }
}

enum DecodeJob {
    Config(Vec<u8>),
    AccessUnit(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped,
    Closed,
}

/// Sending side of one element's decoder thread, bound to one epoch. The
/// thread exits when the handle is dropped or the epoch goes stale.
pub struct DecoderHandle {
    tx: Sender<DecodeJob>,
}

impl DecoderHandle {
    pub fn spawn(element: MediaElement, epoch: u64) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<DecodeJob>(DECODE_QUEUE_CAPACITY);
        let thread_name = format!("decode-{}", element.name());
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_decoder(&element, epoch, rx))
            .context("failed to spawn decoder thread")?;
        Ok(Self { tx })
    }

    /// Parameter sets must not be lost, so this waits for queue space. The
    /// wait yields to the runtime instead of parking the worker thread.
    pub async fn submit_config(&self, annexb: Vec<u8>) -> Result<()> {
        self.tx
            .send(DecodeJob::Config(annexb))
            .await
            .map_err(|_| anyhow!("decoder thread has exited"))
    }

    /// Frames are dropped rather than queued behind a slow decoder.
    pub fn submit_access_unit(&self, annexb: Vec<u8>) -> SubmitOutcome {
        match self.tx.try_send(DecodeJob::AccessUnit(annexb)) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(_)) => SubmitOutcome::Dropped,
            Err(TrySendError::Closed(_)) => SubmitOutcome::Closed,
        }
    }
}

fn run_decoder(element: &MediaElement, epoch: u64, mut rx: Receiver<DecodeJob>) {
    let mut decoder = match Decoder::new() {
        Ok(decoder) => decoder,
        Err(err) => {
            element.show_error(epoch, format!("decoder init failed: {err}"));
            return;
        }
    };
    let mut rgb = Vec::new();
    let mut errors = 0_u64;

    while let Some(job) = rx.blocking_recv() {
        let (payload, is_config) = match job {
            DecodeJob::Config(data) => (data, true),
            DecodeJob::AccessUnit(data) => (data, false),
        };
        match decoder.decode(&payload) {
            Ok(Some(yuv)) => {
                let (width, height) = yuv.dimensions();
                let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
                    continue;
                };
                rgb.resize(yuv.rgb8_len(), 0);
                yuv.write_rgb8(&mut rgb);
                if !element.present_frame(epoch, width, height, std::mem::take(&mut rgb)) {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                errors += 1;
                if !is_config {
                    debug!(stream = element.name(), errors, "decode error: {err}");
                }
            }
        }
        if element.epoch() != epoch {
            break;
        }
    }
    debug!(stream = element.name(), "decoder thread exited");
}
