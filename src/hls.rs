//! Client-side HLS playback: playlist polling, MPEG-TS segment fetch and
//! H.264 decode into a [`MediaElement`].

use crate::api::ApiClient;
use crate::engine::PlaybackEngine;
use crate::media::{DecoderHandle, MediaElement, SubmitOutcome};
use crate::mpegts::{AccessUnit, demux_h264};
use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const NAL_TYPE_SPS: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    pub ended: bool,
}

impl MediaPlaylist {
    /// Sequence number of the newest segment, where live playback starts.
    #[must_use]
    pub fn live_edge(&self) -> Option<u64> {
        self.segments.last().map(|segment| segment.sequence)
    }

    /// How long to wait before reloading: half the target duration.
    #[must_use]
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs_f64((self.target_duration / 2.0).clamp(0.25, 10.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

pub fn parse_playlist(text: &str) -> Result<Playlist> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err(anyhow!("playlist does not start with #EXTM3U"));
    }

    let mut variants = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;
    let mut pending_duration: Option<f64> = None;
    let mut target_duration = 0.0;
    let mut media_sequence = 0;
    let mut segments = Vec::new();
    let mut ended = false;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_bandwidth = Some(
                attribute(attrs, "BANDWIDTH")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(0),
            );
        } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = value
                .parse()
                .with_context(|| format!("bad target duration '{value}'"))?;
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = value
                .parse()
                .with_context(|| format!("bad media sequence '{value}'"))?;
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().unwrap_or_default().trim();
            pending_duration = Some(
                duration
                    .parse()
                    .with_context(|| format!("bad segment duration '{duration}'"))?,
            );
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some(bandwidth) = pending_bandwidth.take() {
            variants.push(Variant {
                bandwidth,
                uri: line.to_owned(),
            });
        } else if let Some(duration) = pending_duration.take() {
            segments.push(Segment {
                uri: line.to_owned(),
                duration,
                sequence: media_sequence + segments.len() as u64,
            });
        }
    }

    if !variants.is_empty() {
        return Ok(Playlist::Master(variants));
    }
    if target_duration <= 0.0 {
        target_duration = segments
            .iter()
            .map(|segment| segment.duration)
            .fold(2.0, f64::max);
    }
    Ok(Playlist::Media(MediaPlaylist {
        target_duration,
        media_sequence,
        segments,
        ended,
    }))
}

fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut in_quotes = false;
    let mut start = 0;
    let bytes = attrs.as_bytes();
    for idx in 0..=bytes.len() {
        let at_end = idx == bytes.len();
        if !at_end && bytes[idx] == b'"' {
            in_quotes = !in_quotes;
        }
        if at_end || (bytes[idx] == b',' && !in_quotes) {
            let pair = &attrs[start..idx];
            if let Some((name, value)) = pair.split_once('=')
                && name.trim() == key
            {
                return Some(value.trim().trim_matches('"'));
            }
            start = idx + 1;
        }
    }
    None
}

#[must_use]
pub fn best_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().max_by_key(|variant| variant.bandwidth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HlsSettings {
    pub play_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub backoff_base: Duration,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            play_timeout: Duration::from_secs(10),
            max_consecutive_failures: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

struct FetchTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct HlsEngine {
    api: ApiClient,
    settings: HlsSettings,
    element: Option<MediaElement>,
    epoch: u64,
    task: Option<FetchTask>,
    fatal_rx: Option<mpsc::Receiver<String>>,
}

impl HlsEngine {
    #[must_use]
    pub fn new(api: ApiClient, settings: HlsSettings) -> Self {
        Self {
            api,
            settings,
            element: None,
            epoch: 0,
            task: None,
            fatal_rx: None,
        }
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            task.handle.abort();
        }
        self.fatal_rx = None;
    }

    /// Follows a master playlist to its best variant and returns the media
    /// playlist URL together with its first parse.
    async fn resolve_media(&self, source: &Url) -> Result<(Url, MediaPlaylist)> {
        let text = self
            .api
            .get_text(source)
            .await
            .context("failed loading HLS manifest")?;
        match parse_playlist(&text)? {
            Playlist::Media(playlist) => Ok((source.clone(), playlist)),
            Playlist::Master(variants) => {
                let variant = best_variant(&variants)
                    .ok_or_else(|| anyhow!("master playlist lists no variants"))?;
                let media_url = source
                    .join(&variant.uri)
                    .with_context(|| format!("bad variant URI '{}'", variant.uri))?;
                let text = self
                    .api
                    .get_text(&media_url)
                    .await
                    .context("failed loading HLS variant playlist")?;
                match parse_playlist(&text)? {
                    Playlist::Media(playlist) => Ok((media_url, playlist)),
                    Playlist::Master(_) => Err(anyhow!("variant playlist is another master")),
                }
            }
        }
    }
}

impl PlaybackEngine for HlsEngine {
    fn attach(
        &mut self,
        element: &MediaElement,
        epoch: u64,
        source: Url,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.stop_task();
            self.element = Some(element.clone());
            self.epoch = epoch;

            let (media_url, playlist) = self.resolve_media(&source).await?;
            let decoder = DecoderHandle::spawn(element.clone(), epoch)?;
            let (fatal_tx, fatal_rx) = mpsc::channel(1);
            let cancel = CancellationToken::new();
            let fetch = FetchLoop {
                api: self.api.clone(),
                settings: self.settings,
                media_url,
                element: element.clone(),
                epoch,
                decoder,
                cancel: cancel.clone(),
                fatal_tx,
            };
            let handle = tokio::spawn(fetch.run(playlist));
            self.task = Some(FetchTask { cancel, handle });
            self.fatal_rx = Some(fatal_rx);
            info!(stream = element.name(), "HLS source attached");
            Ok(())
        }
    }

    fn play(&mut self, muted: bool) -> impl Future<Output = Result<()>> + Send {
        async move {
            let element = self
                .element
                .clone()
                .ok_or_else(|| anyhow!("play requested before attach"))?;
            if element
                .wait_for_frame(self.epoch, self.settings.play_timeout)
                .await
            {
                element.set_playing(self.epoch, muted);
                Ok(())
            } else {
                Err(anyhow!(
                    "no video within {} s",
                    self.settings.play_timeout.as_secs()
                ))
            }
        }
    }

    fn fatal_error(&mut self) -> impl Future<Output = String> + Send {
        async move {
            match self.fatal_rx.as_mut() {
                Some(rx) => match rx.recv().await {
                    Some(message) => message,
                    None => std::future::pending().await,
                },
                None => std::future::pending().await,
            }
        }
    }

    fn dispose(&mut self) {
        self.stop_task();
        self.element = None;
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.stop_task();
    }
}

struct FetchLoop {
    api: ApiClient,
    settings: HlsSettings,
    media_url: Url,
    element: MediaElement,
    epoch: u64,
    decoder: DecoderHandle,
    cancel: CancellationToken,
    fatal_tx: mpsc::Sender<String>,
}

enum Step {
    Continue,
    Stop,
}

impl FetchLoop {
    async fn run(self, initial: MediaPlaylist) {
        let stream = self.element.name().to_owned();
        let mut playlist = initial;
        let mut next_sequence = playlist.live_edge();
        let mut failures = 0_u32;

        loop {
            let mut failed = None;
            for segment in playlist.segments.clone() {
                let Some(next) = next_sequence else {
                    break;
                };
                if segment.sequence < next {
                    continue;
                }
                match self.play_segment(&segment).await {
                    Ok(Step::Continue) => {
                        failures = 0;
                        next_sequence = Some(segment.sequence + 1);
                    }
                    Ok(Step::Stop) => return,
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                }
            }

            let wait = match failed {
                Some(err) => match self.record_failure(&stream, &mut failures, &err).await {
                    Some(backoff) => backoff,
                    None => return,
                },
                None => playlist.reload_interval(),
            };
            if !self.sleep(wait).await {
                return;
            }

            match self.reload().await {
                Ok(Some(reloaded)) => {
                    // Fell out of the sliding window: jump back to the live edge.
                    if let (Some(next), Some(first)) =
                        (next_sequence, reloaded.segments.first())
                        && next < first.sequence
                    {
                        debug!(stream, skipped = first.sequence - next, "HLS jumped to live edge");
                        next_sequence = reloaded.live_edge();
                    }
                    if next_sequence.is_none() {
                        next_sequence = reloaded.live_edge();
                    }
                    playlist = reloaded;
                }
                Ok(None) => return,
                Err(err) => match self.record_failure(&stream, &mut failures, &err).await {
                    Some(backoff) => {
                        if !self.sleep(backoff).await {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// Counts a failure. Returns the backoff to wait, or `None` once the
    /// failure budget is spent and the fatal error has been reported.
    async fn record_failure(
        &self,
        stream: &str,
        failures: &mut u32,
        err: &anyhow::Error,
    ) -> Option<Duration> {
        *failures += 1;
        if *failures >= self.settings.max_consecutive_failures {
            warn!(stream, failures = *failures, "HLS playback failed: {err:#}");
            let _ = self.fatal_tx.send(format!("{err:#}")).await;
            return None;
        }
        debug!(stream, failures = *failures, "HLS fetch failed: {err:#}");
        Some(self.settings.backoff_base * 2_u32.saturating_pow(*failures - 1))
    }

    async fn reload(&self) -> Result<Option<MediaPlaylist>> {
        let text = tokio::select! {
            () = self.cancel.cancelled() => return Ok(None),
            text = self.api.get_text(&self.media_url) => text.context("failed reloading HLS playlist")?,
        };
        match parse_playlist(&text)? {
            Playlist::Media(playlist) => Ok(Some(playlist)),
            Playlist::Master(_) => Err(anyhow!("media playlist turned into a master playlist")),
        }
    }

    async fn play_segment(&self, segment: &Segment) -> Result<Step> {
        let url = self
            .media_url
            .join(&segment.uri)
            .with_context(|| format!("bad segment URI '{}'", segment.uri))?;
        let bytes = tokio::select! {
            () = self.cancel.cancelled() => return Ok(Step::Stop),
            bytes = self.api.get_bytes(&url) => bytes.with_context(|| format!("failed fetching segment {}", segment.sequence))?,
        };
        let units = demux_h264(&bytes)?;
        if units.is_empty() {
            return Ok(Step::Continue);
        }

        let spacing = Duration::from_secs_f64(segment.duration.max(0.0) / units.len() as f64);
        for unit in units {
            if !self.submit(unit).await? {
                return Ok(Step::Stop);
            }
            if !self.sleep(spacing).await {
                return Ok(Step::Stop);
            }
        }
        Ok(Step::Continue)
    }

    async fn submit(&self, unit: AccessUnit) -> Result<bool> {
        if carries_parameter_sets(&unit.data) {
            if self.decoder.submit_config(unit.data).await.is_err() {
                return self.decoder_gone();
            }
            return Ok(true);
        }
        match self.decoder.submit_access_unit(unit.data) {
            SubmitOutcome::Queued | SubmitOutcome::Dropped => Ok(true),
            SubmitOutcome::Closed => self.decoder_gone(),
        }
    }

    /// The decoder thread stops on its own once the element moves to a newer
    /// epoch; anything else means decoding is broken.
    fn decoder_gone(&self) -> Result<bool> {
        if self.element.epoch() == self.epoch {
            Err(anyhow!("decoder stopped unexpectedly"))
        } else {
            Ok(false)
        }
    }

    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

/// True when the Annex B buffer contains an SPS NAL unit.
fn carries_parameter_sets(annexb: &[u8]) -> bool {
    annexb
        .windows(4)
        .any(|window| window[..3] == [0, 0, 1] && window[3] & 0x1F == NAL_TYPE_SPS)
}

#[cfg(test)]
mod tests {
    use super::{
        HlsEngine, HlsSettings, Playlist, best_variant, carries_parameter_sets, parse_playlist,
    };
    use crate::api::ApiClient;
    use crate::config::AppConfig;
    use crate::engine::PlaybackEngine;
    use crate::media::MediaElement;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIVE: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:120
#EXTINF:4.000,
segment_120.ts
#EXTINF:4.000,
segment_121.ts
#EXTINF:3.500,
segment_122.ts
";

    #[test]
    fn media_playlist_numbers_segments_from_media_sequence() {
        let Playlist::Media(playlist) = parse_playlist(LIVE).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(playlist.segments.len(), 3);
        assert_eq!(playlist.live_edge(), Some(122));
        assert_eq!(playlist.segments[2].uri, "segment_122.ts");
        assert!((playlist.segments[2].duration - 3.5).abs() < f64::EPSILON);
        assert_eq!(playlist.reload_interval(), Duration::from_secs(2));
        assert!(!playlist.ended);
    }

    #[test]
    fn placeholder_playlist_is_empty_and_ended() {
        let text = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-ENDLIST\n";
        let Playlist::Media(playlist) = parse_playlist(text).unwrap() else {
            panic!("expected media playlist");
        };
        assert!(playlist.ended);
        assert_eq!(playlist.live_edge(), None);
    }

    #[test]
    fn master_playlist_picks_highest_bandwidth() {
        let text = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=400000,CODECS=\"avc1.42e01e,mp4a.40.2\"
low/index.m3u8
#EXT-X-STREAM-INF:RESOLUTION=1920x1080,BANDWIDTH=2500000
high/index.m3u8
";
        let Playlist::Master(variants) = parse_playlist(text).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(best_variant(&variants).unwrap().uri, "high/index.m3u8");
    }

    #[test]
    fn rejects_non_playlists() {
        assert!(parse_playlist("<html>404</html>").is_err());
        assert!(parse_playlist("#EXTM3U\n#EXTINF:abc,\nseg.ts\n").is_err());
    }

    #[test]
    fn detects_sps_in_annexb() {
        assert!(carries_parameter_sets(&[0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68]));
        assert!(!carries_parameter_sets(&[0, 0, 0, 1, 0x41, 0x9A]));
    }

    fn client_for(server: &MockServer) -> ApiClient {
        let mut config = AppConfig::default();
        config.apply_overrides(Some(&server.uri()), None, None);
        ApiClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn attach_fails_when_manifest_is_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/yard/index.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = client_for(&server);
        let source = api.hls_manifest_url("yard", 1).unwrap();
        let mut engine = HlsEngine::new(api, HlsSettings::default());
        let element = MediaElement::new("yard");
        let epoch = element.set_source(source.clone());
        assert!(engine.attach(&element, epoch, source).await.is_err());
    }

    #[tokio::test]
    async fn repeated_segment_failures_become_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/yard/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIVE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hls/yard/segment_122.ts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = client_for(&server);
        let source: Url = api.hls_manifest_url("yard", 1).unwrap();
        let settings = HlsSettings {
            backoff_base: Duration::from_millis(10),
            ..HlsSettings::default()
        };
        let mut engine = HlsEngine::new(api, settings);
        let element = MediaElement::new("yard");
        let epoch = element.set_source(source.clone());
        engine.attach(&element, epoch, source).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(10), engine.fatal_error())
            .await
            .unwrap();
        assert!(message.contains("segment 122"));
        engine.dispose();
    }
}
