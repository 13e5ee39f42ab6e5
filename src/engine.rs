use crate::api::ApiClient;
use crate::config::PlayerSettings;
use crate::hls::{HlsEngine, HlsSettings};
use crate::media::{MediaElement, decoder_available};
use crate::rtsp::RtspEngine;
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::info;
use url::Url;

/// A playback backend bound to at most one media element at a time.
pub trait PlaybackEngine: Send + 'static {
    /// Starts feeding `source` into `element` for attach `epoch`, replacing
    /// whatever the engine was doing before.
    fn attach(
        &mut self,
        element: &MediaElement,
        epoch: u64,
        source: Url,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once video is showing, or fails when it does not start.
    fn play(&mut self, muted: bool) -> impl Future<Output = Result<()>> + Send;

    /// Resolves with a message when playback breaks beyond the engine's own
    /// retries. Never resolves while healthy or detached.
    fn fatal_error(&mut self) -> impl Future<Output = String> + Send;

    /// Stops all work. Calling it again is a no-op.
    fn dispose(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// The recorder's RTSP restream.
    Native,
    /// HLS fetched and decoded in-process.
    ClientSide,
}

pub trait EngineFactory: Send + Sync + 'static {
    type Engine: PlaybackEngine;

    /// The engine this environment will use, or `None` when live playback is
    /// unsupported altogether.
    fn kind(&self) -> Option<EngineKind>;

    /// A fresh source URL for `stream`. Called again on every rebuild and
    /// refresh so cache-busting parameters change.
    fn source_url(&self, stream: &str) -> Result<Url>;

    fn create(&self) -> Result<Self::Engine>;
}

/// Preference order: native, then client-side, else unsupported. Both paths
/// decode in-process, so neither works without the decoder.
#[must_use]
pub fn select_engine(native_configured: bool, decoder_ok: bool) -> Option<EngineKind> {
    match (decoder_ok, native_configured) {
        (false, _) => None,
        (true, true) => Some(EngineKind::Native),
        (true, false) => Some(EngineKind::ClientSide),
    }
}

pub enum LiveEngine {
    Native(RtspEngine),
    Hls(HlsEngine),
}

impl PlaybackEngine for LiveEngine {
    fn attach(
        &mut self,
        element: &MediaElement,
        epoch: u64,
        source: Url,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            match self {
                Self::Native(engine) => engine.attach(element, epoch, source).await,
                Self::Hls(engine) => engine.attach(element, epoch, source).await,
            }
        }
    }

    fn play(&mut self, muted: bool) -> impl Future<Output = Result<()>> + Send {
        async move {
            match self {
                Self::Native(engine) => engine.play(muted).await,
                Self::Hls(engine) => engine.play(muted).await,
            }
        }
    }

    fn fatal_error(&mut self) -> impl Future<Output = String> + Send {
        async move {
            match self {
                Self::Native(engine) => engine.fatal_error().await,
                Self::Hls(engine) => engine.fatal_error().await,
            }
        }
    }

    fn dispose(&mut self) {
        match self {
            Self::Native(engine) => engine.dispose(),
            Self::Hls(engine) => engine.dispose(),
        }
    }
}

pub struct LiveEngineFactory {
    api: ApiClient,
    restream_template: Option<String>,
    play_timeout: Duration,
    kind: Option<EngineKind>,
}

impl LiveEngineFactory {
    #[must_use]
    pub fn new(api: ApiClient, settings: &PlayerSettings) -> Self {
        let kind = select_engine(settings.rtsp_restream.is_some(), decoder_available());
        Self::with_kind(api, settings, kind)
    }

    #[must_use]
    pub fn with_kind(api: ApiClient, settings: &PlayerSettings, kind: Option<EngineKind>) -> Self {
        info!(?kind, "live playback engine selected");
        Self {
            api,
            restream_template: settings.rtsp_restream.clone(),
            play_timeout: Duration::from_secs(settings.play_timeout_secs.max(1)),
            kind,
        }
    }
}

impl EngineFactory for LiveEngineFactory {
    type Engine = LiveEngine;

    fn kind(&self) -> Option<EngineKind> {
        self.kind
    }

    fn source_url(&self, stream: &str) -> Result<Url> {
        match self.kind {
            Some(EngineKind::Native) => {
                let template = self
                    .restream_template
                    .as_deref()
                    .context("no restream template configured")?;
                let raw = template.replace("{stream}", stream);
                Url::parse(&raw).with_context(|| format!("invalid restream URL '{raw}'"))
            }
            Some(EngineKind::ClientSide) => Ok(self
                .api
                .hls_manifest_url(stream, Utc::now().timestamp_millis())?),
            None => Err(anyhow!("live playback is not supported here")),
        }
    }

    fn create(&self) -> Result<LiveEngine> {
        match self.kind {
            Some(EngineKind::Native) => Ok(LiveEngine::Native(RtspEngine::new(self.play_timeout))),
            Some(EngineKind::ClientSide) => Ok(LiveEngine::Hls(HlsEngine::new(
                self.api.clone(),
                HlsSettings {
                    play_timeout: self.play_timeout,
                    ..HlsSettings::default()
                },
            ))),
            None => Err(anyhow!(
                "live playback is not supported here: no H.264 decoder available"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineFactory, EngineKind, LiveEngineFactory, select_engine};
    use crate::api::ApiClient;
    use crate::config::{AppConfig, PlayerSettings};

    #[test]
    fn engine_preference_order() {
        assert_eq!(select_engine(true, true), Some(EngineKind::Native));
        assert_eq!(select_engine(false, true), Some(EngineKind::ClientSide));
        assert_eq!(select_engine(true, false), None);
        assert_eq!(select_engine(false, false), None);
    }

    fn api() -> ApiClient {
        ApiClient::new(&AppConfig::default()).unwrap()
    }

    #[test]
    fn client_side_sources_are_cache_busted() {
        let factory =
            LiveEngineFactory::with_kind(api(), &PlayerSettings::default(), Some(EngineKind::ClientSide));
        let url = factory.source_url("front door").unwrap();
        assert_eq!(url.path(), "/hls/front%20door/index.m3u8");
        assert!(url.query_pairs().any(|(key, _)| key == "_t"));
    }

    #[test]
    fn native_sources_fill_the_template() {
        let settings = PlayerSettings {
            rtsp_restream: Some("rtsp://nvr.local:8554/{stream}".to_owned()),
            ..PlayerSettings::default()
        };
        let factory = LiveEngineFactory::with_kind(api(), &settings, Some(EngineKind::Native));
        let url = factory.source_url("yard").unwrap();
        assert_eq!(url.as_str(), "rtsp://nvr.local:8554/yard");
    }

    #[test]
    fn unsupported_environment_refuses_to_build() {
        let factory = LiveEngineFactory::with_kind(api(), &PlayerSettings::default(), None);
        assert!(factory.source_url("yard").is_err());
        assert!(factory.create().is_err());
    }
}
