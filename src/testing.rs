//! Test doubles shared by the session and grid tests.

use crate::engine::{EngineFactory, EngineKind, PlaybackEngine};
use crate::error::ApiResult;
use crate::media::MediaElement;
use crate::model::Detection;
use crate::poller::DetectionSource;
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Scripted engine outcomes. Attach and play succeed once the queues run dry.
#[derive(Default)]
pub struct Script {
    pub attach_results: VecDeque<bool>,
    pub play_results: VecDeque<bool>,
    pub created: usize,
    pub disposed: usize,
    pub attached_sources: Vec<Url>,
    pub play_mutes: Vec<bool>,
    pub fatal_senders: Vec<mpsc::Sender<String>>,
    pub urls_issued: u64,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub script: Arc<Mutex<Script>>,
    pub unsupported: bool,
}

impl FakeFactory {
    pub fn with(attach: &[bool], play: &[bool]) -> Self {
        let factory = Self::default();
        {
            let mut script = factory.script.lock();
            script.attach_results = attach.iter().copied().collect();
            script.play_results = play.iter().copied().collect();
        }
        factory
    }

    pub fn inject_fatal(&self, message: &str) {
        let sender = self.script.lock().fatal_senders.last().cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(message.to_owned());
        }
    }
}

pub struct FakeEngine {
    script: Arc<Mutex<Script>>,
    element: Option<(MediaElement, u64)>,
    fatal_rx: Option<mpsc::Receiver<String>>,
    disposed: bool,
}

impl PlaybackEngine for FakeEngine {
    fn attach(
        &mut self,
        element: &MediaElement,
        epoch: u64,
        source: Url,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let (tx, rx) = mpsc::channel(1);
            let ok = {
                let mut script = self.script.lock();
                script.attached_sources.push(source);
                script.fatal_senders.push(tx);
                script.attach_results.pop_front().unwrap_or(true)
            };
            self.element = Some((element.clone(), epoch));
            self.fatal_rx = Some(rx);
            if ok { Ok(()) } else { Err(anyhow!("manifest unavailable")) }
        }
    }

    fn play(&mut self, muted: bool) -> impl Future<Output = Result<()>> + Send {
        async move {
            let ok = {
                let mut script = self.script.lock();
                script.play_mutes.push(muted);
                script.play_results.pop_front().unwrap_or(true)
            };
            if !ok {
                return Err(anyhow!("play rejected"));
            }
            if let Some((element, epoch)) = &self.element {
                element.set_playing(*epoch, muted);
            }
            Ok(())
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
        if !self.disposed {
            self.disposed = true;
            self.fatal_rx = None;
            self.script.lock().disposed += 1;
        }
    }
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn kind(&self) -> Option<EngineKind> {
        (!self.unsupported).then_some(EngineKind::ClientSide)
    }

    fn source_url(&self, stream: &str) -> Result<Url> {
        let mut script = self.script.lock();
        script.urls_issued += 1;
        Ok(Url::parse(&format!(
            "http://nvr/hls/{stream}/index.m3u8?_t={}",
            script.urls_issued
        ))?)
    }

    fn create(&self) -> Result<FakeEngine> {
        self.script.lock().created += 1;
        Ok(FakeEngine {
            script: Arc::clone(&self.script),
            element: None,
            fatal_rx: None,
            disposed: false,
        })
    }
}

/// Detection source that always answers with the same boxes.
#[derive(Debug, Clone, Default)]
pub struct StaticDetections {
    pub detections: Vec<Detection>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl DetectionSource for StaticDetections {
    fn fetch(&self, stream: &str) -> impl Future<Output = ApiResult<Vec<Detection>>> + Send {
        self.calls.lock().push(stream.to_owned());
        let detections = self.detections.clone();
        async move { Ok(detections) }
    }
}
