//! Per-stream detection polling with error backoff.

use crate::api::ApiClient;
use crate::config::AppConfig;
use crate::error::ApiResult;
use crate::model::Detection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Anything that can answer "what is detected on this stream right now".
pub trait DetectionSource: Send + Sync + 'static {
    fn fetch(&self, stream: &str) -> impl Future<Output = ApiResult<Vec<Detection>>> + Send;
}

impl DetectionSource for ApiClient {
    fn fetch(&self, stream: &str) -> impl Future<Output = ApiResult<Vec<Detection>>> + Send {
        self.detection_results(stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub error_threshold: u32,
    pub request_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1_000),
            max_interval: Duration::from_millis(5_000),
            error_threshold: 3,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl PollSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_interval: Duration::from_millis(config.detection.base_interval_ms),
            max_interval: Duration::from_millis(config.detection.max_interval_ms),
            error_threshold: config.detection.error_threshold.max(1),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Interval and error bookkeeping for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    interval: Duration,
    consecutive_errors: u32,
}

impl PollState {
    #[must_use]
    pub fn new(settings: &PollSettings) -> Self {
        Self {
            interval: settings.base_interval,
            consecutive_errors: 0,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn record_success(&mut self, settings: &PollSettings) {
        self.consecutive_errors = 0;
        self.interval = settings.base_interval;
    }

    /// Returns true when this failure is the one that first reaches the
    /// threshold.
    pub fn record_failure(&mut self, settings: &PollSettings) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= settings.error_threshold {
            self.interval = (self.interval * 2).min(settings.max_interval);
        }
        self.consecutive_errors == settings.error_threshold
    }
}

#[derive(Debug, Default)]
struct FeedState {
    detections: Vec<Detection>,
    generation: u64,
    session: u64,
    consecutive_errors: u32,
    last_error: Option<String>,
}

/// Latest detections for one stream, shared between its poll task and the
/// renderer. Every change bumps `generation` so readers can skip repaints.
#[derive(Debug, Clone, Default)]
pub struct DetectionFeed {
    inner: Arc<Mutex<FeedState>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub detections: Vec<Detection>,
    pub generation: u64,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

impl DetectionFeed {
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        let state = self.inner.lock();
        FeedSnapshot {
            detections: state.detections.clone(),
            generation: state.generation,
            consecutive_errors: state.consecutive_errors,
            last_error: state.last_error.clone(),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    #[must_use]
    pub fn detections(&self) -> Vec<Detection> {
        self.inner.lock().detections.clone()
    }

    fn begin_session(&self) -> u64 {
        let mut state = self.inner.lock();
        state.session += 1;
        state.session
    }

    /// Ends the current session and drops whatever it produced.
    fn end_session(&self) {
        let mut state = self.inner.lock();
        state.session += 1;
        state.consecutive_errors = 0;
        state.last_error = None;
        if !state.detections.is_empty() {
            state.detections.clear();
            state.generation += 1;
        }
    }

    /// Applies a poll outcome. Returns false, without touching anything, if
    /// the session that issued the poll has since been ended.
    fn apply(&self, session: u64, outcome: Result<Vec<Detection>, String>, poll: &PollState) -> bool {
        let mut state = self.inner.lock();
        if state.session != session {
            return false;
        }
        state.consecutive_errors = poll.consecutive_errors();
        match outcome {
            Ok(detections) => {
                state.detections = detections;
                state.last_error = None;
            }
            Err(message) => {
                state.detections.clear();
                state.last_error = Some(message);
            }
        }
        state.generation += 1;
        true
    }
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one polling task per enabled stream.
pub struct DetectionPoller<S: DetectionSource> {
    source: Arc<S>,
    settings: PollSettings,
    tasks: HashMap<String, PollTask>,
    feeds: HashMap<String, DetectionFeed>,
}

impl<S: DetectionSource> DetectionPoller<S> {
    pub fn new(source: Arc<S>, settings: PollSettings) -> Self {
        Self {
            source,
            settings,
            tasks: HashMap::new(),
            feeds: HashMap::new(),
        }
    }

    /// Feed for `stream`, created on first use so the renderer can hold it
    /// before polling starts.
    pub fn feed(&mut self, stream: &str) -> DetectionFeed {
        self.feeds.entry(stream.to_owned()).or_default().clone()
    }

    #[must_use]
    pub fn is_enabled(&self, stream: &str) -> bool {
        self.tasks
            .get(stream)
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn enabled_streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts polling `stream`: one immediate fetch, then one per interval.
    /// Enabling an already polled stream does nothing.
    pub fn enable(&mut self, stream: &str) {
        if self.is_enabled(stream) {
            return;
        }
        let feed = self.feed(stream);
        let session = feed.begin_session();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            stream.to_owned(),
            feed,
            session,
            self.settings,
            cancel.clone(),
        ));
        info!(stream, "detection polling enabled");
        self.tasks
            .insert(stream.to_owned(), PollTask { cancel, handle });
    }

    /// Stops polling and clears the stream's detections. Safe to call for a
    /// stream that is not being polled.
    pub fn disable(&mut self, stream: &str) {
        if let Some(task) = self.tasks.remove(stream) {
            task.cancel.cancel();
            task.handle.abort();
            info!(stream, "detection polling disabled");
        }
        if let Some(feed) = self.feeds.get(stream) {
            feed.end_session();
        }
    }

    pub fn disable_all(&mut self) {
        let names: Vec<String> = self.tasks.keys().cloned().collect();
        for name in names {
            self.disable(&name);
        }
    }
}

impl<S: DetectionSource> Drop for DetectionPoller<S> {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

async fn poll_loop<S: DetectionSource>(
    source: Arc<S>,
    stream: String,
    feed: DetectionFeed,
    session: u64,
    settings: PollSettings,
    cancel: CancellationToken,
) {
    let mut state = PollState::new(&settings);
    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => break,
            result = tokio::time::timeout(settings.request_timeout, source.fetch(&stream)) => result,
        };

        let outcome = match outcome {
            Ok(Ok(detections)) => {
                state.record_success(&settings);
                Ok(detections)
            }
            Ok(Err(err)) => {
                log_failure(&stream, &mut state, &settings, &err.to_string());
                Err(err.to_string())
            }
            Err(_) => {
                let message = format!(
                    "detection request timed out after {} ms",
                    settings.request_timeout.as_millis()
                );
                log_failure(&stream, &mut state, &settings, &message);
                Err(message)
            }
        };

        if cancel.is_cancelled() || !feed.apply(session, outcome, &state) {
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(state.interval()) => {}
        }
    }
    debug!(stream, "detection poll loop exited");
}

fn log_failure(stream: &str, state: &mut PollState, settings: &PollSettings, message: &str) {
    if state.record_failure(settings) {
        warn!(
            stream,
            errors = state.consecutive_errors(),
            interval_ms = state.interval().as_millis() as u64,
            "detection polling backing off: {message}"
        );
    } else {
        debug!(stream, errors = state.consecutive_errors(), "detection poll failed: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::{DetectionPoller, DetectionSource, PollSettings, PollState};
    use crate::error::{ApiError, ApiResult};
    use crate::model::Detection;
    use std::future::Future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Duration,
    }

    impl Scripted {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DetectionSource for Scripted {
        fn fetch(&self, stream: &str) -> impl Future<Output = ApiResult<Vec<Detection>>> + Send {
            let url = format!("/api/detection/results/{stream}");
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.failing.load(Ordering::SeqCst) {
                    return Err(ApiError::Status { url, status: 500 });
                }
                Ok(vec![Detection {
                    x: 0.1,
                    y: 0.1,
                    width: 0.2,
                    height: 0.2,
                    label: "car".to_owned(),
                    confidence: 0.7,
                }])
            }
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn interval_doubles_once_threshold_is_reached() {
        let settings = PollSettings::default();
        let mut state = PollState::new(&settings);
        let mut seen = Vec::new();
        for _ in 0..5 {
            state.record_failure(&settings);
            seen.push(state.interval());
        }
        assert_eq!(seen, vec![ms(1_000), ms(1_000), ms(2_000), ms(4_000), ms(5_000)]);

        state.record_success(&settings);
        assert_eq!(state.interval(), ms(1_000));
        assert_eq!(state.consecutive_errors(), 0);
    }

    #[test]
    fn four_failures_match_capped_formula() {
        let settings = PollSettings {
            max_interval: ms(60_000),
            ..PollSettings::default()
        };
        let mut state = PollState::new(&settings);
        for _ in 0..4 {
            state.record_failure(&settings);
        }
        assert_eq!(state.interval(), settings.base_interval * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn enable_polls_immediately_and_only_once_per_stream() {
        let source = Arc::new(Scripted::default());
        let mut poller = DetectionPoller::new(Arc::clone(&source), PollSettings::default());
        poller.enable("yard");
        poller.enable("yard");

        tokio::time::sleep(ms(10)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(poller.feed("yard").detections().len(), 1);

        tokio::time::sleep(ms(1_000)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_clear_detections_and_slow_down() {
        let source = Arc::new(Scripted::default());
        let mut poller = DetectionPoller::new(Arc::clone(&source), PollSettings::default());
        poller.enable("yard");
        tokio::time::sleep(ms(10)).await;
        assert_eq!(poller.feed("yard").detections().len(), 1);

        source.failing.store(true, Ordering::SeqCst);
        // Failures at t=1000, 2000, 3000 (threshold hit, next wait 2000), 5000.
        tokio::time::sleep(ms(5_100)).await;
        assert_eq!(source.calls(), 5);
        let snapshot = poller.feed("yard").snapshot();
        assert!(snapshot.detections.is_empty());
        assert_eq!(snapshot.consecutive_errors, 4);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_discards_in_flight_response() {
        let source = Arc::new(Scripted {
            delay: ms(500),
            ..Scripted::default()
        });
        let mut poller = DetectionPoller::new(Arc::clone(&source), PollSettings::default());
        poller.enable("yard");
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.calls(), 1);

        let feed = poller.feed("yard");
        let generation = feed.generation();
        poller.disable("yard");
        poller.disable("yard");
        tokio::time::sleep(ms(3_000)).await;

        assert!(!poller.is_enabled("yard"));
        assert!(feed.detections().is_empty());
        assert_eq!(feed.generation(), generation);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_as_failure() {
        let source = Arc::new(Scripted {
            delay: ms(10_000),
            ..Scripted::default()
        });
        let settings = PollSettings {
            request_timeout: ms(200),
            ..PollSettings::default()
        };
        let mut poller = DetectionPoller::new(Arc::clone(&source), settings);
        poller.enable("gate");
        tokio::time::sleep(ms(300)).await;

        let snapshot = poller.feed("gate").snapshot();
        assert_eq!(snapshot.consecutive_errors, 1);
        assert!(snapshot.last_error.unwrap_or_default().contains("timed out"));
    }
}
