//! Player session lifecycle: one session per visible stream, owning its
//! playback engine, autoplay policy, periodic source refresh and recovery
//! after fatal errors.

use crate::config::PlayerSettings;
use crate::engine::{EngineFactory, PlaybackEngine};
use crate::media::MediaElement;
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a cancelled session gets to dispose its engine before it is
/// aborted.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Attaching,
    Playing,
    /// Autoplay or recovery could not start video; waiting for the play
    /// affordance.
    AwaitingUser,
    Recovering,
    /// Attach failed twice; the tile shows the error until the user retries.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_interval: Duration,
    pub retry_delay: Duration,
    pub autoplay: bool,
    pub touch_capable: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            retry_delay: Duration::from_millis(1_000),
            autoplay: true,
            touch_capable: false,
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(settings: &PlayerSettings) -> Self {
        Self {
            refresh_interval: Duration::from_secs(settings.refresh_interval_secs.max(1)),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            autoplay: settings.autoplay,
            touch_capable: settings.touch_capable,
        }
    }

    /// Mute flag for the first autoplay attempt.
    #[must_use]
    pub fn autoplay_muted(&self) -> bool {
        self.touch_capable
    }
}

#[derive(Debug)]
enum SessionCommand {
    Play,
}

struct SessionHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    phase: watch::Receiver<SessionPhase>,
}

/// Owns every player session, keyed by stream name. At most one session
/// exists per name.
pub struct PlayerRegistry<F: EngineFactory> {
    factory: Arc<F>,
    settings: SessionSettings,
    sessions: HashMap<String, SessionHandle>,
    elements: HashMap<String, MediaElement>,
}

impl<F: EngineFactory> PlayerRegistry<F> {
    pub fn new(factory: Arc<F>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            sessions: HashMap::new(),
            elements: HashMap::new(),
        }
    }

    /// Media element for `stream`, created on first use.
    pub fn element(&mut self, stream: &str) -> MediaElement {
        self.elements
            .entry(stream.to_owned())
            .or_insert_with(|| MediaElement::new(stream))
            .clone()
    }

    #[must_use]
    pub fn is_attached(&self, stream: &str) -> bool {
        self.sessions
            .get(stream)
            .is_some_and(|session| !session.handle.is_finished())
    }

    #[must_use]
    pub fn phase(&self, stream: &str) -> Option<SessionPhase> {
        self.sessions
            .get(stream)
            .map(|session| *session.phase.borrow())
    }

    /// Starts a session for `stream`. Does nothing if one is already running.
    pub fn attach(&mut self, stream: &str) {
        if self.is_attached(stream) {
            return;
        }
        // A finished task still holds its slot; clear it before rebuilding.
        self.teardown(stream);

        let element = self.element(stream);
        if self.factory.kind().is_none() {
            element.show_error(
                element.epoch(),
                "live playback is not supported: no H.264 decoder available",
            );
            return;
        }

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Attaching);
        let session = Session {
            factory: Arc::clone(&self.factory),
            element,
            settings: self.settings,
            cancel: cancel.clone(),
            phase: phase_tx,
            engine: None,
            epoch: 0,
        };
        let handle = tokio::spawn(session.run(commands_rx));
        debug!(stream, "player session attached");
        self.sessions.insert(
            stream.to_owned(),
            SessionHandle {
                cancel,
                handle,
                commands: commands_tx,
                phase: phase_rx,
            },
        );
    }

    /// Tears down any existing session for `stream` and builds a new one.
    pub fn replace(&mut self, stream: &str) {
        self.teardown(stream);
        self.attach(stream);
    }

    /// Disposes the engine, cancels timers, detaches the element and removes
    /// its overlays. Safe to call repeatedly.
    pub fn teardown(&mut self, stream: &str) {
        if let Some(session) = self.sessions.remove(stream) {
            session.cancel.cancel();
            reap(session.handle);
            debug!(stream, "player session torn down");
        }
        if let Some(element) = self.elements.get(stream) {
            element.detach();
        }
    }

    pub fn teardown_all(&mut self) {
        let names: Vec<String> = self.elements.keys().cloned().collect();
        for name in names {
            self.teardown(&name);
        }
    }

    /// User pressed the play affordance on `stream`'s tile.
    pub fn request_play(&mut self, stream: &str) {
        match self.sessions.get(stream) {
            Some(session) if !session.handle.is_finished() => {
                let _ = session.commands.send(SessionCommand::Play);
            }
            _ => self.replace(stream),
        }
    }
}

/// Lets a cancelled session leave its loop and dispose its engine, aborting
/// it if it has not finished within [`TEARDOWN_GRACE`].
fn reap(mut handle: JoinHandle<()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if tokio::time::timeout(TEARDOWN_GRACE, &mut handle).await.is_err() {
                    handle.abort();
                }
            });
        }
        Err(_) => handle.abort(),
    }
}

impl<F: EngineFactory> Drop for PlayerRegistry<F> {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

struct Session<F: EngineFactory> {
    factory: Arc<F>,
    element: MediaElement,
    settings: SessionSettings,
    cancel: CancellationToken,
    phase: watch::Sender<SessionPhase>,
    engine: Option<F::Engine>,
    epoch: u64,
}

enum Event {
    Cancelled,
    Play,
    Fatal(String),
    Refresh,
}

impl<F: EngineFactory> Session<F> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let stream = self.element.name().to_owned();
        let cancel = self.cancel.clone();
        if until_cancelled(&cancel, self.start()).await.is_none() {
            self.dispose_engine();
            return;
        }

        let period = self.settings.refresh_interval;
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let playing = *self.phase.borrow() == SessionPhase::Playing;
            let event = {
                let engine = &mut self.engine;
                tokio::select! {
                    () = self.cancel.cancelled() => Event::Cancelled,
                    command = commands.recv() => match command {
                        Some(SessionCommand::Play) => Event::Play,
                        None => Event::Cancelled,
                    },
                    message = fatal_error(engine), if playing => Event::Fatal(message),
                    _ = refresh.tick(), if playing => Event::Refresh,
                }
            };

            let restarts_refresh = matches!(event, Event::Play | Event::Fatal(_));
            let handled = match event {
                Event::Cancelled => break,
                Event::Play => until_cancelled(&cancel, self.user_play()).await,
                Event::Fatal(message) => until_cancelled(&cancel, self.recover(&message)).await,
                Event::Refresh => until_cancelled(&cancel, self.refresh()).await,
            };
            if handled.is_none() {
                break;
            }
            // Ticks missed while not playing must not fire right after a
            // successful play or recovery.
            if restarts_refresh {
                refresh.reset();
            }
        }

        self.dispose_engine();
        debug!(stream, "player session exited");
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    fn dispose_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.dispose();
        }
    }

    /// Builds a fresh engine against a fresh source URL and attaches it.
    async fn build(&mut self) -> Result<()> {
        self.dispose_engine();
        let source = self.factory.source_url(self.element.name())?;
        let mut engine = self.factory.create()?;
        if self.cancel.is_cancelled() {
            return Err(anyhow::anyhow!("session cancelled"));
        }
        self.epoch = self.element.set_source(source.clone());
        let attached = engine.attach(&self.element, self.epoch, source).await;
        self.engine = Some(engine);
        attached
    }

    async fn start(&mut self) {
        self.set_phase(SessionPhase::Attaching);
        if let Err(first) = self.build().await {
            debug!(stream = self.element.name(), "attach failed, retrying once: {first:#}");
            if !pause(&self.cancel.clone(), self.settings.retry_delay).await {
                return;
            }
            if let Err(err) = self.build().await {
                self.fail(&format!("{err:#}"));
                return;
            }
        }
        self.autoplay().await;
    }

    async fn autoplay(&mut self) {
        if !self.settings.autoplay {
            self.await_user();
            return;
        }
        let muted = self.settings.autoplay_muted();
        match self.play(muted).await {
            Ok(()) => self.set_phase(SessionPhase::Playing),
            Err(err) => {
                debug!(stream = self.element.name(), muted, "autoplay rejected: {err:#}");
                self.await_user();
            }
        }
    }

    async fn play(&mut self, muted: bool) -> Result<()> {
        match self.engine.as_mut() {
            Some(engine) => engine.play(muted).await,
            None => Err(anyhow::anyhow!("no engine attached")),
        }
    }

    /// The play affordance: try the current engine, and if it still cannot
    /// play, rebuild once against a fresh source.
    async fn user_play(&mut self) {
        let phase = *self.phase.borrow();
        if phase == SessionPhase::Playing {
            return;
        }
        if phase == SessionPhase::AwaitingUser && self.play(false).await.is_ok() {
            self.set_phase(SessionPhase::Playing);
            return;
        }
        self.set_phase(SessionPhase::Attaching);
        if let Err(err) = self.build().await {
            self.fail(&format!("{err:#}"));
            return;
        }
        match self.play(false).await {
            Ok(()) => self.set_phase(SessionPhase::Playing),
            Err(_) => self.await_user(),
        }
    }

    /// Fatal error: tear down, wait, rebuild against a fresh URL. If the
    /// rebuilt session cannot play, stop and wait for the user.
    async fn recover(&mut self, message: &str) {
        let stream = self.element.name().to_owned();
        warn!(stream, "playback failed, reconnecting: {message}");
        self.set_phase(SessionPhase::Recovering);
        self.element
            .set_status(self.epoch, format!("reconnecting: {message}"));
        self.dispose_engine();

        if !pause(&self.cancel.clone(), self.settings.retry_delay).await {
            return;
        }
        if let Err(err) = self.build().await {
            self.fail(&format!("{err:#}"));
            return;
        }
        match self.play(self.settings.autoplay_muted()).await {
            Ok(()) => {
                info!(stream, "playback recovered");
                self.set_phase(SessionPhase::Playing);
            }
            Err(err) => {
                warn!(stream, "recovered session did not start: {err:#}");
                self.await_user();
            }
        }
    }

    /// Re-issues the source on the running engine so the manifest never goes
    /// stale.
    async fn refresh(&mut self) {
        let source = match self.factory.source_url(self.element.name()) {
            Ok(source) => source,
            Err(err) => {
                debug!(stream = self.element.name(), "refresh skipped: {err:#}");
                return;
            }
        };
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        self.epoch = self.element.refresh_source(source.clone());
        let outcome = match engine.attach(&self.element, self.epoch, source).await {
            Ok(()) => engine.play(self.settings.autoplay_muted()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            self.recover(&format!("{err:#}")).await;
        }
    }

    fn await_user(&mut self) {
        self.element.show_play_prompt(self.epoch);
        self.set_phase(SessionPhase::AwaitingUser);
    }

    fn fail(&mut self, message: &str) {
        warn!(stream = self.element.name(), "player attach failed: {message}");
        self.dispose_engine();
        self.element.show_error(self.epoch, message);
        self.set_phase(SessionPhase::Failed);
    }
}

/// Sleeps unless cancelled first. Takes the token rather than the session so
/// the session never has to be shared across an await.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Runs `work` unless the session is cancelled first.
async fn until_cancelled<T>(cancel: &CancellationToken, work: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = work => Some(out),
    }
}

async fn fatal_error<E: PlaybackEngine>(engine: &mut Option<E>) -> String {
    match engine.as_mut() {
        Some(engine) => engine.fatal_error().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::{PlayerRegistry, SessionPhase, SessionSettings};
    use crate::media::TileOverlay;
    use crate::testing::FakeFactory;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry(factory: &FakeFactory, settings: SessionSettings) -> PlayerRegistry<FakeFactory> {
        PlayerRegistry::new(Arc::new(factory.clone()), settings)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unmuted_autoplay_reaches_playing() {
        let factory = FakeFactory::default();
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;

        assert_eq!(players.phase("yard"), Some(SessionPhase::Playing));
        assert_eq!(factory.script.lock().play_mutes, vec![false]);
        assert!(players.element("yard").view().playing);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_environments_try_muted_first() {
        let factory = FakeFactory::default();
        let settings = SessionSettings {
            touch_capable: true,
            ..SessionSettings::default()
        };
        let mut players = registry(&factory, settings);
        players.attach("yard");
        settle().await;
        assert_eq!(factory.script.lock().play_mutes, vec![true]);
        assert!(players.element("yard").view().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_autoplay_waits_for_the_user() {
        let factory = FakeFactory::with(&[], &[false]);
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;

        assert_eq!(players.phase("yard"), Some(SessionPhase::AwaitingUser));
        assert_eq!(players.element("yard").view().overlay, TileOverlay::PlayPrompt);

        players.request_play("yard");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::Playing));
        assert_eq!(players.element("yard").view().overlay, TileOverlay::None);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_is_idempotent() {
        let factory = FakeFactory::default();
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        players.attach("yard");
        settle().await;
        players.attach("yard");
        assert_eq!(factory.script.lock().created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_rebuilds_with_fresh_url_then_stops_retrying() {
        let factory = FakeFactory::with(&[], &[true, false]);
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::Playing));

        factory.inject_fatal("segment fetch failed");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::Recovering));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::AwaitingUser));
        {
            let script = factory.script.lock();
            assert_eq!(script.created, 2);
            assert_eq!(script.disposed, 1);
            assert_ne!(script.attached_sources[0], script.attached_sources[1]);
        }

        // No further automatic attempts, and refresh is skipped while waiting.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(factory.script.lock().created, 2);
        assert_eq!(factory.script.lock().attached_sources.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reissues_the_source_periodically() {
        let factory = FakeFactory::default();
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        let script = factory.script.lock();
        assert_eq!(script.created, 1);
        assert_eq!(script.attached_sources.len(), 3);
        assert_eq!(script.urls_issued, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_attach_failure_is_retried_once() {
        let factory = FakeFactory::with(&[false, false], &[]);
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(players.phase("yard"), Some(SessionPhase::Failed));
        assert_eq!(factory.script.lock().created, 2);
        assert!(matches!(
            players.element("yard").view().overlay,
            TileOverlay::Error(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_twice_matches_teardown_once() {
        let factory = FakeFactory::with(&[], &[false]);
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;

        players.teardown("yard");
        settle().await;
        let once = players.element("yard").view();
        assert_eq!(factory.script.lock().disposed, 1);

        players.teardown("yard");
        settle().await;
        assert_eq!(players.element("yard").view(), once);
        assert_eq!(factory.script.lock().disposed, 1);
        assert!(!players.is_attached("yard"));
        assert_eq!(once.overlay, TileOverlay::None);
        assert!(once.source.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_disposes_a_playing_engine() {
        let factory = FakeFactory::default();
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::Playing));

        players.teardown("yard");
        settle().await;
        let script = factory.script.lock();
        assert_eq!(script.created, 1);
        assert_eq!(script.disposed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_play_after_a_long_wait_does_not_refresh_at_once() {
        let factory = FakeFactory::with(&[], &[false]);
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::AwaitingUser));

        tokio::time::sleep(Duration::from_secs(45)).await;
        players.request_play("yard");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::Playing));
        assert_eq!(factory.script.lock().attached_sources.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(factory.script.lock().attached_sources.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_environment_shows_error_without_session() {
        let factory = FakeFactory {
            unsupported: true,
            ..FakeFactory::default()
        };
        let mut players = registry(&factory, SessionSettings::default());
        players.attach("yard");
        settle().await;

        assert!(!players.is_attached("yard"));
        assert_eq!(factory.script.lock().created, 0);
        assert!(matches!(
            players.element("yard").view().overlay,
            TileOverlay::Error(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_disabled_shows_affordance() {
        let factory = FakeFactory::default();
        let settings = SessionSettings {
            autoplay: false,
            ..SessionSettings::default()
        };
        let mut players = registry(&factory, settings);
        players.attach("yard");
        settle().await;
        assert_eq!(players.phase("yard"), Some(SessionPhase::AwaitingUser));
        assert!(factory.script.lock().play_mutes.is_empty());
    }
}
