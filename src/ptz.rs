//! PTZ control for a single camera.

use crate::api::ApiClient;
use crate::model::{PtzCapabilities, PtzMove, PtzPreset};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_NUDGE: Duration = Duration::from_millis(400);
const NUDGE_SPEED: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzDirection {
    Left,
    Right,
    Up,
    Down,
    ZoomIn,
    ZoomOut,
}

impl PtzDirection {
    #[must_use]
    pub fn motion(self, speed: f32) -> PtzMove {
        let (pan, tilt, zoom) = match self {
            Self::Left => (-speed, 0.0, 0.0),
            Self::Right => (speed, 0.0, 0.0),
            Self::Up => (0.0, speed, 0.0),
            Self::Down => (0.0, -speed, 0.0),
            Self::ZoomIn => (0.0, 0.0, speed),
            Self::ZoomOut => (0.0, 0.0, -speed),
        };
        PtzMove { pan, tilt, zoom }.clamped()
    }
}

#[derive(Debug, Clone)]
pub struct PtzController {
    api: ApiClient,
    stream: String,
}

impl PtzController {
    #[must_use]
    pub fn new(api: ApiClient, stream: &str) -> Self {
        Self {
            api,
            stream: stream.to_owned(),
        }
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub async fn capabilities(&self) -> Result<PtzCapabilities> {
        self.api
            .ptz_capabilities(&self.stream)
            .await
            .with_context(|| format!("failed reading PTZ capabilities of '{}'", self.stream))
    }

    pub async fn presets(&self) -> Result<Vec<PtzPreset>> {
        self.api
            .ptz_presets(&self.stream)
            .await
            .with_context(|| format!("failed listing PTZ presets of '{}'", self.stream))
    }

    pub async fn start_move(&self, motion: PtzMove) -> Result<()> {
        self.api
            .ptz_move(&self.stream, motion)
            .await
            .with_context(|| format!("PTZ move failed on '{}'", self.stream))
    }

    pub async fn stop(&self) -> Result<()> {
        self.api
            .ptz_stop(&self.stream)
            .await
            .with_context(|| format!("PTZ stop failed on '{}'", self.stream))
    }

    pub async fn home(&self) -> Result<()> {
        self.api
            .ptz_home(&self.stream)
            .await
            .with_context(|| format!("PTZ home failed on '{}'", self.stream))
    }

    pub async fn goto_preset(&self, token: &str) -> Result<()> {
        self.api
            .ptz_goto_preset(&self.stream, token)
            .await
            .with_context(|| format!("PTZ preset '{token}' failed on '{}'", self.stream))
    }

    /// Moves for `duration`, then stops. The stop is sent even when the move
    /// request fails, so the camera never keeps drifting.
    pub async fn move_for(&self, motion: PtzMove, duration: Duration) -> Result<()> {
        debug!(stream = self.stream, ?motion, ?duration, "PTZ move");
        let moved = self.start_move(motion).await;
        if moved.is_ok() {
            tokio::time::sleep(duration).await;
        }
        let stopped = self.stop().await;
        moved.and(stopped)
    }

    /// Short move in one direction, as bound to the live-view keys.
    pub async fn nudge(&self, direction: PtzDirection) -> Result<()> {
        self.move_for(direction.motion(NUDGE_SPEED), DEFAULT_NUDGE)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{PtzController, PtzDirection};
    use crate::api::ApiClient;
    use crate::config::AppConfig;
    use crate::model::PtzMove;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn directions_map_to_single_axis() {
        assert_eq!(
            PtzDirection::Left.motion(0.5),
            PtzMove {
                pan: -0.5,
                tilt: 0.0,
                zoom: 0.0
            }
        );
        assert_eq!(PtzDirection::ZoomOut.motion(2.0).zoom, -1.0);
    }

    #[tokio::test]
    async fn nudge_moves_then_stops() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/streams/dome/ptz/move"))
            .and(body_json(json!({"pan": 0.0, "tilt": 0.5, "zoom": 0.0})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/streams/dome/ptz/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&AppConfig {
            server: server.uri(),
            ..AppConfig::default()
        })
        .unwrap();
        PtzController::new(api, "dome")
            .nudge(PtzDirection::Up)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_move_still_sends_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/streams/dome/ptz/move"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/streams/dome/ptz/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&AppConfig {
            server: server.uri(),
            ..AppConfig::default()
        })
        .unwrap();
        let err = PtzController::new(api, "dome")
            .nudge(PtzDirection::Left)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("PTZ move failed"));
    }
}
