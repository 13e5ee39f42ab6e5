use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::model::{
    BatchDeleteAccepted, BatchDeleteProgress, BatchDeleteRequest, Detection, DetectionResults,
    PresetsResponse, PtzCapabilities, PtzMove, PtzPreset, Stream,
};
use futures_util::future::join_all;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the recorder's REST and HLS endpoints.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    auth: Option<(String, String)>,
}

impl ApiClient {
    pub fn new(config: &AppConfig) -> ApiResult<Self> {
        let mut base = Url::parse(&config.server)
            .map_err(|_| ApiError::InvalidBaseUrl(config.server.clone()))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(config.server.clone()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|err| ApiError::from_reqwest(&config.server, err))?;

        let auth = config
            .username
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(|name| {
                (
                    name.to_owned(),
                    config.password.clone().unwrap_or_default(),
                )
            });

        Ok(Self { http, base, auth })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Builds `{base}/{segments...}` with every segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// HLS manifest URL with a cache-busting `_t` parameter so that a stale
    /// manifest is never served from an intermediate cache.
    pub fn hls_manifest_url(&self, stream_name: &str, cache_bust: i64) -> ApiResult<Url> {
        let mut url = self.endpoint(&["hls", stream_name, "index.m3u8"])?;
        url.query_pairs_mut()
            .append_pair("_t", &cache_bust.to_string());
        Ok(url)
    }

    pub async fn list_streams(&self) -> ApiResult<Vec<Stream>> {
        let url = self.endpoint(&["api", "streams"])?;
        self.get_json(url).await
    }

    pub async fn get_stream(&self, id: &str) -> ApiResult<Stream> {
        let url = self.endpoint(&["api", "streams", id])?;
        self.get_json(url).await
    }

    /// Streams for the live grid: the list endpoint, enriched per stream
    /// with the detail endpoint, minus deleted or disabled streams.
    ///
    /// Only a failing list request is an error; a failing detail request
    /// keeps the list entry for that stream.
    pub async fn load_live_streams(&self) -> ApiResult<Vec<Stream>> {
        let summaries = self.list_streams().await?;
        let details = join_all(
            summaries
                .iter()
                .map(|summary| self.get_stream_detail(summary)),
        )
        .await;
        Ok(summaries
            .into_iter()
            .zip(details)
            .map(|(summary, detail)| detail.unwrap_or(summary))
            .filter(Stream::is_live_viewable)
            .collect())
    }

    async fn get_stream_detail(&self, summary: &Stream) -> Option<Stream> {
        match self.get_stream(&summary.detail_key()).await {
            Ok(mut detail) => {
                if detail.name.is_empty() {
                    detail.name.clone_from(&summary.name);
                }
                Some(detail)
            }
            Err(err) => {
                warn!(stream = summary.name, "stream detail unavailable: {err}");
                None
            }
        }
    }

    pub async fn detection_results(&self, stream_name: &str) -> ApiResult<Vec<Detection>> {
        let url = self.endpoint(&["api", "detection", "results", stream_name])?;
        let results: DetectionResults = self.get_json(url).await?;
        Ok(results.detections)
    }

    pub async fn ptz_capabilities(&self, stream_name: &str) -> ApiResult<PtzCapabilities> {
        let url = self.endpoint(&["api", "streams", stream_name, "ptz", "capabilities"])?;
        self.get_json(url).await
    }

    pub async fn ptz_presets(&self, stream_name: &str) -> ApiResult<Vec<PtzPreset>> {
        let url = self.endpoint(&["api", "streams", stream_name, "ptz", "presets"])?;
        let presets: PresetsResponse = self.get_json(url).await?;
        Ok(presets.into_presets())
    }

    pub async fn ptz_move(&self, stream_name: &str, motion: PtzMove) -> ApiResult<()> {
        let url = self.endpoint(&["api", "streams", stream_name, "ptz", "move"])?;
        self.post_unit(url, Some(&motion.clamped())).await
    }

    pub async fn ptz_stop(&self, stream_name: &str) -> ApiResult<()> {
        let url = self.endpoint(&["api", "streams", stream_name, "ptz", "stop"])?;
        self.post_unit::<()>(url, None).await
    }

    pub async fn ptz_home(&self, stream_name: &str) -> ApiResult<()> {
        let url = self.endpoint(&["api", "streams", stream_name, "ptz", "home"])?;
        self.post_unit::<()>(url, None).await
    }

    pub async fn ptz_goto_preset(&self, stream_name: &str, token: &str) -> ApiResult<()> {
        #[derive(Serialize)]
        struct PresetBody<'a> {
            token: &'a str,
        }

        let url = self.endpoint(&["api", "streams", stream_name, "ptz", "preset"])?;
        self.post_unit(url, Some(&PresetBody { token })).await
    }

    pub async fn batch_delete(&self, request: &BatchDeleteRequest) -> ApiResult<String> {
        let url = self.endpoint(&["api", "recordings", "batch-delete"])?;
        let target = url.to_string();
        let response = self.send(self.http.post(url).json(request), &target).await?;
        let accepted: BatchDeleteAccepted = response
            .json()
            .await
            .map_err(|err| ApiError::from_reqwest(&target, err))?;
        Ok(accepted.job_id)
    }

    pub async fn batch_delete_progress(&self, job_id: &str) -> ApiResult<BatchDeleteProgress> {
        let url = self.endpoint(&["api", "recordings", "batch-delete", "progress", job_id])?;
        self.get_json(url).await
    }

    /// Fetches a playlist or other text resource with the shared auth and timeouts.
    pub async fn get_text(&self, url: &Url) -> ApiResult<String> {
        let target = url.to_string();
        let response = self.send(self.http.get(url.clone()), &target).await?;
        response
            .text()
            .await
            .map_err(|err| ApiError::from_reqwest(&target, err))
    }

    pub async fn get_bytes(&self, url: &Url) -> ApiResult<Vec<u8>> {
        let target = url.to_string();
        let response = self.send(self.http.get(url.clone()), &target).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::from_reqwest(&target, err))?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        let target = url.to_string();
        let response = self.send(self.http.get(url), &target).await?;
        response
            .json()
            .await
            .map_err(|err| ApiError::from_reqwest(&target, err))
    }

    async fn post_unit<B: Serialize>(&self, url: Url, body: Option<&B>) -> ApiResult<()> {
        let target = url.to_string();
        let mut request = self.http.post(url);
        request = match body {
            Some(body) => request.json(body),
            None => request.json(&serde_json::json!({})),
        };
        self.send(request, &target).await?;
        Ok(())
    }

    async fn send(&self, request: RequestBuilder, target: &str) -> ApiResult<reqwest::Response> {
        let request = match &self.auth {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        };
        debug!(url = target, "api request");
        let response = request
            .send()
            .await
            .map_err(|err| ApiError::from_reqwest(target, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: target.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}
