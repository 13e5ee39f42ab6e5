//! Batch deletion of recordings: input validation, job submission and
//! progress tracking.

use crate::api::ApiClient;
use crate::model::{BatchDeleteProgress, BatchDeleteRequest, RecordingFilter};
use crate::notify::Notifier;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

pub const PROGRESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelection {
    Ids(Vec<i64>),
    Filter(RecordingFilter),
}

impl DeleteSelection {
    /// The request body, or the warning to show when there is nothing to
    /// delete.
    pub fn to_request(&self) -> Result<BatchDeleteRequest, &'static str> {
        match self {
            Self::Ids(ids) if ids.is_empty() => Err("No recordings selected for deletion"),
            Self::Ids(ids) => Ok(BatchDeleteRequest::Ids { ids: ids.clone() }),
            Self::Filter(filter) if filter.is_empty() => {
                Err("A filter needs at least one of stream, start, end or detection")
            }
            Self::Filter(filter) => Ok(BatchDeleteRequest::Filter {
                filter: filter.clone(),
            }),
        }
    }
}

/// Validates `selection` before anything touches the network. An empty
/// selection produces a warning and `None`.
pub fn prepare_batch_delete(
    selection: &DeleteSelection,
    notifier: &dyn Notifier,
) -> Option<BatchDeleteRequest> {
    match selection.to_request() {
        Ok(request) => Some(request),
        Err(warning) => {
            notifier.warning(warning);
            None
        }
    }
}

/// Submits a batch delete job. Returns the job id, or `None` when the
/// selection was rejected locally.
pub async fn submit_batch_delete(
    api: &ApiClient,
    selection: &DeleteSelection,
    notifier: &dyn Notifier,
) -> Result<Option<String>> {
    let Some(request) = prepare_batch_delete(selection, notifier) else {
        return Ok(None);
    };
    let job_id = api
        .batch_delete(&request)
        .await
        .context("batch delete request failed")?;
    info!(%job_id, "batch delete job accepted");
    Ok(Some(job_id))
}

/// Polls the job until the backend reports it complete, handing every
/// progress record to `on_progress`.
pub async fn track_progress(
    api: &ApiClient,
    job_id: &str,
    interval: Duration,
    mut on_progress: impl FnMut(&BatchDeleteProgress),
) -> Result<BatchDeleteProgress> {
    loop {
        let progress = api
            .batch_delete_progress(job_id)
            .await
            .with_context(|| format!("failed reading progress of job {job_id}"))?;
        debug!(job_id, current = progress.current, total = progress.total, "batch delete progress");
        on_progress(&progress);
        if progress.complete {
            return Ok(progress);
        }
        tokio::time::sleep(interval).await;
    }
}

#[must_use]
pub fn summarize(progress: &BatchDeleteProgress) -> String {
    if progress.is_error() {
        let reason = progress
            .error_message
            .as_deref()
            .filter(|message| !message.is_empty())
            .unwrap_or("unknown error");
        return format!(
            "Batch delete failed after {} of {} recordings: {reason}",
            progress.succeeded, progress.total
        );
    }
    let mut summary = format!(
        "Deleted {} of {} recordings",
        progress.succeeded, progress.total
    );
    if progress.failed > 0 {
        summary.push_str(&format!(", {} failed", progress.failed));
    }
    if !progress.status_message.is_empty() {
        summary.push_str(&format!(" ({})", progress.status_message));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::{DeleteSelection, submit_batch_delete, summarize, track_progress};
    use crate::api::ApiClient;
    use crate::config::AppConfig;
    use crate::model::{BatchDeleteProgress, RecordingFilter};
    use crate::notify::{Severity, ToastQueue};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{any, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(&AppConfig {
            server: server.uri(),
            ..AppConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn empty_selection_warns_without_request() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let toasts = ToastQueue::default();

        let outcome = submit_batch_delete(&client(&server), &DeleteSelection::Ids(vec![]), &toasts)
            .await
            .unwrap();
        assert!(outcome.is_none());
        let shown = toasts.visible();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].severity, Severity::Warning);

        let filter = DeleteSelection::Filter(RecordingFilter::default());
        assert!(
            submit_batch_delete(&client(&server), &filter, &toasts)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn ids_are_submitted_and_tracked_to_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/recordings/batch-delete"))
            .and(body_json(json!({"ids": [4, 9]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/recordings/batch-delete/progress/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": 2, "total": 2, "succeeded": 2, "failed": 0,
                "complete": true, "status_message": "done"
            })))
            .mount(&server)
            .await;

        let api = client(&server);
        let toasts = ToastQueue::default();
        let job = submit_batch_delete(&api, &DeleteSelection::Ids(vec![4, 9]), &toasts)
            .await
            .unwrap();
        assert_eq!(job.as_deref(), Some("job-1"));

        let mut seen = 0;
        let done = track_progress(&api, "job-1", Duration::from_millis(5), |_| seen += 1)
            .await
            .unwrap();
        assert!(done.complete);
        assert_eq!(seen, 1);
    }

    #[test]
    fn summary_mentions_failures() {
        let progress = BatchDeleteProgress {
            total: 5,
            succeeded: 3,
            failed: 2,
            complete: true,
            ..BatchDeleteProgress::default()
        };
        assert_eq!(summarize(&progress), "Deleted 3 of 5 recordings, 2 failed");
        assert!(progress.has_failures());
    }

    #[test]
    fn errored_job_without_reason_is_still_a_failure() {
        let progress = BatchDeleteProgress {
            total: 4,
            succeeded: 1,
            complete: true,
            status: "error".into(),
            error_message: Some(String::new()),
            ..BatchDeleteProgress::default()
        };
        assert!(progress.has_failures());
        assert_eq!(
            summarize(&progress),
            "Batch delete failed after 1 of 4 recordings: unknown error"
        );
    }

    #[tokio::test]
    async fn errored_job_is_reported_as_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/recordings/batch-delete/progress/job-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error", "complete": true, "current": 0, "total": 5,
                "succeeded": 0, "failed": 0, "error_message": "database is locked"
            })))
            .mount(&server)
            .await;

        let done = track_progress(&client(&server), "job-7", Duration::from_millis(5), |_| {})
            .await
            .unwrap();
        assert!(done.is_error());
        assert!(done.has_failures());
        assert_eq!(done.failed, 0);
        let summary = summarize(&done);
        assert!(!summary.starts_with("Deleted"));
        assert!(summary.contains("database is locked"), "{summary}");
    }
}
