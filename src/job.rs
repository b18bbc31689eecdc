//! Asynchronous search jobs: submit a query, poll the export task until it is
//! terminal, then download and flatten the result.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::io::{Cursor, Read};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::Download;
use crate::dataset::Dataset;
use crate::query::{EntityType, Filter, encode_filters};
use crate::table::SearchResult;

/// Lifecycle of a [`SearchJob`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Ready,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed | JobStatus::TimedOut)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Ready | JobStatus::Failed | JobStatus::TimedOut => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Ready => "READY",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
        })
    }
}

/// Export task as reported by `export_context_async` and `export_status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ExportTask {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) download_uri: Option<String>,
    #[serde(default)]
    pub(crate) result_message: Option<String>,
}

/// One submitted query. Owned by the caller that submitted it.
#[derive(Debug, Clone)]
pub struct SearchJob {
    id: Option<String>,
    dataset_id: String,
    filters: Vec<Filter>,
    entity_type: EntityType,
    status: JobStatus,
    remote_status: Option<String>,
    download_uri: Option<String>,
    message: Option<String>,
}

impl SearchJob {
    fn new(dataset_id: &str, filters: Vec<Filter>, entity_type: EntityType) -> Self {
        Self {
            id: None,
            dataset_id: dataset_id.to_string(),
            filters,
            entity_type,
            status: JobStatus::Pending,
            remote_status: None,
            download_uri: None,
            message: None,
        }
    }

    /// Remote export task id, once submitted.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Last status string reported by the server.
    pub fn remote_status(&self) -> Option<&str> {
        self.remote_status.as_deref()
    }

    pub fn download_uri(&self) -> Option<&str> {
        self.download_uri.as_deref()
    }

    /// Moves to `next` unless that would go backwards or leave a terminal state.
    fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    /// Applies a task report from the server.
    fn observe(&mut self, task: ExportTask) {
        if self.status.is_terminal() {
            return;
        }
        let polling = self.id.is_some();
        if !polling {
            self.id = task.id;
        }
        if task.download_uri.is_some() {
            self.download_uri = task.download_uri;
        }
        if task.result_message.is_some() {
            self.message = task.result_message;
        }
        // A status reply without a status is "not ready yet"; only a submit
        // reply without one is a failure.
        if polling && task.status.is_none() {
            return;
        }
        self.remote_status = task.status;

        let next = match self.remote_status.as_deref() {
            None | Some("REJECTED") | Some("FAILED") => JobStatus::Failed,
            Some("COMPLETED") if self.download_uri.is_some() => JobStatus::Ready,
            Some("PENDING") | Some("INIT") => JobStatus::Pending,
            Some(_) => JobStatus::Running,
        };
        self.transition(next);
    }
}

/// Submit/poll/fetch against one dataset's export endpoints.
#[derive(Debug, Clone, Copy)]
pub struct AsyncSearchJob<'a> {
    dataset: &'a Dataset,
}

impl<'a> AsyncSearchJob<'a> {
    pub(crate) fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    /// Starts an export task for `filters`.
    ///
    /// A task the server rejects outright comes back already `Failed`.
    pub fn submit(&self, filters: Vec<Filter>, entity_type: EntityType) -> Result<SearchJob> {
        if filters.is_empty() {
            bail!("a search needs at least one filter");
        }
        let client = self.dataset.client();
        client.in_scope(|| {
            let vql = encode_filters(&filters)?;
            let mut job = SearchJob::new(self.dataset.id(), filters, entity_type);

            tracing::info!(dataset_id = job.dataset_id(), %vql, "starting search");
            let task: ExportTask = client.get_json(
                &client.url(&format!("/dataset/{}/export_context_async", job.dataset_id)),
                &[
                    ("export_format", "json".to_string()),
                    ("include_images", "false".to_string()),
                    ("entity_type", entity_type.as_str().to_string()),
                    ("vql", vql),
                ],
            )?;
            job.observe(task);

            if job.status == JobStatus::Failed {
                tracing::info!(
                    remote_status = job.remote_status().unwrap_or("none"),
                    "search was not accepted; no items matched"
                );
            } else if job.id.is_none() && !job.status.is_terminal() {
                tracing::warn!("export task has no id; cannot poll it");
                job.transition(JobStatus::Failed);
            } else {
                tracing::info!(task_id = job.id().unwrap_or(""), "export task created");
            }
            Ok(job)
        })
    }

    /// Polls until `job` is terminal or `timeout` has elapsed, sleeping
    /// `poll_interval` between checks.
    ///
    /// Never returns an error: failed status checks are retried until the budget
    /// runs out. Sleeps and each status request are clipped to the remaining
    /// budget, so this returns within `timeout + poll_interval`.
    pub fn poll_until_ready(
        &self,
        job: &mut SearchJob,
        poll_interval: Duration,
        timeout: Duration,
    ) -> JobStatus {
        let client = self.dataset.client();
        client.in_scope(|| {
            let started = Instant::now();
            let mut last_seen = job.remote_status.clone();

            loop {
                if job.status.is_terminal() {
                    break;
                }
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    job.transition(JobStatus::TimedOut);
                    tracing::warn!(
                        task_id = job.id().unwrap_or(""),
                        final_status = job.remote_status().unwrap_or("none"),
                        waited = ?elapsed,
                        "export not completed before timeout"
                    );
                    break;
                }

                tracing::info!(
                    status = job.remote_status().unwrap_or("none"),
                    "export not ready; waiting {:?} before polling again",
                    poll_interval
                );
                thread::sleep(poll_interval.min(timeout - elapsed));

                let remaining = timeout.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    continue;
                }
                let Some(task_id) = job.id.clone() else {
                    job.transition(JobStatus::Failed);
                    break;
                };
                let checked = client.get_json_once::<ExportTask>(
                    &client.url(&format!("/dataset/{}/export_status", job.dataset_id)),
                    &[
                        ("export_task_id", task_id),
                        ("dataset_id", job.dataset_id.clone()),
                    ],
                    remaining,
                );
                match checked {
                    Ok(task) => {
                        job.observe(task);
                        if job.remote_status != last_seen {
                            last_seen = job.remote_status.clone();
                            tracing::info!(
                                status = job.remote_status().unwrap_or("none"),
                                "export status changed"
                            );
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "export status check failed; retrying"),
                }
            }

            if job.status == JobStatus::Failed {
                tracing::warn!(
                    reason = job.message.as_deref().unwrap_or("No reason provided"),
                    "export request rejected"
                );
            }
            job.status
        })
    }

    /// Downloads and flattens the result of a `Ready` job.
    ///
    /// Any other status yields an empty result. A payload that is neither a zip
    /// archive with `metadata.json` nor JSON also yields an empty result; only
    /// transport failures of the download itself are errors.
    pub fn fetch(&self, job: &SearchJob) -> Result<SearchResult> {
        let client = self.dataset.client();
        client.in_scope(|| {
            let uri = match (job.status, job.download_uri()) {
                (JobStatus::Ready, Some(uri)) => uri,
                (status, _) => {
                    tracing::warn!(%status, "search job did not complete; returning empty result");
                    return Ok(SearchResult::empty());
                }
            };

            let download = client.download(uri)?;
            let payload = match decode_export(&download) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "could not decode export payload");
                    return Ok(SearchResult::empty());
                }
            };
            let Some(result) = SearchResult::from_export(&payload) else {
                tracing::warn!("no media_items found in downloaded export data");
                return Ok(SearchResult::empty());
            };
            let result = SearchResult::merge_unique([result]);
            tracing::info!(dataset_id = job.dataset_id(), rows = result.len(), "search completed");
            Ok(result)
        })
    }

    /// `submit`, `poll_until_ready`, then `fetch`.
    pub fn run(
        &self,
        filters: Vec<Filter>,
        entity_type: EntityType,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<SearchResult> {
        let mut job = self.submit(filters, entity_type)?;
        self.poll_until_ready(&mut job, poll_interval, timeout);
        self.fetch(&job)
    }
}

/// Parses an export body: a zip archive holding `metadata.json`, or plain JSON.
pub(crate) fn decode_export(download: &Download) -> Result<Value> {
    match read_zipped_metadata(&download.bytes) {
        Ok(v) => return Ok(v),
        Err(e) => tracing::debug!(error = %e, "export is not a zip archive"),
    }
    serde_json::from_slice(&download.bytes).with_context(|| {
        format!(
            "export is neither a zip archive nor JSON (content-type: {}, {} bytes)",
            download.content_type.as_deref().unwrap_or("unknown"),
            download.bytes.len()
        )
    })
}

fn read_zipped_metadata(bytes: &[u8]) -> Result<Value> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut file = archive
        .by_name("metadata.json")
        .context("metadata.json not found in zip archive")?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(serde_json::from_str(&text)?)
}
