use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::client::{Client, DatasetSummary};
use crate::job::AsyncSearchJob;
use crate::query::{EntityType, Filter, IssueMode, IssueType, SearchOperator, SemanticRelevance};
use crate::table::SearchResult;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Which textual search features are enabled for a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFeatures {
    pub labels_search: bool,
    pub captions_search: bool,
    pub semantic_search: bool,
}

#[derive(Debug, Deserialize)]
struct UserConfig {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    feature_key: Option<String>,
    #[serde(default)]
    feature_options: Option<Value>,
}

impl UserConfig {
    fn search_features(&self) -> SearchFeatures {
        let Some(options) = self
            .features
            .iter()
            .find(|f| f.feature_key.as_deref() == Some("TEXTUAL_SEARCH_IMAGE"))
            .and_then(|f| f.feature_options.as_ref())
        else {
            return SearchFeatures::default();
        };
        let flag = |k: &str| options.get(k).and_then(Value::as_bool).unwrap_or(false);
        SearchFeatures {
            labels_search: flag("labels_search"),
            captions_search: flag("captions_search"),
            semantic_search: flag("semantic_search"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnchorUpload {
    #[serde(default)]
    anchor_media_id: Option<String>,
}

/// Handle on one remote dataset.
///
/// Searches run as asynchronous export jobs on the server; every `search_by_*`
/// call blocks for at most [`Dataset::timeout`] per job and returns an empty
/// [`SearchResult`] (with a logged warning) when a job fails, times out, or the
/// dataset is not ready. Invalid arguments and transport failures are errors.
#[derive(Debug, Clone)]
pub struct Dataset {
    client: Client,
    id: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Dataset {
    pub(crate) fn new(client: Client, id: &str) -> Self {
        Self {
            client,
            id: id.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// The submit/poll/fetch workflow bound to this dataset.
    pub fn jobs(&self) -> AsyncSearchJob<'_> {
        AsyncSearchJob::new(self)
    }

    fn path(&self, suffix: &str) -> String {
        self.client.url(&format!("/dataset/{}{}", self.id, suffix))
    }

    pub fn details(&self) -> Result<DatasetSummary> {
        self.client.dataset_details(&self.id)
    }

    pub fn status(&self) -> Result<String> {
        Ok(self.details()?.status.unwrap_or_default())
    }

    fn is_ready(status: &str) -> bool {
        matches!(status, "READY" | "completed")
    }

    pub fn stats(&self) -> Result<Value> {
        self.client.in_scope(|| self.client.get_json(&self.path("/stats"), &[]))
    }

    /// Previews of the first cluster; empty when the dataset has none.
    pub fn explore(&self) -> Result<Vec<Value>> {
        self.client.in_scope(|| {
            let url = self.client.url(&format!("/explore/{}", self.id));
            let data: Value = self.client.get_json(&url, &[])?;
            Ok(data
                .get("clusters")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("previews"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default())
        })
    }

    pub fn delete(&self) -> Result<Value> {
        self.client.in_scope(|| {
            let reply = self.client.delete_json(&self.path(""))?;
            tracing::info!(dataset_id = %self.id, "dataset deleted");
            Ok(reply)
        })
    }

    pub fn image_info(&self, image_id: &str) -> Result<Value> {
        self.client
            .in_scope(|| self.client.get_json(&self.client.url(&format!("/image/{image_id}")), &[]))
    }

    /// Full JSON export. The dataset must be ready.
    pub fn export(&self) -> Result<Value> {
        self.client.in_scope(|| {
            let status = self.status()?;
            if !Self::is_ready(&status) {
                bail!(
                    "Cannot export dataset {}. Current status: {}. Dataset must be 'READY' or 'completed' to export.",
                    self.id,
                    status
                );
            }
            tracing::info!(dataset_id = %self.id, "export started");
            self.client.get_json(
                &self.path("/export"),
                &[("export_format", "json".to_string())],
            )
        })
    }

    /// Full export as a table. Degrades to an empty table when the dataset is not
    /// ready or the export fails.
    pub fn export_table(&self) -> Result<SearchResult> {
        self.client.in_scope(|| {
            let status = match self.status() {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(dataset_id = %self.id, error = %e, "export failed");
                    return Ok(SearchResult::empty());
                }
            };
            if !Self::is_ready(&status) {
                tracing::warn!(dataset_id = %self.id, %status, "dataset is not ready");
                return Ok(SearchResult::empty());
            }
            let payload = match self.export() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(dataset_id = %self.id, error = %e, "export failed");
                    return Ok(SearchResult::empty());
                }
            };
            match SearchResult::from_plain_export(&payload) {
                Some(table) => {
                    tracing::info!(dataset_id = %self.id, rows = table.len(), "export completed");
                    Ok(table)
                }
                None => {
                    tracing::warn!(dataset_id = %self.id, "no media_items found in export data");
                    Ok(SearchResult::empty())
                }
            }
        })
    }

    pub fn search_features(&self) -> Result<SearchFeatures> {
        self.client.in_scope(|| {
            let cfg: UserConfig = self.client.get_json(
                &self.client.url("/user_config"),
                &[("dataset_id", self.id.clone())],
            )?;
            Ok(cfg.search_features())
        })
    }

    /// Runs one query job: submit, poll, fetch.
    pub fn search_by_vql(&self, filters: &[Filter], entity_type: EntityType) -> Result<SearchResult> {
        self.client.in_scope(|| {
            if filters.is_empty() {
                tracing::warn!("no filters provided for search");
                return Ok(SearchResult::empty());
            }
            self.jobs()
                .run(filters.to_vec(), entity_type, self.poll_interval, self.timeout)
        })
    }

    /// One job per filter, run sequentially, merged with first-seen dedup.
    fn search_each(&self, filters: Vec<Filter>, entity_type: EntityType) -> Result<SearchResult> {
        let mut parts = Vec::with_capacity(filters.len());
        for f in filters {
            parts.push(self.search_by_vql(&[f], entity_type)?);
        }
        Ok(SearchResult::merge_unique(parts))
    }

    /// Everything in the dataset except `matching`.
    fn complement(&self, matching: impl FnOnce() -> Result<SearchResult>) -> Result<SearchResult> {
        let all = self.export_table()?;
        if all.is_empty() {
            return Ok(all);
        }
        Ok(all.excluding(&matching()?))
    }

    pub fn search_by_labels<I, S>(
        &self,
        labels: I,
        entity_type: EntityType,
        op: SearchOperator,
    ) -> Result<SearchResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            bail!("labels must not be empty");
        }
        self.client.in_scope(|| {
            if !self.search_features()?.labels_search {
                tracing::warn!(dataset_id = %self.id, "label search is not enabled for this dataset");
                return Ok(SearchResult::empty());
            }
            match op {
                SearchOperator::IsNotOneOf => self.complement(|| {
                    self.search_by_vql(
                        &[Filter::labels(labels.clone(), SearchOperator::IsOneOf)],
                        entity_type,
                    )
                }),
                SearchOperator::IsNot => self.complement(|| {
                    self.search_by_vql(&[Filter::labels(labels.clone(), SearchOperator::Is)], entity_type)
                }),
                op => self.search_by_vql(&[Filter::labels(labels, op)], entity_type),
            }
        })
    }

    pub fn search_by_captions<I, S>(
        &self,
        captions: I,
        entity_type: EntityType,
        op: SearchOperator,
    ) -> Result<SearchResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let captions: Vec<String> = captions.into_iter().map(Into::into).collect();
        if captions.is_empty() {
            bail!("captions must not be empty");
        }
        self.client.in_scope(|| {
            if !self.search_features()?.captions_search {
                tracing::warn!(dataset_id = %self.id, "caption search is not enabled for this dataset");
                return Ok(SearchResult::empty());
            }
            self.captions(&captions, entity_type, op)
        })
    }

    fn captions(&self, captions: &[String], entity_type: EntityType, op: SearchOperator) -> Result<SearchResult> {
        match op {
            SearchOperator::Is => {
                self.search_by_vql(&[Filter::caption(captions.join(" "))], entity_type)
            }
            SearchOperator::IsOneOf => self.search_each(
                captions.iter().map(|c| Filter::caption(c.as_str())).collect(),
                entity_type,
            ),
            SearchOperator::IsNot => {
                self.complement(|| self.captions(captions, entity_type, SearchOperator::Is))
            }
            SearchOperator::IsNotOneOf => {
                self.complement(|| self.captions(captions, entity_type, SearchOperator::IsOneOf))
            }
        }
    }

    pub fn search_by_issues(
        &self,
        issues: &[IssueType],
        entity_type: EntityType,
        op: SearchOperator,
        confidence_min: f64,
        confidence_max: f64,
    ) -> Result<SearchResult> {
        if issues.is_empty() {
            bail!("issue_type must be provided");
        }
        if !(0.0..=1.0).contains(&confidence_min)
            || !(0.0..=1.0).contains(&confidence_max)
            || confidence_min > confidence_max
        {
            bail!(
                "invalid confidence range [{confidence_min}, {confidence_max}]: expected 0 <= min <= max <= 1"
            );
        }
        let filter = |issue: IssueType, mode| Filter::issue(issue, confidence_min, confidence_max, mode);

        self.client.in_scope(|| match op {
            SearchOperator::Is => self.search_by_vql(
                &issues.iter().map(|&i| filter(i, IssueMode::In)).collect::<Vec<_>>(),
                entity_type,
            ),
            SearchOperator::IsNotOneOf => self.search_by_vql(
                &issues.iter().map(|&i| filter(i, IssueMode::Out)).collect::<Vec<_>>(),
                entity_type,
            ),
            SearchOperator::IsOneOf => self.search_each(
                issues.iter().map(|&i| filter(i, IssueMode::In)).collect(),
                entity_type,
            ),
            SearchOperator::IsNot => self.complement(|| {
                self.search_by_issues(
                    issues,
                    entity_type,
                    SearchOperator::Is,
                    confidence_min,
                    confidence_max,
                )
            }),
        })
    }

    pub fn search_by_semantic(
        &self,
        text: &str,
        entity_type: EntityType,
        relevance: SemanticRelevance,
    ) -> Result<SearchResult> {
        if text.trim().is_empty() {
            bail!("text must be a non-empty string");
        }
        self.client.in_scope(|| {
            if !self.search_features()?.semantic_search {
                tracing::warn!(dataset_id = %self.id, "semantic search is not enabled for this dataset");
                return Ok(SearchResult::empty());
            }
            self.search_by_vql(&[Filter::semantic(text, relevance)], entity_type)
        })
    }

    /// Searches by similarity to one or more anchor images.
    ///
    /// Each anchor is uploaded and searched as its own job, sequentially; results
    /// are merged keeping the first record seen for each media id. Only
    /// `IsOneOf` is supported (`Is` is accepted for a single anchor).
    pub fn search_by_visual_similarity<P: AsRef<Path>>(
        &self,
        anchors: &[P],
        entity_type: EntityType,
        op: SearchOperator,
        threshold: f64,
    ) -> Result<SearchResult> {
        if anchors.is_empty() {
            bail!("at least one anchor image is required");
        }
        for a in anchors {
            let a = a.as_ref();
            if !a.is_file() {
                bail!("Image file not found: {}", a.display());
            }
        }
        self.client.in_scope(|| {
            let supported = op == SearchOperator::IsOneOf
                || (op == SearchOperator::Is && anchors.len() == 1);
            if !supported {
                tracing::warn!(
                    operator = op.as_str(),
                    "search operator is not implemented for visual similarity"
                );
                return Ok(SearchResult::empty());
            }

            let mut parts = Vec::with_capacity(anchors.len());
            for a in anchors {
                let anchor = self.upload_anchor(a.as_ref())?;
                parts.push(self.search_by_vql(&[Filter::similarity(anchor, threshold)], entity_type)?);
            }
            Ok(SearchResult::merge_unique(parts))
        })
    }

    /// Uploads an image and returns its anchor media id for similarity filters.
    pub fn upload_anchor(&self, image: &Path) -> Result<String> {
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Path is not a file: {}", image.display()))?;
        let content_type = match image
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            _ => "image/jpeg",
        };
        let body = std::fs::read(image)
            .with_context(|| format!("Image file not found: {}", image.display()))?;

        self.client.in_scope(|| {
            tracing::info!(image = %image.display(), "uploading anchor image");
            let reply: AnchorUpload = self.client.post_file(
                &self.path("/search-image-similarity"),
                &[("allow_deleted", "false".to_string())],
                &file_name,
                content_type,
                &body,
            )?;
            reply
                .anchor_media_id
                .filter(|id| !id.is_empty())
                .context("Failed to get anchor_media_id from image upload")
        })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dataset(id='{}')", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_textual_search_feature() {
        let cfg: UserConfig = serde_json::from_value(json!({
            "features": [
                {"feature_key": "OTHER", "feature_options": {"labels_search": false}},
                {"feature_key": "TEXTUAL_SEARCH_IMAGE",
                 "feature_options": {"labels_search": true, "captions_search": false}}
            ]
        }))
        .unwrap();
        assert_eq!(
            cfg.search_features(),
            SearchFeatures {
                labels_search: true,
                captions_search: false,
                semantic_search: false,
            }
        );
    }

    #[test]
    fn missing_feature_disables_search() {
        let cfg: UserConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg.search_features(), SearchFeatures::default());
    }

    #[test]
    fn ready_statuses() {
        assert!(Dataset::is_ready("READY"));
        assert!(Dataset::is_ready("completed"));
        assert!(!Dataset::is_ready("INDEXING"));
    }
}
