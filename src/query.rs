//! Search filters in the API's JSON query language, and a chainable [`Query`].

use anyhow::{Result, bail};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

use crate::dataset::Dataset;
use crate::table::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOperator {
    Is,
    IsNot,
    IsOneOf,
    IsNotOneOf,
}

impl SearchOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchOperator::Is => "is",
            SearchOperator::IsNot => "is_not",
            SearchOperator::IsOneOf => "one_of",
            SearchOperator::IsNotOneOf => "not_one_of",
        }
    }
}

impl FromStr for SearchOperator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "is" => SearchOperator::Is,
            "is_not" => SearchOperator::IsNot,
            "one_of" => SearchOperator::IsOneOf,
            "not_one_of" => SearchOperator::IsNotOneOf,
            other => bail!("invalid search operator: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueType {
    Mislabels,
    Outliers,
    Duplicates,
    Blur,
    Dark,
    Bright,
    Normal,
    LabelOutlier,
}

impl IssueType {
    pub const ALL: [IssueType; 8] = [
        IssueType::Mislabels,
        IssueType::Outliers,
        IssueType::Duplicates,
        IssueType::Blur,
        IssueType::Dark,
        IssueType::Bright,
        IssueType::Normal,
        IssueType::LabelOutlier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::Mislabels => "mislabels",
            IssueType::Outliers => "outliers",
            IssueType::Duplicates => "duplicates",
            IssueType::Blur => "blur",
            IssueType::Dark => "dark",
            IssueType::Bright => "bright",
            IssueType::Normal => "normal",
            IssueType::LabelOutlier => "label_outlier",
        }
    }
}

impl FromStr for IssueType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        IssueType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid issue type '{s}'. Allowed types: {}",
                    IssueType::ALL.map(IssueType::as_str).join(", ")
                )
            })
    }
}

/// Semantic search strictness; the value is the distance threshold sent to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemanticRelevance {
    Low,
    #[default]
    Medium,
    High,
}

impl SemanticRelevance {
    pub fn threshold(self) -> f64 {
        match self {
            SemanticRelevance::Low => 0.9,
            SemanticRelevance::Medium => 0.8,
            SemanticRelevance::High => 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityType {
    #[default]
    Images,
    Objects,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Images => "IMAGES",
            EntityType::Objects => "OBJECTS",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IMAGES" => Ok(EntityType::Images),
            "OBJECTS" => Ok(EntityType::Objects),
            other => bail!("invalid entity type: {other} (expected IMAGES or OBJECTS)"),
        }
    }
}

/// Whether an issue filter selects items that have the issue or items that don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueMode {
    In,
    Out,
}

/// One filter object of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Labels {
        op: SearchOperator,
        labels: Vec<String>,
    },
    Caption {
        text: String,
    },
    Issue {
        issue: IssueType,
        confidence_min: f64,
        confidence_max: f64,
        mode: IssueMode,
    },
    Semantic {
        id: String,
        text: String,
        threshold: f64,
    },
    Similarity {
        anchor_media_id: String,
        threshold: f64,
    },
    /// Passed through untouched.
    Raw(Value),
}

impl Filter {
    pub fn labels<I, S>(labels: I, op: SearchOperator) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Labels {
            op,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn caption(text: impl Into<String>) -> Self {
        Filter::Caption { text: text.into() }
    }

    pub fn issue(issue: IssueType, confidence_min: f64, confidence_max: f64, mode: IssueMode) -> Self {
        Filter::Issue {
            issue,
            confidence_min,
            confidence_max,
            mode,
        }
    }

    pub fn semantic(text: impl Into<String>, relevance: SemanticRelevance) -> Self {
        Filter::Semantic {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            threshold: relevance.threshold(),
        }
    }

    pub fn similarity(anchor_media_id: impl Into<String>, threshold: f64) -> Self {
        Filter::Similarity {
            anchor_media_id: anchor_media_id.into(),
            threshold,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Labels { op, labels } => json!({
                "id": "label_filter",
                "labels": { "op": op.as_str(), "value": labels },
            }),
            Filter::Caption { text } => json!({
                "text": { "op": "fts", "value": text },
            }),
            Filter::Issue {
                issue,
                confidence_min,
                confidence_max,
                mode,
            } => json!({
                "issues": {
                    "op": "issue",
                    "value": issue.as_str(),
                    "confidence_min": confidence_min,
                    "confidence_max": confidence_max,
                    "mode": match mode { IssueMode::In => "in", IssueMode::Out => "out" },
                },
            }),
            Filter::Semantic {
                id,
                text,
                threshold,
            } => json!({
                "id": id,
                "text": { "op": "semantic", "value": text, "threshold": threshold },
            }),
            Filter::Similarity {
                anchor_media_id,
                threshold,
            } => json!({
                "id": "similarity_search",
                "similarity": { "op": "upload", "value": anchor_media_id, "threshold": threshold },
            }),
            Filter::Raw(v) => v.clone(),
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// The `vql` query parameter: the filter list as a JSON string.
pub(crate) fn encode_filters(filters: &[Filter]) -> Result<String> {
    Ok(serde_json::to_string(filters)?)
}

/// An immutable, chainable accumulation of filters against one dataset.
///
/// Each `search_by_*` returns a new query; results are computed on demand by
/// [`Query::results`].
#[derive(Debug, Clone)]
pub struct Query {
    id: String,
    filters: Vec<Filter>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filters: Vec::new(),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filters: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    fn push(&self, more: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters = self.filters.clone();
        filters.extend(more);
        Self {
            id: self.id.clone(),
            filters,
        }
    }

    pub fn filter(&self, filter: Filter) -> Self {
        self.push([filter])
    }

    pub fn search_by_labels<I, S>(&self, labels: I, op: Option<SearchOperator>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter(Filter::labels(labels, op.unwrap_or(SearchOperator::IsOneOf)))
    }

    /// `Is` combines all captions into one full-text filter; `IsOneOf` adds one filter per caption.
    pub fn search_by_captions<I, S>(&self, captions: I, op: Option<SearchOperator>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let captions: Vec<String> = captions.into_iter().map(Into::into).collect();
        match op.unwrap_or(SearchOperator::Is) {
            SearchOperator::Is => Ok(self.filter(Filter::caption(captions.join(" ")))),
            SearchOperator::IsOneOf => Ok(self.push(captions.into_iter().map(Filter::caption))),
            other => bail!("Search operator {} not supported for captions", other.as_str()),
        }
    }

    pub fn search_by_issues(
        &self,
        issues: &[IssueType],
        op: Option<SearchOperator>,
        confidence_min: f64,
        confidence_max: f64,
    ) -> Self {
        let mode = match op.unwrap_or(SearchOperator::Is) {
            SearchOperator::Is => IssueMode::In,
            _ => IssueMode::Out,
        };
        self.push(
            issues
                .iter()
                .map(|&i| Filter::issue(i, confidence_min, confidence_max, mode)),
        )
    }

    pub fn search_by_semantic(&self, text: impl Into<String>, relevance: Option<SemanticRelevance>) -> Self {
        self.filter(Filter::semantic(text, relevance.unwrap_or_default()))
    }

    /// Uploads `image` to obtain an anchor id, then adds a similarity filter.
    ///
    /// `op` defaults to `IsOneOf`; `Is` is equivalent for a single anchor and
    /// negative operators are rejected before anything is uploaded.
    pub fn search_by_visual_similarity(
        &self,
        dataset: &Dataset,
        image: &std::path::Path,
        op: Option<SearchOperator>,
        threshold: f64,
    ) -> Result<Self> {
        match op.unwrap_or(SearchOperator::IsOneOf) {
            SearchOperator::IsOneOf | SearchOperator::Is => {}
            other => bail!(
                "Search operator {} not supported for visual similarity",
                other.as_str()
            ),
        }
        let anchor = dataset.upload_anchor(image)?;
        Ok(self.filter(Filter::similarity(anchor, threshold)))
    }

    /// Drops all filters, keeping the id.
    pub fn reset(&self) -> Self {
        Self {
            id: self.id.clone(),
            filters: Vec::new(),
        }
    }

    /// Runs the query. With no filters this is the full dataset export.
    pub fn results(&self, dataset: &Dataset, entity_type: EntityType) -> Result<SearchResult> {
        if self.filters.is_empty() {
            return dataset.export_table();
        }
        dataset.search_by_vql(&self.filters, entity_type)
    }

    pub fn count(&self, dataset: &Dataset, entity_type: EntityType) -> Result<usize> {
        Ok(self.results(dataset, entity_type)?.len())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters = if self.filters.is_empty() {
            "No filters".to_string()
        } else {
            self.filters
                .iter()
                .map(|x| x.to_json().to_string())
                .collect::<Vec<_>>()
                .join(" + ")
        };
        write!(f, "Query(id='{}', filters=[{}])", self.id, filters)
    }
}
