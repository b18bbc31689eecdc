//! Flat, row-per-media-item search results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

const JOIN: &str = "; ";

/// One media item with its nested metadata flattened into strings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaRecord {
    pub media_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// `category(source)` entries.
    #[serde(default)]
    pub image_labels: String,
    /// `category[x, y, w, h]` entries.
    #[serde(default)]
    pub object_labels: String,
    #[serde(default)]
    pub captions: String,
    /// `issue_type:description(confidence)` entries.
    #[serde(default)]
    pub issues: String,
    /// Remaining top-level fields of the exported item, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaRecord {
    /// Flattens one exported media item. Items without a `media_id` are skipped.
    pub fn from_export_item(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        let media_id = value_to_string(obj.get("media_id")?)?;

        let mut captions = Vec::new();
        let mut image_labels = Vec::new();
        let mut object_labels = Vec::new();
        let mut issues = Vec::new();

        let metadata = obj
            .get("metadata_items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for meta in metadata {
            let props = meta.get("properties").unwrap_or(&Value::Null);
            let prop = |k| str_prop(props, k);
            match meta.get("type").and_then(Value::as_str) {
                Some("caption") => {
                    let caption = prop("caption");
                    if !caption.is_empty() {
                        captions.push(caption.to_string());
                    }
                }
                Some("image_label") => {
                    let category = prop("category_name");
                    if !category.is_empty() {
                        image_labels.push(format!("{}({})", category, prop("source")));
                    }
                }
                Some("object_label") => {
                    let category = prop("category_name");
                    if !category.is_empty() {
                        object_labels.push(format!("{}{}", category, format_bbox(props.get("bbox"))));
                    }
                }
                Some("issue") => {
                    let issue_type = prop("issue_type");
                    if !issue_type.is_empty() {
                        let confidence = props
                            .get("confidence")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0);
                        issues.push(format!(
                            "{}:{}({:.3})",
                            issue_type,
                            prop("issues_description"),
                            confidence
                        ));
                    }
                }
                _ => {}
            }
        }

        let mut extra = obj.clone();
        for k in [
            "media_id",
            "media_uri",
            "file_name",
            "metadata_items",
            "captions",
            "image_labels",
            "object_labels",
            "issues",
        ] {
            extra.remove(k);
        }

        Some(Self {
            media_id,
            media_uri: obj.get("media_uri").and_then(value_to_string),
            file_name: obj.get("file_name").and_then(value_to_string),
            image_labels: image_labels.join(JOIN),
            object_labels: object_labels.join(JOIN),
            captions: captions.join(JOIN),
            issues: issues.join(JOIN),
            extra,
        })
    }

    /// Items of a plain dataset export: metadata is dropped, not flattened.
    fn from_plain_item(item: &Value) -> Option<Self> {
        let mut obj = item.as_object()?.clone();
        obj.remove("metadata_items");
        Self::from_export_item(&Value::Object(obj))
    }
}

fn str_prop<'a>(props: &'a Value, key: &str) -> &'a str {
    props.get(key).and_then(Value::as_str).unwrap_or("")
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn format_bbox(bbox: Option<&Value>) -> String {
    let coords = bbox
        .and_then(Value::as_array)
        .map(|a| a.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    format!("[{coords}]")
}

/// Ordered search results, one record per media item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    records: Vec<MediaRecord>,
}

impl SearchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<MediaRecord>) -> Self {
        Self { records }
    }

    /// Flattens the `media_items` of a search export payload.
    pub fn from_export(payload: &Value) -> Option<Self> {
        let items = payload.get("media_items")?.as_array()?;
        Some(Self {
            records: items.iter().filter_map(MediaRecord::from_export_item).collect(),
        })
    }

    /// Rows of a full dataset export, with `metadata_items` removed.
    pub fn from_plain_export(payload: &Value) -> Option<Self> {
        let items = payload.get("media_items")?.as_array()?;
        Some(Self {
            records: items.iter().filter_map(MediaRecord::from_plain_item).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MediaRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MediaRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<MediaRecord> {
        self.records
    }

    pub fn media_ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.media_id.as_str()).collect()
    }

    /// Column names in display order: fixed columns first, then extra fields as first seen.
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = [
            "media_id",
            "media_uri",
            "file_name",
            "image_labels",
            "object_labels",
            "captions",
            "issues",
        ]
        .map(String::from)
        .to_vec();
        for r in &self.records {
            for k in r.extra.keys() {
                if !cols.contains(k) {
                    cols.push(k.clone());
                }
            }
        }
        cols
    }

    /// Concatenates results in order, keeping the first record seen for each media id.
    pub fn merge_unique(parts: impl IntoIterator<Item = SearchResult>) -> Self {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for part in parts {
            for r in part.records {
                if seen.insert(r.media_id.clone()) {
                    records.push(r);
                }
            }
        }
        Self { records }
    }

    /// Records whose media id does not appear in `other`.
    pub fn excluding(self, other: &SearchResult) -> Self {
        let drop: HashSet<&str> = other.records.iter().map(|r| r.media_id.as_str()).collect();
        Self {
            records: self
                .records
                .into_iter()
                .filter(|r| !drop.contains(r.media_id.as_str()))
                .collect(),
        }
    }
}

impl IntoIterator for SearchResult {
    type Item = MediaRecord;
    type IntoIter = std::vec::IntoIter<MediaRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchResult {
    type Item = &'a MediaRecord;
    type IntoIter = std::slice::Iter<'a, MediaRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
