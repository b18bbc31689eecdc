use reqwest::StatusCode;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

/// Resolves a possibly relative download reference against the API base.
pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

pub(crate) fn extract_http_status(err: &anyhow::Error) -> Option<StatusCode> {
    // api_json formats errors including "HTTP <code>".
    let s = err.to_string();
    if s.contains("HTTP 404") {
        return Some(StatusCode::NOT_FOUND);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_and_keeps_absolute() {
        assert_eq!(urljoin("http://h/api/v1/", "/a/b"), "http://h/api/v1/a/b");
        assert_eq!(urljoin("http://h/api/v1", "a"), "http://h/api/v1/a");
        assert_eq!(urljoin("http://h/api/v1", "https://s3/x.zip"), "https://s3/x.zip");
    }

    #[test]
    fn transient_statuses() {
        assert!(retriable_status(503));
        assert!(retriable_status(429));
        assert!(!retriable_status(404));
        assert!(!retriable_status(200));
    }

    #[test]
    fn detects_not_found_from_message() {
        let e = anyhow::anyhow!("Visual Layer resource not found (HTTP 404).");
        assert_eq!(extract_http_status(&e), Some(StatusCode::NOT_FOUND));
        assert_eq!(extract_http_status(&anyhow::anyhow!("HTTP 500")), None);
    }
}
