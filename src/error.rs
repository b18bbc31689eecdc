use anyhow::anyhow;
use reqwest::StatusCode;

/// Error body returned by the Visual Layer API.
///
/// Endpoints are not consistent: some answer `{"detail": ...}` (FastAPI style),
/// others `{"status": "error", "message": ...}`.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) detail: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
}

impl ApiErrorResponse {
    fn detail_text(&self) -> String {
        match &self.detail {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

pub(crate) fn format_api_error(
    status: StatusCode,
    url: &str,
    e: &ApiErrorResponse,
) -> anyhow::Error {
    let message = e.message.as_deref().or(e.title.as_deref()).unwrap_or("");
    let detail = e.detail_text();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "Visual Layer authentication failed (HTTP {}).\n- Check VISUAL_LAYER_API_KEY and VISUAL_LAYER_API_SECRET\n- Check that the selected environment (production/staging) matches the credentials\n\nServer message: {}\n{}\nrequest: {}",
            status.as_u16(),
            message,
            detail,
            url
        );
    }

    if status == StatusCode::NOT_FOUND {
        return anyhow!(
            "Visual Layer resource not found (HTTP 404).\n- Check the dataset or image id\n\nServer message: {}\n{}\nrequest: {}",
            message,
            detail,
            url
        );
    }

    anyhow!(
        "API request failed: HTTP {} for url ({})\n{}\n{}",
        status.as_u16(),
        url,
        message,
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ApiErrorResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn auth_failures_point_at_credentials() {
        let e = parse(r#"{"detail":"Invalid token"}"#);
        let err = format_api_error(StatusCode::UNAUTHORIZED, "http://x/datasets", &e).to_string();
        assert!(err.contains("HTTP 401"));
        assert!(err.contains("VISUAL_LAYER_API_KEY"));
        assert!(err.contains("Invalid token"));
    }

    #[test]
    fn structured_detail_is_rendered() {
        let e = parse(r#"{"detail":[{"loc":["query","vql"],"msg":"bad"}]}"#);
        let err = format_api_error(StatusCode::UNPROCESSABLE_ENTITY, "u", &e).to_string();
        assert!(err.contains("HTTP 422"));
        assert!(err.contains("\"msg\":\"bad\""));
    }

    #[test]
    fn not_found_mentions_resource() {
        let e = parse(r#"{"status":"error","message":"Dataset missing"}"#);
        let err = format_api_error(StatusCode::NOT_FOUND, "u", &e).to_string();
        assert!(err.contains("HTTP 404"));
        assert!(err.contains("Dataset missing"));
    }
}
