//! Thin Graph API client.
//!
//! Every request carries the token as a bearer header. Non-2xx responses are
//! classified into [`GraphError::AuthExpired`] (HTTP 401 or Meta error code
//! 190) or a verbatim [`GraphError::Remote`].

use crate::error::{GraphError, GraphResult};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Graph API origin.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com";

/// Client-side timeout for a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum size of a downloaded image (20MB).
const MAX_DOWNLOAD_SIZE: usize = 20 * 1024 * 1024;

/// Meta error code for an invalid or expired access token.
const INVALID_TOKEN_CODE: i64 = 190;

const USER_AGENT: &str = concat!("meta-ads-mcp/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error_subcode: Option<i64>,
}

/// A fetched file, successful or not.
#[derive(Debug, Clone)]
pub struct Download {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub bytes: Vec<u8>,
}

impl Download {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Graph API client bound to one API version.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Client for `https://graph.facebook.com/<version>`.
    pub fn new(version: &str) -> GraphResult<Self> {
        Self::with_base_url(format!("{DEFAULT_GRAPH_URL}/{version}"))
    }

    /// Client for a custom base URL (including the version segment).
    pub fn with_base_url(base_url: impl Into<String>) -> GraphResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET <base>/<path>` with query parameters.
    pub async fn get(&self, path: &str, token: &str, params: &[(&str, String)]) -> GraphResult<Value> {
        debug!(path, "Graph API GET");
        let response = self
            .http
            .get(self.endpoint(path))
            .bearer_auth(token)
            .query(params)
            .send()
            .await?;
        parse_response(response).await
    }

    /// `POST <base>/<path>` with a form body.
    pub async fn post(&self, path: &str, token: &str, form: &[(String, String)]) -> GraphResult<Value> {
        debug!(path, fields = form.len(), "Graph API POST");
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(token)
            .form(form)
            .send()
            .await?;
        parse_response(response).await
    }

    /// Fetch an arbitrary URL without credentials.
    pub async fn download(&self, url: &str) -> GraphResult<Download> {
        debug!(url, "Downloading");
        let response = self.http.get(url).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("<binary>").to_string()))
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_DOWNLOAD_SIZE {
            return Err(GraphError::invalid_response(format!(
                "Download too large: {} bytes (max {} bytes)",
                bytes.len(),
                MAX_DOWNLOAD_SIZE
            )));
        }

        Ok(Download {
            status,
            final_url,
            content_type,
            headers,
            bytes: bytes.to_vec(),
        })
    }
}

async fn parse_response(response: reqwest::Response) -> GraphResult<Value> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(classify(status.as_u16(), &text));
    }

    let value: Value = serde_json::from_str(&text)?;
    if value.get("error").is_some_and(Value::is_object) {
        return Err(classify(status.as_u16(), &text));
    }
    Ok(value)
}

/// Map an error response onto a [`GraphError`].
pub(crate) fn classify(status: u16, body: &str) -> GraphError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);

    let (message, error_type, code, error_subcode) = match error {
        Some(e) => (e.message, e.error_type, e.code, e.error_subcode),
        None => (None, None, None, None),
    };
    let message = message.unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            body.to_string()
        }
    });

    if status == 401 || code == Some(INVALID_TOKEN_CODE) {
        warn!(status, ?code, ?error_subcode, "Graph API rejected access token");
        return GraphError::AuthExpired { message };
    }

    warn!(status, ?code, ?error_type, "Graph API error");
    GraphError::Remote {
        status,
        code,
        error_subcode,
        error_type,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_classify_code_190() {
        let body = r#"{"error":{"message":"Error validating access token","type":"OAuthException","code":190,"error_subcode":463}}"#;
        assert!(matches!(classify(400, body), GraphError::AuthExpired { .. }));
    }

    #[test]
    fn test_classify_401_without_body() {
        match classify(401, "") {
            GraphError::AuthExpired { message } => assert_eq!(message, "HTTP 401"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_remote() {
        let body = r#"{"error":{"message":"Unsupported get request","type":"GraphMethodException","code":100,"error_subcode":33}}"#;
        match classify(400, body) {
            GraphError::Remote {
                status,
                code,
                error_subcode,
                error_type,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(100));
                assert_eq!(error_subcode, Some(33));
                assert_eq!(error_type.as_deref(), Some("GraphMethodException"));
                assert_eq!(message, "Unsupported get request");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_non_json_body() {
        match classify(502, "Bad Gateway") {
            GraphError::Remote { message, code, .. } => {
                assert_eq!(message, "Bad Gateway");
                assert!(code.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/act_1/campaigns"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = GraphClient::with_base_url(format!("{}/v22.0/", server.uri())).unwrap();
        let value = client
            .get("act_1/campaigns", "tok", &[("limit", "10".to_string())])
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"data": []}));
    }

    #[tokio::test]
    async fn test_post_sends_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/act_1/campaigns"))
            .and(body_string_contains("name=Spring+Sale"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "42"})))
            .mount(&server)
            .await;

        let client = GraphClient::with_base_url(format!("{}/v22.0", server.uri())).unwrap();
        let value = client
            .post(
                "act_1/campaigns",
                "tok",
                &[("name".to_string(), "Spring Sale".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(value["id"], "42");
    }

    #[tokio::test]
    async fn test_expired_token_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Session has expired", "code": 190, "type": "OAuthException"}
            })))
            .mount(&server)
            .await;

        let client = GraphClient::with_base_url(server.uri()).unwrap();
        let err = client.get("me", "X", &[]).await.unwrap_err();
        assert!(matches!(err, GraphError::AuthExpired { ref message } if message == "Session has expired"));
    }

    #[tokio::test]
    async fn test_download_reports_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let client = GraphClient::with_base_url(server.uri()).unwrap();
        let download = client
            .download(&format!("{}/img.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(download.status, 403);
        assert!(!download.is_success());
        assert_eq!(download.bytes, b"denied");
    }
}
