//! Diagnostics for image downloads.

use super::ads::{ad_image_url, ImageLookup};
use super::media::ImageFormat;
use super::{non_empty, parse_args, schema};
use crate::{Tool, ToolContext, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
struct DebugImageArgs {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ad_id: Option<String>,
}

/// Fetch an image URL and report what came back.
pub struct DebugImageDownloadTool;

#[async_trait]
impl Tool for DebugImageDownloadTool {
    fn id(&self) -> &str {
        "debug_image_download"
    }

    fn description(&self) -> &str {
        r#"Debug image download issues.

- Downloads the image at url, or the image of ad_id when no url is given
- Reports status, headers, size and detected image format"#
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "url": {
                    "type": "string",
                    "description": "Image URL to download"
                },
                "ad_id": {
                    "type": "string",
                    "description": "Ad whose image URL should be resolved and downloaded"
                }
            }),
            &[],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: DebugImageArgs = parse_args(args)?;

        let (url, source) = match (non_empty(args.url), non_empty(args.ad_id)) {
            (Some(url), _) => (url, "parameter".to_string()),
            (None, Some(ad_id)) => match ad_image_url(ctx, &ad_id).await? {
                ImageLookup::Url(url) => (url, format!("ad {ad_id}")),
                ImageLookup::NotFound(reason) => {
                    return Ok(ToolOutput::Json(json!({
                        "ad_id": ad_id,
                        "success": false,
                        "error": reason,
                    })))
                }
            },
            (None, None) => return Ok(ToolOutput::error("No URL or ad ID provided")),
        };

        let download = match ctx.graph.download(&url).await {
            Ok(download) => download,
            Err(e) => {
                return Ok(ToolOutput::Json(json!({
                    "url": url,
                    "url_source": source,
                    "success": false,
                    "error": e.to_string(),
                })))
            }
        };

        let headers: Map<String, Value> = download
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        let format = ImageFormat::detect(&download.bytes);

        Ok(ToolOutput::Json(json!({
            "url": url,
            "url_source": source,
            "final_url": download.final_url,
            "status": download.status,
            "success": download.is_success(),
            "content_type": download.content_type,
            "headers": headers,
            "size_bytes": download.bytes.len(),
            "detected_format": format.map(|f| f.name()),
            "detected_mime_type": format.map(|f| f.mime_type()),
            "is_image": format.is_some(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::context;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reports_jpeg_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
            )
            .mount(&server)
            .await;

        let url = format!("{}/img.jpg", server.uri());
        let output = DebugImageDownloadTool
            .execute(json!({"url": url}), &context(&server))
            .await
            .unwrap();
        let ToolOutput::Json(report) = output else {
            panic!("expected JSON report");
        };
        assert_eq!(report["status"], 200);
        assert_eq!(report["size_bytes"], 6);
        assert_eq!(report["detected_format"], "JPEG");
        assert_eq!(report["is_image"], true);
        assert_eq!(report["headers"]["content-type"], "image/jpeg");
    }

    #[tokio::test]
    async fn test_reports_non_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(403).set_body_string("<html>denied</html>"))
            .mount(&server)
            .await;

        let url = format!("{}/blocked", server.uri());
        let output = DebugImageDownloadTool
            .execute(json!({"url": url}), &context(&server))
            .await
            .unwrap();
        let ToolOutput::Json(report) = output else {
            panic!("expected JSON report");
        };
        assert_eq!(report["success"], false);
        assert_eq!(report["is_image"], false);
        assert!(report["detected_format"].is_null());
    }

    #[tokio::test]
    async fn test_requires_url_or_ad() {
        let server = MockServer::start().await;
        let output = DebugImageDownloadTool
            .execute(json!({}), &context(&server))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::error("No URL or ad ID provided"));
    }
}
