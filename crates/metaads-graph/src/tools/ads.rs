//! Ad and creative tools.

use super::media::image_mime_type;
use super::{default_limit, missing_id, no_account_found, non_empty, parse_args, resolve_account_id, schema};
use crate::{Tool, ToolContext, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const AD_LIST_FIELDS: &str = "id,name,adset_id,campaign_id,status,creative,created_time,updated_time,bid_amount,conversion_domain,tracking_specs";

const AD_DETAIL_FIELDS: &str = "id,name,adset_id,campaign_id,status,creative,created_time,updated_time,bid_amount,conversion_domain,tracking_specs,preview_shareable_link";

const CREATIVE_FIELDS: &str = "id,name,status,thumbnail_url,image_url,image_hash,object_story_spec,asset_feed_spec";

#[derive(Debug, Deserialize)]
struct AdsArgs {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    adset_id: Option<String>,
}

/// List ads of an account, campaign or ad set.
pub struct GetAdsTool;

#[async_trait]
impl Tool for GetAdsTool {
    fn id(&self) -> &str {
        "get_ads"
    }

    fn description(&self) -> &str {
        r#"Get ads for a Meta Ads account with optional filtering.

- adset_id takes precedence over campaign_id, which takes precedence over account_id
- Without any of them, the first ad account of the current user is used"#
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "account_id": {
                    "type": "string",
                    "description": "Meta Ads account ID (format: act_XXXXXXXXX)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of ads to return",
                    "default": 10
                },
                "campaign_id": {
                    "type": "string",
                    "description": "Optional campaign ID to filter by"
                },
                "adset_id": {
                    "type": "string",
                    "description": "Optional ad set ID to filter by"
                }
            }),
            &[],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdsArgs = parse_args(args)?;

        let parent = match non_empty(args.adset_id).or_else(|| non_empty(args.campaign_id)) {
            Some(id) => id,
            None => match resolve_account_id(ctx, args.account_id).await? {
                Some(account_id) => account_id,
                None => return Ok(no_account_found()),
            },
        };

        let data = ctx
            .get(
                &format!("{parent}/ads"),
                &[
                    ("fields", AD_LIST_FIELDS.to_string()),
                    ("limit", args.limit.to_string()),
                ],
            )
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct AdIdArgs {
    #[serde(default)]
    ad_id: Option<String>,
}

fn ad_id_schema() -> Value {
    schema(
        json!({
            "ad_id": {
                "type": "string",
                "description": "Meta Ads ad ID"
            }
        }),
        &["ad_id"],
    )
}

/// Details of one ad.
pub struct GetAdDetailsTool;

#[async_trait]
impl Tool for GetAdDetailsTool {
    fn id(&self) -> &str {
        "get_ad_details"
    }

    fn description(&self) -> &str {
        "Get detailed information about a specific ad."
    }

    fn parameters_schema(&self) -> Value {
        ad_id_schema()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdIdArgs = parse_args(args)?;
        let Some(ad_id) = non_empty(args.ad_id) else {
            return Ok(missing_id("ad"));
        };

        let data = ctx
            .get(&ad_id, &[("fields", AD_DETAIL_FIELDS.to_string())])
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

/// Creatives attached to an ad.
pub struct GetAdCreativesTool;

#[async_trait]
impl Tool for GetAdCreativesTool {
    fn id(&self) -> &str {
        "get_ad_creatives"
    }

    fn description(&self) -> &str {
        "Get creative details for a specific ad."
    }

    fn parameters_schema(&self) -> Value {
        ad_id_schema()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdIdArgs = parse_args(args)?;
        let Some(ad_id) = non_empty(args.ad_id) else {
            return Ok(missing_id("ad"));
        };

        let data = ctx
            .get(
                &format!("{ad_id}/adcreatives"),
                &[("fields", CREATIVE_FIELDS.to_string())],
            )
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

/// Where an ad's image lives, or why it could not be found.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ImageLookup {
    Url(String),
    NotFound(String),
}

/// Resolve an ad's image URL: ad, then creative, then image hash.
pub(crate) async fn ad_image_url(ctx: &ToolContext, ad_id: &str) -> ToolResult<ImageLookup> {
    let ad = ctx
        .get(ad_id, &[("fields", "creative{id},account_id".to_string())])
        .await?;

    let creative_id = ad["creative"]["id"].as_str();
    let account_id = ad["account_id"].as_str();
    let (Some(creative_id), Some(account_id)) = (creative_id, account_id) else {
        return Ok(ImageLookup::NotFound(
            "Could not find creative ID or account ID in ad data".to_string(),
        ));
    };

    let creative = ctx
        .get(
            creative_id,
            &[("fields", "id,name,image_hash,image_url,asset_feed_spec".to_string())],
        )
        .await?;

    let hashes = image_hashes(&creative);
    if hashes.is_empty() {
        if let Some(url) = creative["image_url"].as_str() {
            debug!(creative_id, "Creative has no image hash, using image_url");
            return Ok(ImageLookup::Url(url.to_string()));
        }
        return Ok(ImageLookup::NotFound("No image hashes found in creative".to_string()));
    }

    let images = ctx
        .get(
            &format!("act_{}/adimages", account_id.trim_start_matches("act_")),
            &[
                ("hashes", json!(hashes).to_string()),
                ("fields", "hash,url,width,height,name,status".to_string()),
            ],
        )
        .await?;

    let Some(image) = images["data"].get(0) else {
        return Ok(ImageLookup::NotFound(
            "No image data found for the provided hashes".to_string(),
        ));
    };
    match image["url"].as_str() {
        Some(url) => Ok(ImageLookup::Url(url.to_string())),
        None => Ok(ImageLookup::NotFound("No image URL found in image data".to_string())),
    }
}

/// Image hashes of a creative: its own hash, else those of its asset feed.
fn image_hashes(creative: &Value) -> Vec<String> {
    if let Some(hash) = creative["image_hash"].as_str() {
        return vec![hash.to_string()];
    }
    creative["asset_feed_spec"]["images"]
        .as_array()
        .map(|images| {
            images
                .iter()
                .filter_map(|image| image["hash"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Download an ad's image and return it as image content.
pub struct GetAdImageTool;

#[async_trait]
impl Tool for GetAdImageTool {
    fn id(&self) -> &str {
        "get_ad_image"
    }

    fn description(&self) -> &str {
        r#"Get the image of a Meta ad so it can be viewed directly.

- Follows ad -> creative -> image hash -> image URL
- Returns the image bytes as image content"#
    }

    fn parameters_schema(&self) -> Value {
        ad_id_schema()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdIdArgs = parse_args(args)?;
        let Some(ad_id) = non_empty(args.ad_id) else {
            return Ok(missing_id("ad"));
        };

        let url = match ad_image_url(ctx, &ad_id).await? {
            ImageLookup::Url(url) => url,
            ImageLookup::NotFound(reason) => return Ok(ToolOutput::error(reason)),
        };

        let download = ctx.graph.download(&url).await?;
        if !download.is_success() {
            return Ok(ToolOutput::error(format!(
                "Failed to download image: HTTP {}",
                download.status
            )));
        }

        let Some(mime_type) = image_mime_type(&download.bytes, download.content_type.as_deref()) else {
            return Ok(ToolOutput::error(
                "Downloaded content is not a recognised image format",
            ));
        };

        debug!(%ad_id, size = download.bytes.len(), %mime_type, "Fetched ad image");
        Ok(ToolOutput::Image {
            data: download.bytes,
            mime_type,
        })
    }
}
