//! Performance insights tool.

use super::{missing_id, non_empty, parse_args, schema};
use crate::{Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const INSIGHT_FIELDS: &str = "account_id,account_name,campaign_id,campaign_name,adset_id,adset_name,ad_id,ad_name,impressions,clicks,spend,cpc,cpm,ctr,reach,frequency,actions,conversions,unique_clicks,cost_per_action_type";

/// A preset like `last_30d`, or an explicit date range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum TimeRange {
    Preset(String),
    Custom { since: String, until: String },
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::Preset("maximum".to_string())
    }
}

impl TimeRange {
    fn query_param(&self) -> (&'static str, String) {
        match self {
            TimeRange::Preset(preset) => ("date_preset", preset.clone()),
            TimeRange::Custom { since, until } => (
                "time_range",
                json!({ "since": since, "until": until }).to_string(),
            ),
        }
    }
}

fn default_level() -> String {
    "ad".to_string()
}

#[derive(Debug, Deserialize)]
struct InsightsArgs {
    #[serde(default)]
    object_id: Option<String>,
    #[serde(default)]
    time_range: Option<Value>,
    #[serde(default)]
    breakdown: Option<String>,
    #[serde(default = "default_level")]
    level: String,
}

/// Performance metrics for an account, campaign, ad set or ad.
pub struct GetInsightsTool;

#[async_trait]
impl Tool for GetInsightsTool {
    fn id(&self) -> &str {
        "get_insights"
    }

    fn description(&self) -> &str {
        r#"Get performance insights for a campaign, ad set, ad or account.

- time_range is a preset ('today', 'yesterday', 'last_7d', 'last_30d', 'maximum', ...)
  or an object {"since": "YYYY-MM-DD", "until": "YYYY-MM-DD"}
- breakdown splits results (e.g. 'age', 'gender', 'country', 'publisher_platform')
- level is one of 'ad', 'adset', 'campaign', 'account'"#
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "object_id": {
                    "type": "string",
                    "description": "ID of the campaign, ad set, ad or account"
                },
                "time_range": {
                    "description": "Date preset or {since, until} object",
                    "default": "maximum",
                    "oneOf": [
                        { "type": "string" },
                        {
                            "type": "object",
                            "properties": {
                                "since": { "type": "string" },
                                "until": { "type": "string" }
                            },
                            "required": ["since", "until"]
                        }
                    ]
                },
                "breakdown": {
                    "type": "string",
                    "description": "Optional breakdown dimension"
                },
                "level": {
                    "type": "string",
                    "description": "Aggregation level",
                    "default": "ad"
                }
            }),
            &["object_id"],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: InsightsArgs = parse_args(args)?;
        let Some(object_id) = non_empty(args.object_id) else {
            return Ok(missing_id("object"));
        };

        let time_range = match args.time_range {
            None | Some(Value::Null) => TimeRange::default(),
            Some(value) => serde_json::from_value::<TimeRange>(value).map_err(|_| {
                ToolError::validation(
                    "time_range must be a preset name or an object with 'since' and 'until'",
                )
            })?,
        };

        let mut params = vec![
            ("fields", INSIGHT_FIELDS.to_string()),
            time_range.query_param(),
            ("level", args.level),
        ];
        if let Some(breakdown) = non_empty(args.breakdown) {
            params.push(("breakdowns", breakdown));
        }

        let data = ctx.get(&format!("{object_id}/insights"), &params).await?;
        Ok(ToolOutput::Json(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::context;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_time_range_query_param() {
        assert_eq!(
            TimeRange::default().query_param(),
            ("date_preset", "maximum".to_string())
        );
        let custom: TimeRange =
            serde_json::from_value(json!({"since": "2024-01-01", "until": "2024-01-31"})).unwrap();
        assert_eq!(
            custom.query_param(),
            (
                "time_range",
                r#"{"since":"2024-01-01","until":"2024-01-31"}"#.to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_insights_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/c1/insights"))
            .and(query_param("date_preset", "maximum"))
            .and(query_param("level", "ad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"spend": "12.50"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let output = GetInsightsTool
            .execute(json!({"object_id": "c1"}), &context(&server))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"data": [{"spend": "12.50"}]})));
    }

    #[tokio::test]
    async fn test_insights_custom_range_and_breakdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/act_1/insights"))
            .and(query_param(
                "time_range",
                r#"{"since":"2024-03-01","until":"2024-03-07"}"#,
            ))
            .and(query_param("breakdowns", "age"))
            .and(query_param("level", "campaign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        GetInsightsTool
            .execute(
                json!({
                    "object_id": "act_1",
                    "time_range": {"since": "2024-03-01", "until": "2024-03-07"},
                    "breakdown": "age",
                    "level": "campaign"
                }),
                &context(&server),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insights_bad_time_range() {
        let server = MockServer::start().await;
        let err = GetInsightsTool
            .execute(
                json!({"object_id": "c1", "time_range": {"since": "2024-03-01"}}),
                &context(&server),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
