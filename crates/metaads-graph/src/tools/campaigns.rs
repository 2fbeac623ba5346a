//! Campaign tools.

use super::{
    default_limit, default_paused, ensure_act_prefix, form_fields, missing_id, no_account_found,
    non_empty, parse_args, resolve_account_id, schema,
};
use crate::{Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const CAMPAIGN_LIST_FIELDS: &str = "id,name,objective,status,daily_budget,lifetime_budget,buying_type,start_time,stop_time,created_time,updated_time,bid_strategy";

const CAMPAIGN_DETAIL_FIELDS: &str = "id,name,objective,status,daily_budget,lifetime_budget,buying_type,start_time,stop_time,created_time,updated_time,bid_strategy,special_ad_categories,special_ad_category_country,budget_remaining,configured_status";

#[derive(Debug, Deserialize)]
struct CampaignsArgs {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    status_filter: Option<String>,
}

/// List campaigns of an ad account.
pub struct GetCampaignsTool;

#[async_trait]
impl Tool for GetCampaignsTool {
    fn id(&self) -> &str {
        "get_campaigns"
    }

    fn description(&self) -> &str {
        r#"Get campaigns for a Meta Ads account with optional filtering.

- Without account_id, the first ad account of the current user is used
- status_filter restricts results by effective status (e.g. 'ACTIVE', 'PAUSED')"#
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
                    "description": "Maximum number of campaigns to return",
                    "default": 10
                },
                "status_filter": {
                    "type": "string",
                    "description": "Filter by effective status (e.g. 'ACTIVE', 'PAUSED')"
                }
            }),
            &[],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: CampaignsArgs = parse_args(args)?;
        let Some(account_id) = resolve_account_id(ctx, args.account_id).await? else {
            return Ok(no_account_found());
        };

        let mut params = vec![
            ("fields", CAMPAIGN_LIST_FIELDS.to_string()),
            ("limit", args.limit.to_string()),
        ];
        if let Some(status) = non_empty(args.status_filter) {
            params.push(("effective_status", json!([status]).to_string()));
        }

        let data = ctx.get(&format!("{account_id}/campaigns"), &params).await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct CampaignDetailsArgs {
    #[serde(default)]
    campaign_id: Option<String>,
}

/// Details of one campaign.
pub struct GetCampaignDetailsTool;

#[async_trait]
impl Tool for GetCampaignDetailsTool {
    fn id(&self) -> &str {
        "get_campaign_details"
    }

    fn description(&self) -> &str {
        "Get detailed information about a specific campaign."
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "campaign_id": {
                    "type": "string",
                    "description": "Meta Ads campaign ID"
                }
            }),
            &["campaign_id"],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: CampaignDetailsArgs = parse_args(args)?;
        let Some(campaign_id) = non_empty(args.campaign_id) else {
            return Ok(missing_id("campaign"));
        };

        let data = ctx
            .get(&campaign_id, &[("fields", CAMPAIGN_DETAIL_FIELDS.to_string())])
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct CreateCampaignArgs {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    objective: Option<String>,
    #[serde(default = "default_paused")]
    status: String,
    #[serde(default)]
    special_ad_categories: Vec<String>,
    #[serde(default)]
    daily_budget: Option<Value>,
    #[serde(default)]
    lifetime_budget: Option<Value>,
    #[serde(default)]
    buying_type: Option<Value>,
    #[serde(default)]
    bid_strategy: Option<Value>,
}

/// Create a campaign.
pub struct CreateCampaignTool;

#[async_trait]
impl Tool for CreateCampaignTool {
    fn id(&self) -> &str {
        "create_campaign"
    }

    fn description(&self) -> &str {
        r#"Create a new campaign in a Meta Ads account.

- Campaigns are created PAUSED unless another status is given
- Budgets are in the account currency's minor unit (cents for USD)"#
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "account_id": {
                    "type": "string",
                    "description": "Meta Ads account ID (format: act_XXXXXXXXX)"
                },
                "name": {
                    "type": "string",
                    "description": "Campaign name"
                },
                "objective": {
                    "type": "string",
                    "description": "Campaign objective (e.g. OUTCOME_AWARENESS, OUTCOME_TRAFFIC, OUTCOME_SALES)"
                },
                "status": {
                    "type": "string",
                    "description": "Initial campaign status",
                    "default": "PAUSED"
                },
                "special_ad_categories": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Special ad categories (empty when none apply)"
                },
                "daily_budget": {
                    "type": "integer",
                    "description": "Daily budget in minor currency units"
                },
                "lifetime_budget": {
                    "type": "integer",
                    "description": "Lifetime budget in minor currency units"
                },
                "buying_type": {
                    "type": "string",
                    "description": "Buying type (e.g. 'AUCTION')"
                },
                "bid_strategy": {
                    "type": "string",
                    "description": "Bid strategy (e.g. 'LOWEST_COST_WITHOUT_CAP')"
                }
            }),
            &["account_id", "name", "objective"],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: CreateCampaignArgs = parse_args(args)?;
        let Some(account_id) = non_empty(args.account_id) else {
            return Ok(missing_id("account"));
        };
        let name = non_empty(args.name)
            .ok_or_else(|| ToolError::validation("name is required"))?;
        let objective = non_empty(args.objective)
            .ok_or_else(|| ToolError::validation("objective is required"))?;

        let mut form = vec![
            ("name".to_string(), name),
            ("objective".to_string(), objective),
            ("status".to_string(), args.status),
            (
                "special_ad_categories".to_string(),
                json!(args.special_ad_categories).to_string(),
            ),
        ];
        form.extend(form_fields(&[
            ("daily_budget", args.daily_budget.as_ref()),
            ("lifetime_budget", args.lifetime_budget.as_ref()),
            ("buying_type", args.buying_type.as_ref()),
            ("bid_strategy", args.bid_strategy.as_ref()),
        ]));

        let account_id = ensure_act_prefix(&account_id);
        let data = ctx.post(&format!("{account_id}/campaigns"), &form).await?;
        Ok(ToolOutput::Json(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::context;
    use crate::GraphError;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_status_filter_becomes_effective_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/act_9/campaigns"))
            .and(query_param("effective_status", r#"["ACTIVE"]"#))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        GetCampaignsTool
            .execute(
                json!({"account_id": "act_9", "limit": 5, "status_filter": "ACTIVE"}),
                &context(&server),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_account_used_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/me/adaccounts"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "act_77"}]})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v22.0/act_77/campaigns"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "c1"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let output = GetCampaignsTool
            .execute(json!({}), &context(&server))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"data": [{"id": "c1"}]})));
    }

    #[tokio::test]
    async fn test_no_accounts_for_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/me/adaccounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let output = GetCampaignsTool
            .execute(json!({}), &context(&server))
            .await
            .unwrap();
        assert_eq!(
            output,
            ToolOutput::error("No account ID specified and no accounts found for user")
        );
    }

    #[tokio::test]
    async fn test_campaign_details_remote_error_passthrough() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/404"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Unsupported get request", "type": "GraphMethodException", "code": 100, "error_subcode": 33}
            })))
            .mount(&server)
            .await;

        let err = GetCampaignDetailsTool
            .execute(json!({"campaign_id": "404"}), &context(&server))
            .await
            .unwrap_err();
        match err {
            ToolError::Graph(GraphError::Remote { status, code, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(100));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_campaign_posts_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v22.0/act_1/campaigns"))
            .and(body_string_contains("status=PAUSED"))
            .and(body_string_contains("special_ad_categories=%5B%5D"))
            .and(body_string_contains("daily_budget=1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c42"})))
            .expect(1)
            .mount(&server)
            .await;

        let output = CreateCampaignTool
            .execute(
                json!({"account_id": "1", "name": "Launch", "objective": "OUTCOME_TRAFFIC", "daily_budget": 1000}),
                &context(&server),
            )
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"id": "c42"})));
    }

    #[tokio::test]
    async fn test_create_campaign_requires_name() {
        let server = MockServer::start().await;
        let err = CreateCampaignTool
            .execute(
                json!({"account_id": "act_1", "objective": "OUTCOME_TRAFFIC"}),
                &context(&server),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
