//! Ad set tools.

use super::{
    default_limit, default_paused, ensure_act_prefix, form_fields, missing_id, no_account_found,
    non_empty, parse_args, resolve_account_id, schema,
};
use crate::{Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const ADSET_LIST_FIELDS: &str = "id,name,campaign_id,status,daily_budget,lifetime_budget,targeting,bid_amount,bid_strategy,optimization_goal,billing_event,start_time,end_time,created_time,updated_time";

const ADSET_DETAIL_FIELDS: &str = "id,name,campaign_id,status,daily_budget,lifetime_budget,targeting,bid_amount,bid_strategy,optimization_goal,billing_event,start_time,end_time,created_time,updated_time,attribution_spec,destination_type,promoted_object,pacing_type,budget_remaining,frequency_control_specs";

/// Fields `update_adset` forwards to Meta.
const UPDATABLE_FIELDS: &[&str] = &[
    "bid_strategy",
    "bid_amount",
    "frequency_control_specs",
    "status",
    "targeting",
    "optimization_goal",
    "daily_budget",
    "lifetime_budget",
];

#[derive(Debug, Deserialize)]
struct AdsetsArgs {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    campaign_id: Option<String>,
}

/// List ad sets of an account or campaign.
pub struct GetAdsetsTool;

#[async_trait]
impl Tool for GetAdsetsTool {
    fn id(&self) -> &str {
        "get_adsets"
    }

    fn description(&self) -> &str {
        r#"Get ad sets for a Meta Ads account with optional filtering by campaign.

- With campaign_id, only that campaign's ad sets are returned
- Without account_id or campaign_id, the first ad account of the current user is used"#
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
                    "description": "Maximum number of ad sets to return",
                    "default": 10
                },
                "campaign_id": {
                    "type": "string",
                    "description": "Optional campaign ID to filter by"
                }
            }),
            &[],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdsetsArgs = parse_args(args)?;

        let parent = match non_empty(args.campaign_id) {
            Some(campaign_id) => campaign_id,
            None => match resolve_account_id(ctx, args.account_id).await? {
                Some(account_id) => account_id,
                None => return Ok(no_account_found()),
            },
        };

        let data = ctx
            .get(
                &format!("{parent}/adsets"),
                &[
                    ("fields", ADSET_LIST_FIELDS.to_string()),
                    ("limit", args.limit.to_string()),
                ],
            )
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct AdsetDetailsArgs {
    #[serde(default)]
    adset_id: Option<String>,
}

/// Details of one ad set.
pub struct GetAdsetDetailsTool;

#[async_trait]
impl Tool for GetAdsetDetailsTool {
    fn id(&self) -> &str {
        "get_adset_details"
    }

    fn description(&self) -> &str {
        "Get detailed information about a specific ad set."
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "adset_id": {
                    "type": "string",
                    "description": "Meta Ads ad set ID"
                }
            }),
            &["adset_id"],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdsetDetailsArgs = parse_args(args)?;
        let Some(adset_id) = non_empty(args.adset_id) else {
            return Ok(missing_id("ad set"));
        };

        let data = ctx
            .get(&adset_id, &[("fields", ADSET_DETAIL_FIELDS.to_string())])
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct CreateAdsetArgs {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    optimization_goal: Option<String>,
    #[serde(default)]
    billing_event: Option<String>,
    #[serde(default = "default_paused")]
    status: String,
    #[serde(default)]
    daily_budget: Option<Value>,
    #[serde(default)]
    lifetime_budget: Option<Value>,
    #[serde(default)]
    targeting: Option<Value>,
    #[serde(default)]
    bid_amount: Option<Value>,
    #[serde(default)]
    bid_strategy: Option<Value>,
    #[serde(default)]
    start_time: Option<Value>,
    #[serde(default)]
    end_time: Option<Value>,
}

/// Create an ad set inside a campaign.
pub struct CreateAdsetTool;

#[async_trait]
impl Tool for CreateAdsetTool {
    fn id(&self) -> &str {
        "create_adset"
    }

    fn description(&self) -> &str {
        r#"Create a new ad set in a Meta Ads account.

- Ad sets are created PAUSED unless another status is given
- targeting is a Meta targeting spec object (e.g. {"geo_locations": {"countries": ["US"]}})"#
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "account_id": {
                    "type": "string",
                    "description": "Meta Ads account ID (format: act_XXXXXXXXX)"
                },
                "campaign_id": {
                    "type": "string",
                    "description": "Campaign the ad set belongs to"
                },
                "name": {
                    "type": "string",
                    "description": "Ad set name"
                },
                "optimization_goal": {
                    "type": "string",
                    "description": "Optimization goal (e.g. 'LINK_CLICKS', 'REACH')"
                },
                "billing_event": {
                    "type": "string",
                    "description": "Billing event (e.g. 'IMPRESSIONS')"
                },
                "status": {
                    "type": "string",
                    "description": "Initial ad set status",
                    "default": "PAUSED"
                },
                "daily_budget": {
                    "type": "integer",
                    "description": "Daily budget in minor currency units"
                },
                "lifetime_budget": {
                    "type": "integer",
                    "description": "Lifetime budget in minor currency units"
                },
                "targeting": {
                    "type": "object",
                    "description": "Targeting specification"
                },
                "bid_amount": {
                    "type": "integer",
                    "description": "Bid amount in minor currency units"
                },
                "bid_strategy": {
                    "type": "string",
                    "description": "Bid strategy (e.g. 'LOWEST_COST_WITH_BID_CAP')"
                },
                "start_time": {
                    "type": "string",
                    "description": "Start time (ISO 8601)"
                },
                "end_time": {
                    "type": "string",
                    "description": "End time (ISO 8601)"
                }
            }),
            &[
                "account_id",
                "campaign_id",
                "name",
                "optimization_goal",
                "billing_event",
            ],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: CreateAdsetArgs = parse_args(args)?;
        let Some(account_id) = non_empty(args.account_id) else {
            return Ok(missing_id("account"));
        };
        let Some(campaign_id) = non_empty(args.campaign_id) else {
            return Ok(missing_id("campaign"));
        };
        let name = non_empty(args.name).ok_or_else(|| ToolError::validation("name is required"))?;
        let optimization_goal = non_empty(args.optimization_goal)
            .ok_or_else(|| ToolError::validation("optimization_goal is required"))?;
        let billing_event = non_empty(args.billing_event)
            .ok_or_else(|| ToolError::validation("billing_event is required"))?;

        let mut form = vec![
            ("campaign_id".to_string(), campaign_id),
            ("name".to_string(), name),
            ("optimization_goal".to_string(), optimization_goal),
            ("billing_event".to_string(), billing_event),
            ("status".to_string(), args.status),
        ];
        form.extend(form_fields(&[
            ("daily_budget", args.daily_budget.as_ref()),
            ("lifetime_budget", args.lifetime_budget.as_ref()),
            ("targeting", args.targeting.as_ref()),
            ("bid_amount", args.bid_amount.as_ref()),
            ("bid_strategy", args.bid_strategy.as_ref()),
            ("start_time", args.start_time.as_ref()),
            ("end_time", args.end_time.as_ref()),
        ]));

        let account_id = ensure_act_prefix(&account_id);
        let data = ctx.post(&format!("{account_id}/adsets"), &form).await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct UpdateAdsetArgs {
    #[serde(default)]
    adset_id: Option<String>,
    #[serde(default)]
    confirm: bool,
    #[serde(flatten)]
    changes: Map<String, Value>,
}

/// Update bidding, budget, targeting or status of an ad set.
pub struct UpdateAdsetTool;

#[async_trait]
impl Tool for UpdateAdsetTool {
    fn id(&self) -> &str {
        "update_adset"
    }

    fn description(&self) -> &str {
        r#"Update an existing ad set, including frequency caps.

- At least one of the update fields must be given
- Without confirm, nothing is changed: the current details and proposed changes are returned for the user to review
- Call again with the same fields and confirm set to true only after the user approves
- frequency_control_specs is a list like [{"event": "IMPRESSIONS", "interval_days": 7, "max_frequency": 3}]"#
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "adset_id": {
                    "type": "string",
                    "description": "Meta Ads ad set ID"
                },
                "bid_strategy": {
                    "type": "string",
                    "description": "Bid strategy (e.g. 'LOWEST_COST_WITH_BID_CAP')"
                },
                "bid_amount": {
                    "type": "integer",
                    "description": "Bid amount in minor currency units (cents for USD)"
                },
                "frequency_control_specs": {
                    "type": "array",
                    "items": { "type": "object" },
                    "description": "Frequency control specifications"
                },
                "status": {
                    "type": "string",
                    "description": "New status (ACTIVE, PAUSED, ...)"
                },
                "targeting": {
                    "type": "object",
                    "description": "Replacement targeting specification"
                },
                "optimization_goal": {
                    "type": "string",
                    "description": "Optimization goal"
                },
                "daily_budget": {
                    "type": "integer",
                    "description": "Daily budget in minor currency units"
                },
                "lifetime_budget": {
                    "type": "integer",
                    "description": "Lifetime budget in minor currency units"
                },
                "confirm": {
                    "type": "boolean",
                    "description": "Apply the changes. Set only after the user approved them",
                    "default": false
                }
            }),
            &["adset_id"],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: UpdateAdsetArgs = parse_args(args)?;
        let Some(adset_id) = non_empty(args.adset_id) else {
            return Ok(missing_id("ad set"));
        };

        let changes: Map<String, Value> = UPDATABLE_FIELDS
            .iter()
            .filter_map(|name| {
                args.changes
                    .get(*name)
                    .filter(|v| !v.is_null())
                    .map(|v| (name.to_string(), v.clone()))
            })
            .collect();
        if changes.is_empty() {
            return Ok(ToolOutput::error("No update parameters provided"));
        }

        if !args.confirm {
            let current = ctx
                .get(&adset_id, &[("fields", ADSET_DETAIL_FIELDS.to_string())])
                .await?;
            return Ok(ToolOutput::Json(json!({
                "message": "Please confirm the ad set update",
                "adset_id": adset_id,
                "current_details": current,
                "proposed_changes": changes,
                "instructions_for_llm": "Show the current details and the proposed changes to the user. \
                    Nothing has been changed yet. Only after the user approves, call update_adset again \
                    with the same fields and confirm set to true.",
            })));
        }

        let fields: Vec<(&str, Option<&Value>)> = changes
            .iter()
            .map(|(name, value)| (name.as_str(), Some(value)))
            .collect();
        let data = ctx.post(&adset_id, &form_fields(&fields)).await?;
        Ok(ToolOutput::Json(data))
    }
}
