//! Ad account tools.

use super::{default_limit, ensure_act_prefix, missing_id, non_empty, parse_args, schema};
use crate::{Tool, ToolContext, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const ACCOUNT_LIST_FIELDS: &str = "id,name,account_id,account_status,amount_spent,balance,currency,age,business_city,business_country_code";

const ACCOUNT_INFO_FIELDS: &str = "id,name,account_id,account_status,amount_spent,balance,currency,age,funding_source_details,business_city,business_country_code,timezone_name,owner";

fn default_user() -> String {
    "me".to_string()
}

#[derive(Debug, Deserialize)]
struct AdAccountsArgs {
    #[serde(default = "default_user")]
    user_id: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

/// List the ad accounts a user can access.
pub struct GetAdAccountsTool;

#[async_trait]
impl Tool for GetAdAccountsTool {
    fn id(&self) -> &str {
        "get_ad_accounts"
    }

    fn description(&self) -> &str {
        "Get ad accounts accessible by a user."
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "user_id": {
                    "type": "string",
                    "description": "Meta user ID or \"me\" for the current user",
                    "default": "me"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of accounts to return",
                    "default": 10
                }
            }),
            &[],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AdAccountsArgs = parse_args(args)?;
        let user_id = non_empty(Some(args.user_id)).unwrap_or_else(default_user);

        let data = ctx
            .get(
                &format!("{user_id}/adaccounts"),
                &[
                    ("fields", ACCOUNT_LIST_FIELDS.to_string()),
                    ("limit", args.limit.to_string()),
                ],
            )
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

#[derive(Debug, Deserialize)]
struct AccountInfoArgs {
    #[serde(default)]
    account_id: Option<String>,
}

/// Details of one ad account.
pub struct GetAccountInfoTool;

#[async_trait]
impl Tool for GetAccountInfoTool {
    fn id(&self) -> &str {
        "get_account_info"
    }

    fn description(&self) -> &str {
        "Get detailed information about a specific ad account."
    }

    fn parameters_schema(&self) -> Value {
        schema(
            json!({
                "account_id": {
                    "type": "string",
                    "description": "Meta Ads account ID (format: act_XXXXXXXXX; the prefix is added if missing)"
                }
            }),
            &["account_id"],
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: AccountInfoArgs = parse_args(args)?;
        let Some(account_id) = non_empty(args.account_id) else {
            return Ok(missing_id("account"));
        };

        let data = ctx
            .get(
                &ensure_act_prefix(&account_id),
                &[("fields", ACCOUNT_INFO_FIELDS.to_string())],
            )
            .await?;
        Ok(ToolOutput::Json(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::context;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_ad_accounts_defaults_to_me() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/me/adaccounts"))
            .and(query_param("limit", "10"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"id": "act_1", "name": "Main"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let output = GetAdAccountsTool
            .execute(json!({}), &context(&server))
            .await
            .unwrap();
        assert_eq!(
            output,
            ToolOutput::Json(json!({"data": [{"id": "act_1", "name": "Main"}]}))
        );
    }

    #[tokio::test]
    async fn test_account_info_adds_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v22.0/act_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "act_123"})))
            .expect(1)
            .mount(&server)
            .await;

        let output = GetAccountInfoTool
            .execute(json!({"account_id": "123"}), &context(&server))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Json(json!({"id": "act_123"})));
    }

    #[tokio::test]
    async fn test_account_info_requires_id() {
        let server = MockServer::start().await;
        let output = GetAccountInfoTool
            .execute(json!({}), &context(&server))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::error("No account ID provided"));
    }
}
