//! Meta Ads tool implementations.

pub mod accounts;
pub mod ads;
pub mod adsets;
pub mod campaigns;
pub mod debug;
pub mod insights;
pub mod media;

use crate::{BoxedTool, ToolContext, ToolError, ToolOutput, ToolResult};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

/// Default page size for listing tools.
pub(crate) const DEFAULT_LIMIT: u32 = 10;

pub(crate) fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

pub(crate) fn default_paused() -> String {
    "PAUSED".to_string()
}

/// All Graph-backed tools, in the order they are listed to clients.
pub fn all_tools() -> Vec<BoxedTool> {
    vec![
        Arc::new(accounts::GetAdAccountsTool),
        Arc::new(accounts::GetAccountInfoTool),
        Arc::new(campaigns::GetCampaignsTool),
        Arc::new(campaigns::GetCampaignDetailsTool),
        Arc::new(campaigns::CreateCampaignTool),
        Arc::new(adsets::GetAdsetsTool),
        Arc::new(adsets::GetAdsetDetailsTool),
        Arc::new(adsets::CreateAdsetTool),
        Arc::new(adsets::UpdateAdsetTool),
        Arc::new(ads::GetAdsTool),
        Arc::new(ads::GetAdDetailsTool),
        Arc::new(ads::GetAdCreativesTool),
        Arc::new(ads::GetAdImageTool),
        Arc::new(insights::GetInsightsTool),
        Arc::new(debug::DebugImageDownloadTool),
    ]
}

/// Deserialize tool arguments.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> ToolResult<T> {
    serde_json::from_value(args).map_err(|e| ToolError::validation(e.to_string()))
}

/// Treat empty strings like missing values.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Account ids are addressed as `act_<id>` in the Graph API.
pub(crate) fn ensure_act_prefix(account_id: &str) -> String {
    if account_id.starts_with("act_") {
        account_id.to_string()
    } else {
        format!("act_{account_id}")
    }
}

/// `{"error": "No <thing> ID provided"}`.
pub(crate) fn missing_id(thing: &str) -> ToolOutput {
    ToolOutput::error(format!("No {thing} ID provided"))
}

/// Use the given account, or fall back to the user's first ad account.
pub(crate) async fn resolve_account_id(
    ctx: &ToolContext,
    account_id: Option<String>,
) -> ToolResult<Option<String>> {
    if let Some(id) = non_empty(account_id) {
        return Ok(Some(ensure_act_prefix(&id)));
    }

    let accounts = ctx
        .get(
            "me/adaccounts",
            &[("fields", "id".to_string()), ("limit", "1".to_string())],
        )
        .await?;

    Ok(accounts["data"]
        .get(0)
        .and_then(|account| account["id"].as_str())
        .map(str::to_string))
}

pub(crate) fn no_account_found() -> ToolOutput {
    ToolOutput::error("No account ID specified and no accounts found for user")
}

/// Form encoding for Graph API POSTs: strings as-is, everything else as JSON.
pub(crate) fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collect the non-null entries of `fields` into a form body.
pub(crate) fn form_fields(fields: &[(&str, Option<&Value>)]) -> Vec<(String, String)> {
    fields
        .iter()
        .filter_map(|(name, value)| {
            value
                .filter(|v| !v.is_null())
                .map(|v| (name.to_string(), form_value(v)))
        })
        .collect()
}

/// Build an object schema that also accepts the optional `access_token`.
pub(crate) fn schema(mut properties: Value, required: &[&str]) -> Value {
    if let Some(props) = properties.as_object_mut() {
        props.insert(
            "access_token".to_string(),
            json!({
                "type": "string",
                "description": "Meta API access token (optional - the cached token is used if not provided)"
            }),
        );
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
