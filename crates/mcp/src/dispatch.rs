// Tool call dispatch: catalog lookup, upstream fetch, result envelope

use crate::protocol::{CallToolResult, ToolSchema};
use orats_core::{OratsResult, QueryParams, ToolCatalog, Upstream};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes `tools/call` requests against the upstream API.
///
/// Failures never escape as protocol errors: every outcome is a [`CallToolResult`], with
/// `isError` set when the call failed.
pub struct CallDispatcher {
    catalog: ToolCatalog,
    upstream: Arc<dyn Upstream>,
}

impl CallDispatcher {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self::with_catalog(ToolCatalog::orats(), upstream)
    }

    pub fn with_catalog(catalog: ToolCatalog, upstream: Arc<dyn Upstream>) -> Self {
        Self { catalog, upstream }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// List all tool schemas, in catalog order.
    pub fn list_tools(&self) -> Vec<ToolSchema> {
        self.catalog.list_tools().iter().map(ToolSchema::from).collect()
    }

    pub async fn dispatch(&self, name: &str, arguments: &Value) -> CallToolResult {
        match self.execute(name, arguments).await {
            Ok(value) => match serde_json::to_string_pretty(&value) {
                Ok(text) => CallToolResult::text(text),
                Err(e) => CallToolResult::error(e.to_string()),
            },
            Err(e) => {
                warn!(tool = name, kind = ?e.kind(), error = %e, "Tool call failed");
                CallToolResult::error(e.to_string())
            }
        }
    }

    async fn execute(&self, name: &str, arguments: &Value) -> OratsResult<Value> {
        let endpoint = self.catalog.resolve_endpoint(name)?;

        // Required parameters are not enforced here; upstream reports what it rejects.
        if let (Some(tool), Some(args)) = (self.catalog.get(name), arguments.as_object()) {
            let missing = tool.missing_required(args);
            if !missing.is_empty() {
                debug!(tool = name, ?missing, "Forwarding call with missing required parameters");
            }
        }

        let params = to_query_params(arguments);
        self.upstream.fetch(endpoint, &params).await
    }
}

/// Flatten tool arguments into string query parameters.
///
/// Strings pass through verbatim, other scalars use their JSON text, arrays are joined
/// with commas and nulls are dropped.
pub fn to_query_params(arguments: &Value) -> QueryParams {
    let Some(args) = arguments.as_object() else {
        return QueryParams::new();
    };

    args.iter()
        .filter_map(|(key, value)| param_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn param_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(param_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}
