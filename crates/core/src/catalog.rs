//! Static catalog of ORATS tools.
//!
//! Every tool maps one-to-one onto a read-only GET endpoint of the Data API. The table is
//! fixed at compile time and listed in declaration order.

use crate::error::{OratsError, OratsResult};
use serde_json::{Map, Value};

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
        }
    }
}

/// A single declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn required(name: &'static str, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::String,
        required: true,
        description,
    }
}

const fn optional(name: &'static str, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::String,
        required: false,
        description,
    }
}

const TICKER: ParamSpec = required("ticker", "Stock ticker symbol");
const TRADE_DATE: ParamSpec = required("tradeDate", "Trade date (YYYY-MM-DD)");
const FIELDS: ParamSpec = optional("fields", "Comma-separated list of fields to return");
const DTE: ParamSpec = optional("dte", "Days to expiration range, e.g. 30,45");
const DELTA: ParamSpec = optional("delta", "Delta range, e.g. .30,.45");

/// A tool exposed to clients, bound to one upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// Endpoint path appended to the upstream base URL.
    pub endpoint: &'static str,
    pub params: &'static [ParamSpec],
}

impl ToolDefinition {
    /// JSON Schema advertised for the tool's arguments.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in self.params {
            properties.insert(
                param.name.to_string(),
                json_schema_typed(param.kind.as_str(), param.description),
            );
        }

        json_schema_object(Value::Object(properties), self.required_params().collect())
    }

    pub fn required_params(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().filter(|p| p.required).map(|p| p.name)
    }

    /// Required parameters that are absent, null or empty in `args`.
    pub fn missing_required(&self, args: &Map<String, Value>) -> Vec<&'static str> {
        self.required_params()
            .filter(|name| match args.get(*name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            })
            .collect()
    }
}

static TOOLS: [ToolDefinition; 26] = [
    ToolDefinition {
        name: "live_strikes",
        description: "Get live options strikes data for a ticker",
        endpoint: "/live/strikes",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "live_strikes_by_expiry",
        description: "Get live options strikes for specific expiration",
        endpoint: "/live/strikes/monthly",
        params: &[TICKER, required("expiry", "YYYY-MM-DD")],
    },
    ToolDefinition {
        name: "live_strikes_by_opra",
        description: "Get live options by OPRA symbol(s)",
        endpoint: "/live/strikes/options",
        params: &[required("tickers", "Comma-separated OPRA symbols")],
    },
    ToolDefinition {
        name: "live_expirations",
        description: "Get available expiration dates",
        endpoint: "/live/expirations",
        params: &[
            TICKER,
            optional("include", "Set to true to include strikes for each expiration"),
        ],
    },
    ToolDefinition {
        name: "live_monies_implied",
        description: "Get live implied volatility monies data",
        endpoint: "/live/monies/implied",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "live_monies_forecast",
        description: "Get live forecast monies data",
        endpoint: "/live/monies/forecast",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "live_summaries",
        description: "Get live summary data including IV rank",
        endpoint: "/live/summaries",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "tickers",
        description: "Get list of available tickers",
        endpoint: "/tickers",
        params: &[optional("ticker", "Stock ticker symbol")],
    },
    ToolDefinition {
        name: "strikes",
        description: "Get options strikes data (delayed)",
        endpoint: "/strikes",
        params: &[TICKER, FIELDS, DTE, DELTA],
    },
    ToolDefinition {
        name: "monies_implied",
        description: "Get implied volatility monies (delayed)",
        endpoint: "/monies/implied",
        params: &[TICKER, FIELDS],
    },
    ToolDefinition {
        name: "monies_forecast",
        description: "Get forecast monies (delayed)",
        endpoint: "/monies/forecast",
        params: &[TICKER, FIELDS],
    },
    ToolDefinition {
        name: "summaries",
        description: "Get summary data (delayed)",
        endpoint: "/summaries",
        params: &[TICKER, FIELDS],
    },
    ToolDefinition {
        name: "cores",
        description: "Get core data (price, earnings, dividends)",
        endpoint: "/cores",
        params: &[TICKER, FIELDS],
    },
    ToolDefinition {
        name: "ivrank",
        description: "Get IV rank and percentile data",
        endpoint: "/ivrank",
        params: &[TICKER, FIELDS],
    },
    ToolDefinition {
        name: "hist_strikes",
        description: "Get historical options strikes",
        endpoint: "/hist/strikes",
        params: &[TICKER, TRADE_DATE, FIELDS, DTE, DELTA],
    },
    ToolDefinition {
        name: "hist_monies_implied",
        description: "Get historical implied monies",
        endpoint: "/hist/monies/implied",
        params: &[TICKER, TRADE_DATE, FIELDS],
    },
    ToolDefinition {
        name: "hist_summaries",
        description: "Get historical summaries",
        endpoint: "/hist/summaries",
        params: &[TICKER, TRADE_DATE, FIELDS],
    },
    ToolDefinition {
        name: "hist_cores",
        description: "Get historical core data",
        endpoint: "/hist/cores",
        params: &[TICKER, TRADE_DATE, FIELDS],
    },
    ToolDefinition {
        name: "hist_dailies",
        description: "Get historical daily prices",
        endpoint: "/hist/dailies",
        params: &[TICKER, TRADE_DATE, FIELDS],
    },
    ToolDefinition {
        name: "hist_hvs",
        description: "Get historical volatility data",
        endpoint: "/hist/hvs",
        params: &[TICKER, TRADE_DATE, FIELDS],
    },
    ToolDefinition {
        name: "hist_earnings",
        description: "Get earnings history",
        endpoint: "/hist/earnings",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "hist_splits",
        description: "Get stock split history",
        endpoint: "/hist/splits",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "hist_ivrank",
        description: "Get historical IV rank",
        endpoint: "/hist/ivrank",
        params: &[TICKER, TRADE_DATE, FIELDS],
    },
    ToolDefinition {
        name: "live_intraday_strikes_chain",
        description: "Get live 1-min intraday chain",
        endpoint: "/live/one-minute/strikes/chain",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "live_intraday_monies_implied",
        description: "Get live 1-min implied monies",
        endpoint: "/live/one-minute/monies/implied",
        params: &[TICKER],
    },
    ToolDefinition {
        name: "live_intraday_summaries",
        description: "Get live 1-min summaries",
        endpoint: "/live/one-minute/summaries",
        params: &[TICKER],
    },
];

/// Read-only lookup over the tool table.
#[derive(Debug, Clone, Copy)]
pub struct ToolCatalog {
    tools: &'static [ToolDefinition],
}

impl ToolCatalog {
    /// The ORATS Data API catalog.
    pub fn orats() -> Self {
        Self { tools: &TOOLS }
    }

    /// All tools in declaration order.
    pub fn list_tools(&self) -> &'static [ToolDefinition] {
        self.tools
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&'static ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn resolve_endpoint(&self, name: &str) -> OratsResult<&'static str> {
        self.get(name)
            .map(|t| t.endpoint)
            .ok_or_else(|| OratsError::UnknownTool(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::orats()
    }
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn json_schema_typed(kind: &str, description: &str) -> Value {
    serde_json::json!({
        "type": kind,
        "description": description
    })
}
