// Core types and functionality for the ORATS MCP server

pub mod catalog;
pub mod config;
pub mod error;
pub mod upstream;

pub use catalog::{ParamKind, ParamSpec, ToolCatalog, ToolDefinition};
pub use config::UpstreamConfig;
pub use error::{ErrorKind, OratsError, OratsResult};
pub use upstream::{QueryParams, Upstream, UpstreamClient};
