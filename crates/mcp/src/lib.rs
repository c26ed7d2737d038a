// MCP (Model Context Protocol) server for the ORATS Data API
// Exposes the ORATS tool catalog to agent clients over stdio or HTTP

pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stdio;

pub use dispatch::CallDispatcher;
pub use error::{McpError, McpResult};
pub use server::{McpServer, SERVER_NAME};
pub use stdio::StdioTransport;
