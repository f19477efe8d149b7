//! MCP Federation Gateway: merges the built-in container MCP with registered remote HTTP/SSE
//! MCPs and user-defined stdio commands behind one `tools/list`/`tools/call` surface (§4.7).

pub mod header_injector;
pub mod http_source;
pub mod router;
pub mod sse_source;
pub mod stdio_source;

pub use header_injector::HeaderInjector;
pub use http_source::HttpMcpSource;
pub use router::{FederatedTool, FederationRouter};
pub use sse_source::SseMcpSource;
pub use stdio_source::StdioSource;
