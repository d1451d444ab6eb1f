//! OpenAPI-backed tools — parses an OpenAPI v3 document, projects its
//! operations into tool definitions, and invokes the REST endpoints with
//! static or per-request authentication.

pub mod document;
pub mod provider;

pub use document::OpenApiDocument;
pub use provider::{OpenApiToolProvider, GENERIC_HTTP_TOOL_NAME};
