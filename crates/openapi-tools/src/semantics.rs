//! MCP tool annotations derived from HTTP method semantics (RFC 9110).

use crate::route_map::HttpMethod;
use rmcp::model::ToolAnnotations;

/// Build `ToolAnnotations` for an operation.
///
/// `openWorldHint` is always `true`: every tool talks to the upstream API. PATCH may or may not be
/// idempotent, so that hint is left unset.
#[must_use]
pub fn annotations_for_method(method: HttpMethod, title: Option<String>) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match method {
        HttpMethod::Get | HttpMethod::Head | HttpMethod::Options | HttpMethod::Trace => {
            (true, false, Some(true))
        }
        HttpMethod::Post => (false, false, Some(false)),
        HttpMethod::Put | HttpMethod::Delete => (false, true, Some(true)),
        HttpMethod::Patch => (false, true, None),
    };

    ToolAnnotations {
        title,
        read_only_hint: Some(read_only),
        destructive_hint: Some(destructive),
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}
