//! Route maps: ordered include/exclude rules deciding which `OpenAPI` operations become tools.
//!
//! Rules are evaluated top to bottom and the first rule that matches an operation decides its
//! fate. Operations that match no rule are included.
//!
//! ```yaml
//! route_maps:
//!   - methods: [POST, PUT, DELETE]
//!     mcp_type: EXCLUDE
//!   - methods: "*"
//!     pattern: "^/api/internal/"
//!     mcp_type: EXCLUDE
//! ```

use crate::error::{OpenApiToolsError, Result};
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// HTTP verbs a route rule can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Trace,
    ];

    /// Verbs that modify state on the upstream API.
    pub const MUTATING: [HttpMethod; 4] = [
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    #[must_use]
    pub fn to_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Options => Method::OPTIONS,
            HttpMethod::Trace => Method::TRACE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid HTTP method: {s}"))
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(value: HttpMethod) -> Self {
        value.as_str().to_string()
    }
}

/// The set of methods a rule applies to: `"*"` or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "MethodSetRepr", into = "MethodSetRepr")]
pub enum MethodSet {
    #[default]
    Any,
    Only(BTreeSet<HttpMethod>),
}

impl MethodSet {
    pub fn only(methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        MethodSet::Only(methods.into_iter().collect())
    }

    #[must_use]
    pub fn contains(&self, method: HttpMethod) -> bool {
        match self {
            MethodSet::Any => true,
            MethodSet::Only(set) => set.contains(&method),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MethodSetRepr {
    One(String),
    Many(Vec<HttpMethod>),
}

impl TryFrom<MethodSetRepr> for MethodSet {
    type Error = String;

    fn try_from(value: MethodSetRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            MethodSetRepr::One(s) if s.trim() == "*" => Ok(MethodSet::Any),
            MethodSetRepr::One(s) => Ok(MethodSet::only([s.parse::<HttpMethod>()?])),
            MethodSetRepr::Many(list) => Ok(MethodSet::only(list)),
        }
    }
}

impl From<MethodSet> for MethodSetRepr {
    fn from(value: MethodSet) -> Self {
        match value {
            MethodSet::Any => MethodSetRepr::One("*".to_string()),
            MethodSet::Only(set) => MethodSetRepr::Many(set.into_iter().collect()),
        }
    }
}

/// What happens to an operation matched by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum McpType {
    /// Expose the operation as a tool.
    Include,
    /// Hide the operation.
    Exclude,
}

impl McpType {
    pub const SUPPORTED: [&'static str; 2] = ["INCLUDE", "EXCLUDE"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            McpType::Include => "INCLUDE",
            McpType::Exclude => "EXCLUDE",
        }
    }
}

impl FromStr for McpType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INCLUDE" | "TOOL" => Ok(McpType::Include),
            "EXCLUDE" => Ok(McpType::Exclude),
            _ => Err(format!(
                "Invalid MCPType: {s}. Supported types are: [{}]",
                McpType::SUPPORTED.join(", ")
            )),
        }
    }
}

impl TryFrom<String> for McpType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<McpType> for String {
    fn from(value: McpType) -> Self {
        value.as_str().to_string()
    }
}

/// One route rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteMap {
    #[serde(default)]
    pub methods: MethodSet,
    /// Regex searched within the path template (e.g. `/rest/raven/1.0/test/{key}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// All of these tags must be present on the operation.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub mcp_type: McpType,
}

impl RouteMap {
    #[must_use]
    pub fn new(methods: MethodSet, mcp_type: McpType) -> Self {
        Self {
            methods,
            pattern: None,
            tags: BTreeSet::new(),
            mcp_type,
        }
    }

    /// The rule read-only mode puts in front of everything else.
    #[must_use]
    pub fn exclude_mutating() -> Self {
        Self::new(MethodSet::only(HttpMethod::MUTATING), McpType::Exclude)
    }
}

/// Compute the rule list discovery actually runs with.
#[must_use]
pub fn effective_route_maps(configured: &[RouteMap], read_only: bool) -> Vec<RouteMap> {
    let mut out = Vec::with_capacity(configured.len() + 1);
    if read_only {
        out.push(RouteMap::exclude_mutating());
    }
    out.extend(configured.iter().cloned());
    out
}

#[derive(Debug)]
struct CompiledRoute {
    methods: MethodSet,
    pattern: Option<Regex>,
    tags: BTreeSet<String>,
    mcp_type: McpType,
}

/// Compiled, ready-to-evaluate route rules.
#[derive(Debug, Default)]
pub struct RouteMatcher {
    routes: Vec<CompiledRoute>,
}

impl RouteMatcher {
    /// Compile route maps (regex patterns are validated here).
    ///
    /// # Errors
    ///
    /// Returns an error if a rule's `pattern` is not a valid regular expression.
    pub fn new(route_maps: &[RouteMap]) -> Result<Self> {
        let routes = route_maps
            .iter()
            .enumerate()
            .map(|(idx, rm)| {
                let pattern = rm
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| {
                        OpenApiToolsError::Config(format!(
                            "Invalid route_maps[{idx}].pattern: {e}"
                        ))
                    })?;
                Ok(CompiledRoute {
                    methods: rm.methods.clone(),
                    pattern,
                    tags: rm.tags.clone(),
                    mcp_type: rm.mcp_type,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Decide whether an operation is exposed. The first matching rule wins.
    #[must_use]
    pub fn decide(&self, method: HttpMethod, path: &str, tags: &[String]) -> McpType {
        self.routes
            .iter()
            .find(|r| {
                r.methods.contains(method)
                    && r.pattern.as_ref().is_none_or(|re| re.is_match(path))
                    && r.tags.iter().all(|t| tags.contains(t))
            })
            .map_or(McpType::Include, |r| r.mcp_type)
    }
}
