//! Normalizing Swagger 2.0 and `OpenAPI` 3.1 documents to `OpenAPI` 3.0.
//!
//! `openapiv3` only models 3.0. Xray Server/DC publishes its REST description in more than one
//! dialect depending on the plugin version, so documents are rewritten at the JSON level before
//! being deserialized:
//!
//! - **Swagger 2.0**: `definitions` move to `components.schemas`, body/formData parameters become
//!   `requestBody`, response schemas gain `content` entries, `collectionFormat` becomes
//!   `style`/`explode`, and `host`/`basePath`/`schemes` become `servers`.
//! - **`OpenAPI` 3.1**: JSON Schema 2020-12 constructs that 3.0 cannot express are lowered
//!   (`type: [x, "null"]`, numeric `exclusiveMinimum`/`exclusiveMaximum`, `const`).

use crate::error::{OpenApiToolsError, Result};
use openapiv3::OpenAPI;
use serde_json::{Map, Value, json};

const TARGET_VERSION: &str = "3.0.3";
const DEFAULT_MEDIA_TYPE: &str = "application/json";

/// Keys whose values are maps of *named* schemas rather than a schema.
const NAMED_SCHEMA_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "schemas",
    "definitions",
    "$defs",
];

/// Detected document dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    Swagger2,
    OpenApi30,
    OpenApi31,
}

/// Detect the dialect of a raw document.
///
/// # Errors
///
/// Returns an error if the document has neither an `openapi` nor a `swagger` version field, or
/// if the version is not one we understand.
pub fn detect_version(doc: &Value) -> Result<SpecVersion> {
    if let Some(v) = doc.get("openapi").and_then(Value::as_str) {
        return if v.starts_with("3.0") {
            Ok(SpecVersion::OpenApi30)
        } else if v.starts_with("3.1") {
            Ok(SpecVersion::OpenApi31)
        } else {
            Err(OpenApiToolsError::OpenApi(format!(
                "Unsupported OpenAPI version '{v}'"
            )))
        };
    }
    if let Some(v) = doc.get("swagger").and_then(Value::as_str) {
        return if v.starts_with("2.") {
            Ok(SpecVersion::Swagger2)
        } else {
            Err(OpenApiToolsError::OpenApi(format!(
                "Unsupported Swagger version '{v}'"
            )))
        };
    }
    Err(OpenApiToolsError::OpenApi(
        "Document is not an OpenAPI specification (missing 'openapi' or 'swagger' field)"
            .to_string(),
    ))
}

/// Rewrite a raw document into `OpenAPI` 3.0 JSON.
///
/// # Errors
///
/// Returns an error if the dialect cannot be detected or the document is not an object.
pub fn upgrade_document(doc: Value) -> Result<Value> {
    let version = detect_version(&doc)?;
    let Value::Object(map) = doc else {
        return Err(OpenApiToolsError::OpenApi(
            "OpenAPI document must be an object".to_string(),
        ));
    };

    match version {
        SpecVersion::OpenApi30 => Ok(Value::Object(map)),
        SpecVersion::OpenApi31 => {
            tracing::debug!("downgrading OpenAPI 3.1 document to {TARGET_VERSION}");
            Ok(Value::Object(downgrade_31(map)))
        }
        SpecVersion::Swagger2 => {
            tracing::debug!("converting Swagger 2.0 document to OpenAPI {TARGET_VERSION}");
            Ok(Value::Object(convert_swagger2(map)))
        }
    }
}

/// Upgrade a raw document and deserialize it into the `openapiv3` model.
///
/// The upgraded JSON is returned too; `$ref` resolution walks it rather than the typed model.
///
/// # Errors
///
/// Returns an error if the document cannot be upgraded or does not deserialize as `OpenAPI` 3.0.
pub fn normalize_document(doc: Value, location: &str) -> Result<(Value, OpenAPI)> {
    let upgraded = upgrade_document(doc)?;
    let spec = serde_json::from_value(upgraded.clone()).map_err(|e| {
        OpenApiToolsError::DocumentParse {
            location: location.to_string(),
            message: format!("invalid OpenAPI document: {e}"),
        }
    })?;
    Ok((upgraded, spec))
}

// ----------------------------------------------------------------------------
// OpenAPI 3.1 -> 3.0
// ----------------------------------------------------------------------------

fn downgrade_31(mut doc: Map<String, Value>) -> Map<String, Value> {
    doc.insert("openapi".to_string(), json!(TARGET_VERSION));
    doc.remove("webhooks");
    doc.remove("jsonSchemaDialect");
    doc.entry("paths").or_insert_with(|| json!({}));
    if let Some(Value::Object(components)) = doc.get_mut("components") {
        components.remove("pathItems");
    }

    let mut value = Value::Object(doc);
    lower_schema_keywords(&mut value);
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn lower_schema_keywords(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(lower_schema_keywords),
        Value::Object(obj) => {
            lower_schema_object(obj);
            for (key, child) in obj.iter_mut() {
                if NAMED_SCHEMA_MAPS.contains(&key.as_str())
                    && let Value::Object(named) = child
                {
                    named.values_mut().for_each(lower_schema_keywords);
                } else {
                    lower_schema_keywords(child);
                }
            }
        }
        _ => {}
    }
}

fn lower_schema_object(obj: &mut Map<String, Value>) {
    if let Some(Value::Array(types)) = obj.get("type").cloned() {
        let nullable = types.iter().any(|t| t == "null");
        let mut non_null = types.into_iter().filter(|t| t != "null");
        match non_null.next() {
            Some(first) => {
                obj.insert("type".to_string(), first);
            }
            None => {
                obj.remove("type");
            }
        }
        if nullable {
            obj.insert("nullable".to_string(), json!(true));
        }
    }

    for (exclusive, inclusive) in [
        ("exclusiveMinimum", "minimum"),
        ("exclusiveMaximum", "maximum"),
    ] {
        if let Some(bound) = obj.get(exclusive).filter(|v| v.is_number()).cloned() {
            obj.insert(inclusive.to_string(), bound);
            obj.insert(exclusive.to_string(), json!(true));
        }
    }

    if let Some(constant) = obj.remove("const") {
        obj.insert("enum".to_string(), json!([constant]));
    }

    if !obj.contains_key("example")
        && let Some(Value::Array(examples)) = obj.get("examples")
        && let Some(first) = examples.first().cloned()
        && obj.contains_key("type")
    {
        obj.insert("example".to_string(), first);
    }
}

// ----------------------------------------------------------------------------
// Swagger 2.0 -> OpenAPI 3.0
// ----------------------------------------------------------------------------

struct Swagger2Context {
    consumes: Vec<String>,
    produces: Vec<String>,
    /// Global `parameters`, needed to inline body/formData refs.
    global_params: Map<String, Value>,
}

fn media_types(doc: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    doc.get(key).and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn convert_swagger2(mut doc: Map<String, Value>) -> Map<String, Value> {
    let ctx = Swagger2Context {
        consumes: media_types(&doc, "consumes")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_MEDIA_TYPE.to_string()]),
        produces: media_types(&doc, "produces")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_MEDIA_TYPE.to_string()]),
        global_params: doc
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    };

    let mut out = Map::new();
    out.insert("openapi".to_string(), json!(TARGET_VERSION));
    out.insert(
        "info".to_string(),
        doc.remove("info")
            .unwrap_or_else(|| json!({"title": "API", "version": "0"})),
    );
    if let Some(servers) = swagger2_servers(&doc) {
        out.insert("servers".to_string(), servers);
    }
    for key in ["tags", "security", "externalDocs"] {
        if let Some(v) = doc.remove(key) {
            out.insert(key.to_string(), v);
        }
    }

    let mut components = Map::new();
    if let Some(defs) = doc.remove("definitions") {
        components.insert("schemas".to_string(), defs);
    }
    let params: Map<String, Value> = ctx
        .global_params
        .iter()
        .filter(|(_, p)| !is_body_like(p))
        .map(|(k, p)| (k.clone(), convert_parameter(p)))
        .collect();
    if !params.is_empty() {
        components.insert("parameters".to_string(), Value::Object(params));
    }
    if let Some(Value::Object(responses)) = doc.remove("responses") {
        let converted: Map<String, Value> = responses
            .into_iter()
            .map(|(k, r)| (k, convert_response(r, &ctx.produces)))
            .collect();
        components.insert("responses".to_string(), Value::Object(converted));
    }
    if let Some(Value::Object(defs)) = doc.remove("securityDefinitions") {
        let converted: Map<String, Value> = defs
            .into_iter()
            .map(|(k, d)| (k, convert_security_scheme(d)))
            .collect();
        components.insert("securitySchemes".to_string(), Value::Object(converted));
    }
    if !components.is_empty() {
        out.insert("components".to_string(), Value::Object(components));
    }

    let paths = match doc.remove("paths") {
        Some(Value::Object(paths)) => paths
            .into_iter()
            .map(|(path, item)| (path, convert_path_item(item, &ctx)))
            .collect(),
        _ => Map::new(),
    };
    out.insert("paths".to_string(), Value::Object(paths));

    for (k, v) in doc {
        if k.starts_with("x-") {
            out.insert(k, v);
        }
    }

    let mut value = Value::Object(out);
    rewrite_swagger2(&mut value);
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn swagger2_servers(doc: &Map<String, Value>) -> Option<Value> {
    let host = doc.get("host").and_then(Value::as_str)?;
    let base_path = doc.get("basePath").and_then(Value::as_str).unwrap_or("");
    let schemes: Vec<&str> = doc
        .get("schemes")
        .and_then(Value::as_array)
        .map(|s| s.iter().filter_map(Value::as_str).collect())
        .filter(|s: &Vec<&str>| !s.is_empty())
        .unwrap_or_else(|| vec!["https"]);
    Some(Value::Array(
        schemes
            .into_iter()
            .map(|scheme| json!({"url": format!("{scheme}://{host}{base_path}")}))
            .collect(),
    ))
}

fn convert_security_scheme(def: Value) -> Value {
    let Value::Object(mut def) = def else {
        return def;
    };
    match def.get("type").and_then(Value::as_str) {
        Some("basic") => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("http"));
            out.insert("scheme".to_string(), json!("basic"));
            if let Some(d) = def.remove("description") {
                out.insert("description".to_string(), d);
            }
            Value::Object(out)
        }
        Some("oauth2") => {
            let flow = match def.get("flow").and_then(Value::as_str) {
                Some("implicit") => "implicit",
                Some("password") => "password",
                Some("application") => "clientCredentials",
                _ => "authorizationCode",
            };
            let mut flow_obj = Map::new();
            for key in ["authorizationUrl", "tokenUrl"] {
                if let Some(v) = def.remove(key) {
                    flow_obj.insert(key.to_string(), v);
                }
            }
            flow_obj.insert(
                "scopes".to_string(),
                def.remove("scopes").unwrap_or_else(|| json!({})),
            );
            json!({"type": "oauth2", "flows": {flow: flow_obj}})
        }
        _ => Value::Object(def),
    }
}

fn is_body_like(param: &Value) -> bool {
    matches!(
        param.get("in").and_then(Value::as_str),
        Some("body" | "formData")
    )
}

fn convert_path_item(item: Value, ctx: &Swagger2Context) -> Value {
    let Value::Object(mut item) = item else {
        return item;
    };

    // Path-level body/formData parameters are pushed down into each operation.
    let mut inherited_body: Vec<Value> = Vec::new();
    if let Some(Value::Array(params)) = item.remove("parameters") {
        let mut kept = Vec::new();
        for p in params {
            let p = inline_global_body_ref(p, ctx);
            if is_body_like(&p) {
                inherited_body.push(p);
            } else {
                kept.push(convert_parameter(&p));
            }
        }
        if !kept.is_empty() {
            item.insert("parameters".to_string(), Value::Array(kept));
        }
    }

    for method in [
        "get", "put", "post", "delete", "options", "head", "patch",
    ] {
        if let Some(op) = item.remove(method) {
            item.insert(
                method.to_string(),
                convert_operation(op, &inherited_body, ctx),
            );
        }
    }

    Value::Object(item)
}

fn inline_global_body_ref(param: Value, ctx: &Swagger2Context) -> Value {
    let target = param
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix("#/parameters/"))
        .and_then(|name| ctx.global_params.get(name));
    match target {
        Some(global) if is_body_like(global) => global.clone(),
        _ => param,
    }
}

fn convert_operation(op: Value, inherited_body: &[Value], ctx: &Swagger2Context) -> Value {
    let Value::Object(mut op) = op else {
        return op;
    };

    let consumes = media_types(&op, "consumes")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| ctx.consumes.clone());
    let produces = media_types(&op, "produces")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| ctx.produces.clone());
    op.remove("consumes");
    op.remove("produces");
    op.remove("schemes");

    let mut params = Vec::new();
    let mut body: Option<Value> = None;
    let mut form_fields: Vec<Value> = Vec::new();

    let raw_params = match op.remove("parameters") {
        Some(Value::Array(p)) => p,
        _ => Vec::new(),
    };
    for p in inherited_body.iter().cloned().chain(raw_params) {
        let p = inline_global_body_ref(p, ctx);
        match p.get("in").and_then(Value::as_str) {
            Some("body") => body = Some(p),
            Some("formData") => form_fields.push(p),
            _ => params.push(convert_parameter(&p)),
        }
    }
    if !params.is_empty() {
        op.insert("parameters".to_string(), Value::Array(params));
    }

    if let Some(body) = body {
        op.insert("requestBody".to_string(), body_to_request_body(&body, &consumes));
    } else if !form_fields.is_empty() {
        op.insert(
            "requestBody".to_string(),
            form_to_request_body(&form_fields, &consumes),
        );
    }

    if let Some(Value::Object(responses)) = op.remove("responses") {
        let converted: Map<String, Value> = responses
            .into_iter()
            .map(|(code, r)| (code, convert_response(r, &produces)))
            .collect();
        op.insert("responses".to_string(), Value::Object(converted));
    } else {
        op.insert(
            "responses".to_string(),
            json!({"default": {"description": ""}}),
        );
    }

    Value::Object(op)
}

fn body_to_request_body(body: &Value, consumes: &[String]) -> Value {
    let schema = body.get("schema").cloned().unwrap_or_else(|| json!({}));
    let content: Map<String, Value> = consumes
        .iter()
        .map(|mt| (mt.clone(), json!({"schema": schema.clone()})))
        .collect();
    let mut rb = Map::new();
    rb.insert("content".to_string(), Value::Object(content));
    if let Some(d) = body.get("description") {
        rb.insert("description".to_string(), d.clone());
    }
    if body.get("required").and_then(Value::as_bool) == Some(true) {
        rb.insert("required".to_string(), json!(true));
    }
    Value::Object(rb)
}

fn form_to_request_body(fields: &[Value], consumes: &[String]) -> Value {
    let has_file = fields
        .iter()
        .any(|f| f.get("type").and_then(Value::as_str) == Some("file"));
    let media_type = if has_file || consumes.iter().any(|c| c == "multipart/form-data") {
        "multipart/form-data"
    } else {
        "application/x-www-form-urlencoded"
    };

    let mut properties = Map::new();
    let mut required = Vec::new();
    for f in fields {
        let Some(name) = f.get("name").and_then(Value::as_str) else {
            continue;
        };
        let mut schema = parameter_schema(f);
        if let (Some(d), Value::Object(s)) = (f.get("description"), &mut schema) {
            s.insert("description".to_string(), d.clone());
        }
        properties.insert(name.to_string(), schema);
        if f.get("required").and_then(Value::as_bool) == Some(true) {
            required.push(json!(name));
        }
    }

    let mut schema = json!({"type": "object", "properties": properties});
    if !required.is_empty() {
        schema["required"] = Value::Array(required.clone());
    }
    let mut rb = json!({"content": {media_type: {"schema": schema}}});
    if !required.is_empty() {
        rb["required"] = json!(true);
    }
    rb
}

const SCHEMA_KEYWORDS: [&str; 15] = [
    "type",
    "format",
    "items",
    "default",
    "enum",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
];

fn parameter_schema(param: &Value) -> Value {
    let mut schema = Map::new();
    if let Value::Object(p) = param {
        for key in SCHEMA_KEYWORDS {
            if let Some(v) = p.get(key) {
                schema.insert(key.to_string(), v.clone());
            }
        }
    }
    Value::Object(schema)
}

fn convert_parameter(param: &Value) -> Value {
    let Value::Object(p) = param else {
        return param.clone();
    };
    if p.contains_key("$ref") {
        return param.clone();
    }

    let mut out = Map::new();
    for key in ["name", "in", "description", "required", "allowEmptyValue"] {
        if let Some(v) = p.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    for (k, v) in p {
        if k.starts_with("x-") {
            out.insert(k.clone(), v.clone());
        }
    }
    out.insert("schema".to_string(), parameter_schema(param));

    let location = p.get("in").and_then(Value::as_str).unwrap_or("query");
    if location == "path" {
        out.insert("required".to_string(), json!(true));
    }
    let is_array = p.get("type").and_then(Value::as_str) == Some("array");
    if is_array {
        let format = p
            .get("collectionFormat")
            .and_then(Value::as_str)
            .unwrap_or("csv");
        let (style, explode) = match (location, format) {
            ("query", "multi") => ("form", true),
            ("query", "ssv") => ("spaceDelimited", false),
            ("query", "pipes") => ("pipeDelimited", false),
            ("query", _) => ("form", false),
            (_, _) => ("simple", false),
        };
        out.insert("style".to_string(), json!(style));
        out.insert("explode".to_string(), json!(explode));
    }

    Value::Object(out)
}

fn convert_response(response: Value, produces: &[String]) -> Value {
    let Value::Object(mut r) = response else {
        return response;
    };
    if r.contains_key("$ref") {
        return Value::Object(r);
    }

    let mut out = Map::new();
    out.insert(
        "description".to_string(),
        r.remove("description").unwrap_or_else(|| json!("")),
    );
    if let Some(schema) = r.remove("schema") {
        let content: Map<String, Value> = produces
            .iter()
            .map(|mt| (mt.clone(), json!({"schema": schema.clone()})))
            .collect();
        out.insert("content".to_string(), Value::Object(content));
    }
    if let Some(Value::Object(headers)) = r.remove("headers") {
        let converted: Map<String, Value> = headers
            .into_iter()
            .map(|(name, h)| {
                let mut header = Map::new();
                if let Some(d) = h.get("description") {
                    header.insert("description".to_string(), d.clone());
                }
                header.insert("schema".to_string(), parameter_schema(&h));
                (name, Value::Object(header))
            })
            .collect();
        out.insert("headers".to_string(), Value::Object(converted));
    }
    Value::Object(out)
}

/// Rewrite internal `$ref`s to their 3.0 locations and fix Swagger-only schema constructs.
fn rewrite_swagger2(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(rewrite_swagger2),
        Value::Object(obj) => {
            if let Some(Value::String(r)) = obj.get_mut("$ref") {
                for (from, to) in [
                    ("#/definitions/", "#/components/schemas/"),
                    ("#/parameters/", "#/components/parameters/"),
                    ("#/responses/", "#/components/responses/"),
                ] {
                    if let Some(rest) = r.strip_prefix(from) {
                        *r = format!("{to}{rest}");
                        break;
                    }
                }
            }
            if obj.get("type").and_then(Value::as_str) == Some("file") {
                obj.insert("type".to_string(), json!("string"));
                obj.insert("format".to_string(), json!("binary"));
            }
            if let Some(nullable) = obj.remove("x-nullable") {
                obj.insert("nullable".to_string(), nullable);
            }
            obj.values_mut().for_each(rewrite_swagger2);
        }
        _ => {}
    }
}
