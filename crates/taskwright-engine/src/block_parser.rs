//! Tool Block Parser (C2): turns the raw bytes of one captured tool block
//! into a typed `Invocation` tree, validated against the Tool Catalog.
//!
//! This is a small recursive-descent scanner over the dialect's limited
//! tag grammar (§6.3) — not a general XML parser, per Design Notes §9.

use taskwright_core::catalog::Catalog;
use taskwright_core::types::{Invocation, Payload, SingleCall};

use crate::error::ParseError;
use crate::placeholder::find_placeholder;

/// Result of parsing one tool block: the typed invocation plus any
/// non-fatal warnings (unknown parameters — forward-compat, not rejected).
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub invocation: Invocation,
    pub warnings: Vec<String>,
}

/// Parse the raw text of one tool block (as captured by the Tokenizer)
/// into an `Invocation` tree.
pub fn parse_tool_block(raw: &str, catalog: &Catalog) -> Result<ParsedBlock, ParseError> {
    let content = strip_execute_tools_envelope(raw)?;
    let content = content.trim();
    if content.is_empty() {
        return Err(ParseError::EmptyBlock);
    }

    let (name, inner, rest) = parse_element(content)
        .ok_or_else(|| ParseError::Malformed("no top-level element found".to_string()))?;
    if !rest.trim().is_empty() {
        return Err(ParseError::Malformed(
            "unexpected content after top-level element".to_string(),
        ));
    }

    let mut warnings = Vec::new();

    match name.as_str() {
        "parallel" | "sequential" => {
            let children_raw = parse_server_children(&inner)?;
            if children_raw.is_empty() {
                return Err(ParseError::EmptyBlock);
            }
            let mut children = Vec::with_capacity(children_raw.len());
            for (server_raw, action_raw, body) in &children_raw {
                let (call, mut w) = resolve_single(server_raw, action_raw, body, catalog)?;
                warnings.append(&mut w);
                children.push(call);
            }

            if name == "sequential" {
                for (idx, call) in children.iter().enumerate() {
                    for (k, _path) in extract_placeholders(&call.payload) {
                        if k >= idx {
                            return Err(ParseError::BadPlaceholder(k, idx));
                        }
                    }
                }
                Ok(ParsedBlock {
                    invocation: Invocation::Sequential { children },
                    warnings,
                })
            } else {
                Ok(ParsedBlock {
                    invocation: Invocation::Parallel { children },
                    warnings,
                })
            }
        }
        _ => {
            // A bare `<server_name><action_name>body</action_name></server_name>`.
            let (action_name, body, action_rest) = parse_element(&inner)
                .ok_or_else(|| ParseError::Malformed(format!("server {} has no action element", name)))?;
            if !action_rest.trim().is_empty() {
                return Err(ParseError::Malformed(format!(
                    "server {} has more than one action element",
                    name
                )));
            }
            let (call, mut w) = resolve_single(&name, &action_name, &body, catalog)?;
            warnings.append(&mut w);
            Ok(ParsedBlock {
                invocation: Invocation::Single(call),
                warnings,
            })
        }
    }
}

/// Strip the `<execute_tools>` wrapper (legacy, non-self-closing form) or
/// the trailing `<execute_tools ... />` terminator, returning the bare
/// invocation content.
fn strip_execute_tools_envelope(raw: &str) -> Result<String, ParseError> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with("<execute_tools>") {
        let after_open = &trimmed["<execute_tools>".len()..];
        let close = "</execute_tools>";
        let end = after_open
            .rfind(close)
            .ok_or_else(|| ParseError::Malformed("missing </execute_tools>".to_string()))?;
        return Ok(after_open[..end].to_string());
    }

    let marker = raw
        .rfind("<execute_tools")
        .ok_or_else(|| ParseError::Malformed("missing <execute_tools /> terminator".to_string()))?;
    Ok(raw[..marker].to_string())
}

/// Parse one `<tag>...</tag>` element from the start of `s` (after
/// skipping leading whitespace). Returns `(tag_name, inner, remainder)`.
fn parse_element(s: &str) -> Option<(String, String, String)> {
    let s = s.trim_start();
    if !s.starts_with('<') {
        return None;
    }
    let gt = s.find('>')?;
    let open_tag = &s[..=gt];
    if open_tag.trim_end().ends_with("/>") {
        return None; // self-closing elements carry no body in this grammar
    }
    let name = bare_tag_name(open_tag);
    let after_open = &s[gt + 1..];
    let close_tag = format!("</{}>", name);
    let close_idx = after_open.find(&close_tag)?;
    let inner = after_open[..close_idx].to_string();
    let remainder = after_open[close_idx + close_tag.len()..].to_string();
    Some((name, inner, remainder))
}

fn bare_tag_name(open_tag: &str) -> String {
    open_tag
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_end_matches('/')
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

/// Parse a sequence of `<server><action>body</action></server>` elements
/// (the children of a `parallel`/`sequential` wrapper).
fn parse_server_children(s: &str) -> Result<Vec<(String, String, String)>, ParseError> {
    let mut remaining = s.to_string();
    let mut out = Vec::new();
    loop {
        if remaining.trim_start().is_empty() {
            break;
        }
        let (server, inner, rest) = parse_element(&remaining)
            .ok_or_else(|| ParseError::Malformed("malformed child element".to_string()))?;
        let (action, body, action_rest) = parse_element(&inner).ok_or_else(|| {
            ParseError::Malformed(format!("server {} has no action element", server))
        })?;
        if !action_rest.trim().is_empty() {
            return Err(ParseError::Malformed(format!(
                "server {} has more than one action element",
                server
            )));
        }
        out.push((server, action, body));
        remaining = rest;
    }
    Ok(out)
}

fn resolve_single(
    server_raw: &str,
    action_raw: &str,
    body: &str,
    catalog: &Catalog,
) -> Result<(SingleCall, Vec<String>), ParseError> {
    let server = catalog
        .resolve(server_raw)
        .ok_or_else(|| ParseError::UnknownServer(server_raw.to_string()))?
        .to_string();
    let action = catalog
        .resolve_action(&server, action_raw)
        .ok_or_else(|| ParseError::UnknownAction(server.clone(), action_raw.to_string()))?
        .to_string();
    let def = catalog
        .schema(&server, &action)
        .ok_or_else(|| ParseError::UnknownAction(server.clone(), action.clone()))?;

    let body_trimmed = body.trim();
    let mut warnings = Vec::new();

    let payload = if body_trimmed.starts_with('{') || body_trimmed.starts_with('[') {
        let value: serde_json::Value = serde_json::from_str(body_trimmed)
            .map_err(|e| ParseError::Malformed(format!("invalid json payload: {}", e)))?;
        Payload::Json(value)
    } else if let Some(default_param) = &def.default_action {
        Payload::Json(serde_json::json!({ default_param.clone(): body_trimmed }))
    } else {
        Payload::Raw(body_trimmed.to_string())
    };

    if let Payload::Json(serde_json::Value::Object(obj)) = &payload {
        for param in &def.parameters {
            if param.required && !obj.contains_key(&param.name) {
                return Err(ParseError::MissingParameter(param.name.clone()));
            }
        }
        let known: std::collections::HashSet<&str> =
            def.parameters.iter().map(|p| p.name.as_str()).collect();
        for key in obj.keys() {
            if !known.contains(key.as_str()) {
                warnings.push(format!("unknown parameter '{}' on {}.{}", key, server, action));
            }
        }
    }

    Ok((
        SingleCall {
            server,
            action,
            payload,
        },
        warnings,
    ))
}

/// Scan a payload's string-typed leaf values for `{results[k](.path)?}`
/// placeholders. Only top-level string values are walked (not nested
/// objects/arrays) per Design Notes §9. Returns `(k, optional dotted path)`
/// pairs, first match per string only.
pub fn extract_placeholders(payload: &Payload) -> Vec<(usize, Option<String>)> {
    let mut out = Vec::new();
    match payload {
        Payload::Raw(s) => {
            if let Some(p) = find_placeholder(s) {
                out.push((p.index, p.path));
            }
        }
        Payload::Json(serde_json::Value::Object(map)) => {
            for value in map.values() {
                if let serde_json::Value::String(s) = value {
                    if let Some(p) = find_placeholder(s) {
                        out.push((p.index, p.path));
                    }
                }
            }
        }
        Payload::Json(serde_json::Value::String(s)) => {
            if let Some(p) = find_placeholder(s) {
                out.push((p.index, p.path));
            }
        }
        Payload::Json(_) => {}
    }
    out
}
