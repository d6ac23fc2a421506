//! Decoders from the XML element tree into domain records.
//!
//! These are total functions: missing or unparseable fields fall back to
//! zeros and empty sequences so a quirky engine degrades output instead of
//! failing the whole response.

use crate::dbgp::types::*;
use crate::dbgp::xml::Element;

pub fn parse_init(root: &Element) -> Init {
    let engine = root.child("engine").map(|e| EngineInfo {
        name: e.text.trim().to_string(),
        version: e.attr("version").unwrap_or_default().to_string(),
    });
    Init {
        app_id: root.attr("appid").unwrap_or_default().to_string(),
        ide_key: root.attr("idekey").unwrap_or_default().to_string(),
        session: root.attr("session").unwrap_or_default().to_string(),
        thread: root.attr("thread").unwrap_or_default().to_string(),
        language: root.attr("language").unwrap_or_default().to_string(),
        protocol_version: root.attr("protocol_version").unwrap_or_default().to_string(),
        file_uri: root.attr("fileuri").unwrap_or_default().to_string(),
        engine,
    }
}

pub fn parse_response(root: &Element) -> Response {
    let error = root.child("error").map(|e| EngineError {
        code: e.attr_u32("code").unwrap_or(999),
        message: e
            .child("message")
            .map(|m| m.decoded_text().trim().to_string())
            .unwrap_or_default(),
    });

    // The post-step location is a direct `message` child carrying a
    // filename attribute; the `error > message` child does not have one.
    let location = root
        .children_named("message")
        .find(|m| m.attr("filename").is_some())
        .map(|m| SourceLocation {
            filename: m.attr("filename").unwrap_or_default().to_string(),
            lineno: m.attr_u32("lineno").unwrap_or(0),
            exception: m.attr("exception").map(str::to_string),
        });

    Response {
        command: root.attr("command").unwrap_or_default().to_string(),
        transaction_id: root.attr_u32("transaction_id"),
        status: root.attr("status").and_then(SessionStatus::parse),
        reason: root.attr("reason").map(str::to_string),
        success: root.attr_bool("success"),
        error,
        location,
        root: root.clone(),
    }
}

pub fn parse_stream(root: &Element) -> StreamRecord {
    StreamRecord {
        kind: root
            .attr("type")
            .and_then(StreamKind::parse)
            .unwrap_or(StreamKind::Stdout),
        content: root.decoded_text(),
    }
}

pub fn parse_stack_frames(resp: &Response) -> Vec<StackFrame> {
    resp.root
        .children_named("stack")
        .map(|s| StackFrame {
            level: s.attr_u32("level").unwrap_or(0),
            frame_type: s.attr("type").unwrap_or("file").to_string(),
            filename: s.attr("filename").unwrap_or_default().to_string(),
            lineno: s.attr_u32("lineno").unwrap_or(0),
            where_: s.attr("where").map(str::to_string),
            cmdbegin: s.attr("cmdbegin").map(str::to_string),
            cmdend: s.attr("cmdend").map(str::to_string),
        })
        .collect()
}

pub fn parse_contexts(resp: &Response) -> Vec<Context> {
    resp.root
        .children_named("context")
        .map(|c| Context {
            id: c.attr_u32("id").unwrap_or(0),
            name: c.attr("name").unwrap_or_default().to_string(),
        })
        .collect()
}

pub fn parse_properties(resp: &Response) -> Vec<Property> {
    resp.root.children_named("property").map(parse_property).collect()
}

fn parse_property(el: &Element) -> Property {
    let children: Vec<Property> = el.children_named("property").map(parse_property).collect();
    Property {
        name: el.attr("name").unwrap_or_default().to_string(),
        fullname: el.attr("fullname").unwrap_or_default().to_string(),
        property_type: el.attr("type").unwrap_or_default().to_string(),
        classname: el.attr("classname").map(str::to_string),
        facet: el.attr("facet").map(str::to_string),
        constant: el.attr_bool("constant").unwrap_or(false),
        has_children: el.attr_bool("children").unwrap_or(!children.is_empty()),
        num_children: el.attr_u32("numchildren").unwrap_or(children.len() as u32),
        size: el.attr_u32("size").unwrap_or(0),
        page: el.attr_u32("page").unwrap_or(0),
        pagesize: el.attr_u32("pagesize").unwrap_or(0),
        address: el.attr("address").map(str::to_string),
        key: el.attr("key").map(str::to_string),
        value: el.decoded_text(),
        children,
    }
}

pub fn parse_breakpoints(resp: &Response) -> Vec<Breakpoint> {
    resp.root
        .children_named("breakpoint")
        .map(|b| Breakpoint {
            id: b.attr("id").unwrap_or_default().to_string(),
            kind: b
                .attr("type")
                .and_then(BreakpointType::parse)
                .unwrap_or(BreakpointType::Line),
            state: match b.attr("state") {
                Some("disabled") => BreakpointState::Disabled,
                _ => BreakpointState::Enabled,
            },
            resolved: b
                .attr("resolved")
                .map(|r| r == "resolved" || r == "1" || r == "true")
                .unwrap_or(false),
            filename: b.attr("filename").map(str::to_string),
            lineno: b.attr_u32("lineno"),
            function: b.attr("function").map(str::to_string),
            exception: b.attr("exception").map(str::to_string),
            expression: b
                .child("expression")
                .map(|e| e.decoded_text())
                .or_else(|| b.attr("expression").map(str::to_string)),
            hit_count: b.attr_u32("hit_count"),
            hit_value: b.attr_u32("hit_value"),
            hit_condition: b.attr("hit_condition").map(str::to_string),
        })
        .collect()
}

pub fn parse_breakpoint_set(resp: &Response) -> BreakpointSetResult {
    BreakpointSetResult {
        id: resp.root.attr("id").unwrap_or_default().to_string(),
        resolved: resp
            .root
            .attr("resolved")
            .map(|r| r == "resolved" || r == "1" || r == "true")
            .unwrap_or(false),
    }
}
