//! Extended error bodies.
//!
//! Both wire formats normalise to [`ExtendedErrorInformation`]. A malformed or
//! empty body yields `None`: the status code already signals the failure.

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufRead;

use crate::execution::stream::MultiBufferStream;
use crate::types::ExtendedErrorInformation;

/// Parse a failure body, choosing the format from `Content-Type` or, failing
/// that, from the first significant byte.
pub fn parse_extended_error(
    body: &MultiBufferStream,
    headers: &HeaderMap,
) -> Option<ExtendedErrorInformation> {
    if body.is_empty() {
        return None;
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("json") {
        return parse_json_error(body);
    }
    if content_type.contains("xml") {
        return parse_xml_error(body.reader());
    }
    let first = body
        .reader()
        .fill_buf()
        .ok()
        .and_then(|b| b.iter().copied().find(|c| !c.is_ascii_whitespace()));
    match first {
        Some(b'{') => parse_json_error(body),
        Some(b'<') => parse_xml_error(body.reader()),
        _ => None,
    }
}

/// `{"odata.error": {"code", "message": {"value"}, "innererror": {..}}}`
pub fn parse_json_error(body: &MultiBufferStream) -> Option<ExtendedErrorInformation> {
    let root: Value = serde_json::from_reader(body.reader()).ok()?;
    let error = root.get("odata.error")?;

    let error_code = error.get("code")?.as_str()?.to_string();
    let error_message = match error.get("message") {
        Some(Value::Object(m)) => m.get("value").and_then(Value::as_str),
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
    .unwrap_or_default()
    .to_string();

    let mut additional_details = HashMap::new();
    if let Some(Value::Object(inner)) = error.get("innererror") {
        for (key, value) in inner {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            additional_details.insert(detail_key(key), text);
        }
    }

    Some(ExtendedErrorInformation {
        error_code,
        error_message,
        additional_details,
    })
}

/// `<error><code/><message/><exceptiondetails>..</exceptiondetails></error>`,
/// element names matched case-insensitively.
pub fn parse_xml_error(source: impl BufRead) -> Option<ExtendedErrorInformation> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut info = ExtendedErrorInformation::default();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() {
                    if !name.eq_ignore_ascii_case("error") {
                        return None;
                    }
                    seen_root = true;
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?.into_owned();
                record_xml_text(&mut info, &path, text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                record_xml_text(&mut info, &path, text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
        buf.clear();
    }

    (seen_root && !info.error_code.is_empty()).then_some(info)
}

fn record_xml_text(info: &mut ExtendedErrorInformation, path: &[String], text: String) {
    match path {
        [_, leaf] if leaf.eq_ignore_ascii_case("code") => info.error_code = text,
        [_, leaf] if leaf.eq_ignore_ascii_case("message") => info.error_message = text,
        [_, .., leaf] => {
            info.additional_details.insert(detail_key(leaf), text);
        }
        _ => {}
    }
}

/// Well-known detail names in their conventional spelling; others unchanged.
fn detail_key(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "message" | "exceptionmessage" => "ExceptionMessage".to_string(),
        "stacktrace" | "exceptionstacktrace" => "StackTrace".to_string(),
        "type" => "Type".to_string(),
        _ => raw.to_string(),
    }
}

/// Extract a service-embedded operation index (`"<n>:..."`) from an error message.
pub fn embedded_operation_index(message: &str) -> Option<usize> {
    static INDEX: once_cell::sync::Lazy<Option<regex::Regex>> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"^(\d+):").ok());
    INDEX
        .as_ref()?
        .captures(message.trim_start())?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
