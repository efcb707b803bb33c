//! Text codec between SSDP datagrams and [`Message`] values.
//!
//! Decoding never fails: lines that cannot be understood are skipped and the
//! corresponding fields stay empty.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use chrono::Utc;
use crate::protocol::{
    multicast_host, HEADER_HOST, HEADER_LOCATION, HEADER_NT, HEADER_NTS, HEADER_SERVER,
    HEADER_ST, HEADER_USN, NEWLINE, NO_STATUS,
};
use crate::types::{Message, MessageKind, SubType};

/// Result of classifying a start line
enum StartLine {
    Request(Option<MessageKind>),
    Response { code: u16, reason: String },
}

/// Decode a raw datagram received from `source`.
pub fn decode(payload: &[u8], source: SocketAddr) -> Message {
    let text = String::from_utf8_lossy(payload).replace('\r', "");

    let mut start: Option<StartLine> = None;
    let mut headers: BTreeMap<String, String> = BTreeMap::new();

    for line in text.split('\n') {
        if start.is_none() {
            if let Some(classified) = classify(line) {
                start = Some(classified);
                continue;
            }
        }
        if let Some((name, value)) = parse_header(line) {
            headers.insert(name, value);
        }
    }

    let (kind, status_code, status_reason) = match start {
        Some(StartLine::Request(kind)) => (kind, NO_STATUS, String::new()),
        Some(StartLine::Response { code, reason }) => {
            (Some(MessageKind::QueryResponse), code, reason)
        }
        None => (None, NO_STATUS, String::new()),
    };

    let location = headers.remove(HEADER_LOCATION).unwrap_or_default();
    let server = headers.remove(HEADER_SERVER);
    let st = headers.remove(HEADER_ST);
    let nt = headers.remove(HEADER_NT);
    let usn = headers.remove(HEADER_USN);
    let sub_type = headers.remove(HEADER_NTS).map(|nts| SubType::parse(&nts));

    Message {
        kind,
        sender: Some(source),
        location,
        server,
        service_type: st.or(nt),
        usn,
        sub_type,
        status_code,
        status_reason,
        headers: Arc::new(headers),
        received_at: Utc::now(),
    }
}

/// Serialize a message into its wire text.
///
/// Header order is fixed; residual headers follow in name order. An
/// unclassified message is written as an announcement.
pub fn encode(msg: &Message) -> String {
    let mut out = String::with_capacity(256);

    push_line(&mut out, &start_line(msg));
    push_header(&mut out, HEADER_HOST, &multicast_host());

    if !msg.location.trim().is_empty() {
        push_header(&mut out, HEADER_LOCATION, &msg.location);
    }
    if let Some(sub_type) = &msg.sub_type {
        push_header(&mut out, HEADER_NTS, sub_type.as_str());
    }
    if let Some(server) = msg.server.as_deref().filter(|s| !s.trim().is_empty()) {
        push_header(&mut out, HEADER_SERVER, server);
    }
    if let Some(usn) = &msg.usn {
        push_header(&mut out, HEADER_USN, usn);
    }
    if let Some(service_type) = &msg.service_type {
        push_header(&mut out, type_header(msg.kind), service_type);
    }

    for (name, value) in msg.headers.iter() {
        if name != HEADER_HOST {
            push_header(&mut out, name, value);
        }
    }

    out.push_str(NEWLINE);
    out
}

fn start_line(msg: &Message) -> String {
    match msg.kind {
        Some(MessageKind::Query) => "M-SEARCH * HTTP/1.1".to_string(),
        Some(MessageKind::QueryResponse) => {
            format!("HTTP/1.1 {} {}", msg.status_code, msg.status_reason)
                .trim_end()
                .to_string()
        }
        Some(MessageKind::Announcement) | None => "NOTIFY * HTTP/1.1".to_string(),
    }
}

/// Announcements advertise their type in NT, queries and responses in ST
fn type_header(kind: Option<MessageKind>) -> &'static str {
    match kind {
        Some(MessageKind::Query) | Some(MessageKind::QueryResponse) => HEADER_ST,
        Some(MessageKind::Announcement) | None => HEADER_NT,
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str(NEWLINE);
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str(NEWLINE);
}

/// Recognise `<TOKEN> * HTTP/<ver>` and `HTTP/<ver> <code> <reason>`.
fn classify(line: &str) -> Option<StartLine> {
    let line = line.trim();

    if let Some(rest) = line
        .strip_prefix("HTTP/")
        .or_else(|| line.strip_prefix("http/"))
    {
        let mut parts = rest.splitn(3, ' ');
        let version = parts.next()?;
        let code = parts.next()?;
        if !is_response_version(version) || code.len() != 3 {
            return None;
        }
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let reason = parts.next().unwrap_or_default().trim().to_string();
        return Some(StartLine::Response {
            code: code.parse().unwrap_or(NO_STATUS),
            reason,
        });
    }

    let (token, rest) = line.split_once(" * ")?;
    if !rest.trim().starts_with("HTTP/") {
        return None;
    }
    Some(StartLine::Request(MessageKind::from_method(token.trim())))
}

/// `1.x` or `2.x`
fn is_response_version(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => {
            matches!(major, "1" | "2")
                && minor.len() == 1
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// `<name>: <value>` with the name upper-cased
fn parse_header(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name.to_ascii_uppercase(), value.trim().to_string()))
}
