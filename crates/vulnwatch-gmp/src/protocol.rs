//! GMP command construction and response parsing
//!
//! GMP is a request/response XML protocol: every command is a single element
//! and the reply is a single `<{command}_response status=".." status_text="..">`
//! element. Everything here is pure so it can be tested without a gvmd.

use base64::Engine;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use vulnwatch_core::{Error, Result, TaskStatus};

use crate::types::{NewTask, TaskInfo};

/// Root element of a GMP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Root element name, e.g. `create_task_response`
    pub name: String,
    pub status: String,
    pub status_text: String,
    /// `id` attribute carried by `create_*` replies
    pub id: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.starts_with('2')
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

pub fn authenticate(username: &str, password: &str) -> String {
    format!(
        "<authenticate><credentials><username>{}</username><password>{}</password></credentials></authenticate>",
        escape(username),
        escape(password)
    )
}

pub fn create_target(name: &str, hosts: &[String], port_list_id: &str) -> String {
    format!(
        "<create_target><name>{}</name><hosts>{}</hosts><port_list id=\"{}\"/></create_target>",
        escape(name),
        escape(&hosts.join(",")),
        escape(port_list_id)
    )
}

pub fn create_schedule(name: &str, icalendar: &str, timezone: &str) -> String {
    format!(
        "<create_schedule><name>{}</name><icalendar>{}</icalendar><timezone>{}</timezone></create_schedule>",
        escape(name),
        escape(icalendar),
        escape(timezone)
    )
}

pub fn create_task(task: &NewTask<'_>) -> String {
    format!(
        "<create_task><name>{}</name><config id=\"{}\"/><target id=\"{}\"/><scanner id=\"{}\"/><schedule id=\"{}\"/></create_task>",
        escape(task.name),
        escape(task.config_id),
        escape(task.target_id),
        escape(task.scanner_id),
        escape(task.schedule_id)
    )
}

pub fn get_task(task_id: &str) -> String {
    format!("<get_tasks task_id=\"{}\"/>", escape(task_id))
}

pub fn get_report(report_id: &str, format_id: &str, filter: &str) -> String {
    format!(
        "<get_reports report_id=\"{}\" format_id=\"{}\" filter=\"{}\" details=\"1\"/>",
        escape(report_id),
        escape(format_id),
        escape(filter)
    )
}

pub fn delete_task(task_id: &str) -> String {
    format!("<delete_task task_id=\"{}\" ultimate=\"0\"/>", escape(task_id))
}

// ── Replies ──────────────────────────────────────────────────────────────────

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn xml_error(e: quick_xml::Error) -> Error {
    Error::Parse(format!("malformed GMP response: {}", e))
}

/// Read the root element of a reply
pub fn parse_response(xml: &str) -> Result<Response> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(Response {
                    name: element_name(&e),
                    status: attr(&e, "status").unwrap_or_default(),
                    status_text: attr(&e, "status_text").unwrap_or_default(),
                    id: attr(&e, "id"),
                });
            }
            Ok(Event::Eof) => return Err(Error::Parse("empty GMP response".to_string())),
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Parse a reply and fail unless its status is 2xx
pub fn expect_success(xml: &str, command: &str) -> Result<Response> {
    let response = parse_response(xml)?;
    if !response.is_success() {
        return Err(Error::Protocol {
            command: command.to_string(),
            status: response.status,
            status_text: response.status_text,
        });
    }
    Ok(response)
}

/// Parse a `create_*` reply into the id of the new resource
pub fn created_id(xml: &str, command: &str) -> Result<String> {
    expect_success(xml, command)?
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::engine(command, "reply carried no id"))
}

/// Extract one task's state from a `get_tasks` reply
pub fn parse_task(xml: &str, task_id: &str) -> Result<TaskInfo> {
    expect_success(xml, "get_tasks")?;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut stack: Vec<String> = Vec::new();
    let mut found = false;
    let mut name = None;
    let mut status: Option<String> = None;
    let mut progress = None;
    let mut last_report = None;
    let mut current_report = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = element_name(&e);
                if tag == "task" && stack.len() == 1 && !found {
                    found = attr(&e, "id").as_deref() == Some(task_id);
                } else if found && tag == "report" && stack.len() == 3 {
                    capture_report(&stack, &e, &mut last_report, &mut current_report);
                }
                stack.push(tag);
            }
            Ok(Event::Empty(e)) => {
                if found && element_name(&e) == "report" && stack.len() == 3 {
                    capture_report(&stack, &e, &mut last_report, &mut current_report);
                }
            }
            Ok(Event::End(_)) => {
                let closed = stack.pop();
                if found && stack.len() == 1 && closed.as_deref() == Some("task") {
                    break;
                }
            }
            Ok(Event::Text(e)) if found && stack.len() == 3 => {
                let text = e.unescape().map_err(xml_error)?.to_string();
                match stack[2].as_str() {
                    "status" => status = Some(text),
                    "name" => name = Some(text),
                    "progress" => progress = text.trim().parse().ok(),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    if !found {
        return Err(Error::engine(
            "get_tasks",
            format!("task {} missing from reply", task_id),
        ));
    }
    let status = status
        .ok_or_else(|| Error::engine("get_tasks", format!("task {} has no status", task_id)))?;

    Ok(TaskInfo {
        task_id: task_id.to_string(),
        name,
        status: TaskStatus::from(status),
        report_id: last_report.or(current_report),
        progress,
    })
}

fn capture_report(
    stack: &[String],
    e: &BytesStart<'_>,
    last_report: &mut Option<String>,
    current_report: &mut Option<String>,
) {
    match stack[2].as_str() {
        "last_report" => *last_report = attr(e, "id"),
        "current_report" => *current_report = attr(e, "id"),
        _ => {}
    }
}

/// Extract and decode the rendered document from a `get_reports` reply.
///
/// The payload is the base64 text sitting directly inside the top-level
/// `<report>` element, after its metadata children. An empty payload is
/// returned as an empty vector.
pub fn parse_report(xml: &str) -> Result<Vec<u8>> {
    expect_success(xml, "get_reports")?;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut stack: Vec<String> = Vec::new();
    let mut seen_report = false;
    let mut payload = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = element_name(&e);
                if tag == "report" && stack.len() == 1 {
                    if seen_report {
                        break;
                    }
                    seen_report = true;
                }
                stack.push(tag);
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(e)) if stack.len() == 2 && stack[1] == "report" => {
                payload.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }
    base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| Error::Parse(format!("report payload is not base64: {}", e)))
}

/// Incremental framing of one GMP document read from the socket in chunks
///
/// The root tag is parsed once. After that, completion is a check on the tail
/// of the buffer, so each chunk costs time proportional to its own size.
#[derive(Debug, Default)]
pub struct DocumentFrame {
    buf: Vec<u8>,
    root: Option<Root>,
}

#[derive(Debug)]
enum Root {
    SelfClosing,
    /// Closing tag bytes, e.g. `</get_tasks_response>`
    Open(Vec<u8>),
}

impl DocumentFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; true once the root element is closed
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        self.buf.extend_from_slice(chunk);
        if self.root.is_none() {
            self.root = root_of(&self.buf);
        }

        match &self.root {
            None => false,
            Some(Root::SelfClosing) => true,
            Some(Root::Open(close)) => {
                let end = self
                    .buf
                    .iter()
                    .rposition(|b| !b.is_ascii_whitespace())
                    .map_or(0, |i| i + 1);
                self.buf[..end].ends_with(close)
            }
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// First element of `buf`, or `None` while its start tag is incomplete
fn root_of(buf: &[u8]) -> Option<Root> {
    let mut reader = Reader::from_reader(buf);
    let mut scratch = Vec::new();

    loop {
        match reader.read_event_into(&mut scratch) {
            Ok(Event::Start(e)) => {
                let mut close = b"</".to_vec();
                close.extend_from_slice(e.name().as_ref());
                close.push(b'>');
                return Some(Root::Open(close));
            }
            Ok(Event::Empty(_)) => return Some(Root::SelfClosing),
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        scratch.clear();
    }
}
