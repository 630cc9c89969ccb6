//! Wire protocol between this process and its parent.
//!
//! Every protocol event is exactly one stdout line: the `>>>` sentinel
//! immediately followed by a single-line JSON document with one top-level
//! key. Parents stream the child's stdout, act on sentinel lines and ignore
//! everything else.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix that distinguishes protocol lines from incidental log output.
pub const SENTINEL: &str = ">>>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredField {
    pub field_name: String,
}

impl RequiredField {
    pub fn new(name: &str) -> Self {
        Self {
            field_name: name.to_string(),
        }
    }
}

/// Terminal successful outcome of the workflow phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub scheduled_time: String,
    pub message: String,
}

/// Envelope for payloads sent to the parent process. Exactly one top-level
/// key identifies the payload kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    #[serde(rename = "requiredFields")]
    RequiredFields(Vec<RequiredField>),
    #[serde(rename = "result")]
    Result(Outcome),
}

/// Emits `", "` and `": "` item separators. Parent parsers golden-test
/// against recorded event lines, so the byte layout is part of the
/// protocol, not just the JSON structure.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }
}

impl ProtocolEvent {
    /// The JSON payload as a single line. String escaping guarantees no raw
    /// newline can appear inside the document.
    pub fn wire_json(&self) -> Result<String> {
        let mut buf = Vec::with_capacity(128);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
        self.serialize(&mut ser)?;
        String::from_utf8(buf)
            .map_err(|e| Error::Validation(format!("event payload is not valid UTF-8: {}", e)))
    }

    /// The full protocol line, sentinel included.
    pub fn wire_line(&self) -> Result<String> {
        Ok(format!("{}{}", SENTINEL, self.wire_json()?))
    }
}

/// Destination for protocol events. The registry's report actions are the
/// only producers on the real path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ProtocolEvent) -> Result<()>;
}

/// Production sink: one sentinel-prefixed line per event on stdout, flushed
/// immediately so a streaming parent observes it without buffering delay.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &ProtocolEvent) -> Result<()> {
        let line = event.wire_line()?;
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", line)?;
        handle.flush()?;
        Ok(())
    }
}

/// Captures emitted lines in memory for assertions.
#[derive(Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl EventSink for BufferSink {
    fn emit(&self, event: &ProtocolEvent) -> Result<()> {
        self.lines.lock().unwrap().push(event.wire_line()?);
        Ok(())
    }
}
