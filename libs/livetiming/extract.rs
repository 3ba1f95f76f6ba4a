//! Feed extraction from debug recordings
//!
//! A debug recording holds one raw frame per line. Lines written by older
//! recorders are not always strict JSON (single quotes, `True`/`False`),
//! so a line that fails strict parsing is normalised and parsed again.
//! Lines that still fail to parse are counted and skipped.

use crate::sink::{FileSink, Result, Sink};
use hubsockets::LegacyEnvelope;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

const STREAMING_HUB: &str = "streaming";
const FEED_TARGET: &str = "feed";

/// Outcome of [`extract_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub messages: usize,
    pub errors: usize,
}

/// Rewrite a line into JSON-compatible syntax
pub fn normalize(line: &str) -> String {
    line.replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
}

/// Collect the feed arguments of every streaming-hub message in `lines`
///
/// Returns the messages in input order together with the number of lines
/// that could not be parsed. Blank lines are neither messages nor errors.
pub fn messages_from_raw<I, S>(lines: I) -> (Vec<Value>, usize)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut messages = Vec::new();
    let mut errors = 0;

    for (index, line) in lines.into_iter().enumerate() {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        match parse_value(line).and_then(feed_messages) {
            Ok(found) => messages.extend(found),
            Err(e) => {
                debug!(line = index + 1, "Skipping unparseable line: {}", e);
                errors += 1;
            }
        }
    }

    (messages, errors)
}

/// Strict JSON first; normalised text only when that fails
fn parse_value(line: &str) -> serde_json::Result<Value> {
    serde_json::from_str(line).or_else(|_| serde_json::from_str(&normalize(line)))
}

fn feed_messages(value: Value) -> serde_json::Result<Vec<Value>> {
    // Core invocation records carry the feed at the top level
    if value.get("type").and_then(Value::as_u64) == Some(1) {
        let is_feed = value
            .get("target")
            .and_then(Value::as_str)
            .is_some_and(|target| target.eq_ignore_ascii_case(FEED_TARGET));
        return Ok(match value.get("arguments") {
            Some(arguments) if is_feed => vec![arguments.clone()],
            _ => Vec::new(),
        });
    }

    let envelope: LegacyEnvelope = serde_json::from_value(value)?;
    Ok(envelope
        .messages
        .into_iter()
        .filter(|message| message.hub.eq_ignore_ascii_case(STREAMING_HUB))
        .map(|message| Value::Array(message.arguments))
        .collect())
}

/// Extract `input` into `output`, one JSON message per line
pub fn extract_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<ExtractSummary> {
    let reader = BufReader::new(std::fs::File::open(input.as_ref())?);
    let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
    let (messages, errors) = messages_from_raw(&lines);

    let mut sink = FileSink::open(output.as_ref(), false)?;
    for message in &messages {
        sink.write_line(&message.to_string())?;
    }
    sink.close()?;

    info!(
        input = %input.as_ref().display(),
        messages = messages.len(),
        errors,
        "Extraction finished"
    );
    Ok(ExtractSummary {
        messages: messages.len(),
        errors,
    })
}
