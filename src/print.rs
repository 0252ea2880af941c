//! The serialising output sink.
//!
//! Partition workers run concurrently, but records must not interleave on
//! stdout. All workers send `(record, receipt)` pairs into one queue; a single
//! task drains it, writes each record, then signals the receipt. Workers wait
//! on their receipt before reading on, which keeps per-partition ordering
//! intact without any locking around stdout.

use crate::{client::Record, error::ParseError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flume::{Receiver, Sender};
use serde::Serialize;
use std::{io::Write, str::FromStr};
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// How raw key/value bytes are presented.
pub enum Encoding {
    /// The bytes as text, verbatim where they are valid UTF-8.
    #[default]
    String,
    Hex,
    Base64,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hex => "hex",
            Self::Base64 => "base64",
        }
    }
}

impl FromStr for Encoding {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            _ => Err(ParseError::InvalidEncoding(s.to_owned())),
        }
    }
}

/// Encode a nullable byte slice. `None` stays `None`: a missing key is
/// distinct from an empty one.
pub fn encode_bytes(data: Option<&[u8]>, encoding: Encoding) -> Option<String> {
    let data = data?;
    Some(match encoding {
        Encoding::String => String::from_utf8_lossy(data).into_owned(),
        Encoding::Hex => hex::encode(data),
        Encoding::Base64 => BASE64.encode(data),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// The JSON object emitted for each consumed message.
pub struct ConsumedMessage {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ConsumedMessage {
    pub fn new(record: &Record, encode_key: Encoding, encode_value: Encoding) -> Self {
        Self {
            partition: record.partition,
            offset: record.offset,
            key: encode_bytes(record.key.as_deref(), encode_key),
            value: encode_bytes(record.value.as_deref(), encode_value),
            timestamp: record
                .timestamp
                .map(|t| t.format(&Rfc3339).expect("Timestamp format error")),
        }
    }
}

#[derive(Debug)]
/// A record queued for printing, with the channel acknowledging emission.
pub struct PrintJob {
    pub message: ConsumedMessage,
    pub receipt: Sender<()>,
}

/// Drain the queue until all senders are gone, writing one record at a time.
pub async fn run<W: Write + Send>(jobs: Receiver<PrintJob>, pretty: bool, mut out: W) {
    while let Ok(PrintJob { message, receipt }) = jobs.recv_async().await {
        if let Err(err) = write_message(&mut out, &message, pretty) {
            log::error!("failed to write message: {err}");
        }
        // we don't care if the receipt can be delivered
        receipt.send(()).ok();
    }
}

fn write_message<W: Write>(
    out: &mut W,
    message: &ConsumedMessage,
    pretty: bool,
) -> std::io::Result<()> {
    let line = if pretty {
        serde_json::to_string_pretty(message)
    } else {
        serde_json::to_string(message)
    }?;
    writeln!(out, "{line}")?;
    out.flush()
}
