// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits an unbounded byte stream into newline-delimited records.

use bytes::BytesMut;
use std::fmt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

/// One log line, without its line terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record(String);

impl Record {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl From<String> for Record {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Record {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Line decoder for `\n` and `\r\n` terminated input.
///
/// Bytes after the last newline stay buffered until more input arrives. At
/// end of stream a non-empty tail is emitted as the last record. Empty lines
/// are emitted as empty records. Invalid UTF-8 is replaced, never rejected.
#[derive(Debug, Default)]
pub struct LineFramer {
    // Bytes of the buffer already known to hold no newline.
    scanned: usize,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineFramer {
    type Item = Record;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Record>, Self::Error> {
        let Some(offset) = buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = buf.len();
            return Ok(None);
        };

        let newline = self.scanned + offset;
        self.scanned = 0;

        let line = buf.split_to(newline + 1);
        let mut line = &line[..newline];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        Ok(Some(Record::from_bytes(line)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Record>, Self::Error> {
        if let Some(record) = self.decode(buf)? {
            return Ok(Some(record));
        }
        self.scanned = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let tail = buf.split();
        Ok(Some(Record::from_bytes(&tail)))
    }
}

/// Frames `input` into a stream of records.
pub fn frame_lines<R: AsyncRead>(input: R) -> FramedRead<R, LineFramer> {
    FramedRead::new(input, LineFramer::new())
}
