/*
 * h1.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Vestnik, a VK messaging backend for instant-messaging clients.
 *
 * Vestnik is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Vestnik is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Vestnik.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP/1.1 response parser: push state machine fed from the read buffer.
//!
//! The connection feeds bytes via `receive`; the parser pauses in
//! `HeadersComplete` so the connection can inspect Content-Length /
//! Transfer-Encoding and call `set_body_mode` before body parsing continues.

use std::io;

use bytes::{Buf, BytesMut};

/// Parser callbacks. The connection bridges these to the user's `ResponseHandler`.
pub trait H1ResponseHandler {
    fn status(&mut self, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn start_body(&mut self);
    fn body_chunk(&mut self, data: &[u8]);
    fn end_body(&mut self);
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Waiting for the status line.
    StatusLine,
    /// Reading header lines until the blank line.
    Headers,
    /// Headers seen; waiting for `set_body_mode`.
    HeadersComplete,
    /// Reading a body with known Content-Length.
    Body,
    /// Reading a chunk-size line.
    ChunkSize,
    /// Reading chunk payload.
    ChunkData,
    /// Reading the CRLF after a chunk.
    ChunkCrlf,
    /// Reading trailer lines after the last chunk.
    Trailer,
    /// Reading a body delimited by connection close.
    BodyToEof,
    /// Response complete.
    Done,
}

pub struct ResponseParser {
    state: ParseState,
    /// Remaining bytes of the current body or chunk.
    remaining: u64,
    body_started: bool,
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Take one CRLF-terminated line out of the buffer, without the CRLF.
/// Returns None if no complete line is buffered yet.
fn take_line(buf: &mut BytesMut) -> Option<Vec<u8>> {
    let pos = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = buf[..pos].to_vec();
    buf.advance(pos + 2);
    Some(line)
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            remaining: 0,
            body_started: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.remaining = 0;
        self.body_started = false;
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Configure body framing after headers. Must be called in `HeadersComplete`.
    /// `has_body` false (204/304/HEAD) completes the response immediately.
    pub fn set_body_mode(
        &mut self,
        content_length: Option<u64>,
        chunked: bool,
        has_body: bool,
        handler: &mut dyn H1ResponseHandler,
    ) {
        debug_assert_eq!(self.state, ParseState::HeadersComplete);
        if !has_body {
            self.state = ParseState::Done;
            handler.complete();
            return;
        }
        handler.start_body();
        self.body_started = true;
        if chunked {
            self.state = ParseState::ChunkSize;
        } else if let Some(len) = content_length {
            if len == 0 {
                self.finish_body(handler);
            } else {
                self.remaining = len;
                self.state = ParseState::Body;
            }
        } else {
            self.state = ParseState::BodyToEof;
        }
    }

    /// Signal connection close. Completes a read-to-EOF body, otherwise an error.
    pub fn eof(&mut self, handler: &mut dyn H1ResponseHandler) -> io::Result<()> {
        match self.state {
            ParseState::BodyToEof => {
                self.finish_body(handler);
                Ok(())
            }
            ParseState::Done => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-response",
            )),
        }
    }

    fn finish_body(&mut self, handler: &mut dyn H1ResponseHandler) {
        handler.end_body();
        handler.complete();
        self.state = ParseState::Done;
    }

    /// Consume as much of `buf` as possible, invoking handler callbacks.
    /// Pauses in `HeadersComplete` and stops in `Done`.
    pub fn receive(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut dyn H1ResponseHandler,
    ) -> io::Result<()> {
        loop {
            match self.state {
                ParseState::StatusLine => {
                    let Some(line) = take_line(buf) else { return Ok(()) };
                    let line = String::from_utf8_lossy(&line).into_owned();
                    // "HTTP/1.1 200 OK"
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or("");
                    if !version.starts_with("HTTP/1.") {
                        return Err(protocol_error("bad status line"));
                    }
                    let code: u16 = parts
                        .next()
                        .and_then(|c| c.parse().ok())
                        .ok_or_else(|| protocol_error("bad status code"))?;
                    handler.status(code, parts.next());
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = take_line(buf) else { return Ok(()) };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    let line = String::from_utf8_lossy(&line).into_owned();
                    let Some(colon) = line.find(':') else {
                        return Err(protocol_error("bad header line"));
                    };
                    handler.header(line[..colon].trim(), line[colon + 1..].trim());
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::Body => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = (buf.len() as u64).min(self.remaining) as usize;
                    handler.body_chunk(&buf[..take]);
                    buf.advance(take);
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.finish_body(handler);
                    }
                }
                ParseState::ChunkSize => {
                    let Some(line) = take_line(buf) else { return Ok(()) };
                    let size_str = String::from_utf8_lossy(&line);
                    let size_str = size_str.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| protocol_error("bad chunk size"))?;
                    if size == 0 {
                        self.state = ParseState::Trailer;
                    } else {
                        self.remaining = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = (buf.len() as u64).min(self.remaining) as usize;
                    handler.body_chunk(&buf[..take]);
                    buf.advance(take);
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = ParseState::ChunkCrlf;
                    }
                }
                ParseState::ChunkCrlf => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(protocol_error("missing CRLF after chunk"));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::Trailer => {
                    let Some(line) = take_line(buf) else { return Ok(()) };
                    if line.is_empty() {
                        self.finish_body(handler);
                        return Ok(());
                    }
                    // Trailer headers are ignored.
                }
                ParseState::BodyToEof => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    handler.body_chunk(&buf[..]);
                    let len = buf.len();
                    buf.advance(len);
                }
                ParseState::Done => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events {
        code: Option<u16>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        complete: bool,
    }

    impl H1ResponseHandler for Events {
        fn status(&mut self, code: u16, _reason: Option<&str>) {
            self.code = Some(code);
        }
        fn header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }
        fn start_body(&mut self) {}
        fn body_chunk(&mut self, data: &[u8]) {
            self.body.extend_from_slice(data);
        }
        fn end_body(&mut self) {}
        fn complete(&mut self) {
            self.complete = true;
        }
    }

    fn drive(raw: &[u8]) -> Events {
        let mut parser = ResponseParser::new();
        let mut events = Events::default();
        let mut buf = BytesMut::from(raw);
        parser.receive(&mut buf, &mut events).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
        let content_length = events
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse().ok());
        let chunked = events
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.contains("chunked"));
        parser.set_body_mode(content_length, chunked, true, &mut events);
        parser.receive(&mut buf, &mut events).unwrap();
        events
    }

    #[test]
    fn content_length_body() {
        let events = drive(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(events.code, Some(200));
        assert_eq!(events.body, b"hello");
        assert!(events.complete);
    }

    #[test]
    fn chunked_body() {
        let events =
            drive(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n");
        assert_eq!(events.body, b"wikipedia");
        assert!(events.complete);
    }

    #[test]
    fn split_feed() {
        let raw: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 3\r\n\r\nabc";
        let mut parser = ResponseParser::new();
        let mut events = Events::default();
        let mut buf = BytesMut::new();
        for chunk in raw.chunks(7) {
            buf.extend_from_slice(chunk);
            parser.receive(&mut buf, &mut events).unwrap();
            if parser.state() == ParseState::HeadersComplete {
                parser.set_body_mode(Some(3), false, true, &mut events);
                // Body bytes may already be buffered along with the headers.
                parser.receive(&mut buf, &mut events).unwrap();
            }
        }
        assert_eq!(events.code, Some(404));
        assert_eq!(events.body, b"abc");
        assert!(events.complete);
    }

    #[test]
    fn no_body_completes_immediately() {
        let raw: &[u8] = b"HTTP/1.1 304 Not Modified\r\n\r\n";
        let mut parser = ResponseParser::new();
        let mut events = Events::default();
        let mut buf = BytesMut::from(raw);
        parser.receive(&mut buf, &mut events).unwrap();
        parser.set_body_mode(None, false, false, &mut events);
        assert!(events.complete);
        assert!(events.body.is_empty());
    }
}
