/*
 * connection.rs
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

//! HTTP connection: one TCP or TLS stream, drives the H1 parser, invokes ResponseHandler.

use std::io;

use bytes::BytesMut;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as TokioTlsStream;

use crate::protocol::http::h1::{H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::request::RequestBuilder;
use crate::protocol::http::request::Method;
use crate::protocol::http::response::Response;
use crate::protocol::http::ResponseHandler;

/// Unified stream: plain TCP or TLS. Implements AsyncRead + AsyncWrite.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(TokioTlsStream<TcpStream>),
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Bridges H1 parser callbacks to the connection state and user's ResponseHandler.
struct H1Driver<'a> {
    h1_status: &'a mut Option<(u16, Option<String>)>,
    h1_headers: &'a mut Vec<(String, String)>,
    handler: &'a mut (dyn ResponseHandler + Send),
}

impl H1ResponseHandler for H1Driver<'_> {
    fn status(&mut self, code: u16, reason: Option<&str>) {
        *self.h1_status = Some((code, reason.map(|s| s.to_string())));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.h1_headers.push((name.to_string(), value.to_string()));
    }

    fn start_body(&mut self) {
        self.handler.start_body();
    }

    fn body_chunk(&mut self, data: &[u8]) {
        self.handler.body_chunk(data);
    }

    fn end_body(&mut self) {
        self.handler.end_body();
    }

    fn complete(&mut self) {
        self.handler.complete();
    }
}

/// HTTP/1.1 connection: holds the stream and drives the response read loop.
/// Call send() to issue a request; the connection is reusable afterwards
/// unless `is_reusable` returns false.
pub struct HttpConnection {
    stream: HttpStream,
    host: String,
    port: u16,
    secure: bool,

    read_buf: BytesMut,
    parser: ResponseParser,
    h1_status: Option<(u16, Option<String>)>,
    h1_headers: Vec<(String, String)>,

    /// False once the server announced Connection: close or a read-to-EOF body was used.
    reusable: bool,
}

impl HttpConnection {
    /// Create from an already-connected stream. Used by HttpClient::connect().
    pub fn new(stream: HttpStream, host: String, port: u16, secure: bool) -> Self {
        Self {
            stream,
            host,
            port,
            secure,
            read_buf: BytesMut::with_capacity(8192),
            parser: ResponseParser::new(),
            h1_status: None,
            h1_headers: Vec::new(),
            reusable: true,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// True while the connection may carry another request (keep-alive).
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Build a request (method, path). Use send() to execute it with a handler.
    pub fn request(&mut self, method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, path.into())
    }

    /// Send the request and run the read loop until the response is complete.
    /// Handler is invoked as data arrives. On Err the handler's `failed` has
    /// been called and the connection must be discarded.
    pub async fn send(
        &mut self,
        request: RequestBuilder,
        handler: &mut (dyn ResponseHandler + Send),
    ) -> io::Result<()> {
        match self.send_inner(request, handler).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reusable = false;
                handler.failed(&e);
                Err(e)
            }
        }
    }

    async fn send_inner(
        &mut self,
        request: RequestBuilder,
        handler: &mut (dyn ResponseHandler + Send),
    ) -> io::Result<()> {
        self.h1_status = None;
        self.h1_headers.clear();
        self.parser.reset();

        self.write_request(&request).await?;

        let mut status_delivered = false;
        loop {
            self.drive_parser(handler)?;

            if self.parser.state() == ParseState::HeadersComplete && !status_delivered {
                self.deliver_head(handler, &mut status_delivered);
                // Body bytes may already be buffered; parse before reading more.
                self.drive_parser(handler)?;
            }
            if self.parser.state() == ParseState::Done {
                return Ok(());
            }

            let mut tmp = [0u8; 8192];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                self.reusable = false;
                let mut driver = H1Driver {
                    h1_status: &mut self.h1_status,
                    h1_headers: &mut self.h1_headers,
                    handler,
                };
                self.parser.eof(&mut driver)?;
                if self.parser.state() == ParseState::Done {
                    return Ok(());
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "HTTP connection closed",
                ));
            }
            self.read_buf.extend_from_slice(&tmp[..n]);
        }
    }

    fn drive_parser(&mut self, handler: &mut (dyn ResponseHandler + Send)) -> io::Result<()> {
        let mut driver = H1Driver {
            h1_status: &mut self.h1_status,
            h1_headers: &mut self.h1_headers,
            handler,
        };
        self.parser.receive(&mut self.read_buf, &mut driver)
    }

    /// Deliver status + headers to the handler and configure body framing.
    fn deliver_head(
        &mut self,
        handler: &mut (dyn ResponseHandler + Send),
        status_delivered: &mut bool,
    ) {
        let (code, reason) = self.h1_status.take().unwrap_or((0, None));
        let content_length = self
            .h1_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<u64>().ok());
        let chunked = self
            .h1_headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.contains("chunked"));
        if self.h1_headers.iter().any(|(k, v)| {
            k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close")
        }) {
            self.reusable = false;
        }

        let response = match reason {
            Some(r) => Response::with_reason(code, r),
            None => Response::new(code),
        };
        if response.is_success() {
            handler.ok(response);
        } else {
            handler.error(response);
        }
        for (name, value) in &self.h1_headers {
            handler.header(name, value);
        }
        *status_delivered = true;

        let has_body = code != 204 && code != 304;
        if has_body && content_length.is_none() && !chunked {
            // Read-to-EOF body; the connection dies with the response.
            self.reusable = false;
        }
        let mut driver = H1Driver {
            h1_status: &mut self.h1_status,
            h1_headers: &mut self.h1_headers,
            handler,
        };
        self.parser
            .set_body_mode(content_length, chunked, has_body, &mut driver);
    }

    async fn write_request(&mut self, request: &RequestBuilder) -> io::Result<()> {
        let host_header = if (self.secure && self.port != 443) || (!self.secure && self.port != 80)
        {
            format!("{}:{}", self.host, self.port)
        } else {
            self.host.clone()
        };
        let mut req = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            request.method.as_str(),
            request.path,
            host_header
        );
        for (k, v) in &request.headers {
            req.push_str(k);
            req.push_str(": ");
            req.push_str(v);
            req.push_str("\r\n");
        }
        match &request.body {
            Some(body) => {
                if !request
                    .headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                {
                    req.push_str(&format!("Content-Length: {}\r\n", body.len()));
                }
            }
            None => req.push_str("Connection: keep-alive\r\n"),
        }
        req.push_str("\r\n");
        self.stream.write_all(req.as_bytes()).await?;
        if let Some(body) = &request.body {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }
}
