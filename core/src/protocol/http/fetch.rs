/*
 * fetch.rs
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

//! One-shot GET against an arbitrary http/https URL.
//!
//! Thumbnails, avatars, captcha images and upload servers live on assorted
//! CDN hosts, so these fetches use a fresh connection per request rather
//! than the persistent API connection.

use std::io;

use crate::protocol::http::client::HttpClient;
use crate::protocol::http::handler::CollectHandler;
use crate::protocol::http::request::Method;

/// Maximum redirects followed by `fetch_url`.
const MAX_REDIRECTS: usize = 5;

/// Decomposed absolute http/https URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Path including query string, always starting with '/'.
    pub path: String,
}

/// Parse an absolute http:// or https:// URL. Fragments are dropped.
pub fn parse_url(url: &str) -> io::Result<ParsedUrl> {
    let (secure, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported URL scheme: {}", url),
        ));
    };
    let rest = rest.split('#').next().unwrap_or(rest);
    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rfind(':') {
        Some(pos) => {
            let port = authority[pos + 1..]
                .parse::<u16>()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid port"))?;
            (&authority[..pos], port)
        }
        None => (authority, if secure { 443 } else { 80 }),
    };
    if host.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty host"));
    }
    Ok(ParsedUrl {
        secure,
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

/// Resolve a Location header against the URL it came from.
fn resolve_redirect(base: &ParsedUrl, location: &str) -> io::Result<ParsedUrl> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return parse_url(location);
    }
    let mut next = base.clone();
    if location.starts_with('/') {
        next.path = location.to_string();
    } else {
        let dir = match base.path.rfind('/') {
            Some(pos) => &base.path[..pos + 1],
            None => "/",
        };
        next.path = format!("{}{}", dir, location);
    }
    Ok(next)
}

/// GET the given URL, following up to `MAX_REDIRECTS` redirects, and return
/// the response body. Non-2xx terminal status is an error.
pub async fn fetch_url(url: &str) -> io::Result<Vec<u8>> {
    let mut target = parse_url(url)?;
    for _ in 0..=MAX_REDIRECTS {
        let mut conn = HttpClient::connect(&target.host, target.port, target.secure).await?;
        let mut req = conn.request(Method::Get, target.path.clone());
        req.header("Accept", "*/*");
        let mut handler = CollectHandler::new();
        conn.send(req, &mut handler).await?;

        let response = handler
            .response
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no response status"))?;
        if response.is_redirect() {
            let location = handler.header_value("location").ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "redirect without Location")
            })?;
            target = resolve_redirect(&target, location)?;
            continue;
        }
        if !response.is_success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("HTTP status {} fetching {}", response.code, url),
            ));
        }
        return Ok(handler.body);
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        format!("too many redirects fetching {}", url),
    ))
}
