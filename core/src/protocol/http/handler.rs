/*
 * handler.rs
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

//! HTTP response handler trait (push model).
//!
//! Events: status → headers → start_body → body_chunk (×n) → end_body → complete / failed.

use crate::protocol::http::response::Response;

/// Handler for HTTP response events. The connection drives this as data arrives.
///
/// Flow for a response with body:
/// 1. `ok(response)` or `error(response)` — status received
/// 2. `header(name, value)` — for each response header
/// 3. `start_body()` — body begins
/// 4. `body_chunk(data)` — for each chunk of body data
/// 5. `end_body()` — body complete
/// 6. `complete()` — response fully complete
///
/// On connection/protocol failure only `failed(error)` is called.
pub trait ResponseHandler {
    /// Called when a successful (2xx) status is received.
    fn ok(&mut self, response: Response);

    /// Called when a non-2xx status is received.
    fn error(&mut self, response: Response);

    /// Called for each response header. Name may repeat for multi-value headers.
    fn header(&mut self, name: &str, value: &str);

    /// Called when the response body is about to start. Not called for 204/304 etc.
    fn start_body(&mut self) {}

    /// Called for each chunk of body data. Data is only valid for the duration of the call.
    fn body_chunk(&mut self, data: &[u8]);

    /// Called when the response body is complete.
    fn end_body(&mut self) {}

    /// Called when the response is fully complete.
    fn complete(&mut self);

    /// Called when the request fails (connection error, protocol error).
    fn failed(&mut self, error: &std::io::Error);
}

/// Handler that collects the status, headers and full body into itself.
/// The workhorse for API calls and image fetches, which want the whole
/// payload before they can do anything with it.
#[derive(Default)]
pub struct CollectHandler {
    pub response: Option<Response>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub failure: Option<String>,
}

impl CollectHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the first header with the given name, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.response.as_ref().map(|r| r.is_success()).unwrap_or(false)
    }
}

impl ResponseHandler for CollectHandler {
    fn ok(&mut self, response: Response) {
        self.response = Some(response);
    }

    fn error(&mut self, response: Response) {
        self.response = Some(response);
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn body_chunk(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn complete(&mut self) {}

    fn failed(&mut self, error: &std::io::Error) {
        self.failure = Some(error.to_string());
    }
}
