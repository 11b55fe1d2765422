/*
 * mod.rs
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

//! HTTP/1.1 client with push-parsed responses.
//!
//! - Callback-based response API: `ResponseHandler` with `ok`/`error`, `header`,
//!   `start_body`, `body_chunk`, `end_body`, `complete`, `failed`.
//! - Buffers: `bytes` crate (BytesMut for the parse buffer).
//! - One connection per host with keep-alive; the VK pipelines reconnect when
//!   the server drops the connection between commands.
//! - `fetch_url` issues a one-shot GET against an arbitrary http/https URL
//!   with redirect following (thumbnails, avatars, captcha images).

mod fetch;
mod handler;
mod request;
mod response;

pub mod client;
pub mod connection;
pub mod h1;

pub use client::HttpClient;
pub use connection::{HttpConnection, HttpStream};
pub use fetch::{fetch_url, parse_url, ParsedUrl};
pub use handler::{CollectHandler, ResponseHandler};
pub use request::{Method, RequestBuilder};
pub use response::Response;
