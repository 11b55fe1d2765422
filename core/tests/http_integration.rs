/*
 * http_integration.rs
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

//! Integration tests for the HTTP client. These perform real HTTPS requests
//! and verify the full request/response cycle including TLS and keep-alive
//! reuse.
//!
//! Run with:
//!   cargo test -p vestnik_core --test http_integration -- --ignored --nocapture

use vestnik_core::protocol::http::{fetch_url, CollectHandler, HttpClient, Method};

#[tokio::test]
#[ignore] // requires network
async fn get_over_tls() {
    let host = "example.org";

    println!("Connecting to {}:443...", host);
    let mut conn = HttpClient::connect(host, 443, true).await.expect("TLS connect failed");

    let mut req = conn.request(Method::Get, "/");
    req.header("Accept", "*/*");
    req.header("User-Agent", "Vestnik/0.1 (integration-test)");

    let mut handler = CollectHandler::new();
    conn.send(req, &mut handler).await.expect("request failed");

    let response = handler.response.as_ref().expect("no status line");
    println!("Status: {}", response.code);
    for (name, value) in &handler.headers {
        println!("{}: {}", name, value);
    }
    println!("Body length: {} bytes", handler.body.len());

    assert!(handler.is_success());
    assert!(!handler.body.is_empty());
    assert!(handler.header_value("content-type").is_some());
}

#[tokio::test]
#[ignore] // requires network
async fn keep_alive_reuse() {
    let host = "example.org";
    let mut conn = HttpClient::connect(host, 443, true).await.expect("TLS connect failed");

    for i in 0..2 {
        assert!(conn.is_reusable(), "connection not reusable before request {}", i);
        let mut req = conn.request(Method::Get, "/");
        req.header("Accept", "*/*");
        let mut handler = CollectHandler::new();
        conn.send(req, &mut handler).await.expect("request failed");
        assert!(handler.is_success(), "request {} failed", i);
    }
}

#[tokio::test]
#[ignore] // requires network
async fn fetch_url_follows_redirects() {
    // http:// URL on a host that redirects to https.
    let body = fetch_url("http://example.org/").await.expect("fetch failed");
    println!("Fetched {} bytes", body.len());
    assert!(!body.is_empty());
}
