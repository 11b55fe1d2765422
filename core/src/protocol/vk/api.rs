/*
 * api.rs
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

//! VK API method calls.
//!
//! A single persistent HTTPS connection to `api.vk.com`, re-established on
//! demand when the server closes it. Every method call is a urlencoded POST
//! to `/method/{name}`; the session pipeline serializes calls, so one
//! connection suffices.

use std::future::Future;

use log::{debug, warn};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::{VkError, VK_ERROR_CAPTCHA_NEEDED};
use crate::protocol::http::{
    fetch_url, parse_url, CollectHandler, HttpClient, HttpConnection, Method,
};

use super::types::{field_i64, field_str, API_HOST, API_PATH, API_PORT, API_VERSION};

/// Request parameters as name/value pairs, urlencoded at send time.
pub type Params = Vec<(String, String)>;

/// Seam between the pipelines and the wire. The pipelines are generic over
/// this so tests can substitute a scripted implementation.
pub trait VkApi: Send {
    /// Invoke an API method. Returns the `response` payload.
    fn call<'a>(
        &'a mut self,
        method: &'a str,
        params: &'a [(String, String)],
    ) -> impl Future<Output = Result<Value, VkError>> + Send + 'a;

    /// Download an arbitrary URL (thumbnails, avatars, captcha images).
    /// Not an API method call.
    fn fetch<'a>(
        &'a mut self,
        url: &'a str,
    ) -> impl Future<Output = Result<Vec<u8>, VkError>> + Send + 'a;

    /// POST a raw body to an arbitrary URL (photo upload servers) and return
    /// the response body.
    fn post<'a>(
        &'a mut self,
        url: &'a str,
        content_type: &'a str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, VkError>> + Send + 'a;
}

/// Live connection to api.vk.com.
pub struct ApiConnection {
    access_token: String,
    conn: Option<HttpConnection>,
}

impl ApiConnection {
    pub fn new(access_token: String) -> Self {
        ApiConnection { access_token, conn: None }
    }

    async fn conn(&mut self) -> Result<&mut HttpConnection, VkError> {
        let stale = !matches!(&self.conn, Some(c) if c.is_reusable());
        if stale {
            let conn = HttpClient::connect(API_HOST, API_PORT, true)
                .await
                .map_err(|e| VkError::Http(format!("connect {}: {}", API_HOST, e)))?;
            return Ok(self.conn.insert(conn));
        }
        match self.conn.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(VkError::Http(format!("connect {}: no connection", API_HOST))),
        }
    }

    async fn call_inner(&mut self, method: &str, params: &[(String, String)]) -> Result<Value, VkError> {
        let body = encode_params(params, &self.access_token);
        debug!("vk: calling {}", method);

        let path = format!("{}{}", API_PATH, method);
        // One retry on a dead keep-alive connection.
        let mut retried = false;
        let handler = loop {
            let conn = self.conn().await?;
            let mut req = conn.request(Method::Post, path.clone());
            req.header("Content-Type", "application/x-www-form-urlencoded")
                .body(body.clone().into_bytes());
            let mut handler = CollectHandler::new();
            match conn.send(req, &mut handler).await {
                Ok(()) => break handler,
                Err(e) => {
                    self.conn = None;
                    if retried {
                        return Err(VkError::Http(format!("{} failed: {}", method, e)));
                    }
                    retried = true;
                    debug!("vk: retrying {} on fresh connection: {}", method, e);
                }
            }
        };

        let code = handler.response.as_ref().map(|r| r.code).unwrap_or(0);
        if !handler.is_success() {
            return Err(VkError::Http(format!("{}: HTTP {}", method, code)));
        }

        let doc: Value = serde_json::from_slice(&handler.body)
            .map_err(|e| VkError::Json(format!("{}: {}", method, e)))?;
        check_api_error(method, &doc)?;
        match doc.get("response") {
            Some(v) => Ok(v.clone()),
            None => Err(VkError::Json(format!("{}: no response element", method))),
        }
    }
}

impl VkApi for ApiConnection {
    fn call<'a>(
        &'a mut self,
        method: &'a str,
        params: &'a [(String, String)],
    ) -> impl Future<Output = Result<Value, VkError>> + Send + 'a {
        self.call_inner(method, params)
    }

    fn fetch<'a>(
        &'a mut self,
        url: &'a str,
    ) -> impl Future<Output = Result<Vec<u8>, VkError>> + Send + 'a {
        async move {
            fetch_url(url)
                .await
                .map_err(|e| VkError::Http(format!("fetch {}: {}", url, e)))
        }
    }

    fn post<'a>(
        &'a mut self,
        url: &'a str,
        content_type: &'a str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, VkError>> + Send + 'a {
        async move {
            let parsed =
                parse_url(url).map_err(|e| VkError::Http(format!("post {}: {}", url, e)))?;
            let mut conn = HttpClient::connect(&parsed.host, parsed.port, parsed.secure)
                .await
                .map_err(|e| VkError::Http(format!("connect {}: {}", parsed.host, e)))?;
            let mut req = conn.request(Method::Post, parsed.path.clone());
            req.header("Content-Type", content_type).body(body);
            let mut handler = CollectHandler::new();
            conn.send(req, &mut handler)
                .await
                .map_err(|e| VkError::Http(format!("post {}: {}", url, e)))?;
            if !handler.is_success() {
                let code = handler.response.as_ref().map(|r| r.code).unwrap_or(0);
                return Err(VkError::Http(format!("post {}: HTTP {}", url, code)));
            }
            Ok(handler.body)
        }
    }
}

/// Page through a v5.x list method of the `{count, items: [...]}` shape,
/// advancing `offset` by the page size until the server hands back an empty
/// page. The `count` field is not a reliable terminator and is ignored.
pub async fn call_items<A: VkApi>(
    api: &mut A,
    method: &str,
    params: &[(String, String)],
) -> Result<Vec<Value>, VkError> {
    let mut items = Vec::new();
    let mut offset = 0usize;
    loop {
        let mut p = params.to_vec();
        p.push(("offset".to_string(), offset.to_string()));
        let response = api.call(method, &p).await?;
        let page = match response.get("items").and_then(Value::as_array) {
            Some(page) => page,
            None => return Err(VkError::Json(format!("{}: no items element", method))),
        };
        if page.is_empty() {
            return Ok(items);
        }
        offset += page.len();
        items.extend(page.iter().cloned());
    }
}

/// Urlencode parameters and append the access token and API version.
fn encode_params(params: &[(String, String)], access_token: &str) -> String {
    let mut body = String::new();
    for (name, value) in params {
        push_param(&mut body, name, value);
    }
    push_param(&mut body, "access_token", access_token);
    push_param(&mut body, "v", API_VERSION);
    body
}

fn push_param(body: &mut String, name: &str, value: &str) {
    if !body.is_empty() {
        body.push('&');
    }
    body.push_str(&utf8_percent_encode(name, NON_ALPHANUMERIC).to_string());
    body.push('=');
    body.push_str(&utf8_percent_encode(value, NON_ALPHANUMERIC).to_string());
}

/// Translate an `error` element into a VkError. Error code 14 carries a
/// captcha challenge the caller may resolve and resubmit.
fn check_api_error(method: &str, doc: &Value) -> Result<(), VkError> {
    let error = match doc.get("error") {
        Some(e) => e,
        None => return Ok(()),
    };
    let code = field_i64(error, "error_code").unwrap_or(0);
    let message = field_str(error, "error_msg").unwrap_or("unknown error").to_string();
    warn!("vk: {} returned error {}: {}", method, code, message);
    if code == VK_ERROR_CAPTCHA_NEEDED {
        let sid = field_str(error, "captcha_sid").unwrap_or_default().to_string();
        let img_url = field_str(error, "captcha_img").unwrap_or_default().to_string();
        return Err(VkError::CaptchaNeeded { sid, img_url });
    }
    Err(VkError::Api { code, message })
}

/// Build a Params list from string pairs.
pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::super::testutil::MockApi;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn item_pagination_halts_on_empty_page() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"count": 99, "items": [1, 2]}));
        api.on_call("friends.get", json!({"count": 99, "items": [3]}));
        api.on_call("friends.get", json!({"count": 99, "items": []}));

        let p = params(&[("count", "200")]);
        let items = call_items(&mut api, "friends.get", &p).await.unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);

        let offsets: Vec<String> = api
            .calls("friends.get")
            .iter()
            .map(|c| c.iter().find(|(n, _)| n == "offset").unwrap().1.clone())
            .collect();
        assert_eq!(offsets, ["0", "2", "3"]);
    }

    #[tokio::test]
    async fn item_pagination_rejects_missing_items() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"ok": 1}));
        assert!(call_items(&mut api, "friends.get", &[]).await.is_err());
    }

    #[test]
    fn params_are_urlencoded() {
        let p = params(&[("message", "a b&c"), ("user_id", "5")]);
        let body = encode_params(&p, "tok");
        assert_eq!(body, "message=a%20b%26c&user%5Fid=5&access%5Ftoken=tok&v=5%2E14");
    }

    #[test]
    fn api_error_maps_to_variant() {
        let doc = json!({"error": {"error_code": 5, "error_msg": "auth failed"}});
        match check_api_error("users.get", &doc) {
            Err(VkError::Api { code, message }) => {
                assert_eq!(code, 5);
                assert_eq!(message, "auth failed");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn captcha_error_carries_challenge() {
        let doc = json!({"error": {
            "error_code": 14,
            "error_msg": "Captcha needed",
            "captcha_sid": "871839",
            "captcha_img": "http://api.vk.com/captcha.php?sid=871839",
        }});
        match check_api_error("messages.send", &doc) {
            Err(VkError::CaptchaNeeded { sid, img_url }) => {
                assert_eq!(sid, "871839");
                assert!(img_url.contains("captcha.php"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn clean_response_passes() {
        let doc = json!({"response": 1});
        assert!(check_api_error("messages.send", &doc).is_ok());
    }
}
