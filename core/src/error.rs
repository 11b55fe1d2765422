/*
 * error.rs
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

//! Backend and protocol errors.

use std::fmt;

/// API error code for "captcha needed".
pub const VK_ERROR_CAPTCHA_NEEDED: i64 = 14;

/// Errors from API calls, the HTTP layer, or response decoding.
#[derive(Debug, Clone)]
pub enum VkError {
    /// Generic error message.
    Message(String),
    /// API-level error envelope (`{"error": {"error_code": ..., "error_msg": ...}}`).
    Api { code: i64, message: String },
    /// API asked for a CAPTCHA. Recoverable: solve the challenge at img_url and
    /// resubmit the same call with captcha_sid/captcha_key.
    CaptchaNeeded { sid: String, img_url: String },
    /// Transport failure (connect, TLS, read/write, non-2xx status).
    Http(String),
    /// Response was not the JSON shape we expected.
    Json(String),
}

impl fmt::Display for VkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VkError::Message(m) => write!(f, "{}", m),
            VkError::Api { code, message } => write!(f, "API error {}: {}", code, message),
            VkError::CaptchaNeeded { sid, .. } => write!(f, "captcha required (sid {})", sid),
            VkError::Http(m) => write!(f, "HTTP error: {}", m),
            VkError::Json(m) => write!(f, "unexpected response: {}", m),
        }
    }
}

impl std::error::Error for VkError {}

impl From<std::io::Error> for VkError {
    fn from(e: std::io::Error) -> Self {
        VkError::Http(e.to_string())
    }
}
