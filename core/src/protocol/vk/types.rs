/*
 * types.rs
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

//! VK API types and constants.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

// ── API endpoint ─────────────────────────────────────────────────────

pub const API_HOST: &str = "api.vk.com";
pub const API_PORT: u16 = 443;
pub const API_PATH: &str = "/method/";
pub const API_VERSION: &str = "5.14";

/// Fields requested from friends.get / users.get. Everything VkUserInfo stores.
pub const USER_FIELDS: &str = "first_name,last_name,bdate,education,photo_50,photo_max_orig,\
                               online,contacts,can_write_private_message,activity,last_seen,domain";

/// Avatar URLs VK serves for accounts without a photo; treated as "no avatar".
pub const EMPTY_PHOTO_URLS: [&str; 2] = [
    "http://vkontakte.ru/images/camera_a.gif",
    "http://vkontakte.ru/images/camera_b.gif",
];

// ── Buddy naming ─────────────────────────────────────────────────────

/// Host buddy name for a VK uid: "id12345".
pub fn buddy_name_from_uid(uid: u64) -> String {
    format!("id{}", uid)
}

/// Inverse of `buddy_name_from_uid`. None for names not of the "idNNN" form.
pub fn uid_from_buddy_name(name: &str) -> Option<u64> {
    name.strip_prefix("id")?.parse().ok()
}

/// Comma-joined id list, as the API expects in `message_ids`/`user_ids`.
pub fn join_ids(ids: &[u64]) -> String {
    let mut s = String::new();
    for id in ids {
        if !s.is_empty() {
            s.push(',');
        }
        s.push_str(&id.to_string());
    }
    s
}

/// Placeholder token appended after a photo/video link; substituted with the
/// downloaded thumbnail before delivery. Indexed per message.
pub fn thumbnail_placeholder(index: usize) -> String {
    format!("<thumbnail-placeholder-{}>", index)
}

// ── Data model ───────────────────────────────────────────────────────

/// Where an outgoing message goes: a user dialog or a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    User(u64),
    Chat(u64),
}

impl MessageTarget {
    /// (user_id, chat_id) as passed to `HostHooks::write_error`; the unused one is 0.
    pub fn ids(&self) -> (u64, u64) {
        match self {
            MessageTarget::User(uid) => (*uid, 0),
            MessageTarget::Chat(chat_id) => (0, *chat_id),
        }
    }
}

/// One incoming message as accumulated by the receive pipeline.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub uid: u64,
    pub mid: u64,
    /// Markup text: escaped body plus rendered attachments.
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Thumbnail URLs queued by attachment rendering; drained by the
    /// sequential download pass.
    pub thumbnail_urls: Vec<String>,
}

/// Everything we track about a VK user. Upserted whenever any API call
/// returns user fields.
#[derive(Debug, Clone, Default)]
pub struct VkUserInfo {
    /// "First Last".
    pub name: String,
    /// Small avatar URL (photo_50). Empty = no avatar.
    pub photo_min: String,
    /// Largest avatar URL (photo_max_orig).
    pub photo_max: String,
    /// Free-form activity status line.
    pub activity: String,
    /// Birthdate as the API returns it ("D.M.YYYY" or "D.M").
    pub bdate: String,
    /// Assembled education summary ("faculty, university 'YY").
    pub education: String,
    pub mobile_phone: String,
    /// Screen name (vk.com/<domain>).
    pub domain: String,
    pub online: bool,
    pub is_mobile: bool,
    /// Unix seconds of last activity; 0 = unknown.
    pub last_seen: i64,
    /// False when the user cannot receive private messages (or is
    /// deactivated); such users never enter the active uid set.
    pub can_write: bool,
}

// ── JSON field access ────────────────────────────────────────────────
//
// The API's response shapes are implicit in field-presence checks; these
// helpers keep the call sites short. Numbers arrive as JSON numbers but ids
// fit u64/i64.

pub fn field_str<'a>(v: &'a Value, name: &str) -> Option<&'a str> {
    v.get(name)?.as_str()
}

pub fn field_u64(v: &Value, name: &str) -> Option<u64> {
    let f = v.get(name)?;
    f.as_u64().or_else(|| f.as_f64().map(|d| d as u64))
}

pub fn field_i64(v: &Value, name: &str) -> Option<i64> {
    let f = v.get(name)?;
    f.as_i64().or_else(|| f.as_f64().map(|d| d as i64))
}

pub fn field_array<'a>(v: &'a Value, name: &str) -> Option<&'a Vec<Value>> {
    v.get(name)?.as_array()
}

/// Unix seconds to DateTime. Out-of-range values clamp to the epoch.
pub fn timestamp_from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buddy_name_roundtrip() {
        assert_eq!(buddy_name_from_uid(12345), "id12345");
        assert_eq!(uid_from_buddy_name("id12345"), Some(12345));
        assert_eq!(uid_from_buddy_name("alice"), None);
        assert_eq!(uid_from_buddy_name("idx"), None);
    }

    #[test]
    fn id_joining() {
        assert_eq!(join_ids(&[]), "");
        assert_eq!(join_ids(&[7]), "7");
        assert_eq!(join_ids(&[1, 2, 30]), "1,2,30");
    }

    #[test]
    fn field_helpers_tolerate_number_forms() {
        let v = json!({"id": 5, "fid": 5.0, "name": "x"});
        assert_eq!(field_u64(&v, "id"), Some(5));
        assert_eq!(field_u64(&v, "fid"), Some(5));
        assert_eq!(field_u64(&v, "name"), None);
        assert_eq!(field_str(&v, "name"), Some("x"));
        assert_eq!(field_str(&v, "id"), None);
        assert_eq!(field_u64(&v, "missing"), None);
    }
}
