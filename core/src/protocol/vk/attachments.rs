/*
 * attachments.rs
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

//! Attachment rendering for incoming messages.
//!
//! Each attachment becomes markup appended to the message text. Photos and
//! videos additionally queue a thumbnail URL and leave a placeholder token in
//! the text; the receive loop downloads the thumbnails afterwards and
//! substitutes inline image tags.

use log::warn;
use serde_json::Value;

use super::types::{field_i64, field_str, field_u64, thumbnail_placeholder, ReceivedMessage};

/// Render an `attachments` array into `message.text` / `message.thumbnail_urls`.
/// Malformed items are logged and skipped; an unrecognized type leaves a
/// visible marker so the user knows content was dropped.
pub fn render_attachments(items: &[Value], message: &mut ReceivedMessage) {
    for v in items {
        let ty = match field_str(v, "type") {
            Some(t) => t,
            None => {
                warn!("vk: attachment without type: {}", v);
                return;
            }
        };
        let fields = match v.get(ty) {
            Some(f) if f.is_object() => f,
            _ => {
                warn!("vk: attachment without body: {}", v);
                return;
            }
        };

        if !message.text.is_empty() {
            message.text.push_str("<br>");
        }

        match ty {
            "photo" => render_photo(fields, v, message),
            "video" => render_video(fields, v, message),
            "audio" => render_audio(fields, v, message),
            "doc" => render_doc(fields, v, message),
            other => {
                warn!("vk: unknown attachment type: {}", v);
                message.text.push_str("\nUnknown attachment type ");
                message.text.push_str(other);
            }
        }
    }
}

fn render_photo(fields: &Value, raw: &Value, message: &mut ReceivedMessage) {
    let id = field_u64(fields, "id");
    let owner_id = field_i64(fields, "owner_id");
    let text = field_str(fields, "text");
    let thumbnail = field_str(fields, "photo_604");
    let (id, owner_id, text, thumbnail) = match (id, owner_id, text, thumbnail) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => {
            warn!("vk: malformed photo attachment: {}", raw);
            return;
        }
    };

    // Private photos carry an access_key and have no page on vk.com; link to
    // the largest size present instead. Not all sizes are always returned.
    let url = if fields.get("access_key").is_some() {
        field_str(fields, "photo_2560")
            .or_else(|| field_str(fields, "photo_1280"))
            .or_else(|| field_str(fields, "photo_807"))
            .unwrap_or(thumbnail)
            .to_string()
    } else {
        format!("http://vk.com/photo{}_{}", owner_id, id)
    };

    let label = if text.is_empty() { &url } else { text };
    message.text.push_str(&format!("<a href='{}'>{}</a>", url, label));
    push_thumbnail(message, thumbnail);
}

fn render_video(fields: &Value, raw: &Value, message: &mut ReceivedMessage) {
    let id = field_u64(fields, "id");
    let owner_id = field_i64(fields, "owner_id");
    let title = field_str(fields, "title");
    let thumbnail = field_str(fields, "photo_320");
    let (id, owner_id, title, thumbnail) = match (id, owner_id, title, thumbnail) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => {
            warn!("vk: malformed video attachment: {}", raw);
            return;
        }
    };

    message
        .text
        .push_str(&format!("<a href='http://vk.com/video{}_{}'>{}</a>", owner_id, id, title));
    push_thumbnail(message, thumbnail);
}

fn render_audio(fields: &Value, raw: &Value, message: &mut ReceivedMessage) {
    match (field_str(fields, "url"), field_str(fields, "artist"), field_str(fields, "title")) {
        (Some(url), Some(artist), Some(title)) => {
            message
                .text
                .push_str(&format!("<a href='{}'>{} - {}</a>", url, artist, title));
        }
        _ => warn!("vk: malformed audio attachment: {}", raw),
    }
}

fn render_doc(fields: &Value, raw: &Value, message: &mut ReceivedMessage) {
    match (field_str(fields, "url"), field_str(fields, "title")) {
        (Some(url), Some(title)) => {
            message.text.push_str(&format!("<a href='{}'>{}</a>", url, title));
        }
        _ => warn!("vk: malformed doc attachment: {}", raw),
    }
}

fn push_thumbnail(message: &mut ReceivedMessage, thumbnail: &str) {
    let placeholder = thumbnail_placeholder(message.thumbnail_urls.len());
    message.text.push_str("<br>");
    message.text.push_str(&placeholder);
    message.thumbnail_urls.push(thumbnail.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn message() -> ReceivedMessage {
        ReceivedMessage {
            uid: 1,
            mid: 1,
            text: String::new(),
            timestamp: Utc::now(),
            thumbnail_urls: Vec::new(),
        }
    }

    #[test]
    fn public_photo_links_to_page() {
        let items = vec![json!({"type": "photo", "photo": {
            "id": 42, "owner_id": -7, "text": "", "photo_604": "http://img/604.jpg",
        }})];
        let mut m = message();
        render_attachments(&items, &mut m);
        assert!(m.text.contains("<a href='http://vk.com/photo-7_42'>http://vk.com/photo-7_42</a>"));
        assert!(m.text.contains("<thumbnail-placeholder-0>"));
        assert_eq!(m.thumbnail_urls, vec!["http://img/604.jpg"]);
    }

    #[test]
    fn private_photo_prefers_largest_size() {
        let items = vec![json!({"type": "photo", "photo": {
            "id": 42, "owner_id": 7, "text": "cat", "access_key": "abc",
            "photo_604": "http://img/604.jpg", "photo_1280": "http://img/1280.jpg",
        }})];
        let mut m = message();
        render_attachments(&items, &mut m);
        assert!(m.text.contains("<a href='http://img/1280.jpg'>cat</a>"));
    }

    #[test]
    fn private_photo_falls_back_to_thumbnail() {
        let items = vec![json!({"type": "photo", "photo": {
            "id": 1, "owner_id": 1, "text": "", "access_key": "abc",
            "photo_604": "http://img/604.jpg",
        }})];
        let mut m = message();
        render_attachments(&items, &mut m);
        assert!(m.text.contains("<a href='http://img/604.jpg'>"));
    }

    #[test]
    fn video_and_audio_and_doc() {
        let items = vec![
            json!({"type": "video", "video": {
                "id": 5, "owner_id": 9, "title": "clip", "photo_320": "http://img/320.jpg",
            }}),
            json!({"type": "audio", "audio": {
                "url": "http://a/x.mp3", "artist": "Band", "title": "Song",
            }}),
            json!({"type": "doc", "doc": {"url": "http://d/f.pdf", "title": "file"}}),
        ];
        let mut m = message();
        m.text = "hi".to_string();
        render_attachments(&items, &mut m);
        assert!(m.text.starts_with("hi<br>"));
        assert!(m.text.contains("<a href='http://vk.com/video9_5'>clip</a>"));
        assert!(m.text.contains("<a href='http://a/x.mp3'>Band - Song</a>"));
        assert!(m.text.contains("<a href='http://d/f.pdf'>file</a>"));
        assert_eq!(m.thumbnail_urls.len(), 1);
    }

    #[test]
    fn unknown_type_leaves_marker() {
        let items = vec![json!({"type": "sticker", "sticker": {"id": 1}})];
        let mut m = message();
        render_attachments(&items, &mut m);
        assert!(m.text.contains("Unknown attachment type sticker"));
    }

    #[test]
    fn malformed_item_skipped() {
        let items = vec![
            json!({"type": "photo", "photo": {"id": 1}}),
            json!({"type": "doc", "doc": {"url": "http://d/f", "title": "t"}}),
        ];
        let mut m = message();
        render_attachments(&items, &mut m);
        assert!(m.text.contains("<a href='http://d/f'>t</a>"));
        assert!(m.thumbnail_urls.is_empty());
    }
}
