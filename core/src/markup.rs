/*
 * markup.rs
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

//! Helpers for the host's HTML-subset markup dialect.
//!
//! Inbound message bodies are escaped before markup is appended; outbound
//! messages are stripped back to plain text (the VK chat is plaintext and
//! accepts '\n' for line breaks). `<img id="N">` references inserted by the
//! host's "insert image" are extracted here and uploaded as attachments.

use std::sync::OnceLock;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;

/// Escape text for inclusion in host markup. Ampersands, angle brackets and
/// quotes become entities so received text is never interpreted as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the entities produced by `escape_html` plus the common named ones.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let known = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
            ("&#39;", '\''),
            ("&nbsp;", ' '),
        ];
        match known.iter().find(|(e, _)| rest.starts_with(e)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s+[^>]*href=["']?([^"'>\s]+)["']?[^>]*>(.*?)</a>"#).unwrap()
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

/// Strip host markup down to plain text: `<a href>` becomes "text (url)"
/// (or just the url when the text repeats it), `<br>` becomes '\n', all
/// other tags are dropped and entities decoded.
pub fn strip_html(markup: &str) -> String {
    let with_links = anchor_regex().replace_all(markup, |caps: &regex::Captures<'_>| {
        let url = &caps[1];
        let text = tag_regex().replace_all(&caps[2], "");
        let text = text.trim();
        if text.is_empty() || text == url {
            url.to_string()
        } else {
            format!("{} ({})", text, url)
        }
    });
    let with_breaks = {
        static BR: OnceLock<Regex> = OnceLock::new();
        let br = BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
        br.replace_all(&with_links, "\n").into_owned()
    };
    let stripped = tag_regex().replace_all(&with_breaks, "");
    unescape_html(&stripped)
}

fn img_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img id="(\d+)">"#).unwrap())
}

/// Remove `<img id="N">` tags from a message. Returns the cleaned message and
/// the image store ids, in order of appearance.
pub fn extract_img_tags(message: &str) -> (String, Vec<u32>) {
    let mut ids = Vec::new();
    for caps in img_regex().captures_iter(message) {
        if let Ok(id) = caps[1].parse() {
            ids.push(id);
        }
    }
    let cleaned = img_regex().replace_all(message, "").into_owned();
    (cleaned, ids)
}

/// Replace the first occurrence of `from` in `text` with `to`. No-op when absent.
pub fn replace_first(text: &mut String, from: &str, to: &str) {
    if let Some(pos) = text.find(from) {
        text.replace_range(pos..pos + from.len(), to);
    }
}

/// Length in bytes of the percent-encoded form of one char.
fn urlencoded_len(c: char) -> usize {
    let mut buf = [0u8; 4];
    let s = c.encode_utf8(&mut buf);
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string().len()
}

/// Longest prefix of `text` (ending on a char boundary) whose percent-encoded
/// form fits in `budget` bytes. Messages are sent in the request URL, so long
/// ones must be chunked. Returns the prefix length in bytes of `text`.
pub fn max_urlencoded_prefix(text: &str, budget: usize) -> usize {
    let mut encoded = 0;
    let mut end = 0;
    for (pos, c) in text.char_indices() {
        let len = urlencoded_len(c);
        if encoded + len > budget {
            break;
        }
        encoded += len;
        end = pos + c.len_utf8();
    }
    end
}

/// Find inline references to vk.com photo/video/doc pages in outgoing text
/// and return them as an attachment list ("photo123_456,video7_8"). VK
/// renders such attachments natively, which beats sending a bare link.
pub fn parse_vkcom_attachments(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\bhttps?://(?:www\.|m\.)?vk\.com/(photo|video|doc)(-?\d+_\d+)").unwrap()
    });
    let mut attachments = String::new();
    for caps in re.captures_iter(text) {
        if !attachments.is_empty() {
            attachments.push(',');
        }
        attachments.push_str(&caps[1].to_lowercase());
        attachments.push_str(&caps[2]);
    }
    attachments
}
