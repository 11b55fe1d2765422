/*
 * receive.rs
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

//! Incoming message retrieval.
//!
//! `messages.get` pages through unread messages until the server returns an
//! empty page; the `count` field it reports is unreliable and is ignored.
//! After collection, photo/video thumbnails are downloaded one at a time and
//! spliced into the text, then messages are delivered to the host in
//! timestamp order and marked read.

use log::{info, warn};
use serde_json::Value;

use crate::error::VkError;
use crate::host::HostHooks;
use crate::markup::{escape_html, replace_first};

use super::api::{params, VkApi};
use super::attachments::render_attachments;
use super::types::{
    field_array, field_i64, field_str, field_u64, join_ids, thumbnail_placeholder,
    timestamp_from_unix, ReceivedMessage,
};

/// Collects one batch of messages, then downloads thumbnails and delivers.
/// Plain value; construct, run one of the entry points, drop.
pub struct MessageReceiver<'a, A: VkApi> {
    api: &'a mut A,
    hooks: &'a dyn HostHooks,
    messages: Vec<ReceivedMessage>,
}

impl<'a, A: VkApi> MessageReceiver<'a, A> {
    pub fn new(api: &'a mut A, hooks: &'a dyn HostHooks) -> Self {
        MessageReceiver { api, hooks, messages: Vec::new() }
    }

    /// Fetch and deliver all unread incoming messages.
    pub async fn run_unread(mut self) -> Result<usize, VkError> {
        let mut offset = 0usize;
        let fetched = loop {
            let p = params(&[
                ("out", "0"),
                ("filters", "1"),
                ("offset", &offset.to_string()),
            ]);
            match self.api.call("messages.get", &p).await {
                Ok(result) => {
                    let page = self.collect_page(&result);
                    if page == 0 {
                        break Ok(());
                    }
                    offset += page;
                }
                // Deliver whatever was already collected before reporting.
                Err(e) => break Err(e),
            }
        };
        let delivered = self.deliver().await?;
        fetched.map(|_| delivered)
    }

    /// Fetch and deliver specific messages by id.
    pub async fn run_ids(mut self, message_ids: &[u64]) -> Result<usize, VkError> {
        let p = params(&[("message_ids", &join_ids(message_ids))]);
        let fetched = match self.api.call("messages.getById", &p).await {
            Ok(result) => {
                self.collect_page(&result);
                Ok(())
            }
            Err(e) => Err(e),
        };
        let delivered = self.deliver().await?;
        fetched.map(|_| delivered)
    }

    /// Parse one `{count, items}` page into `self.messages`. Returns the
    /// number of items on the page (including skipped malformed ones).
    fn collect_page(&mut self, result: &Value) -> usize {
        let items = match field_array(result, "items") {
            Some(items) if field_u64(result, "count").is_some() => items,
            _ => {
                warn!("vk: strange response from messages.get: {}", result);
                return 0;
            }
        };

        for v in items {
            let uid = field_u64(v, "user_id");
            let mid = field_u64(v, "id");
            let date = field_i64(v, "date");
            let body = field_str(v, "body");
            let (uid, mid, date, body) = match (uid, mid, date, body) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => {
                    warn!("vk: strange message item: {}", v);
                    continue;
                }
            };

            // The body arrives as plain text; escape it so stray angle
            // brackets and ampersands survive the host's markup handling.
            let mut message = ReceivedMessage {
                uid,
                mid,
                text: escape_html(body),
                timestamp: timestamp_from_unix(date),
                thumbnail_urls: Vec::new(),
            };
            if let Some(attachments) = field_array(v, "attachments") {
                render_attachments(attachments, &mut message);
            }
            self.messages.push(message);
        }
        items.len()
    }

    /// Download all queued thumbnails, oldest-queued first, one at a time.
    /// A failed download blanks its placeholder rather than leaking it.
    async fn download_thumbnails(&mut self) {
        for i in 0..self.messages.len() {
            for t in 0..self.messages[i].thumbnail_urls.len() {
                let url = self.messages[i].thumbnail_urls[t].clone();
                let placeholder = thumbnail_placeholder(t);
                let replacement = match self.api.fetch(&url).await {
                    Ok(data) => {
                        let img_id = self.hooks.store_image(&data);
                        format!("<img id=\"{}\">", img_id)
                    }
                    Err(e) => {
                        warn!("vk: unable to download thumbnail {}: {}", url, e);
                        String::new()
                    }
                };
                replace_first(&mut self.messages[i].text, &placeholder, &replacement);
            }
        }
    }

    /// Thumbnails, then hand messages to the host in timestamp order and
    /// mark them read.
    async fn deliver(mut self) -> Result<usize, VkError> {
        self.download_thumbnails().await;
        self.messages.sort_by_key(|m| m.timestamp);

        let mut message_ids = Vec::with_capacity(self.messages.len());
        for m in &self.messages {
            self.hooks.got_im(m.uid, &m.text, m.timestamp.timestamp());
            message_ids.push(m.mid);
        }
        let count = message_ids.len();
        if count > 0 {
            info!("vk: delivered {} messages", count);
            mark_as_read(self.api, &message_ids).await?;
        }
        Ok(count)
    }
}

/// messages.markAsRead for the given ids. No-op for an empty list.
pub async fn mark_as_read<A: VkApi>(api: &mut A, message_ids: &[u64]) -> Result<(), VkError> {
    if message_ids.is_empty() {
        return Ok(());
    }
    let p = params(&[("message_ids", &join_ids(message_ids))]);
    api.call("messages.markAsRead", &p).await?;
    Ok(())
}
