/*
 * send.rs
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

//! Outgoing messages.
//!
//! Inline `<img id="N">` references are pulled out of the markup and uploaded
//! as photo attachments; vk.com photo/video/doc links in the text become
//! attachments too. The plain text then goes out via messages.send, split
//! into chunks because the text travels urlencoded and the server caps
//! request size. A CAPTCHA error suspends the send while the host shows the
//! challenge; the solved key is attached to the resubmission.

use log::{info, warn};
use tokio::sync::oneshot;

use crate::error::VkError;
use crate::host::HostHooks;
use crate::markup::{
    escape_html, extract_img_tags, max_urlencoded_prefix, parse_vkcom_attachments, strip_html,
};

use super::api::{params, Params, VkApi};
use super::types::MessageTarget;
use super::upload::upload_stored_images;

/// Urlencoded byte budget for one messages.send text chunk.
const MAX_URLENCODED_TEXT: usize = 4096;

/// Seconds after which the host should repeat a still-active typing
/// notification.
pub const TYPING_RESEND_SECS: u32 = 10;

/// Send a message to a user dialog or group chat. `raw_message` is host
/// markup. Returns the error after writing it into the conversation.
pub async fn send_message<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    target: MessageTarget,
    raw_message: &str,
) -> Result<(), VkError> {
    info!("vk: sending message to {:?}", target);

    let (no_imgs, img_ids) = extract_img_tags(raw_message);
    let text = strip_html(&no_imgs);

    let img_attachments = match upload_stored_images(api, hooks, &img_ids).await {
        Ok(a) => a,
        Err(e) => {
            show_error(hooks, target, &text);
            return Err(e);
        }
    };
    let mut attachments = parse_vkcom_attachments(&text);
    if !img_attachments.is_empty() {
        if !attachments.is_empty() {
            attachments.push(',');
        }
        attachments.push_str(&img_attachments);
    }

    match send_chunked(api, hooks, target, &text, &attachments).await {
        Ok(()) => Ok(()),
        Err(e) => {
            show_error(hooks, target, &text);
            Err(e)
        }
    }
}

/// Send an attachment-only message (no text), e.g. a shared image.
pub async fn send_attachment<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    target: MessageTarget,
    attachment: &str,
) -> Result<(), VkError> {
    info!("vk: sending attachment to {:?}", target);
    match send_chunked(api, hooks, target, "", attachment).await {
        Ok(()) => Ok(()),
        Err(e) => {
            show_error(hooks, target, "");
            Err(e)
        }
    }
}

/// messages.setActivity; the caller reschedules after `TYPING_RESEND_SECS`.
pub async fn send_typing<A: VkApi>(api: &mut A, user_id: u64) -> Result<u32, VkError> {
    let p = params(&[("user_id", &user_id.to_string()), ("type", "typing")]);
    api.call("messages.setActivity", &p).await?;
    Ok(TYPING_RESEND_SECS)
}

/// Push the text out chunk by chunk. Attachments ride on the first chunk
/// only. A solved CAPTCHA stays attached for the remaining chunks.
async fn send_chunked<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    target: MessageTarget,
    text: &str,
    attachments: &str,
) -> Result<(), VkError> {
    let mut offset = 0usize;
    let mut first = true;
    let mut captcha: Option<(String, String)> = None;

    loop {
        let chunk_len = max_urlencoded_prefix(&text[offset..], MAX_URLENCODED_TEXT);
        let chunk = &text[offset..offset + chunk_len];

        loop {
            let p = build_params(target, chunk, if first { attachments } else { "" }, &captcha);
            match api.call("messages.send", &p).await {
                Ok(v) if v.is_number() => break,
                Ok(v) => {
                    return Err(VkError::Json(format!("wrong response from messages.send: {}", v)))
                }
                Err(VkError::CaptchaNeeded { sid, img_url }) => {
                    info!("vk: received captcha {}", img_url);
                    match solve_captcha(api, hooks, &img_url).await? {
                        Some(key) => captcha = Some((sid, key)),
                        None => {
                            return Err(VkError::Message("captcha cancelled".to_string()));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        offset += chunk_len;
        if offset >= text.len() {
            return Ok(());
        }
        info!("vk: sent {} bytes of the message, sending the remainder", chunk_len);
        first = false;
    }
}

fn build_params(
    target: MessageTarget,
    chunk: &str,
    attachments: &str,
    captcha: &Option<(String, String)>,
) -> Params {
    let mut p = params(&[("attachment", attachments), ("type", "1"), ("message", chunk)]);
    match target {
        MessageTarget::User(uid) => p.push(("user_id".to_string(), uid.to_string())),
        MessageTarget::Chat(chat_id) => p.push(("chat_id".to_string(), chat_id.to_string())),
    }
    if let Some((sid, key)) = captcha {
        p.push(("captcha_sid".to_string(), sid.clone()));
        p.push(("captcha_key".to_string(), key.clone()));
    }
    p
}

/// Download the challenge image and hand it to the host. None = cancelled.
async fn solve_captcha<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    img_url: &str,
) -> Result<Option<String>, VkError> {
    let img_data = api.fetch(img_url).await?;
    let (reply_tx, reply_rx) = oneshot::channel();
    hooks.request_captcha(img_data, reply_tx);
    match reply_rx.await {
        Ok(key) => Ok(key),
        // Host dropped the reply sender; same as cancelling.
        Err(_) => Ok(None),
    }
}

fn show_error(hooks: &dyn HostHooks, target: MessageTarget, text: &str) {
    let (user_id, chat_id) = target.ids();
    warn!("vk: error sending message to {}/{}", user_id, chat_id);
    let error_msg = format!("Error sending message '{}'", escape_html(text));
    hooks.write_error(user_id, chat_id, &error_msg);
}
