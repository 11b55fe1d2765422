/*
 * host.rs
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

//! The host seam: everything the backend needs from the embedding IM client.
//!
//! The host owns the buddy list, conversations, the image store and the UI;
//! we only call into it. Methods are synchronous and must not block — the
//! host marshals to its own main loop as needed. The only round trip is the
//! CAPTCHA challenge, which replies through a oneshot channel.

use tokio::sync::oneshot;

/// Presence as far as the host's status model cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

/// Outcome of a CAPTCHA challenge handed to the host.
pub type CaptchaReply = oneshot::Sender<Option<String>>;

/// Host-side callbacks. Implemented by the FFI adapter (or by test doubles).
///
/// `uid` arguments are VK numeric user ids; buddy naming ("id12345") is the
/// backend's business, see `types::buddy_name_from_uid`.
pub trait HostHooks: Send + Sync {
    /// Deliver an incoming IM (markup text) with its original timestamp.
    fn got_im(&self, uid: u64, text: &str, timestamp: i64);

    /// Register image data with the host's image store; returns the store id
    /// referenced by `<img id="N">` markup.
    fn store_image(&self, data: &[u8]) -> u32;

    /// Fetch image data (and filename) back out of the host's image store.
    fn image_data(&self, img_id: u32) -> Option<(String, Vec<u8>)>;

    /// True if the buddy is currently present in the host's buddy list.
    fn find_buddy(&self, uid: u64) -> bool;

    /// Add a buddy to the list, in the given group ("" = host default).
    fn add_buddy(&self, uid: u64, group: &str);

    /// Remove a buddy from the list.
    fn remove_buddy(&self, uid: u64);

    /// True if the user aliased this buddy locally; server aliases must not
    /// overwrite a custom alias.
    fn has_custom_alias(&self, uid: u64) -> bool;

    /// Set the server-provided alias (display name).
    fn set_alias(&self, uid: u64, alias: &str);

    /// Push an online/offline presence transition.
    fn set_status(&self, uid: u64, presence: Presence);

    /// Re-announce the current status so the host refreshes derived status text.
    fn refresh_status(&self, uid: u64);

    /// Record the last-seen time (unix seconds) for an offline buddy.
    fn set_last_seen(&self, uid: u64, last_seen: i64);

    /// Checksum (we use the avatar URL) of the currently set buddy icon, if any.
    fn icon_checksum(&self, uid: u64) -> Option<String>;

    /// Set the buddy icon from image data; `checksum` is stored for the next
    /// `icon_checksum` call.
    fn set_icon(&self, uid: u64, data: &[u8], checksum: &str);

    /// Remove the buddy icon.
    fn clear_icon(&self, uid: u64);

    /// True if a conversation window with this buddy is open.
    fn have_conversation_with(&self, uid: u64) -> bool;

    /// Write an error line into the conversation with the given user or chat.
    fn write_error(&self, uid: u64, chat_id: u64, text: &str);

    /// Show a CAPTCHA challenge (JPEG data). The host sends the solved key,
    /// or None if the user cancelled, through `reply`.
    fn request_captcha(&self, img_data: Vec<u8>, reply: CaptchaReply);

    /// Current buddy-list uids for this account (used by the removal pass).
    fn buddy_uids(&self) -> Vec<u64>;
}
