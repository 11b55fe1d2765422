/*
 * lib.rs
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

//! Core backend for the vestnik VK messaging client.
//!
//! The host IM client owns the event loop, the buddy list and the conversation
//! windows; this crate owns everything between the host and api.vk.com: the
//! authenticated API client, the message receive pipeline (pagination,
//! attachment rendering, thumbnail resolution), outbound send with CAPTCHA
//! recovery, and buddy-list reconciliation. The host is reached only through
//! the [`host::HostHooks`] trait.

pub mod config;
pub mod error;
pub mod host;
pub mod markup;
pub mod net;
pub mod protocol;

pub use error::VkError;
pub use host::HostHooks;
pub use protocol::vk::session::{start_session, VkCommand, VkSession};
