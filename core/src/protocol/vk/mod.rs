/*
 * mod.rs
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

//! VK messaging protocol support.

pub mod api;
pub mod attachments;
pub mod buddy;
pub mod receive;
pub mod send;
pub mod session;
pub mod types;
pub mod upload;

#[cfg(test)]
pub(crate) mod testutil;

pub use session::{start_session, VkCommand, VkSession};
pub use types::{buddy_name_from_uid, uid_from_buddy_name, MessageTarget, VkUserInfo};
