/*
 * session.rs
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

//! VK session pipeline.
//!
//! One task per signed-in account. Operations are queued via an
//! `mpsc::UnboundedSender` and processed one at a time over a persistent API
//! connection; all mutable session state (roster, config) lives inside the
//! task, so no locking is needed.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AccountConfig;
use crate::error::VkError;
use crate::host::HostHooks;

use super::api::{ApiConnection, VkApi};
use super::buddy::{
    self, add_buddy_if_needed, add_to_buddy_list, remove_from_buddy_list_if_not_needed, Roster,
};
use super::receive::{mark_as_read, MessageReceiver};
use super::send::{send_attachment, send_message, send_typing};
use super::types::MessageTarget;

/// Commands sent from the host-facing API to the pipeline task. Each variant
/// carries the operation parameters and a completion callback.
pub enum VkCommand {
    /// Full buddy list refresh (friends + dialog partners).
    RefreshBuddies {
        update_presence: bool,
        on_complete: Box<dyn FnOnce(Result<(), VkError>) + Send>,
    },
    /// Fetch, render and deliver all unread messages; completes with the
    /// number delivered.
    ReceiveUnread {
        on_complete: Box<dyn FnOnce(Result<usize, VkError>) + Send>,
    },
    /// Fetch and deliver specific messages by id.
    ReceiveMessages {
        message_ids: Vec<u64>,
        on_complete: Box<dyn FnOnce(Result<usize, VkError>) + Send>,
    },
    /// Send a markup message to a user dialog.
    SendIm {
        user_id: u64,
        message: String,
        on_complete: Box<dyn FnOnce(Result<(), VkError>) + Send>,
    },
    /// Send an attachment-only message to a user dialog.
    SendImAttachment {
        user_id: u64,
        attachment: String,
        on_complete: Box<dyn FnOnce(Result<(), VkError>) + Send>,
    },
    /// Send a markup message to a group chat.
    SendChat {
        chat_id: u64,
        message: String,
        on_complete: Box<dyn FnOnce(Result<(), VkError>) + Send>,
    },
    /// Typing notification; completes with the resend interval in seconds.
    SendTyping {
        user_id: u64,
        on_complete: Box<dyn FnOnce(Result<u32, VkError>) + Send>,
    },
    /// messages.markAsRead for ids delivered outside the receive flow.
    MarkAsRead {
        message_ids: Vec<u64>,
        on_complete: Box<dyn FnOnce(Result<(), VkError>) + Send>,
    },
    /// Make the given uids visible in the buddy list regardless of settings.
    AddToBuddyList {
        uids: Vec<u64>,
        on_complete: Box<dyn FnOnce(Result<(), VkError>) + Send>,
    },
    /// Drop uids again if the friends-only setting makes them unneeded.
    /// `convo_closed` when triggered by a conversation window closing.
    RemoveFromBuddyListIfUnneeded { uids: Vec<u64>, convo_closed: bool },
    /// utils.resolveScreenName; completes with None for non-users.
    ResolveScreenName {
        screen_name: String,
        on_complete: Box<dyn FnOnce(Result<Option<u64>, VkError>) + Send>,
    },
    /// "First Last" for an arbitrary uid.
    GetUserFullName {
        uid: u64,
        on_complete: Box<dyn FnOnce(Result<String, VkError>) + Send>,
    },
}

/// Handle to the session pipeline task. Cheaply cloneable.
#[derive(Clone)]
pub struct VkSession {
    command_tx: mpsc::UnboundedSender<VkCommand>,
}

impl VkSession {
    /// Queue a command for the pipeline. Returns immediately.
    pub fn send(&self, cmd: VkCommand) {
        let _ = self.command_tx.send(cmd);
    }

    /// Returns true if the pipeline task is still running.
    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

/// Mutable per-session state, owned by the pipeline task.
struct SessionState {
    self_uid: u64,
    config: AccountConfig,
    roster: Roster,
}

/// Start the pipeline task for a signed-in account. The API connection is
/// established lazily on the first call.
pub fn start_session(
    access_token: String,
    self_uid: u64,
    config: AccountConfig,
    hooks: Arc<dyn HostHooks>,
) -> VkSession {
    let api = ApiConnection::new(access_token);
    let state = SessionState { self_uid, config, roster: Roster::default() };
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(vk_pipeline_loop(api, state, hooks, cmd_rx));
    VkSession { command_tx: cmd_tx }
}

/// Async pipeline loop: processes commands one at a time. Ends when the last
/// `VkSession` handle is dropped.
async fn vk_pipeline_loop<A: VkApi>(
    mut api: A,
    mut state: SessionState,
    hooks: Arc<dyn HostHooks>,
    mut cmd_rx: mpsc::UnboundedReceiver<VkCommand>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            VkCommand::RefreshBuddies { update_presence, on_complete } => {
                let result = buddy::update_buddies(
                    &mut api,
                    &*hooks,
                    &mut state.roster,
                    &state.config,
                    state.self_uid,
                    update_presence,
                )
                .await;
                on_complete(result);
            }
            VkCommand::ReceiveUnread { on_complete } => {
                let receiver = MessageReceiver::new(&mut api, &*hooks);
                on_complete(receiver.run_unread().await);
            }
            VkCommand::ReceiveMessages { message_ids, on_complete } => {
                let receiver = MessageReceiver::new(&mut api, &*hooks);
                on_complete(receiver.run_ids(&message_ids).await);
            }
            VkCommand::SendIm { user_id, message, on_complete } => {
                let result = handle_send_im(&mut api, &mut state, &hooks, user_id, &message).await;
                on_complete(result);
            }
            VkCommand::SendImAttachment { user_id, attachment, on_complete } => {
                let result =
                    send_attachment(&mut api, &*hooks, MessageTarget::User(user_id), &attachment)
                        .await;
                on_complete(result);
            }
            VkCommand::SendChat { chat_id, message, on_complete } => {
                let result =
                    send_message(&mut api, &*hooks, MessageTarget::Chat(chat_id), &message).await;
                on_complete(result);
            }
            VkCommand::SendTyping { user_id, on_complete } => {
                let result = handle_send_typing(&mut api, &mut state, &hooks, user_id).await;
                on_complete(result);
            }
            VkCommand::MarkAsRead { message_ids, on_complete } => {
                on_complete(mark_as_read(&mut api, &message_ids).await);
            }
            VkCommand::AddToBuddyList { uids, on_complete } => {
                let result = add_to_buddy_list(
                    &mut api,
                    &*hooks,
                    &mut state.roster,
                    &state.config,
                    &uids,
                )
                .await;
                on_complete(result);
            }
            VkCommand::RemoveFromBuddyListIfUnneeded { uids, convo_closed } => {
                remove_from_buddy_list_if_not_needed(
                    &*hooks,
                    &state.roster,
                    &state.config,
                    &uids,
                    convo_closed,
                );
            }
            VkCommand::ResolveScreenName { screen_name, on_complete } => {
                on_complete(buddy::resolve_screen_name(&mut api, &screen_name).await);
            }
            VkCommand::GetUserFullName { uid, on_complete } => {
                on_complete(buddy::get_user_full_name(&mut api, uid).await);
            }
        }
    }
}

/// The peer of an outgoing message must end up in the buddy list even when
/// it is not a friend; do that first so the conversation has a buddy.
async fn handle_send_im<A: VkApi>(
    api: &mut A,
    state: &mut SessionState,
    hooks: &Arc<dyn HostHooks>,
    user_id: u64,
    message: &str,
) -> Result<(), VkError> {
    add_buddy_if_needed(api, &**hooks, &mut state.roster, &state.config, user_id).await?;
    send_message(api, &**hooks, MessageTarget::User(user_id), message).await
}

async fn handle_send_typing<A: VkApi>(
    api: &mut A,
    state: &mut SessionState,
    hooks: &Arc<dyn HostHooks>,
    user_id: u64,
) -> Result<u32, VkError> {
    let resend = send_typing(api, user_id).await?;
    add_buddy_if_needed(api, &**hooks, &mut state.roster, &state.config, user_id).await?;
    Ok(resend)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{MockApi, RecordingHooks};
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn start_mock_session(api: MockApi, hooks: Arc<RecordingHooks>) -> VkSession {
        let state = SessionState {
            self_uid: 99,
            config: AccountConfig::default(),
            roster: Roster::default(),
        };
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(vk_pipeline_loop(api, state, hooks as Arc<dyn HostHooks>, cmd_rx));
        VkSession { command_tx: cmd_tx }
    }

    #[tokio::test]
    async fn typing_completes_with_resend_interval() {
        let mut api = MockApi::new();
        api.on_call("messages.setActivity", json!(1));
        let hooks = Arc::new(RecordingHooks::new());
        hooks.with_buddy(7);
        let session = start_mock_session(api, hooks);

        let (tx, rx) = oneshot::channel();
        session.send(VkCommand::SendTyping {
            user_id: 7,
            on_complete: Box::new(move |r| {
                let _ = tx.send(r);
            }),
        });
        assert_eq!(rx.await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn send_im_adds_unknown_peer_to_buddy_list_first() {
        let mut api = MockApi::new();
        api.on_call(
            "users.get",
            json!([{
                "id": 7, "first_name": "Ann", "last_name": "A",
                "can_write_private_message": 1, "online": 1,
            }]),
        );
        api.on_call("messages.send", json!(5));
        let hooks = Arc::new(RecordingHooks::new());
        let session = start_mock_session(api, hooks.clone());

        let (tx, rx) = oneshot::channel();
        session.send(VkCommand::SendIm {
            user_id: 7,
            message: "hello".to_string(),
            on_complete: Box::new(move |r| {
                let _ = tx.send(r);
            }),
        });
        rx.await.unwrap().unwrap();
        assert!(hooks.added().contains_key(&7));
    }

    #[tokio::test]
    async fn commands_are_processed_in_order() {
        let mut api = MockApi::new();
        api.on_call("messages.setActivity", json!(1));
        api.on_call("messages.markAsRead", json!(1));
        let hooks = Arc::new(RecordingHooks::new());
        hooks.with_buddy(7);
        let session = start_mock_session(api, hooks);

        let (tx1, rx1) = oneshot::channel();
        session.send(VkCommand::SendTyping {
            user_id: 7,
            on_complete: Box::new(move |r| {
                let _ = tx1.send(r);
            }),
        });
        let (tx2, rx2) = oneshot::channel();
        session.send(VkCommand::MarkAsRead {
            message_ids: vec![4],
            on_complete: Box::new(move |r| {
                let _ = tx2.send(r);
            }),
        });
        rx1.await.unwrap().unwrap();
        rx2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_pipeline() {
        let api = MockApi::new();
        let hooks = Arc::new(RecordingHooks::new());
        let session = start_mock_session(api, hooks);
        assert!(session.is_alive());
        let probe = session.clone();
        drop(session);
        drop(probe);
        tokio::task::yield_now().await;
    }
}
