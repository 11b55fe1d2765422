/*
 * testutil.rs
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

//! Scripted API and recording host for pipeline tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::VkError;
use crate::host::{CaptchaReply, HostHooks, Presence};

use super::api::{Params, VkApi};

type CallResult = Result<Value, VkError>;

/// Scripted VkApi. Responses are queued per method name and consumed in
/// order; every call is recorded with its parameters.
pub struct MockApi {
    responses: HashMap<String, VecDeque<CallResult>>,
    fetches: HashMap<String, VecDeque<Result<Vec<u8>, VkError>>>,
    posts: HashMap<String, VecDeque<Result<Vec<u8>, VkError>>>,
    calls: Vec<(String, Params)>,
    fetched: Vec<String>,
    posted: Vec<(String, Vec<u8>)>,
}

impl MockApi {
    pub fn new() -> Self {
        MockApi {
            responses: HashMap::new(),
            fetches: HashMap::new(),
            posts: HashMap::new(),
            calls: Vec::new(),
            fetched: Vec::new(),
            posted: Vec::new(),
        }
    }

    /// Queue a successful response for `method`.
    pub fn on_call(&mut self, method: &str, response: Value) {
        self.responses.entry(method.to_string()).or_default().push_back(Ok(response));
    }

    /// Queue an error for `method`.
    pub fn on_call_err(&mut self, method: &str, err: VkError) {
        self.responses.entry(method.to_string()).or_default().push_back(Err(err));
    }

    /// Queue a fetch result for `url`.
    pub fn on_fetch(&mut self, url: &str, result: Result<Vec<u8>, VkError>) {
        self.fetches.entry(url.to_string()).or_default().push_back(result);
    }

    /// All recorded parameter lists for `method`, in call order.
    pub fn calls(&self, method: &str) -> Vec<Params> {
        self.calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Queue a POST result for `url`.
    pub fn on_post(&mut self, url: &str, result: Result<Vec<u8>, VkError>) {
        self.posts.entry(url.to_string()).or_default().push_back(result);
    }

    /// All fetched URLs, in order.
    pub fn fetched(&self) -> &[String] {
        &self.fetched
    }

    /// All POSTed (url, body) pairs, in order.
    pub fn posted(&self) -> &[(String, Vec<u8>)] {
        &self.posted
    }
}

impl VkApi for MockApi {
    fn call<'a>(
        &'a mut self,
        method: &'a str,
        params: &'a [(String, String)],
    ) -> impl Future<Output = CallResult> + Send + 'a {
        self.calls.push((method.to_string(), params.to_vec()));
        let result = self
            .responses
            .get_mut(method)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| panic!("unexpected call to {}", method));
        async move { result }
    }

    fn fetch<'a>(
        &'a mut self,
        url: &'a str,
    ) -> impl Future<Output = Result<Vec<u8>, VkError>> + Send + 'a {
        self.fetched.push(url.to_string());
        let result = self
            .fetches
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| panic!("unexpected fetch of {}", url));
        async move { result }
    }

    fn post<'a>(
        &'a mut self,
        url: &'a str,
        _content_type: &'a str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, VkError>> + Send + 'a {
        self.posted.push((url.to_string(), body));
        let result = self
            .posts
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| panic!("unexpected post to {}", url));
        async move { result }
    }
}

#[derive(Default)]
struct RecordedState {
    ims: Vec<(u64, String, i64)>,
    images: Vec<Vec<u8>>,
    buddies: HashMap<u64, String>,
    removed: Vec<u64>,
    aliases: HashMap<u64, String>,
    custom_alias: HashSet<u64>,
    statuses: Vec<(u64, Presence)>,
    last_seen: HashMap<u64, i64>,
    icons: HashMap<u64, (Vec<u8>, String)>,
    cleared_icons: Vec<u64>,
    conversations: HashSet<u64>,
    errors: Vec<(u64, u64, String)>,
    captcha_answer: Option<Option<String>>,
    captcha_requests: Vec<Vec<u8>>,
}

/// HostHooks double that records every call and plays back configured state.
#[derive(Default)]
pub struct RecordingHooks {
    state: Mutex<RecordedState>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        RecordingHooks::default()
    }

    pub fn ims(&self) -> Vec<(u64, String, i64)> {
        self.state.lock().unwrap().ims.clone()
    }

    pub fn added(&self) -> HashMap<u64, String> {
        self.state.lock().unwrap().buddies.clone()
    }

    pub fn removed(&self) -> Vec<u64> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn aliases(&self) -> HashMap<u64, String> {
        self.state.lock().unwrap().aliases.clone()
    }

    pub fn statuses(&self) -> Vec<(u64, Presence)> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub fn icons(&self) -> HashMap<u64, (Vec<u8>, String)> {
        self.state.lock().unwrap().icons.clone()
    }

    pub fn errors(&self) -> Vec<(u64, u64, String)> {
        self.state.lock().unwrap().errors.clone()
    }

    pub fn captcha_requests(&self) -> usize {
        self.state.lock().unwrap().captcha_requests.len()
    }

    /// Pre-populate the buddy list.
    pub fn with_buddy(&self, uid: u64) {
        self.state.lock().unwrap().buddies.insert(uid, String::new());
    }

    pub fn with_custom_alias(&self, uid: u64) {
        self.state.lock().unwrap().custom_alias.insert(uid);
    }

    pub fn with_conversation(&self, uid: u64) {
        self.state.lock().unwrap().conversations.insert(uid);
    }

    pub fn with_icon_checksum(&self, uid: u64, checksum: &str) {
        self.state
            .lock()
            .unwrap()
            .icons
            .insert(uid, (Vec::new(), checksum.to_string()));
    }

    /// Answer the next CAPTCHA request with `key` (None = user cancelled).
    pub fn answer_captcha(&self, key: Option<&str>) {
        self.state.lock().unwrap().captcha_answer = Some(key.map(str::to_string));
    }
}

impl HostHooks for RecordingHooks {
    fn got_im(&self, uid: u64, text: &str, timestamp: i64) {
        self.state.lock().unwrap().ims.push((uid, text.to_string(), timestamp));
    }

    fn store_image(&self, data: &[u8]) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.images.push(data.to_vec());
        state.images.len() as u32
    }

    fn image_data(&self, img_id: u32) -> Option<(String, Vec<u8>)> {
        let state = self.state.lock().unwrap();
        let data = state.images.get(img_id.checked_sub(1)? as usize)?;
        Some((format!("img{}.jpg", img_id), data.clone()))
    }

    fn find_buddy(&self, uid: u64) -> bool {
        self.state.lock().unwrap().buddies.contains_key(&uid)
    }

    fn add_buddy(&self, uid: u64, group: &str) {
        self.state.lock().unwrap().buddies.insert(uid, group.to_string());
    }

    fn remove_buddy(&self, uid: u64) {
        let mut state = self.state.lock().unwrap();
        state.buddies.remove(&uid);
        state.removed.push(uid);
    }

    fn has_custom_alias(&self, uid: u64) -> bool {
        self.state.lock().unwrap().custom_alias.contains(&uid)
    }

    fn set_alias(&self, uid: u64, alias: &str) {
        self.state.lock().unwrap().aliases.insert(uid, alias.to_string());
    }

    fn set_status(&self, uid: u64, presence: Presence) {
        self.state.lock().unwrap().statuses.push((uid, presence));
    }

    fn refresh_status(&self, _uid: u64) {}

    fn set_last_seen(&self, uid: u64, last_seen: i64) {
        self.state.lock().unwrap().last_seen.insert(uid, last_seen);
    }

    fn icon_checksum(&self, uid: u64) -> Option<String> {
        self.state.lock().unwrap().icons.get(&uid).map(|(_, c)| c.clone())
    }

    fn set_icon(&self, uid: u64, data: &[u8], checksum: &str) {
        self.state
            .lock()
            .unwrap()
            .icons
            .insert(uid, (data.to_vec(), checksum.to_string()));
    }

    fn clear_icon(&self, uid: u64) {
        let mut state = self.state.lock().unwrap();
        state.icons.remove(&uid);
        state.cleared_icons.push(uid);
    }

    fn have_conversation_with(&self, uid: u64) -> bool {
        self.state.lock().unwrap().conversations.contains(&uid)
    }

    fn write_error(&self, uid: u64, chat_id: u64, text: &str) {
        self.state.lock().unwrap().errors.push((uid, chat_id, text.to_string()));
    }

    fn request_captcha(&self, img_data: Vec<u8>, reply: CaptchaReply) {
        let mut state = self.state.lock().unwrap();
        state.captcha_requests.push(img_data);
        let answer = state.captcha_answer.clone().unwrap_or(None);
        let _ = reply.send(answer);
    }

    fn buddy_uids(&self) -> Vec<u64> {
        self.state.lock().unwrap().buddies.keys().copied().collect()
    }
}
