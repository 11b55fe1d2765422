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

//! C FFI for vestnik core. Sessions are identified by URI ("vk://{n}").
//! Create functions return a newly allocated string (free with
//! vestnik_free_string). All string parameters are UTF-8 NUL-terminated.
//! Host callbacks may be invoked from backend worker threads; the host must
//! marshal to its main loop as needed.

use libc::{c_char, c_int, c_void, size_t};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use vestnik_core::config::{
    credentials_use_keychain, delete_access_token, keychain_available, load_access_token,
    save_access_token, set_credentials_backend, AccountConfig,
};
use vestnik_core::host::{CaptchaReply, HostHooks, Presence};
use vestnik_core::protocol::vk::send::TYPING_RESEND_SECS;
use vestnik_core::protocol::vk::{buddy_name_from_uid, uid_from_buddy_name};
use vestnik_core::{start_session, VkCommand, VkError, VkSession};

/// Wrapper so *mut c_void can be moved into Send closures. C callbacks are
/// invoked from worker threads.
struct SendableUserData(*mut c_void);
unsafe impl Send for SendableUserData {}
unsafe impl Sync for SendableUserData {}

// ---------- Host callbacks ----------

/// Incoming IM: (uid, markup text, unix timestamp, user_data).
type OnGotIm = extern "C" fn(u64, *const c_char, i64, *mut c_void);
/// Register image data with the host image store; returns the store id.
type OnStoreImage = extern "C" fn(*const u8, size_t, *mut c_void) -> u32;
/// Sink invoked by the host from inside OnImageData with (filename, data, len).
type ImageDataSink = extern "C" fn(*const c_char, *const u8, size_t, *mut c_void);
/// Look up stored image data. The host calls the sink synchronously with the
/// filename and bytes, then returns 1; returns 0 if the id is unknown.
type OnImageData = extern "C" fn(u32, ImageDataSink, *mut c_void, *mut c_void) -> c_int;
/// 1 if the uid is in the buddy list.
type OnFindBuddy = extern "C" fn(u64, *mut c_void) -> c_int;
/// Add a buddy, in the given group ("" = host default).
type OnAddBuddy = extern "C" fn(u64, *const c_char, *mut c_void);
type OnRemoveBuddy = extern "C" fn(u64, *mut c_void);
/// 1 if the user set a local alias for this buddy.
type OnHasCustomAlias = extern "C" fn(u64, *mut c_void) -> c_int;
type OnSetAlias = extern "C" fn(u64, *const c_char, *mut c_void);
/// online is 1 or 0.
type OnSetStatus = extern "C" fn(u64, c_int, *mut c_void);
type OnRefreshStatus = extern "C" fn(u64, *mut c_void);
type OnSetLastSeen = extern "C" fn(u64, i64, *mut c_void);
/// Sink invoked by the host from inside OnIconChecksum with the checksum.
type ChecksumSink = extern "C" fn(*const c_char, *mut c_void);
/// Current icon checksum; host calls the sink and returns 1, or returns 0 if
/// no icon is set.
type OnIconChecksum = extern "C" fn(u64, ChecksumSink, *mut c_void, *mut c_void) -> c_int;
type OnSetIcon = extern "C" fn(u64, *const u8, size_t, *const c_char, *mut c_void);
type OnClearIcon = extern "C" fn(u64, *mut c_void);
type OnHaveConversation = extern "C" fn(u64, *mut c_void) -> c_int;
/// Error line for a conversation: (user_id, chat_id, text); the unused id is 0.
type OnWriteError = extern "C" fn(u64, u64, *const c_char, *mut c_void);
/// CAPTCHA challenge: (token, jpeg data, len). The host shows the image and
/// answers with vestnik_captcha_provide or vestnik_captcha_cancel.
type OnRequestCaptcha = extern "C" fn(u64, *const u8, size_t, *mut c_void);
/// Sink invoked by the host from inside OnBuddyUids, once per uid.
type BuddyUidSink = extern "C" fn(u64, *mut c_void);
type OnBuddyUids = extern "C" fn(BuddyUidSink, *mut c_void, *mut c_void);

/// All host callbacks for one session, passed to vestnik_session_new.
#[repr(C)]
pub struct VestnikHostCallbacks {
    pub on_got_im: OnGotIm,
    pub on_store_image: OnStoreImage,
    pub on_image_data: OnImageData,
    pub on_find_buddy: OnFindBuddy,
    pub on_add_buddy: OnAddBuddy,
    pub on_remove_buddy: OnRemoveBuddy,
    pub on_has_custom_alias: OnHasCustomAlias,
    pub on_set_alias: OnSetAlias,
    pub on_set_status: OnSetStatus,
    pub on_refresh_status: OnRefreshStatus,
    pub on_set_last_seen: OnSetLastSeen,
    pub on_icon_checksum: OnIconChecksum,
    pub on_set_icon: OnSetIcon,
    pub on_clear_icon: OnClearIcon,
    pub on_have_conversation: OnHaveConversation,
    pub on_write_error: OnWriteError,
    pub on_request_captcha: OnRequestCaptcha,
    pub on_buddy_uids: OnBuddyUids,
}

/// Send-safe copy of the callback table (user_data as usize).
#[derive(Clone)]
struct HostCallbacks {
    on_got_im: OnGotIm,
    on_store_image: OnStoreImage,
    on_image_data: OnImageData,
    on_find_buddy: OnFindBuddy,
    on_add_buddy: OnAddBuddy,
    on_remove_buddy: OnRemoveBuddy,
    on_has_custom_alias: OnHasCustomAlias,
    on_set_alias: OnSetAlias,
    on_set_status: OnSetStatus,
    on_refresh_status: OnRefreshStatus,
    on_set_last_seen: OnSetLastSeen,
    on_icon_checksum: OnIconChecksum,
    on_set_icon: OnSetIcon,
    on_clear_icon: OnClearIcon,
    on_have_conversation: OnHaveConversation,
    on_write_error: OnWriteError,
    on_request_captcha: OnRequestCaptcha,
    on_buddy_uids: OnBuddyUids,
    user_data: usize,
}

impl HostCallbacks {
    fn from_c(cb: &VestnikHostCallbacks, user_data: *mut c_void) -> Self {
        HostCallbacks {
            on_got_im: cb.on_got_im,
            on_store_image: cb.on_store_image,
            on_image_data: cb.on_image_data,
            on_find_buddy: cb.on_find_buddy,
            on_add_buddy: cb.on_add_buddy,
            on_remove_buddy: cb.on_remove_buddy,
            on_has_custom_alias: cb.on_has_custom_alias,
            on_set_alias: cb.on_set_alias,
            on_set_status: cb.on_set_status,
            on_refresh_status: cb.on_refresh_status,
            on_set_last_seen: cb.on_set_last_seen,
            on_icon_checksum: cb.on_icon_checksum,
            on_set_icon: cb.on_set_icon,
            on_clear_icon: cb.on_clear_icon,
            on_have_conversation: cb.on_have_conversation,
            on_write_error: cb.on_write_error,
            on_request_captcha: cb.on_request_captcha,
            on_buddy_uids: cb.on_buddy_uids,
            user_data: user_data as usize,
        }
    }

    fn user_data(&self) -> *mut c_void {
        self.user_data as *mut c_void
    }
}

fn to_cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| CString::new("").unwrap())
}

/// HostHooks implementation over the C callback table. CAPTCHA replies are
/// parked in `pending_captchas` until the host answers through the session
/// URI.
struct CHostHooks {
    callbacks: HostCallbacks,
    captcha_counter: AtomicU64,
    pending_captchas: Mutex<HashMap<u64, CaptchaReply>>,
}

impl CHostHooks {
    fn new(callbacks: HostCallbacks) -> Self {
        CHostHooks {
            callbacks,
            captcha_counter: AtomicU64::new(0),
            pending_captchas: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_captcha(&self, token: u64, key: Option<String>) -> bool {
        let reply = match self.pending_captchas.lock() {
            Ok(mut pending) => pending.remove(&token),
            Err(_) => None,
        };
        match reply {
            Some(tx) => {
                let _ = tx.send(key);
                true
            }
            None => false,
        }
    }
}

struct ImageDataCapture {
    filename: String,
    data: Vec<u8>,
}

extern "C" fn image_data_sink(
    filename: *const c_char,
    data: *const u8,
    len: size_t,
    capture: *mut c_void,
) {
    let capture = unsafe { &mut *(capture as *mut ImageDataCapture) };
    if let Some(name) = ptr_to_str(filename) {
        capture.filename = name;
    }
    if !data.is_null() && len > 0 {
        capture.data = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
    }
}

extern "C" fn checksum_sink(checksum: *const c_char, capture: *mut c_void) {
    let capture = unsafe { &mut *(capture as *mut Option<String>) };
    *capture = ptr_to_str(checksum);
}

extern "C" fn buddy_uid_sink(uid: u64, capture: *mut c_void) {
    let capture = unsafe { &mut *(capture as *mut Vec<u64>) };
    capture.push(uid);
}

impl HostHooks for CHostHooks {
    fn got_im(&self, uid: u64, text: &str, timestamp: i64) {
        let text_c = to_cstring(text);
        (self.callbacks.on_got_im)(uid, text_c.as_ptr(), timestamp, self.callbacks.user_data());
    }

    fn store_image(&self, data: &[u8]) -> u32 {
        (self.callbacks.on_store_image)(data.as_ptr(), data.len(), self.callbacks.user_data())
    }

    fn image_data(&self, img_id: u32) -> Option<(String, Vec<u8>)> {
        let mut capture = ImageDataCapture { filename: String::new(), data: Vec::new() };
        let found = (self.callbacks.on_image_data)(
            img_id,
            image_data_sink,
            &mut capture as *mut ImageDataCapture as *mut c_void,
            self.callbacks.user_data(),
        );
        if found != 0 {
            Some((capture.filename, capture.data))
        } else {
            None
        }
    }

    fn find_buddy(&self, uid: u64) -> bool {
        (self.callbacks.on_find_buddy)(uid, self.callbacks.user_data()) != 0
    }

    fn add_buddy(&self, uid: u64, group: &str) {
        let group_c = to_cstring(group);
        (self.callbacks.on_add_buddy)(uid, group_c.as_ptr(), self.callbacks.user_data());
    }

    fn remove_buddy(&self, uid: u64) {
        (self.callbacks.on_remove_buddy)(uid, self.callbacks.user_data());
    }

    fn has_custom_alias(&self, uid: u64) -> bool {
        (self.callbacks.on_has_custom_alias)(uid, self.callbacks.user_data()) != 0
    }

    fn set_alias(&self, uid: u64, alias: &str) {
        let alias_c = to_cstring(alias);
        (self.callbacks.on_set_alias)(uid, alias_c.as_ptr(), self.callbacks.user_data());
    }

    fn set_status(&self, uid: u64, presence: Presence) {
        let online = if presence == Presence::Online { 1 } else { 0 };
        (self.callbacks.on_set_status)(uid, online, self.callbacks.user_data());
    }

    fn refresh_status(&self, uid: u64) {
        (self.callbacks.on_refresh_status)(uid, self.callbacks.user_data());
    }

    fn set_last_seen(&self, uid: u64, last_seen: i64) {
        (self.callbacks.on_set_last_seen)(uid, last_seen, self.callbacks.user_data());
    }

    fn icon_checksum(&self, uid: u64) -> Option<String> {
        let mut capture: Option<String> = None;
        let found = (self.callbacks.on_icon_checksum)(
            uid,
            checksum_sink,
            &mut capture as *mut Option<String> as *mut c_void,
            self.callbacks.user_data(),
        );
        if found != 0 {
            capture
        } else {
            None
        }
    }

    fn set_icon(&self, uid: u64, data: &[u8], checksum: &str) {
        let checksum_c = to_cstring(checksum);
        (self.callbacks.on_set_icon)(
            uid,
            data.as_ptr(),
            data.len(),
            checksum_c.as_ptr(),
            self.callbacks.user_data(),
        );
    }

    fn clear_icon(&self, uid: u64) {
        (self.callbacks.on_clear_icon)(uid, self.callbacks.user_data());
    }

    fn have_conversation_with(&self, uid: u64) -> bool {
        (self.callbacks.on_have_conversation)(uid, self.callbacks.user_data()) != 0
    }

    fn write_error(&self, uid: u64, chat_id: u64, text: &str) {
        let text_c = to_cstring(text);
        (self.callbacks.on_write_error)(uid, chat_id, text_c.as_ptr(), self.callbacks.user_data());
    }

    fn request_captcha(&self, img_data: Vec<u8>, reply: CaptchaReply) {
        let token = self.captcha_counter.fetch_add(1, Ordering::Relaxed) + 1;
        match self.pending_captchas.lock() {
            Ok(mut pending) => {
                pending.insert(token, reply);
            }
            Err(_) => return,
        }
        (self.callbacks.on_request_captcha)(
            token,
            img_data.as_ptr(),
            img_data.len(),
            self.callbacks.user_data(),
        );
    }

    fn buddy_uids(&self) -> Vec<u64> {
        let mut capture: Vec<u64> = Vec::new();
        (self.callbacks.on_buddy_uids)(
            buddy_uid_sink,
            &mut capture as *mut Vec<u64> as *mut c_void,
            self.callbacks.user_data(),
        );
        capture
    }
}

// ---------- Registry ----------

struct SessionHolder {
    session: VkSession,
    hooks: Arc<CHostHooks>,
}

/// Registry of sessions keyed by URI. Hosts the shared tokio runtime for all
/// backend I/O.
struct Registry {
    runtime: tokio::runtime::Runtime,
    sessions: RwLock<HashMap<String, Arc<SessionHolder>>>,
    session_counter: AtomicU64,
}

fn registry() -> &'static Registry {
    static REGISTRY: once_cell::sync::OnceCell<Registry> = once_cell::sync::OnceCell::new();
    REGISTRY.get_or_init(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default()).try_init();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to create tokio runtime");
        Registry {
            runtime,
            sessions: RwLock::new(HashMap::new()),
            session_counter: AtomicU64::new(0),
        }
    })
}

fn session_for(uri: &str) -> Option<Arc<SessionHolder>> {
    registry().sessions.read().ok()?.get(uri).cloned()
}

fn ptr_to_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string()) }
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>> = std::cell::RefCell::new(None);
}

fn set_last_error(msg: &str) {
    let msg = to_cstring(msg);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Last error message for the calling thread, or NULL. Valid until the next
/// vestnik call on this thread.
#[no_mangle]
pub extern "C" fn vestnik_last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ref().map(|s| s.as_ptr()).unwrap_or(ptr::null()))
}

/// Free a string returned by a vestnik function. No-op if ptr is NULL.
#[no_mangle]
pub unsafe extern "C" fn vestnik_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------- Completion plumbing ----------

/// Generic completion: (status, error message or NULL, user_data).
/// status >= 0 is success; for receive operations it is the delivered count.
type OnComplete = extern "C" fn(c_int, *const c_char, *mut c_void);

fn completion(on_complete: OnComplete, user_data: *mut c_void) -> Box<dyn FnOnce(Result<usize, VkError>) + Send> {
    let user_data = SendableUserData(user_data);
    Box::new(move |result| {
        // Capture the whole wrapper, not just the raw pointer field
        // (Rust 2021 disjoint capture would otherwise lose the Send impl).
        let user_data = user_data;
        match result {
            Ok(n) => on_complete(n as c_int, ptr::null(), user_data.0),
            Err(e) => {
                let msg = to_cstring(&e.to_string());
                on_complete(-1, msg.as_ptr(), user_data.0);
            }
        }
    })
}

fn unit_completion(on_complete: OnComplete, user_data: *mut c_void) -> Box<dyn FnOnce(Result<(), VkError>) + Send> {
    let c = completion(on_complete, user_data);
    Box::new(move |result| c(result.map(|_| 0)))
}

// ---------- Credential storage ----------

/// Select the access token backend: 1 = OS keychain, 0 = encrypted file.
#[no_mangle]
pub extern "C" fn vestnik_set_credentials_backend(use_keychain: c_int) {
    set_credentials_backend(use_keychain != 0);
}

/// 1 if an OS keychain backend is available on this platform.
#[no_mangle]
pub extern "C" fn vestnik_keychain_available() -> c_int {
    if keychain_available() {
        1
    } else {
        0
    }
}

/// 1 if tokens are currently stored in the OS keychain.
#[no_mangle]
pub extern "C" fn vestnik_credentials_use_keychain() -> c_int {
    if credentials_use_keychain() {
        1
    } else {
        0
    }
}

/// Store the access token for an account. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn vestnik_save_access_token(uid: u64, token: *const c_char) -> c_int {
    let token = match ptr_to_str(token) {
        Some(t) => t,
        None => {
            set_last_error("token is null or not valid UTF-8");
            return -1;
        }
    };
    match save_access_token(uid, &token) {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// Load the stored access token for an account. Returns NULL if absent
/// (caller frees with vestnik_free_string).
#[no_mangle]
pub extern "C" fn vestnik_load_access_token(uid: u64) -> *mut c_char {
    match load_access_token(uid) {
        Ok(Some(token)) => {
            clear_last_error();
            to_cstring(&token).into_raw()
        }
        Ok(None) => {
            clear_last_error();
            ptr::null_mut()
        }
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Forget the stored access token for an account. Returns 0 on success.
#[no_mangle]
pub extern "C" fn vestnik_delete_access_token(uid: u64) -> c_int {
    match delete_access_token(uid) {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

// ---------- Session ----------

/// Start a session for a signed-in account. access_token may be NULL to use
/// the stored token for uid. Returns the session URI (caller frees with
/// vestnik_free_string), or NULL on error.
#[no_mangle]
pub unsafe extern "C" fn vestnik_session_new(
    access_token: *const c_char,
    uid: u64,
    only_friends_in_blist: c_int,
    blist_default_group: *const c_char,
    callbacks: *const VestnikHostCallbacks,
    user_data: *mut c_void,
) -> *mut c_char {
    if callbacks.is_null() {
        set_last_error("callbacks is null");
        return ptr::null_mut();
    }
    let token = match ptr_to_str(access_token) {
        Some(t) => t,
        None => match load_access_token(uid) {
            Ok(Some(t)) => t,
            Ok(None) => {
                set_last_error("no access token given or stored");
                return ptr::null_mut();
            }
            Err(e) => {
                set_last_error(&e);
                return ptr::null_mut();
            }
        },
    };

    let config = AccountConfig {
        only_friends_in_blist: only_friends_in_blist != 0,
        blist_default_group: ptr_to_str(blist_default_group).unwrap_or_default(),
    };
    let hooks = Arc::new(CHostHooks::new(HostCallbacks::from_c(&*callbacks, user_data)));

    let reg = registry();
    let n = reg.session_counter.fetch_add(1, Ordering::Relaxed) + 1;
    let uri = format!("vk://{}", n);

    let session = {
        let _guard = reg.runtime.enter();
        start_session(token, uid, config, hooks.clone() as Arc<dyn HostHooks>)
    };
    let holder = Arc::new(SessionHolder { session, hooks });
    if let Ok(mut guard) = reg.sessions.write() {
        guard.insert(uri.clone(), holder);
    }
    clear_last_error();
    CString::new(uri).unwrap().into_raw()
}

/// Stop a session and drop its state. Pending operations are abandoned.
#[no_mangle]
pub unsafe extern "C" fn vestnik_session_free(session_uri: *const c_char) {
    if let Some(uri) = ptr_to_str(session_uri) {
        if let Ok(mut guard) = registry().sessions.write() {
            guard.remove(&uri);
        }
    }
}

/// 1 if the session exists and its pipeline is still running.
#[no_mangle]
pub unsafe extern "C" fn vestnik_session_is_alive(session_uri: *const c_char) -> c_int {
    let alive = ptr_to_str(session_uri)
        .and_then(|uri| session_for(&uri))
        .map(|h| h.session.is_alive())
        .unwrap_or(false);
    if alive {
        1
    } else {
        0
    }
}

fn with_session(session_uri: *const c_char, cmd: impl FnOnce(&SessionHolder) -> VkCommand) -> c_int {
    let uri = match ptr_to_str(session_uri) {
        Some(uri) => uri,
        None => {
            set_last_error("session_uri is null or not valid UTF-8");
            return -1;
        }
    };
    match session_for(&uri) {
        Some(holder) => {
            holder.session.send(cmd(&holder));
            clear_last_error();
            0
        }
        None => {
            set_last_error("no such session");
            -1
        }
    }
}

// ---------- Operations ----------

/// Refresh the whole buddy list (friends + dialog partners). Returns 0 if
/// queued; on_complete fires when done.
#[no_mangle]
pub unsafe extern "C" fn vestnik_refresh_buddies(
    session_uri: *const c_char,
    update_presence: c_int,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    with_session(session_uri, |_| VkCommand::RefreshBuddies {
        update_presence: update_presence != 0,
        on_complete: unit_completion(on_complete, user_data),
    })
}

/// Fetch, render and deliver all unread messages. on_complete's status is
/// the number of messages delivered.
#[no_mangle]
pub unsafe extern "C" fn vestnik_receive_unread(
    session_uri: *const c_char,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    with_session(session_uri, |_| VkCommand::ReceiveUnread {
        on_complete: completion(on_complete, user_data),
    })
}

/// Fetch and deliver specific messages by id.
#[no_mangle]
pub unsafe extern "C" fn vestnik_receive_messages(
    session_uri: *const c_char,
    message_ids: *const u64,
    count: size_t,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    let ids = if message_ids.is_null() || count == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(message_ids, count).to_vec()
    };
    with_session(session_uri, move |_| VkCommand::ReceiveMessages {
        message_ids: ids,
        on_complete: completion(on_complete, user_data),
    })
}

/// Send a markup message to a user dialog.
#[no_mangle]
pub unsafe extern "C" fn vestnik_send_im(
    session_uri: *const c_char,
    user_id: u64,
    message: *const c_char,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    let message = match ptr_to_str(message) {
        Some(m) => m,
        None => {
            set_last_error("message is null or not valid UTF-8");
            return -1;
        }
    };
    with_session(session_uri, move |_| VkCommand::SendIm {
        user_id,
        message,
        on_complete: unit_completion(on_complete, user_data),
    })
}

/// Send an attachment-only message (e.g. "photo123_456") to a user dialog.
#[no_mangle]
pub unsafe extern "C" fn vestnik_send_im_attachment(
    session_uri: *const c_char,
    user_id: u64,
    attachment: *const c_char,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    let attachment = match ptr_to_str(attachment) {
        Some(a) => a,
        None => {
            set_last_error("attachment is null or not valid UTF-8");
            return -1;
        }
    };
    with_session(session_uri, move |_| VkCommand::SendImAttachment {
        user_id,
        attachment,
        on_complete: unit_completion(on_complete, user_data),
    })
}

/// Send a markup message to a group chat.
#[no_mangle]
pub unsafe extern "C" fn vestnik_send_chat(
    session_uri: *const c_char,
    chat_id: u64,
    message: *const c_char,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    let message = match ptr_to_str(message) {
        Some(m) => m,
        None => {
            set_last_error("message is null or not valid UTF-8");
            return -1;
        }
    };
    with_session(session_uri, move |_| VkCommand::SendChat {
        chat_id,
        message,
        on_complete: unit_completion(on_complete, user_data),
    })
}

/// Queue a typing notification. Returns the resend interval in seconds
/// (the host should call again if the user is still typing), or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn vestnik_send_typing(session_uri: *const c_char, user_id: u64) -> c_int {
    let queued = with_session(session_uri, |_| VkCommand::SendTyping {
        user_id,
        on_complete: Box::new(|result| {
            if let Err(e) = result {
                log::warn!("typing notification failed: {}", e);
            }
        }),
    });
    if queued == 0 {
        TYPING_RESEND_SECS as c_int
    } else {
        -1
    }
}

/// Mark messages as read outside the receive flow (fire and forget).
#[no_mangle]
pub unsafe extern "C" fn vestnik_mark_as_read(
    session_uri: *const c_char,
    message_ids: *const u64,
    count: size_t,
) -> c_int {
    let ids = if message_ids.is_null() || count == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(message_ids, count).to_vec()
    };
    with_session(session_uri, move |_| VkCommand::MarkAsRead {
        message_ids: ids,
        on_complete: Box::new(|result| {
            if let Err(e) = result {
                log::warn!("mark as read failed: {}", e);
            }
        }),
    })
}

/// Make uids visible in the buddy list regardless of account settings.
#[no_mangle]
pub unsafe extern "C" fn vestnik_add_to_buddy_list(
    session_uri: *const c_char,
    uids: *const u64,
    count: size_t,
    on_complete: OnComplete,
    user_data: *mut c_void,
) -> c_int {
    let uids = if uids.is_null() || count == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(uids, count).to_vec()
    };
    with_session(session_uri, move |_| VkCommand::AddToBuddyList {
        uids,
        on_complete: unit_completion(on_complete, user_data),
    })
}

/// Drop uids from the buddy list again if the friends-only setting makes
/// them unneeded. convo_closed = 1 when triggered by a conversation closing.
#[no_mangle]
pub unsafe extern "C" fn vestnik_remove_from_buddy_list_if_unneeded(
    session_uri: *const c_char,
    uids: *const u64,
    count: size_t,
    convo_closed: c_int,
) -> c_int {
    let uids = if uids.is_null() || count == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(uids, count).to_vec()
    };
    with_session(session_uri, move |_| VkCommand::RemoveFromBuddyListIfUnneeded {
        uids,
        convo_closed: convo_closed != 0,
    })
}

/// Resolved screen name callback: (uid, user_data); uid 0 = not a user.
type OnScreenNameResolved = extern "C" fn(u64, *mut c_void);

/// Resolve a vk.com screen name ("durov") to a numeric uid.
#[no_mangle]
pub unsafe extern "C" fn vestnik_resolve_screen_name(
    session_uri: *const c_char,
    screen_name: *const c_char,
    on_resolved: OnScreenNameResolved,
    user_data: *mut c_void,
) -> c_int {
    let screen_name = match ptr_to_str(screen_name) {
        Some(s) => s,
        None => {
            set_last_error("screen_name is null or not valid UTF-8");
            return -1;
        }
    };
    let user_data = SendableUserData(user_data);
    with_session(session_uri, move |_| VkCommand::ResolveScreenName {
        screen_name,
        on_complete: Box::new(move |result| {
            let user_data = user_data;
            let uid = match result {
                Ok(Some(uid)) => uid,
                Ok(None) => 0,
                Err(e) => {
                    log::warn!("screen name resolution failed: {}", e);
                    0
                }
            };
            on_resolved(uid, user_data.0);
        }),
    })
}

/// Full name callback: (name or NULL on error, user_data).
type OnFullName = extern "C" fn(*const c_char, *mut c_void);

/// Look up "First Last" for an arbitrary uid.
#[no_mangle]
pub unsafe extern "C" fn vestnik_get_user_full_name(
    session_uri: *const c_char,
    uid: u64,
    on_name: OnFullName,
    user_data: *mut c_void,
) -> c_int {
    let user_data = SendableUserData(user_data);
    with_session(session_uri, move |_| VkCommand::GetUserFullName {
        uid,
        on_complete: Box::new(move |result| {
            let user_data = user_data;
            match result {
                Ok(name) => {
                    let name_c = to_cstring(&name);
                    on_name(name_c.as_ptr(), user_data.0);
                }
                Err(e) => {
                    log::warn!("full name lookup failed: {}", e);
                    on_name(ptr::null(), user_data.0);
                }
            }
        }),
    })
}

// ---------- CAPTCHA ----------

/// Answer a CAPTCHA challenge previously delivered through
/// on_request_captcha. Returns 0 if the token was pending.
#[no_mangle]
pub unsafe extern "C" fn vestnik_captcha_provide(
    session_uri: *const c_char,
    token: u64,
    key: *const c_char,
) -> c_int {
    let key = match ptr_to_str(key) {
        Some(k) => k,
        None => {
            set_last_error("key is null or not valid UTF-8");
            return -1;
        }
    };
    let holder = match ptr_to_str(session_uri).and_then(|uri| session_for(&uri)) {
        Some(h) => h,
        None => {
            set_last_error("no such session");
            return -1;
        }
    };
    if holder.hooks.resolve_captcha(token, Some(key)) {
        clear_last_error();
        0
    } else {
        set_last_error("no pending captcha with this token");
        -1
    }
}

/// Cancel a CAPTCHA challenge; the suspended send fails with an error line
/// in the conversation.
#[no_mangle]
pub unsafe extern "C" fn vestnik_captcha_cancel(session_uri: *const c_char, token: u64) -> c_int {
    let holder = match ptr_to_str(session_uri).and_then(|uri| session_for(&uri)) {
        Some(h) => h,
        None => {
            set_last_error("no such session");
            return -1;
        }
    };
    if holder.hooks.resolve_captcha(token, None) {
        clear_last_error();
        0
    } else {
        set_last_error("no pending captcha with this token");
        -1
    }
}

// ---------- Naming helpers ----------

/// "id12345" buddy name for a uid (caller frees with vestnik_free_string).
#[no_mangle]
pub extern "C" fn vestnik_buddy_name_from_uid(uid: u64) -> *mut c_char {
    to_cstring(&buddy_name_from_uid(uid)).into_raw()
}

/// Parse an "id12345" buddy name back to a uid; 0 for other names.
#[no_mangle]
pub unsafe extern "C" fn vestnik_uid_from_buddy_name(name: *const c_char) -> u64 {
    ptr_to_str(name).and_then(|n| uid_from_buddy_name(&n)).unwrap_or(0)
}

/// Library version string (static; do not free).
#[no_mangle]
pub extern "C" fn vestnik_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}
