/*
 * buddy.rs
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

//! Buddy list reconciliation.
//!
//! The full update pulls friends.get, collects non-friend dialog partners
//! from messages.getDialogs, fills in their profiles with users.get and then
//! reconciles the host's buddy list against the accumulated roster: adds,
//! removals, aliases, presence, last-seen and avatars. Avatars are fetched
//! afterwards from a worklist, one at a time, and only when the stored icon
//! checksum no longer matches the avatar URL.

use std::collections::{HashMap, HashSet};

use log::{info, warn};
use serde_json::Value;

use crate::config::AccountConfig;
use crate::error::VkError;
use crate::host::{HostHooks, Presence};
use crate::markup::unescape_html;

use super::api::{call_items, params, VkApi};
use super::types::{
    field_array, field_i64, field_str, field_u64, join_ids, VkUserInfo, EMPTY_PHOTO_URLS,
    USER_FIELDS,
};

/// Accumulated knowledge about users: every profile any call has returned,
/// plus the current friend set. Lives in the session state.
#[derive(Default)]
pub struct Roster {
    pub user_infos: HashMap<u64, VkUserInfo>,
    pub friend_uids: HashSet<u64>,
}

impl Roster {
    /// True if we have no usable profile for the uid.
    pub fn is_unknown(&self, uid: u64) -> bool {
        !self.user_infos.contains_key(&uid)
    }
}

/// Full buddy list refresh.
pub async fn update_buddies<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    roster: &mut Roster,
    config: &AccountConfig,
    self_uid: u64,
    update_presence: bool,
) -> Result<(), VkError> {
    info!("vk: updating full buddy list");

    let p = params(&[("user_id", &self_uid.to_string()), ("fields", USER_FIELDS)]);
    let result = api.call("friends.get", &p).await?;
    roster.friend_uids = update_user_infos(roster, &result, true);

    let dialog_uids = users_from_dialogs(api).await?;
    let mut non_friend_uids: Vec<u64> = Vec::new();
    if !config.only_friends_in_blist {
        for uid in dialog_uids {
            if !roster.friend_uids.contains(&uid) {
                non_friend_uids.push(uid);
            }
        }
        non_friend_uids.sort_unstable();
    }
    add_or_update_user_infos(api, roster, &non_friend_uids).await?;

    let icons = update_buddy_list(hooks, roster, config, update_presence);
    fetch_buddy_icons(api, hooks, &icons).await;
    Ok(())
}

/// users.get for the given uids; upserts their profiles into the roster.
pub async fn add_or_update_user_infos<A: VkApi>(
    api: &mut A,
    roster: &mut Roster,
    uids: &[u64],
) -> Result<(), VkError> {
    if uids.is_empty() {
        return Ok(());
    }
    info!("vk: updating information for buddies {}", join_ids(uids));

    let p = params(&[("user_ids", &join_ids(uids)), ("fields", USER_FIELDS)]);
    let result = api.call("users.get", &p).await?;
    update_user_infos(roster, &result, false);
    Ok(())
}

/// Ensure the given uids are present in the buddy list, fetching unknown
/// profiles first. Ignores the friends-only setting (the caller wants these
/// visible, e.g. a message just arrived from them).
pub async fn add_to_buddy_list<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    roster: &mut Roster,
    config: &AccountConfig,
    uids: &[u64],
) -> Result<(), VkError> {
    if uids.is_empty() {
        return Ok(());
    }
    let unknown: Vec<u64> = uids.iter().copied().filter(|u| roster.is_unknown(*u)).collect();
    add_or_update_user_infos(api, roster, &unknown).await?;

    let mut icons = Vec::new();
    for uid in uids {
        if let Some(info) = roster.user_infos.get(uid) {
            update_buddy_in_blist(hooks, config, *uid, info, true, &mut icons);
        }
    }
    fetch_buddy_icons(api, hooks, &icons).await;
    Ok(())
}

/// Make sure the peer of an outgoing message or typing notification is
/// visible in the buddy list.
pub async fn add_buddy_if_needed<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    roster: &mut Roster,
    config: &AccountConfig,
    uid: u64,
) -> Result<(), VkError> {
    if uid == 0 || hooks.find_buddy(uid) {
        return Ok(());
    }
    add_to_buddy_list(api, hooks, roster, config, &[uid]).await
}

/// Drop the given uids from the buddy list if the friends-only setting is on
/// and nothing keeps them visible. An open conversation keeps a buddy unless
/// this call is the conversation being closed.
pub fn remove_from_buddy_list_if_not_needed(
    hooks: &dyn HostHooks,
    roster: &Roster,
    config: &AccountConfig,
    uids: &[u64],
    convo_closed: bool,
) {
    if !config.only_friends_in_blist {
        return;
    }
    for &uid in uids {
        if roster.friend_uids.contains(&uid) {
            continue;
        }
        if !convo_closed && hooks.have_conversation_with(uid) {
            continue;
        }
        if hooks.find_buddy(uid) {
            info!("vk: removing {} from buddy list as unneeded", uid);
            hooks.remove_buddy(uid);
        }
    }
}

/// "First Last" for an arbitrary uid, bypassing the roster.
pub async fn get_user_full_name<A: VkApi>(api: &mut A, uid: u64) -> Result<String, VkError> {
    let p = params(&[("user_ids", &uid.to_string()), ("fields", "first_name,last_name")]);
    let result = api.call("users.get", &p).await?;
    let users = match result.as_array() {
        Some(users) if users.len() == 1 => users,
        _ => return Err(VkError::Json(format!("users.get: unexpected result for {}", uid))),
    };
    match (field_str(&users[0], "first_name"), field_str(&users[0], "last_name")) {
        (Some(first), Some(last)) => Ok(format!("{} {}", first, last)),
        _ => Err(VkError::Json(format!("users.get: incomplete result for {}", uid))),
    }
}

/// utils.resolveScreenName; None when the name does not resolve to a user.
pub async fn resolve_screen_name<A: VkApi>(
    api: &mut A,
    screen_name: &str,
) -> Result<Option<u64>, VkError> {
    info!("vk: finding user id for {}", screen_name);
    let p = params(&[("screen_name", screen_name)]);
    let result = api.call("utils.resolveScreenName", &p).await?;
    match (field_str(&result, "type"), field_u64(&result, "object_id")) {
        (Some("user"), Some(uid)) => Ok(Some(uid)),
        (Some(other), _) => {
            warn!("vk: {} resolves to a {}, not a user", screen_name, other);
            Ok(None)
        }
        _ => {
            warn!("vk: unable to resolve {}", screen_name);
            Ok(None)
        }
    }
}

// ── Profile parsing ──────────────────────────────────────────────────

/// Upsert every profile in a friends.get / users.get result. friends.get
/// wraps the user array in `{count, items}`; users.get returns it bare.
/// Returns the uids that can actually be messaged.
fn update_user_infos(roster: &mut Roster, result: &Value, friends_get: bool) -> HashSet<u64> {
    let items = if friends_get {
        field_array(result, "items")
    } else {
        result.as_array()
    };
    let items = match items {
        Some(items) => items,
        None => {
            warn!("vk: wrong type returned from friends.get or users.get");
            return HashSet::new();
        }
    };

    let mut active = HashSet::new();
    for v in items {
        if !v.is_object() {
            warn!("vk: strange node in friends.get or users.get result: {}", v);
            continue;
        }
        if let Some(uid) = update_user_info(roster, v) {
            active.insert(uid);
        }
    }
    active
}

/// Upsert one profile. Returns the uid only if the user is messageable;
/// deactivated accounts and users who block private messages are stored with
/// `can_write: false` and excluded from the active set.
fn update_user_info(roster: &mut Roster, fields: &Value) -> Option<u64> {
    let uid = field_u64(fields, "id");
    let first = field_str(fields, "first_name");
    let last = field_str(fields, "last_name");
    let (uid, first, last) = match (uid, first, last) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => {
            warn!("vk: incomplete user information: {}", fields);
            return None;
        }
    };

    let info = roster.user_infos.entry(uid).or_default();
    info.name = format!("{} {}", first, last);

    if fields.get("deactivated").is_some()
        || field_i64(fields, "can_write_private_message") != Some(1)
    {
        info.can_write = false;
        return None;
    }
    info.can_write = true;

    info.photo_min = field_str(fields, "photo_50").unwrap_or_default().to_string();
    if EMPTY_PHOTO_URLS.contains(&info.photo_min.as_str()) {
        info.photo_min.clear();
    }
    info.photo_max = field_str(fields, "photo_max_orig").unwrap_or_default().to_string();
    info.activity = unescape_html(field_str(fields, "activity").unwrap_or_default());
    info.bdate = unescape_html(field_str(fields, "bdate").unwrap_or_default());
    info.education = unescape_html(&make_education_string(fields));
    info.mobile_phone = unescape_html(field_str(fields, "mobile_phone").unwrap_or_default());
    info.domain = field_str(fields, "domain").unwrap_or_default().to_string();
    info.online = field_i64(fields, "online") == Some(1);
    info.is_mobile = fields.get("online_mobile").is_some();
    info.last_seen = fields
        .get("last_seen")
        .and_then(|v| field_i64(v, "time"))
        .unwrap_or(0);

    Some(uid)
}

/// "faculty, university 'YY" or however much of that is present.
fn make_education_string(fields: &Value) -> String {
    let university = match field_str(fields, "university_name") {
        Some(u) if !u.is_empty() => u,
        _ => return String::new(),
    };
    let mut ret = match field_str(fields, "faculty_name") {
        Some(faculty) if !faculty.is_empty() => format!("{}, {}", faculty, university),
        _ => university.to_string(),
    };
    if let Some(graduation) = field_i64(fields, "graduation") {
        if graduation != 0 {
            if graduation >= 2000 {
                ret.push_str(&format!(" '{:02}", graduation % 100));
            } else {
                ret.push_str(&format!(" {}", graduation));
            }
        }
    }
    ret
}

// ── Dialogs ──────────────────────────────────────────────────────────

/// Collect peer uids from messages.getDialogs, paging until an empty page.
async fn users_from_dialogs<A: VkApi>(api: &mut A) -> Result<HashSet<u64>, VkError> {
    // preview_length minimum is 1; zero means "full message".
    let p = params(&[("preview_length", "1"), ("count", "200")]);
    let dialogs = match call_items(api, "messages.getDialogs", &p).await {
        Ok(dialogs) => dialogs,
        Err(e @ VkError::Json(_)) => {
            warn!("vk: strange response from messages.getDialogs: {}", e);
            return Ok(HashSet::new());
        }
        Err(e) => return Err(e),
    };

    let mut uids = HashSet::new();
    for dialog in &dialogs {
        let uid = dialog
            .get("message")
            .and_then(|m| field_u64(m, "user_id"))
            .or_else(|| field_u64(dialog, "user_id"));
        match uid {
            Some(uid) => {
                uids.insert(uid);
            }
            None => warn!("vk: strange dialog item: {}", dialog),
        }
    }
    Ok(uids)
}

// ── Reconciliation ───────────────────────────────────────────────────

/// Reconcile the host's buddy list against the roster. Returns the avatar
/// fetch worklist.
fn update_buddy_list(
    hooks: &dyn HostHooks,
    roster: &Roster,
    config: &AccountConfig,
    update_presence: bool,
) -> Vec<(u64, String)> {
    let friends_only = config.only_friends_in_blist;

    let mut icons = Vec::new();
    let mut uids: Vec<u64> = roster.user_infos.keys().copied().collect();
    uids.sort_unstable();
    for uid in uids {
        if friends_only
            && !roster.friend_uids.contains(&uid)
            && !hooks.have_conversation_with(uid)
        {
            continue;
        }
        update_buddy_in_blist(hooks, config, uid, &roster.user_infos[&uid], update_presence, &mut icons);
    }

    // Removal pass over the host's current list. Any known user stays
    // unless friends-only is on and nothing keeps them visible.
    for uid in hooks.buddy_uids() {
        if roster.user_infos.contains_key(&uid) {
            if !friends_only {
                continue;
            }
            if roster.friend_uids.contains(&uid) || hooks.have_conversation_with(uid) {
                continue;
            }
        }
        info!("vk: removing {} from buddy list", uid);
        hooks.remove_buddy(uid);
    }
    icons
}

/// Add or refresh one buddy. Avatar downloads are deferred to `icons`.
fn update_buddy_in_blist(
    hooks: &dyn HostHooks,
    config: &AccountConfig,
    uid: u64,
    info: &VkUserInfo,
    update_presence: bool,
    icons: &mut Vec<(u64, String)>,
) {
    if !hooks.find_buddy(uid) {
        info!("vk: adding {} to buddy list", uid);
        hooks.add_buddy(uid, &config.blist_default_group);
    }

    // A locally set alias always wins over the server name.
    if !hooks.has_custom_alias(uid) {
        hooks.set_alias(uid, &info.name);
    }

    if update_presence {
        let presence = if info.online { Presence::Online } else { Presence::Offline };
        hooks.set_status(uid, presence);
    } else {
        // Presence transitions arrive elsewhere; just refresh the derived
        // status text.
        hooks.refresh_status(uid);
    }

    if !info.online {
        if info.last_seen != 0 {
            hooks.set_last_seen(uid, info.last_seen);
        } else {
            warn!("vk: zero last-seen time for {}", uid);
        }
    }

    if info.photo_min.is_empty() {
        hooks.clear_icon(uid);
    } else if hooks.icon_checksum(uid).as_deref() != Some(info.photo_min.as_str()) {
        icons.push((uid, info.photo_min.clone()));
    }
}

/// Download queued avatars one at a time; the URL doubles as the checksum.
async fn fetch_buddy_icons<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    icons: &[(u64, String)],
) {
    for (uid, url) in icons {
        match api.fetch(url).await {
            Ok(data) => {
                info!("vk: updating buddy icon for {}", uid);
                hooks.set_icon(*uid, &data, url);
            }
            Err(e) => warn!("vk: error while fetching buddy icon: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{MockApi, RecordingHooks};
    use super::*;
    use serde_json::json;

    fn user(uid: u64, first: &str, last: &str) -> Value {
        json!({
            "id": uid, "first_name": first, "last_name": last,
            "can_write_private_message": 1,
            "online": 0,
            "last_seen": {"time": 1000},
        })
    }

    fn empty_dialogs(api: &mut MockApi) {
        api.on_call("messages.getDialogs", json!({"count": 0, "items": []}));
    }

    #[tokio::test]
    async fn full_update_adds_friends_and_aliases() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"count": 2, "items": [user(1, "Ann", "A"), user(2, "Bob", "B")]}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        let mut roster = Roster::default();
        let config = AccountConfig::default();

        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();

        let added = hooks.added();
        assert!(added.contains_key(&1) && added.contains_key(&2));
        assert_eq!(hooks.aliases()[&1], "Ann A");
        assert_eq!(roster.friend_uids, [1, 2].into_iter().collect());
    }

    #[tokio::test]
    async fn unwritable_users_stay_out_of_the_friend_set() {
        let mut api = MockApi::new();
        api.on_call(
            "friends.get",
            json!({"count": 2, "items": [
                user(1, "Ann", "A"),
                {"id": 2, "first_name": "Bob", "last_name": "B", "can_write_private_message": 0},
            ]}),
        );
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        let mut roster = Roster::default();
        let config = AccountConfig::default();

        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();

        // Still visible in the roster, just never messageable.
        assert!(hooks.added().contains_key(&1));
        assert!(hooks.added().contains_key(&2));
        assert!(!roster.friend_uids.contains(&2));
        assert!(!roster.user_infos[&2].can_write);
    }

    #[tokio::test]
    async fn deactivated_account_is_excluded_under_friends_only() {
        let mut api = MockApi::new();
        let mut u = user(3, "Gone", "G");
        u["deactivated"] = json!("banned");
        api.on_call("friends.get", json!({"count": 1, "items": [u]}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        let mut roster = Roster::default();
        let config = AccountConfig { only_friends_in_blist: true, ..Default::default() };

        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();
        assert!(hooks.added().is_empty());
    }

    #[tokio::test]
    async fn deactivated_friend_stays_when_friends_only_off() {
        let mut api = MockApi::new();
        let mut u = user(5, "Gone", "G");
        u["deactivated"] = json!("banned");
        api.on_call("friends.get", json!({"count": 1, "items": [u]}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        hooks.with_buddy(5);
        hooks.with_buddy(77);
        let mut roster = Roster::default();

        update_buddies(&mut api, &hooks, &mut roster, &AccountConfig::default(), 99, true)
            .await
            .unwrap();

        // 5 is a known (if deactivated) user and stays; 77 is stale.
        assert_eq!(hooks.removed(), vec![77]);
    }

    #[tokio::test]
    async fn dialog_partners_get_profiles_fetched() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"count": 1, "items": [user(1, "Ann", "A")]}));
        api.on_call(
            "messages.getDialogs",
            json!({"count": 2, "items": [
                {"message": {"user_id": 1}},
                {"message": {"user_id": 5}},
            ]}),
        );
        api.on_call("messages.getDialogs", json!({"count": 2, "items": []}));
        api.on_call("users.get", json!([user(5, "Eve", "E")]));
        let hooks = RecordingHooks::new();
        let mut roster = Roster::default();

        update_buddies(&mut api, &hooks, &mut roster, &AccountConfig::default(), 99, true)
            .await
            .unwrap();

        let users_get = api.calls("users.get");
        assert_eq!(users_get.len(), 1);
        assert_eq!(users_get[0][0], ("user_ids".to_string(), "5".to_string()));
        assert!(hooks.added().contains_key(&5));
    }

    #[tokio::test]
    async fn friends_only_drops_non_friends_without_conversation() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"count": 1, "items": [user(1, "Ann", "A")]}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        hooks.with_buddy(5);
        let mut roster = Roster::default();
        roster.user_infos.insert(5, VkUserInfo { can_write: true, ..Default::default() });
        let config = AccountConfig { only_friends_in_blist: true, ..Default::default() };

        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();
        assert_eq!(hooks.removed(), vec![5]);
    }

    #[tokio::test]
    async fn open_conversation_keeps_non_friend_visible() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"count": 0, "items": []}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        hooks.with_buddy(5);
        hooks.with_conversation(5);
        let mut roster = Roster::default();
        roster.user_infos.insert(
            5,
            VkUserInfo { can_write: true, name: "Eve E".to_string(), last_seen: 1, ..Default::default() },
        );
        let config = AccountConfig { only_friends_in_blist: true, ..Default::default() };

        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();
        assert!(hooks.removed().is_empty());
    }

    #[tokio::test]
    async fn icon_fetch_is_checksum_gated() {
        let mut api = MockApi::new();
        let mut u = user(1, "Ann", "A");
        u["photo_50"] = json!("http://img/ann50.jpg");
        api.on_call("friends.get", json!({"count": 1, "items": [u.clone()]}));
        empty_dialogs(&mut api);
        api.on_fetch("http://img/ann50.jpg", Ok(vec![9, 9]));
        let hooks = RecordingHooks::new();
        let mut roster = Roster::default();
        let config = AccountConfig::default();

        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();
        assert_eq!(hooks.icons()[&1], (vec![9, 9], "http://img/ann50.jpg".to_string()));

        // Second pass: checksum matches, no fetch.
        api.on_call("friends.get", json!({"count": 1, "items": [u]}));
        empty_dialogs(&mut api);
        update_buddies(&mut api, &hooks, &mut roster, &config, 99, true).await.unwrap();
        assert_eq!(api.fetched().len(), 1);
    }

    #[tokio::test]
    async fn placeholder_avatar_clears_icon() {
        let mut api = MockApi::new();
        let mut u = user(1, "Ann", "A");
        u["photo_50"] = json!("http://vkontakte.ru/images/camera_a.gif");
        api.on_call("friends.get", json!({"count": 1, "items": [u]}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        hooks.with_icon_checksum(1, "http://img/old.jpg");
        let mut roster = Roster::default();

        update_buddies(&mut api, &hooks, &mut roster, &AccountConfig::default(), 99, true)
            .await
            .unwrap();
        assert!(hooks.icons().get(&1).is_none());
        assert!(api.fetched().is_empty());
    }

    #[tokio::test]
    async fn custom_alias_is_preserved() {
        let mut api = MockApi::new();
        api.on_call("friends.get", json!({"count": 1, "items": [user(1, "Ann", "A")]}));
        empty_dialogs(&mut api);
        let hooks = RecordingHooks::new();
        hooks.with_custom_alias(1);
        let mut roster = Roster::default();

        update_buddies(&mut api, &hooks, &mut roster, &AccountConfig::default(), 99, true)
            .await
            .unwrap();
        assert!(hooks.aliases().is_empty());
    }

    #[test]
    fn education_string_assembly() {
        let v = json!({
            "university_name": "MSU", "faculty_name": "Physics", "graduation": 2009,
        });
        assert_eq!(make_education_string(&v), "Physics, MSU '09");

        let v = json!({"university_name": "MSU", "graduation": 1998});
        assert_eq!(make_education_string(&v), "MSU 1998");

        let v = json!({"university_name": ""});
        assert_eq!(make_education_string(&v), "");

        let v = json!({"faculty_name": "Physics"});
        assert_eq!(make_education_string(&v), "");
    }

    #[tokio::test]
    async fn resolve_screen_name_variants() {
        let mut api = MockApi::new();
        api.on_call("utils.resolveScreenName", json!({"type": "user", "object_id": 77}));
        api.on_call("utils.resolveScreenName", json!({"type": "group", "object_id": 8}));
        api.on_call("utils.resolveScreenName", json!([]));

        assert_eq!(resolve_screen_name(&mut api, "durov").await.unwrap(), Some(77));
        assert_eq!(resolve_screen_name(&mut api, "club8").await.unwrap(), None);
        assert_eq!(resolve_screen_name(&mut api, "nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_name_lookup() {
        let mut api = MockApi::new();
        api.on_call("users.get", json!([{"first_name": "Ann", "last_name": "A"}]));
        assert_eq!(get_user_full_name(&mut api, 1).await.unwrap(), "Ann A");

        api.on_call("users.get", json!([]));
        assert!(get_user_full_name(&mut api, 1).await.is_err());
    }
}
