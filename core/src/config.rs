/*
 * config.rs
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

//! Account configuration and access-token storage.
//!
//! The token is a secret, so it lives in the system keychain when available;
//! otherwise in `~/.vestnik/token` encrypted with XChaCha20-Poly1305 using a
//! key stored next to it in `~/.vestnik/.key` (mode 0o600). The non-secret
//! per-account settings are the host's problem (they arrive via
//! [`AccountConfig`] on session creation) and are never written by us.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::XChaCha20Poly1305;
use keyring::Entry;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Magic header for the encrypted token file (5 bytes).
const ENCRYPTED_MAGIC: &[u8] = b"VKENC";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Service name for keyring entries (one entry per account uid).
const KEYRING_SERVICE: &str = "vestnik";

/// When true, the token is read/written via the system keychain; when false, via the encrypted file.
static USE_KEYCHAIN: AtomicBool = AtomicBool::new(false);

/// Per-account settings, supplied by the host when the session is created.
#[derive(Debug, Clone, Default)]
pub struct AccountConfig {
    /// Keep only friends in the buddy list; dialog partners are still shown
    /// while a conversation with them is open.
    pub only_friends_in_blist: bool,
    /// Buddy-list group new buddies are added to. Empty = host default group.
    pub blist_default_group: String,
}

/// Set whether to use the system keychain (true) or the encrypted file (false) for the token.
pub fn set_credentials_backend(use_keychain: bool) {
    USE_KEYCHAIN.store(use_keychain, Ordering::SeqCst);
}

/// Return true if the credentials backend is the system keychain.
pub fn credentials_use_keychain() -> bool {
    USE_KEYCHAIN.load(Ordering::SeqCst)
}

/// Probe: try to create and delete a dummy keyring entry. Returns true if the system keychain is available.
pub fn keychain_available() -> bool {
    let entry = match Entry::new(KEYRING_SERVICE, "__vestnik_probe__") {
        Ok(e) => e,
        Err(_) => return false,
    };
    let _ = entry.set_password("probe");
    let _ = entry.delete_credential();
    true
}

/// Default config directory: ~/.vestnik.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).map(|h| h.join(".vestnik"))
}

/// Default token file path: ~/.vestnik/token.
/// Format: "VKENC" + 24-byte nonce + XChaCha20-Poly1305 ciphertext (with tag).
pub fn default_token_path() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("token"))
}

/// Path to the key file for token encryption: same directory as the token file, file `.key`.
fn key_path(token_path: &Path) -> Option<PathBuf> {
    token_path.parent().map(|p| p.join(".key"))
}

/// Read the key file (32 bytes). Returns error if missing or wrong length.
fn read_key(key_path: &Path) -> Result<[u8; KEY_LEN], String> {
    let buf = fs::read(key_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            "encrypted token file but key file not found".to_string()
        } else {
            e.to_string()
        }
    })?;
    if buf.len() != KEY_LEN {
        return Err("key file has wrong length".to_string());
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&buf);
    Ok(key)
}

/// Read the key file, creating it with fresh random bytes (mode 0o600 on unix) if missing.
fn read_or_create_key(key_path: &Path) -> Result<[u8; KEY_LEN], String> {
    if key_path.exists() {
        return read_key(key_path);
    }
    if let Some(dir) = key_path.parent() {
        fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    }
    let key = XChaCha20Poly1305::generate_key(&mut OsRng);
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    opts.mode(0o600);
    let mut f = opts.open(key_path).map_err(|e| e.to_string())?;
    f.write_all(&key).map_err(|e| e.to_string())?;
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&key);
    Ok(out)
}

fn load_token_file(path: &Path) -> Result<Option<String>, String> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    if data.len() < ENCRYPTED_MAGIC.len() + NONCE_LEN || &data[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
        return Err("token file has unknown format".to_string());
    }
    let kp = key_path(path).ok_or_else(|| "token file has no parent directory".to_string())?;
    let key = read_key(&kp)?;
    let cipher = XChaCha20Poly1305::new((&key).into());
    let nonce_start = ENCRYPTED_MAGIC.len();
    let nonce = &data[nonce_start..nonce_start + NONCE_LEN];
    let plaintext = cipher
        .decrypt(nonce.into(), &data[nonce_start + NONCE_LEN..])
        .map_err(|_| "token file failed to decrypt".to_string())?;
    let token = String::from_utf8(plaintext).map_err(|_| "token is not UTF-8".to_string())?;
    Ok(Some(token))
}

fn save_token_file(path: &Path, token: &str) -> Result<(), String> {
    let kp = key_path(path).ok_or_else(|| "token file has no parent directory".to_string())?;
    let key = read_or_create_key(&kp)?;
    let cipher = XChaCha20Poly1305::new((&key).into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, token.as_bytes())
        .map_err(|_| "token encryption failed".to_string())?;
    let mut data = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_LEN + ciphertext.len());
    data.extend_from_slice(ENCRYPTED_MAGIC);
    data.extend_from_slice(&nonce);
    data.extend_from_slice(&ciphertext);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    }
    fs::write(path, &data).map_err(|e| e.to_string())
}

/// Load the stored access token for the given account uid. Ok(None) if none stored.
pub fn load_access_token(uid: u64) -> Result<Option<String>, String> {
    if credentials_use_keychain() {
        let entry = Entry::new(KEYRING_SERVICE, &uid.to_string()).map_err(|e| e.to_string())?;
        match entry.get_password() {
            Ok(t) => Ok(Some(t)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    } else {
        let path = default_token_path().ok_or_else(|| "HOME not set".to_string())?;
        load_token_file(&path)
    }
}

/// Store the access token for the given account uid.
pub fn save_access_token(uid: u64, token: &str) -> Result<(), String> {
    if credentials_use_keychain() {
        let entry = Entry::new(KEYRING_SERVICE, &uid.to_string()).map_err(|e| e.to_string())?;
        entry.set_password(token).map_err(|e| e.to_string())
    } else {
        let path = default_token_path().ok_or_else(|| "HOME not set".to_string())?;
        save_token_file(&path, token)
    }
}

/// Remove the stored access token. No-op if nothing is stored.
pub fn delete_access_token(uid: u64) -> Result<(), String> {
    if credentials_use_keychain() {
        let entry = Entry::new(KEYRING_SERVICE, &uid.to_string()).map_err(|e| e.to_string())?;
        let _ = entry.delete_credential();
        Ok(())
    } else {
        let path = default_token_path().ok_or_else(|| "HOME not set".to_string())?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("vestnik-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");
        save_token_file(&path, "abcdef0123456789").unwrap();
        let loaded = load_token_file(&path).unwrap();
        assert_eq!(loaded.as_deref(), Some("abcdef0123456789"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_token_file_is_none() {
        let dir = std::env::temp_dir().join(format!("vestnik-test-none-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");
        assert!(load_token_file(&path).unwrap().is_none());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn garbage_token_file_is_error() {
        let dir = std::env::temp_dir().join(format!("vestnik-test-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");
        fs::write(&path, b"not encrypted").unwrap();
        assert!(load_token_file(&path).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
