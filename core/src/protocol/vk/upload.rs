/*
 * upload.rs
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

//! Photo upload for outgoing messages.
//!
//! Three-step flow per photo: photos.getMessagesUploadServer hands out an
//! upload URL, the image goes there as a multipart POST, and
//! photos.saveMessagesPhoto turns the upload receipt into a photo usable as a
//! message attachment.

use log::info;
use rand::Rng;
use serde_json::Value;

use crate::error::VkError;
use crate::host::HostHooks;

use super::api::{params, VkApi};
use super::types::{field_i64, field_str, field_u64};

/// Upload one image and return its "photo{owner}_{id}" attachment id.
pub async fn upload_photo_for_im<A: VkApi>(
    api: &mut A,
    filename: &str,
    data: &[u8],
) -> Result<String, VkError> {
    let result = api.call("photos.getMessagesUploadServer", &[]).await?;
    let upload_url = field_str(&result, "upload_url")
        .ok_or_else(|| VkError::Json("getMessagesUploadServer: no upload_url".to_string()))?
        .to_string();

    let boundary = make_boundary();
    let body = multipart_body(&boundary, "photo", filename, data);
    let content_type = format!("multipart/form-data; boundary={}", boundary);
    let response = api.post(&upload_url, &content_type, body).await?;

    let receipt: Value = serde_json::from_slice(&response)
        .map_err(|e| VkError::Json(format!("upload server response: {}", e)))?;
    save_messages_photo(api, &receipt).await
}

/// Upload every referenced image from the host's image store, in message
/// order. Returns a comma-joined attachment list ("" for no images).
pub async fn upload_stored_images<A: VkApi>(
    api: &mut A,
    hooks: &dyn HostHooks,
    img_ids: &[u32],
) -> Result<String, VkError> {
    let mut attachments = String::new();
    for &img_id in img_ids {
        let (filename, data) = hooks
            .image_data(img_id)
            .ok_or_else(|| VkError::Message(format!("no stored image with id {}", img_id)))?;
        info!("vk: uploading img {}", img_id);
        let attachment = upload_photo_for_im(api, &filename, &data).await?;
        if !attachments.is_empty() {
            attachments.push(',');
        }
        attachments.push_str(&attachment);
    }
    Ok(attachments)
}

/// photos.saveMessagesPhoto with the upload receipt's server/photo/hash.
/// The saved photo gets no access_key, but the server adds one on delivery.
async fn save_messages_photo<A: VkApi>(api: &mut A, receipt: &Value) -> Result<String, VkError> {
    let server = field_i64(receipt, "server")
        .map(|s| s.to_string())
        .or_else(|| field_str(receipt, "server").map(str::to_string));
    let photo = field_str(receipt, "photo");
    let hash = field_str(receipt, "hash");
    let (server, photo, hash) = match (server, photo, hash) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => return Err(VkError::Json(format!("incomplete upload receipt: {}", receipt))),
    };

    let p = params(&[("server", &server), ("photo", photo), ("hash", hash)]);
    let result = api.call("photos.saveMessagesPhoto", &p).await?;
    let saved = result
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| VkError::Json(format!("unknown saveMessagesPhoto result: {}", result)))?;
    match (field_i64(saved, "owner_id"), field_u64(saved, "id")) {
        (Some(owner_id), Some(id)) => Ok(format!("photo{}_{}", owner_id, id)),
        _ => Err(VkError::Json(format!("unknown saveMessagesPhoto result: {}", result))),
    }
}

fn make_boundary() -> String {
    let mut rng = rand::thread_rng();
    format!("----vestnik-{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

fn multipart_body(boundary: &str, name: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            name, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{MockApi, RecordingHooks};
    use super::*;
    use crate::host::HostHooks as _;
    use serde_json::json;

    fn script_one_upload(api: &mut MockApi, owner_id: i64, id: u64) {
        api.on_call(
            "photos.getMessagesUploadServer",
            json!({"upload_url": "http://pu.vk.com/c1/upload.php"}),
        );
        api.on_post(
            "http://pu.vk.com/c1/upload.php",
            Ok(br#"{"server": 1234, "photo": "[]", "hash": "abc"}"#.to_vec()),
        );
        api.on_call(
            "photos.saveMessagesPhoto",
            json!([{"owner_id": owner_id, "id": id}]),
        );
    }

    #[tokio::test]
    async fn single_photo_roundtrip() {
        let mut api = MockApi::new();
        script_one_upload(&mut api, 7, 42);

        let attachment = upload_photo_for_im(&mut api, "cat.jpg", &[1, 2, 3]).await.unwrap();
        assert_eq!(attachment, "photo7_42");

        let save = api.calls("photos.saveMessagesPhoto");
        assert_eq!(
            save[0],
            vec![
                ("server".to_string(), "1234".to_string()),
                ("photo".to_string(), "[]".to_string()),
                ("hash".to_string(), "abc".to_string()),
            ]
        );

        let (url, body) = &api.posted()[0];
        assert_eq!(url, "http://pu.vk.com/c1/upload.php");
        let body = String::from_utf8_lossy(body);
        assert!(body.contains("name=\"photo\"; filename=\"cat.jpg\""));
    }

    #[tokio::test]
    async fn stored_images_upload_in_order() {
        let mut api = MockApi::new();
        script_one_upload(&mut api, 7, 1);
        script_one_upload(&mut api, 7, 2);
        let hooks = RecordingHooks::new();
        let a = hooks.store_image(&[1]);
        let b = hooks.store_image(&[2]);

        let attachments = upload_stored_images(&mut api, &hooks, &[a, b]).await.unwrap();
        assert_eq!(attachments, "photo7_1,photo7_2");
    }

    #[tokio::test]
    async fn missing_stored_image_is_an_error() {
        let mut api = MockApi::new();
        let hooks = RecordingHooks::new();
        assert!(upload_stored_images(&mut api, &hooks, &[5]).await.is_err());
    }

    #[tokio::test]
    async fn malformed_save_result_is_an_error() {
        let mut api = MockApi::new();
        api.on_call(
            "photos.getMessagesUploadServer",
            json!({"upload_url": "http://pu.vk.com/u"}),
        );
        api.on_post("http://pu.vk.com/u", Ok(br#"{"server": 1, "photo": "x", "hash": "h"}"#.to_vec()));
        api.on_call("photos.saveMessagesPhoto", json!([{"id": 3}]));

        assert!(upload_photo_for_im(&mut api, "f", &[0]).await.is_err());
    }
}
