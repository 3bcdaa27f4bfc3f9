use anyhow::Context;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::state::AppState;

/// One file received in a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Hand a file to the storage service under a fresh key. Returns the hosted
/// URL the object is reachable under.
pub async fn upload_image(
    st: &AppState,
    folder: &str,
    file: &UploadedFile,
) -> anyhow::Result<String> {
    let ext = ext_from_mime(&file.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", folder, Uuid::new_v4(), ext);
    debug!(?file.file_name, %key, size = file.bytes.len(), "uploading file");
    st.storage
        .put_object(&key, file.bytes.clone(), &file.content_type)
        .await
        .with_context(|| format!("put_object {}", key))
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
