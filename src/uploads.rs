use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use actix_multipart::{Field, Multipart};
use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use chrono::Utc;
use futures_util::future::LocalBoxFuture;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::AppConfig;
use crate::error::ApiError;

pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
const MAX_TEXT_FIELD_SIZE: usize = 1024 * 1024;

const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// File fields a route accepts, with the maximum number of files per field.
pub trait UploadFields {
    const FIELDS: &'static [(&'static str, usize)];
}

pub struct ListingUploads;

impl UploadFields for ListingUploads {
    const FIELDS: &'static [(&'static str, usize)] = &[("featuredImage", 1), ("otherImages", 5)];
}

pub struct BannerUpload;

impl UploadFields for BannerUpload {
    const FIELDS: &'static [(&'static str, usize)] = &[("banner_image", 1)];
}

pub struct FeaturedImageUpload;

impl UploadFields for FeaturedImageUpload {
    const FIELDS: &'static [(&'static str, usize)] = &[("featured_image", 1)];
}

/// A file written to the upload directory during the current request.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub field: String,
    pub file_name: String,
    pub path: PathBuf,
}

impl StoredFile {
    pub fn public_url(&self, base_url: &str) -> String {
        format!("{}/uploads/{}", base_url.trim_end_matches('/'), self.file_name).replace('\\', "/")
    }
}

/// Request body that is either JSON or `multipart/form-data`.
///
/// Text parts become string values in `fields`; file parts are checked against the
/// whitelist and streamed to the upload directory before the handler runs. When
/// extraction fails every file already written for the request is removed.
pub struct FormData<S> {
    pub fields: Map<String, Value>,
    pub files: Vec<StoredFile>,
    _fields: PhantomData<S>,
}

impl<S> FormData<S> {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|err| ApiError::validation("body", err.to_string()))
    }

    pub fn file(&self, field: &str) -> Option<&StoredFile> {
        self.files.iter().find(|file| file.field == field)
    }

    pub fn files_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a StoredFile> + 'a {
        self.files.iter().filter(move |file| file.field == field)
    }
}

impl<S: UploadFields + 'static> FromRequest for FormData<S> {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        let mut payload = payload.take();

        Box::pin(async move {
            let upload_dir = req
                .app_data::<web::Data<AppConfig>>()
                .map(|config| config.upload_dir.clone())
                .ok_or_else(|| ApiError::internal("AppConfig is not registered as app data"))?;

            if req.content_type().starts_with("multipart/form-data") {
                let multipart = Multipart::new(req.headers(), payload);
                let mut stored = Vec::new();
                return match read_multipart::<S>(multipart, &upload_dir, &mut stored).await {
                    Ok(fields) => Ok(Self {
                        fields,
                        files: stored,
                        _fields: PhantomData,
                    }),
                    Err(err) => {
                        discard(&stored).await;
                        Err(err)
                    }
                };
            }

            let bytes = web::Bytes::from_request(&req, &mut payload)
                .await
                .map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))?;
            let fields = if bytes.iter().all(u8::is_ascii_whitespace) {
                Map::new()
            } else {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => return Err(ApiError::validation("body", "Expected a JSON object")),
                    Err(err) => return Err(ApiError::validation("body", err.to_string())),
                }
            };

            Ok(Self {
                fields,
                files: Vec::new(),
                _fields: PhantomData,
            })
        })
    }
}

async fn read_multipart<S: UploadFields>(
    mut multipart: Multipart,
    upload_dir: &Path,
    stored: &mut Vec<StoredFile>,
) -> Result<Map<String, Value>, ApiError> {
    let mut fields = Map::new();

    while let Some(item) = multipart.next().await {
        let mut field = item.map_err(|err| ApiError::BadRequest(format!("Malformed multipart body: {err}")))?;
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let Some(original_name) = file_name else {
            let value = read_text(&mut field, &name).await?;
            push_text(&mut fields, name, value);
            continue;
        };

        if original_name.is_empty() {
            // Empty file input.
            drain(&mut field).await?;
            continue;
        }

        let Some(&(_, max_count)) = S::FIELDS.iter().find(|(allowed, _)| *allowed == name) else {
            log::warn!("Rejected upload on unexpected field '{name}'");
            return Err(ApiError::validation(name, "Unexpected file field"));
        };
        if stored.iter().filter(|file| file.field == name).count() >= max_count {
            log::warn!("Rejected upload: too many files for '{name}'");
            return Err(ApiError::validation(name, format!("At most {max_count} file(s) allowed")));
        }

        let mime = field.content_type().map(|m| m.essence_str().to_string());
        if !is_allowed_file(mime.as_deref(), &original_name) {
            log::warn!("Rejected upload '{original_name}' with type {mime:?}");
            return Err(ApiError::UnsupportedFileType);
        }

        let file = store_field(&mut field, upload_dir, &name, &original_name).await?;
        stored.push(file);
    }

    Ok(fields)
}

fn push_text(fields: &mut Map<String, Value>, name: String, value: String) {
    match fields.get_mut(&name) {
        Some(Value::Array(values)) => values.push(Value::String(value)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(value)]);
        }
        None => {
            fields.insert(name, Value::String(value));
        }
    }
}

async fn read_text(field: &mut Field, name: &str) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|err| ApiError::BadRequest(format!("Malformed multipart body: {err}")))?;
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_SIZE {
            return Err(ApiError::validation(name, "Field value too large"));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ApiError::validation(name, "Field must be valid UTF-8"))
}

async fn drain(field: &mut Field) -> Result<(), ApiError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|err| ApiError::BadRequest(format!("Malformed multipart body: {err}")))?;
    }
    Ok(())
}

async fn store_field(
    field: &mut Field,
    upload_dir: &Path,
    name: &str,
    original_name: &str,
) -> Result<StoredFile, ApiError> {
    fs::create_dir_all(upload_dir)
        .await
        .map_err(ApiError::StorageUnavailable)?;

    let sanitized = sanitize_file_name(original_name);
    let (file_name, path, mut out) = create_unique(upload_dir, &sanitized).await?;

    let mut size = 0usize;
    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                remove_quietly(&path).await;
                return Err(ApiError::BadRequest(format!("Malformed multipart body: {err}")));
            }
        };

        size += chunk.len();
        if size > MAX_FILE_SIZE {
            drop(out);
            remove_quietly(&path).await;
            log::warn!("Rejected upload '{original_name}': larger than {MAX_FILE_SIZE} bytes");
            return Err(ApiError::FileTooLarge);
        }

        if let Err(err) = out.write_all(&chunk).await {
            remove_quietly(&path).await;
            return Err(ApiError::StorageUnavailable(err));
        }
    }

    if let Err(err) = out.flush().await {
        remove_quietly(&path).await;
        return Err(ApiError::StorageUnavailable(err));
    }

    Ok(StoredFile {
        field: name.to_string(),
        file_name,
        path,
    })
}

/// Opens `<unix-ms>-<name>` exclusively, bumping the timestamp on collision.
async fn create_unique(
    upload_dir: &Path,
    sanitized: &str,
) -> Result<(String, PathBuf, fs::File), ApiError> {
    let mut stamp = Utc::now().timestamp_millis();
    loop {
        let file_name = format!("{stamp}-{sanitized}");
        let path = upload_dir.join(&file_name);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file_name, path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
            Err(err) => return Err(ApiError::StorageUnavailable(err)),
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            log::error!("Failed to remove partial upload {}: {err:?}", path.display());
        }
    }
}

/// Keeps the base name and replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => sanitized,
    }
}

pub fn is_allowed_file(mime: Option<&str>, original_name: &str) -> bool {
    let mime_ok = mime.is_some_and(|mime| ALLOWED_MIME_TYPES.contains(&mime.to_ascii_lowercase().as_str()));
    let extension_ok = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

    mime_ok && extension_ok
}

/// Best-effort removal of files whose owning record was never committed.
pub async fn discard(files: &[StoredFile]) {
    for file in files {
        if let Err(err) = fs::remove_file(&file.path).await {
            if err.kind() != ErrorKind::NotFound {
                log::error!("Failed to remove orphaned upload {}: {err:?}", file.path.display());
                continue;
            }
        }

        if let Some(parent) = file.path.parent() {
            remove_dir_if_empty(parent).await;
        }
    }
}

async fn remove_dir_if_empty(dir: &Path) {
    let empty = match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    };

    if empty {
        if let Err(err) = fs::remove_dir(dir).await {
            if err.kind() != ErrorKind::NotFound {
                log::warn!("Failed to remove empty upload directory {}: {err:?}", dir.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header;
    use actix_web::test::TestRequest;

    use crate::config::test_config;

    const BOUNDARY: &str = "----travel-listings-boundary";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File {
            field: &'a str,
            name: &'a str,
            mime: &'a str,
            body: Vec<u8>,
        },
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                            .as_bytes(),
                    );
                }
                Part::File { field, name, mime, body: data } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: {mime}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn extract<S: UploadFields + 'static>(
        dir: &Path,
        parts: &[Part<'_>],
    ) -> Result<FormData<S>, ApiError> {
        let config = test_config(dir.to_path_buf());
        let (req, mut payload) = TestRequest::post()
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .app_data(web::Data::new(config))
            .set_payload(multipart_body(parts))
            .to_http_parts();

        FormData::<S>::from_request(&req, &mut payload).await
    }

    fn stored_files(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\pic.JPG"), "pic.JPG");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name("ö.webp"), "_.webp");
    }

    #[test]
    fn whitelist_requires_mime_and_extension() {
        assert!(is_allowed_file(Some("image/png"), "a.png"));
        assert!(is_allowed_file(Some("image/jpeg"), "a.JPEG"));
        assert!(!is_allowed_file(Some("image/gif"), "a.gif"));
        assert!(!is_allowed_file(Some("image/png"), "a.gif"));
        assert!(!is_allowed_file(Some("image/gif"), "a.png"));
        assert!(!is_allowed_file(None, "a.png"));
        assert!(!is_allowed_file(Some("image/png"), "png"));
    }

    #[test]
    fn public_url_normalizes_separators() {
        let file = StoredFile {
            field: "featuredImage".into(),
            file_name: "1700000000000-a.png".into(),
            path: PathBuf::from("uploads\\1700000000000-a.png"),
        };
        assert_eq!(
            file.public_url("http://localhost:5000/"),
            "http://localhost:5000/uploads/1700000000000-a.png"
        );
    }

    #[actix_rt::test]
    async fn stores_accepted_files_and_collects_text_fields() {
        let dir = tempfile::tempdir().unwrap();
        let form = extract::<ListingUploads>(
            dir.path(),
            &[
                Part::Text("name", "Dal Lake Houseboat"),
                Part::File {
                    field: "featuredImage",
                    name: "front view.png",
                    mime: "image/png",
                    body: b"png-bytes".to_vec(),
                },
                Part::File {
                    field: "otherImages",
                    name: "deck.webp",
                    mime: "image/webp",
                    body: b"webp".to_vec(),
                },
            ],
        )
        .await
        .unwrap();

        assert_eq!(form.fields["name"], "Dal Lake Houseboat");
        let featured = form.file("featuredImage").unwrap();
        assert!(featured.file_name.ends_with("-front_view.png"));
        assert_eq!(std::fs::read(&featured.path).unwrap(), b"png-bytes");
        assert_eq!(form.files_for("otherImages").count(), 1);

        discard(&form.files).await;
        assert!(!dir.path().exists() || stored_files(dir.path()).is_empty());
    }

    #[actix_rt::test]
    async fn gif_is_rejected_before_anything_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let result = extract::<ListingUploads>(
            &uploads,
            &[Part::File {
                field: "featuredImage",
                name: "animation.gif",
                mime: "image/gif",
                body: b"GIF89a".to_vec(),
            }],
        )
        .await;

        assert!(matches!(result, Err(ApiError::UnsupportedFileType)));
        assert!(stored_files(&uploads).is_empty());
    }

    #[actix_rt::test]
    async fn later_rejection_discards_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let result = extract::<BannerUpload>(
            &uploads,
            &[
                Part::File {
                    field: "banner_image",
                    name: "banner.jpg",
                    mime: "image/jpeg",
                    body: b"jpeg".to_vec(),
                },
                Part::File {
                    field: "banner_image",
                    name: "second.jpg",
                    mime: "image/jpeg",
                    body: b"jpeg".to_vec(),
                },
            ],
        )
        .await;

        match result {
            Err(ApiError::Validation(details)) => assert_eq!(details[0].field, "banner_image"),
            other => panic!("unexpected result {:?}", other.map(|f| f.files)),
        }
        assert!(stored_files(&uploads).is_empty());
    }

    #[actix_rt::test]
    async fn unknown_file_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract::<FeaturedImageUpload>(
            dir.path(),
            &[Part::File {
                field: "banner_image",
                name: "banner.png",
                mime: "image/png",
                body: b"png".to_vec(),
            }],
        )
        .await;

        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[actix_rt::test]
    async fn oversized_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let result = extract::<FeaturedImageUpload>(
            &uploads,
            &[Part::File {
                field: "featured_image",
                name: "huge.png",
                mime: "image/png",
                body: vec![0u8; MAX_FILE_SIZE + 1],
            }],
        )
        .await;

        assert!(matches!(result, Err(ApiError::FileTooLarge)));
        assert!(stored_files(&uploads).is_empty());
    }

    #[actix_rt::test]
    async fn json_bodies_are_accepted_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let (req, mut payload) = TestRequest::post()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .app_data(web::Data::new(test_config(dir.path().to_path_buf())))
            .set_payload(r#"{"name":"Pahalgam","parent":"2"}"#)
            .to_http_parts();

        let form = FormData::<FeaturedImageUpload>::from_request(&req, &mut payload)
            .await
            .unwrap();

        assert!(form.files.is_empty());
        assert_eq!(form.fields["parent"], "2");
    }

    #[test]
    fn repeated_text_fields_become_arrays() {
        let mut fields = Map::new();
        push_text(&mut fields, "features".into(), "1".into());
        push_text(&mut fields, "features".into(), "2".into());
        push_text(&mut fields, "features".into(), "3".into());

        assert_eq!(fields["features"], serde_json::json!(["1", "2", "3"]));
    }
}
