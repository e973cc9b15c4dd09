//! Scanned invoice upload

use crate::AppState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use invoiceflow_common::{
    auth::{AuthContext, Role},
    db::models::Invoice,
    errors::{AppError, Result},
    workflow::FileMeta,
};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ALLOWED_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg", "image/tiff"];

/// Keep the last path segment and the characters safe in a file name
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

fn stored_path(upload_dir: &str, file_name: &str) -> PathBuf {
    Path::new(upload_dir).join(format!("{}_{}", Uuid::new_v4(), file_name))
}

/// Accept a multipart `file` field, store it and run OCR ingestion.
///
/// The stored file is removed again when ingestion fails.
pub async fn upload_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Invoice>)> {
    auth.require_role(Role::Secretary)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::InvalidFormat {
        message: format!("Malformed multipart body: {}", e),
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let name = sanitize_file_name(field.file_name().unwrap_or("upload"));
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(|e| AppError::InvalidFormat {
            message: format!("Failed to read upload: {}", e),
        })?;
        upload = Some((name, content_type, bytes));
        break;
    }

    let (name, content_type, bytes) = upload.ok_or_else(|| AppError::MissingField {
        field: "file".to_string(),
    })?;

    let limit = state.config.storage.max_upload_bytes;
    if bytes.len() > limit {
        return Err(AppError::PayloadTooLarge {
            size: bytes.len(),
            limit,
        });
    }
    if bytes.is_empty() {
        return Err(AppError::validation("file", "uploaded file is empty"));
    }
    if !ALLOWED_TYPES.contains(&content_type.as_str()) {
        return Err(AppError::validation(
            "file",
            format!("unsupported content type {}", content_type),
        ));
    }

    let upload_dir = &state.config.storage.upload_dir;
    tokio::fs::create_dir_all(upload_dir).await?;
    let path = stored_path(upload_dir, &name);
    tokio::fs::write(&path, &bytes).await?;

    let file = FileMeta {
        path: path.to_string_lossy().into_owned(),
        name,
        content_type,
        size: bytes.len() as i64,
    };

    match state.ingestion.ingest(&bytes, file, &auth.actor).await {
        Ok(invoice) => Ok((StatusCode::CREATED, Json(invoice))),
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %remove_err, "Failed to remove rejected upload");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("invoice 42.pdf"), "invoice_42.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\scans\\inv.PDF"), "inv.PDF");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
    }

    #[test]
    fn test_stored_path_is_unique_inside_dir() {
        let a = stored_path("uploads", "a.pdf");
        let b = stored_path("uploads", "a.pdf");
        assert_ne!(a, b);
        assert!(a.starts_with("uploads"));
        assert!(a.to_string_lossy().ends_with("_a.pdf"));
    }
}
