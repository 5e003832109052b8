//! Workspace file endpoints: stateless CRUD scoped to one session's
//! workspace directory.
//!
//! Every filename crossing this boundary is sanitized to a restricted
//! character set and checked against the configured extension allow-list
//! before any filesystem operation, so a request can never address a path
//! outside the session's workspace.

use std::io::Write as _;
use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::activity::epoch_ms;
use crate::session::validate_session_id;

use super::error::ApiError;
use super::PublicState;

/// Replace everything outside `[A-Za-z0-9._-]` with `_`.
pub(super) fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Does the filename carry an allow-listed extension?
pub(super) fn extension_allowed(name: &str, allowed: &[String]) -> bool {
    FsPath::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Resolve the workspace directory of a session via the control API.
async fn resolve_workspace(state: &PublicState, id: &str) -> Result<PathBuf, ApiError> {
    validate_session_id(id).map_err(|_| ApiError::InvalidSessionId(id.to_string()))?;
    let info = state
        .control
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::SessionNotFound(id.to_string()))?;
    Ok(PathBuf::from(info.workspace_dir))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileEntry {
    name: String,
    size: u64,
    modified: u64,
}

#[derive(Serialize)]
pub(super) struct FileListResponse {
    files: Vec<FileEntry>,
}

/// Allow-listed files in a workspace, with size and modification time.
async fn allowed_entries(
    workspace: &FsPath,
    allowed: &[String],
) -> Result<Vec<FileEntry>, ApiError> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(workspace)
        .await
        .map_err(|e| ApiError::InternalError(format!("failed to read workspace: {e}")))?;
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ApiError::InternalError(format!("failed to read workspace: {e}")))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !extension_allowed(&name, allowed) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        entries.push(FileEntry {
            name,
            size: meta.len(),
            modified: meta.modified().map(epoch_ms).unwrap_or(0),
        });
    }
    Ok(entries)
}

pub(super) async fn list(
    State(state): State<PublicState>,
    Path(id): Path<String>,
) -> Result<Json<FileListResponse>, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    let files = allowed_entries(&workspace, &state.allowed_extensions).await?;
    Ok(Json(FileListResponse { files }))
}

#[derive(Serialize)]
pub(super) struct UploadResponse {
    message: &'static str,
    filename: String,
    size: usize,
}

pub(super) async fn upload(
    State(state): State<PublicState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field
            .file_name()
            .ok_or_else(|| ApiError::InvalidRequest("upload field has no filename".into()))?
            .to_string();
        let filename = sanitize_filename(&original);
        if !extension_allowed(&filename, &state.allowed_extensions) {
            return Err(ApiError::FileTypeNotAllowed(filename));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let size = data.len();
        tokio::fs::write(workspace.join(&filename), &data)
            .await
            .map_err(|e| ApiError::InternalError(format!("failed to store upload: {e}")))?;
        tracing::debug!(session = %id, file = %filename, size, "file uploaded");
        return Ok(Json(UploadResponse {
            message: "File uploaded.",
            filename,
            size,
        }));
    }

    Err(ApiError::InvalidRequest("no file field in upload".into()))
}

/// Validate a requested filename against the session's policy and return its
/// path inside the workspace.
fn checked_path(
    workspace: &FsPath,
    requested: &str,
    allowed: &[String],
) -> Result<(String, PathBuf), ApiError> {
    let filename = sanitize_filename(requested);
    if !extension_allowed(&filename, allowed) {
        return Err(ApiError::FileTypeNotAllowed(filename));
    }
    let path = workspace.join(&filename);
    Ok((filename, path))
}

async fn serve_file(filename: String, path: PathBuf) -> Result<impl IntoResponse, ApiError> {
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::FileNotFound(filename));
        }
        Err(e) => return Err(ApiError::InternalError(format!("failed to read file: {e}"))),
    };

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .unwrap_or(HeaderValue::from_static("attachment")),
    );
    Ok((headers, data))
}

pub(super) async fn download(
    State(state): State<PublicState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    let (filename, path) = checked_path(&workspace, &name, &state.allowed_extensions)?;
    serve_file(filename, path).await
}

pub(super) async fn download_latest(
    State(state): State<PublicState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    let mut entries = allowed_entries(&workspace, &state.allowed_extensions).await?;
    entries.sort_by_key(|e| e.modified);
    let latest = entries
        .pop()
        .ok_or_else(|| ApiError::FileNotFound("no files in workspace".into()))?;
    let path = workspace.join(&latest.name);
    serve_file(latest.name, path).await
}

pub(super) async fn download_zip(
    State(state): State<PublicState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    let entries = allowed_entries(&workspace, &state.allowed_extensions).await?;
    if entries.is_empty() {
        return Err(ApiError::FileNotFound("no files in workspace".into()));
    }

    let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
    let workspace_for_zip = workspace.clone();
    let archive = tokio::task::spawn_blocking(move || build_zip(&workspace_for_zip, &names))
        .await
        .map_err(|e| ApiError::InternalError(format!("zip task failed: {e}")))??;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"workspace.zip\""),
    );
    Ok((headers, archive))
}

fn build_zip(workspace: &FsPath, names: &[String]) -> Result<Vec<u8>, ApiError> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for name in names {
        let data = match std::fs::read(workspace.join(name)) {
            Ok(data) => data,
            // A file deleted between listing and zipping is skipped, not an
            // error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(ApiError::InternalError(format!(
                    "failed to read {name}: {e}"
                )))
            }
        };
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| ApiError::InternalError(format!("zip write failed: {e}")))?;
        writer
            .write_all(&data)
            .map_err(|e| ApiError::InternalError(format!("zip write failed: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| ApiError::InternalError(format!("zip finish failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[derive(Serialize)]
pub(super) struct FileDeletedResponse {
    message: &'static str,
}

pub(super) async fn delete(
    State(state): State<PublicState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<FileDeletedResponse>, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    let (filename, path) = checked_path(&workspace, &name, &state.allowed_extensions)?;

    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(Json(FileDeletedResponse {
            message: "File deleted.",
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::FileNotFound(filename))
        }
        Err(e) => Err(ApiError::InternalError(format!(
            "failed to delete file: {e}"
        ))),
    }
}
