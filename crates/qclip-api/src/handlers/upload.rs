//! Upload handler.

use std::path::Path;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use qclip_models::SubmitResponse;
use qclip_storage::StorageError;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ApiResult;
use crate::metrics;
use crate::services::AdmissionError;
use crate::state::AppState;

/// Multipart field carrying the artifact.
pub const UPLOAD_FIELD: &str = "video";

/// An upload spooled to local disk. The file is removed on drop.
pub struct SpooledUpload {
    pub file: NamedTempFile,
    pub size: u64,
    pub field: String,
}

/// `POST /upload`: spool the artifact, then admit it.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<SubmitResponse>> {
    let spooled = match multipart {
        Ok(mut multipart) => {
            spool_upload(&mut multipart, &state.config.spool_dir, state.config.max_upload_bytes).await
        }
        Err(rejection) => Err(AdmissionError::malformed(rejection.body_text())),
    };

    let upload = match spooled {
        Ok(Some(upload)) => upload,
        Ok(None) => return Err(rejected(AdmissionError::MissingInput).into()),
        Err(e) => return Err(rejected(e).into()),
    };

    debug!(field = %upload.field, bytes = upload.size, "Spooled upload");
    metrics::record_upload_bytes(upload.size);

    let response = state
        .admission
        .submit_file(upload.file.path(), upload.size)
        .await?;
    Ok(Json(response))
}

fn rejected(err: AdmissionError) -> AdmissionError {
    metrics::record_admission_rejected(err.as_str());
    err
}

/// Stream the first file field to a temp file under `dir`.
///
/// The field named `video` or, failing that, any field with a file name is
/// taken; text fields before it are skipped. Returns `None` when the body has
/// no file field.
pub async fn spool_upload(
    multipart: &mut Multipart,
    dir: &Path,
    limit: u64,
) -> Result<Option<SpooledUpload>, AdmissionError> {
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(multipart_error(e, 0, limit)),
        };

        let name = field.name().unwrap_or_default().to_string();
        if name != UPLOAD_FIELD && field.file_name().is_none() {
            debug!(field = %name, "Skipping non-file field");
            continue;
        }

        let spool = tempfile::Builder::new()
            .prefix("qclip-upload-")
            .tempfile_in(dir)
            .map_err(StorageError::from)?;
        let mut out = tokio::fs::OpenOptions::new()
            .write(true)
            .open(spool.path())
            .await
            .map_err(StorageError::from)?;

        let mut size = 0u64;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(multipart_error(e, size, limit)),
            };
            size += chunk.len() as u64;
            if size > limit {
                return Err(AdmissionError::TooLarge { size, limit });
            }
            out.write_all(&chunk).await.map_err(StorageError::from)?;
        }
        out.flush().await.map_err(StorageError::from)?;

        return Ok(Some(SpooledUpload {
            file: spool,
            size,
            field: name,
        }));
    }
}

fn multipart_error(err: MultipartError, size: u64, limit: u64) -> AdmissionError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AdmissionError::TooLarge {
            size: size.max(limit.saturating_add(1)),
            limit,
        }
    } else {
        AdmissionError::malformed(err.body_text())
    }
}
