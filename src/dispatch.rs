use std::{collections::BTreeMap, path::Path};

use axum::{
    Json,
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{
    error::ApiError,
    extractor::{Extraction, JobDir},
};

pub const DOWNLOAD_FILENAME_HEADER: &str = "x-download-filename";

#[derive(Debug, Serialize)]
struct DirectLinkResponse {
    url: String,
    filename: String,
    headers: BTreeMap<String, String>,
}

/// Turns an extraction into the outward response. The job directory is
/// either released right away (direct link) or handed to the response body
/// so it is deleted once the body is finished or dropped.
pub async fn respond(
    extraction: Extraction,
    job: JobDir,
    redirect: bool,
) -> Result<Response, ApiError> {
    match extraction {
        Extraction::Direct {
            url,
            headers,
            filename,
        } => {
            drop(job);
            if redirect {
                info!("Redirecting to direct media link for {filename:?}");
                return Ok(Redirect::temporary(&url).into_response());
            }

            Ok(Json(DirectLinkResponse {
                url,
                filename,
                headers: headers.into_iter().collect(),
            })
            .into_response())
        }
        Extraction::LocalFile {
            path,
            content_type,
            filename,
        } => stream_file(&path, content_type, &filename, job).await,
    }
}

async fn stream_file(
    path: &Path,
    content_type: &'static str,
    filename: &str,
    job: JobDir,
) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|error| ApiError::internal(format!("Could not open downloaded file: {error}")))?;
    let content_length = file
        .metadata()
        .await
        .map_err(|error| ApiError::internal(format!("Could not read downloaded file: {error}")))?
        .len();

    // the closure owns the job dir, so it is removed when the body goes away
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _job = &job;
        chunk
    });

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    headers.insert(
        HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        HeaderValue::from_str(&sanitize_ascii_filename(filename))
            .map_err(|_| ApiError::internal("Could not build the download filename."))?,
    );

    info!("Streaming {filename:?} ({content_length} bytes)");
    Ok((headers, Body::from_stream(stream)).into_response())
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "video.mp4".to_string()
    } else {
        compact.to_string()
    }
}
