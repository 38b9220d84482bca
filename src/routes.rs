use crate::AppState;
use crate::transcode::OUTPUT_EXTENSION;
use axum::body::Body;
use axum::extract::multipart::{Field, Multipart, MultipartRejection};
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{Request, Response, StatusCode, header};
use axum::response::{IntoResponse, Json, Response as AxumResponse};
use bytes::Bytes;
use futures::TryStreamExt;
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::io::Error as IoError;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

const UPLOAD_FIELD: &str = "mp4file";
const NO_FILES_UPLOADED: &str = "No files were uploaded.";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertSuccess {
    pub success: bool,
    pub file_url: String,
}

#[derive(Serialize, Deserialize)]
pub struct ConvertFailure {
    pub success: bool,
    pub message: String,
    pub error: String,
}

/// Milliseconds since the Unix epoch, read fresh per artifact name
fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap() // clock before 1970, just panic
        .as_millis()
}

/// Reduce a client-supplied filename to its final path component.
///
/// Uploads are stored directly under the uploads directory; a name carrying
/// path separators must not be able to land the file anywhere else.
fn client_filename(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

async fn persist_upload(
    path: &Path,
    first_chunk: Bytes,
    field: &mut Field<'_>,
) -> anyhow::Result<()> {
    use anyhow::Context as _;
    use tokio::io::AsyncWriteExt as _;

    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    file.write_all(&first_chunk).await?;
    while let Some(chunk) = field
        .chunk()
        .await
        .context("Failed to read upload stream")?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(())
}

#[axum::debug_handler]
pub async fn convert(
    Extension(state): Extension<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AxumResponse {
    let Ok(mut multipart) = multipart else {
        return (StatusCode::BAD_REQUEST, NO_FILES_UPLOADED).into_response();
    };

    // Intake: walk the form until the file field shows up
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some(UPLOAD_FIELD) {
            return convert_field(state, field).await;
        }
    }

    (StatusCode::BAD_REQUEST, NO_FILES_UPLOADED).into_response()
}

async fn convert_field(state: AppState, mut field: Field<'_>) -> AxumResponse {
    let Some(original_name) = client_filename(field.file_name()) else {
        return (StatusCode::BAD_REQUEST, NO_FILES_UPLOADED).into_response();
    };

    // An attached file must carry at least one byte before anything is
    // written to disk or spawned
    let first_chunk = match field.chunk().await {
        Ok(Some(chunk)) if !chunk.is_empty() => chunk,
        _ => return (StatusCode::BAD_REQUEST, NO_FILES_UPLOADED).into_response(),
    };

    // Timestamps are read independently per artifact, so the two names are
    // not guaranteed to share one
    let input_name = format!("{}_{original_name}", epoch_millis());
    let input_path = state.uploads_dir().join(&input_name);
    let output_name = format!("{}_converted.{OUTPUT_EXTENSION}", epoch_millis());
    let output_path = state.uploads_dir().join(&output_name);

    info!(%input_name, %output_name, "Accepted upload");

    if let Err(error) = persist_upload(&input_path, first_chunk, &mut field).await {
        error!(%input_name, %error, "Failed to persist upload");
        // drop whatever partial file made it to disk
        let _ = tokio::fs::remove_file(&input_path).await;
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}")).into_response();
    }

    let _permit = state.transcode_permits.acquire().await.unwrap();
    info!(%input_name, "Transcoding");
    let result = state.transcoder.convert(&input_path, &output_path).await;

    // The input must not outlive the request, whatever the tool reported
    if let Err(error) = tokio::fs::remove_file(&input_path).await {
        warn!(%input_name, %error, "Failed to remove input file");
    }

    match result {
        Ok(()) => {
            info!(%output_name, "Conversion finished");
            (
                StatusCode::OK,
                Json(ConvertSuccess {
                    success: true,
                    file_url: state.file_url(&output_name),
                }),
            )
                .into_response()
        }
        Err(error) => {
            error!(%input_name, %error, "Conversion failed");
            (
                StatusCode::OK,
                Json(ConvertFailure {
                    success: false,
                    message: "Conversion failed".to_string(),
                    error: format!("{error:#}"),
                }),
            )
                .into_response()
        }
    }
}

pub async fn serve_upload(
    Extension(state): Extension<AppState>,
    AxumPath(filename): AxumPath<String>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        warn!(%filename, "Invalid filename");
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from("Invalid filename"))
            .unwrap());
    }

    let path = state.uploads_dir().join(&filename);
    debug!(%filename, ?path, "Request stored file");

    let Ok(mut fh) = tokio::fs::File::open(&path).await else {
        return Ok(file_not_found());
    };
    let Ok(metadata) = fh.metadata().await else {
        return Ok(file_not_found());
    };

    let size = metadata.len();
    if size == 0 {
        let mut res = Response::new(Body::empty());
        set_file_headers(&mut res, &filename, 0);
        return Ok(res);
    }

    let (status, start, end) = parse_range(&req, size);
    fh.seek(std::io::SeekFrom::Start(start)).await.unwrap(); // seek to start, just panic if failed
    let len = end - start + 1;

    use tokio::io::AsyncReadExt as _;
    let stream = ReaderStream::new(fh.take(len)).map_err(|e| IoError::new(e.kind(), e.to_string()));

    let mut res = Response::new(Body::from_stream(stream));
    *res.status_mut() = status;
    set_file_headers(&mut res, &filename, len);
    if status == StatusCode::PARTIAL_CONTENT {
        res.headers_mut().insert(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{size}").parse().unwrap(),
        );
    }
    Ok(res)
}

fn set_file_headers(res: &mut Response<Body>, filename: &str, len: u64) {
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        from_path(filename)
            .first_or_octet_stream()
            .to_string()
            .parse()
            .unwrap(),
    );
    headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    headers.insert(
        header::CACHE_CONTROL,
        "public,max-age=3600".parse().unwrap(),
    );
    headers.insert(header::CONTENT_LENGTH, len.to_string().parse().unwrap());
}

fn file_not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("File not found"))
        .unwrap()
}

fn parse_range(req: &Request<Body>, file_size: u64) -> (StatusCode, u64, u64) {
    let last = file_size - 1;

    let Some(spec) = req
        .headers()
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("bytes="))
    else {
        return (StatusCode::OK, 0, last);
    };

    let (start, end) = spec.split_once('-').unwrap_or((spec, ""));
    let Ok(start) = start.parse::<u64>() else {
        return (StatusCode::OK, 0, last);
    };
    let end = end.parse::<u64>().map_or(last, |e| e.min(last));
    if start > end {
        return (StatusCode::OK, 0, last);
    }

    (StatusCode::PARTIAL_CONTENT, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_filename() {
        assert_eq!(client_filename(Some("clip.mp4")).as_deref(), Some("clip.mp4"));
        assert_eq!(
            client_filename(Some("holiday video.mp4")).as_deref(),
            Some("holiday video.mp4")
        );

        // path components never survive
        assert_eq!(
            client_filename(Some("../../etc/passwd")).as_deref(),
            Some("passwd")
        );
        assert_eq!(
            client_filename(Some("C:\\Users\\me\\clip.mp4")).as_deref(),
            Some("clip.mp4")
        );

        assert_eq!(client_filename(Some("")), None);
        assert_eq!(client_filename(Some("dir/")), None);
        assert_eq!(client_filename(None), None);
    }

    fn request_with_range(range: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder();
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_parse_range() {
        let req = request_with_range(None);
        assert_eq!(parse_range(&req, 100), (StatusCode::OK, 0, 99));

        let req = request_with_range(Some("bytes=10-19"));
        assert_eq!(parse_range(&req, 100), (StatusCode::PARTIAL_CONTENT, 10, 19));

        // open-ended range runs to the last byte
        let req = request_with_range(Some("bytes=90-"));
        assert_eq!(parse_range(&req, 100), (StatusCode::PARTIAL_CONTENT, 90, 99));

        // end clamped to the file size
        let req = request_with_range(Some("bytes=10-5000"));
        assert_eq!(parse_range(&req, 100), (StatusCode::PARTIAL_CONTENT, 10, 99));

        // not parseable, fall back to the whole file
        let req = request_with_range(Some("bytes=abc"));
        assert_eq!(parse_range(&req, 100), (StatusCode::OK, 0, 99));

        // unsatisfiable ranges fall back too
        let req = request_with_range(Some("bytes=200-"));
        assert_eq!(parse_range(&req, 100), (StatusCode::OK, 0, 99));
        let req = request_with_range(Some("bytes=50-10"));
        assert_eq!(parse_range(&req, 100), (StatusCode::OK, 0, 99));
    }
}
