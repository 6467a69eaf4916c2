use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use bytes::Bytes;
use chunkrelay_blob::ChunkUpload;
use chunkrelay_core::{RelayError, UploadIdentifier};
use multer::{Constraints, Multipart, SizeLimit};

/// Room for the text fields and part headers around the chunk body.
const FORM_OVERHEAD: u64 = 64 * 1024;

fn form_error(err: multer::Error) -> RelayError {
    match err {
        multer::Error::FieldSizeExceeded { field_name, .. } => RelayError::bad_request(format!(
            "field {} exceeds the chunk size limit",
            field_name.as_deref().unwrap_or("file")
        )),
        multer::Error::StreamSizeExceeded { .. } => {
            RelayError::bad_request("upload form exceeds the chunk size limit")
        }
        other => RelayError::bad_request(format!("malformed multipart form: {other}")),
    }
}

fn parse_number(field: &str, raw: &str) -> Result<u32, RelayError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| RelayError::bad_request(format!("{field} must be a positive integer")))
}

/// Read one resumable chunk form: `chunkNumber`, `totalChunks`, `identifier`
/// and the file part. The body streams through multer with hard size limits;
/// any other field resumable clients send along is skipped.
pub async fn read_chunk_form(
    headers: &HeaderMap,
    body: Body,
    max_chunk_bytes: u64,
) -> Result<ChunkUpload, RelayError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::bad_request("expected a multipart/form-data body"))?;
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| RelayError::bad_request(format!("invalid multipart content-type: {e}")))?;

    let constraints = Constraints::new().size_limit(
        SizeLimit::new()
            .whole_stream(max_chunk_bytes.saturating_add(FORM_OVERHEAD))
            .per_field(max_chunk_bytes),
    );
    let mut multipart = Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

    let mut chunk_number = None;
    let mut total_chunks = None;
    let mut identifier = None;
    let mut file: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("chunkNumber") => {
                let raw = field.text().await.map_err(form_error)?;
                chunk_number = Some(parse_number("chunkNumber", &raw)?);
            }
            Some("totalChunks") => {
                let raw = field.text().await.map_err(form_error)?;
                total_chunks = Some(parse_number("totalChunks", &raw)?);
            }
            Some("identifier") => {
                identifier = Some(field.text().await.map_err(form_error)?);
            }
            Some("file") => {
                file = Some(field.bytes().await.map_err(form_error)?);
            }
            _ if file.is_none() && field.file_name().is_some() => {
                file = Some(field.bytes().await.map_err(form_error)?);
            }
            _ => {}
        }
    }

    let missing = |name: &str| RelayError::bad_request(format!("missing form field {name}"));
    let identifier = UploadIdentifier::parse(identifier.ok_or_else(|| missing("identifier"))?)?;
    Ok(ChunkUpload::new(
        identifier,
        chunk_number.ok_or_else(|| missing("chunkNumber"))?,
        total_chunks.ok_or_else(|| missing("totalChunks"))?,
        file.ok_or_else(|| missing("file"))?,
    ))
}
