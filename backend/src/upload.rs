use actix_multipart::{Multipart, MultipartError};
use actix_web::http::header;
use actix_web::{web, HttpRequest};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::{StreamExt, TryStreamExt};
use shared::ImageRequest;

use crate::error::ApiError;

pub const NO_IMAGE_DATA: &str =
    "No image data provided. Send either multipart file or JSON with base64.";

/// One file field read out of a multipart body.
#[derive(Debug)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Rejects the empty uploads browsers send when no file was chosen.
    pub fn validated(self) -> Result<Self, ApiError> {
        if self.filename.as_deref() == Some("") {
            return Err(ApiError::InvalidInput("No file selected".to_string()));
        }
        if self.bytes.is_empty() {
            return Err(ApiError::InvalidInput("Uploaded file is empty".to_string()));
        }
        Ok(self)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::InvalidInput(format!("Invalid multipart body: {}", err))
    }
}

fn mime_type(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
}

pub fn is_multipart(req: &HttpRequest) -> bool {
    mime_type(req).is_some_and(|mime| mime == "multipart/form-data")
}

pub fn is_json(req: &HttpRequest) -> bool {
    mime_type(req).is_some_and(|mime| mime == "application/json" || mime.ends_with("+json"))
}

/// Streams the multipart body and returns the first field called
/// `field_name`. Other fields are drained and discarded. `limit` caps the
/// bytes read across every field, discarded ones included.
pub async fn read_multipart_field(
    req: &HttpRequest,
    payload: web::Payload,
    field_name: &str,
    limit: usize,
) -> Result<Option<Upload>, ApiError> {
    let mut multipart = Multipart::new(req.headers(), payload);
    let mut upload = None;
    let mut received = 0usize;

    while let Some(mut field) = multipart.try_next().await? {
        let wanted = upload.is_none() && field.name() == Some(field_name);
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            received += chunk.len();
            if received > limit {
                return Err(ApiError::PayloadTooLarge(limit));
            }
            if wanted {
                bytes.extend_from_slice(&chunk);
            }
        }
        if wanted {
            upload = Some(Upload { filename, bytes });
        }
    }

    Ok(upload)
}

pub async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::Internal(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Extracts the image bytes from a `{"image": "<base64>"}` body.
pub fn image_from_json(body: &[u8]) -> Result<Vec<u8>, ApiError> {
    let request: ImageRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidInput(format!("Invalid JSON body: {}", e)))?;

    match request.image {
        Some(encoded) if !encoded.trim().is_empty() => decode_base64_image(&encoded),
        _ => Err(ApiError::InvalidInput("No image data provided".to_string())),
    }
}

/// Accepts raw base64 or a `data:image/<type>;base64,<data>` URI. Line
/// breaks and other ASCII whitespace inside the data are ignored.
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let data: String = strip_data_uri(encoded.trim())
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| ApiError::InvalidInput(format!("Invalid base64 image data: {}", e)))?;
    if bytes.is_empty() {
        return Err(ApiError::InvalidInput("No image data provided".to_string()));
    }
    Ok(bytes)
}

fn strip_data_uri(encoded: &str) -> &str {
    if encoded.starts_with("data:") {
        encoded.split_once(',').map(|(_, data)| data).unwrap_or_default()
    } else {
        encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn data_uri_prefix_is_stripped() {
        let raw = STANDARD.encode(b"\x89PNG fake");
        let uri = format!("data:image/png;base64,{}", raw);
        assert_eq!(
            decode_base64_image(&uri).unwrap(),
            decode_base64_image(&raw).unwrap()
        );
    }

    #[test]
    fn wrapped_base64_is_accepted() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let raw = STANDARD.encode(&payload);
        let wrapped = raw
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));

        assert_eq!(decode_base64_image(&wrapped).unwrap(), payload);
        let uri = format!("data:image/png;base64,{}\n", wrapped);
        assert_eq!(decode_base64_image(&uri).unwrap(), payload);
    }

    #[test]
    fn malformed_base64_is_invalid_input() {
        let err = decode_base64_image("###not-base64###").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn json_without_image_is_rejected() {
        let err = image_from_json(br#"{"picture": "abc"}"#).unwrap_err();
        assert_eq!(err.to_string(), "No image data provided");

        let err = image_from_json(br#"{"image": ""}"#).unwrap_err();
        assert_eq!(err.to_string(), "No image data provided");

        let err = image_from_json(b"{not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON body"));
    }

    #[test]
    fn json_image_is_decoded() {
        let body = format!(r#"{{"image": "{}"}}"#, STANDARD.encode(b"hello"));
        assert_eq!(image_from_json(body.as_bytes()).unwrap(), b"hello");
    }

    #[test]
    fn content_type_detection() {
        let req = TestRequest::default()
            .insert_header((header::CONTENT_TYPE, "multipart/form-data; boundary=xyz"))
            .to_http_request();
        assert!(is_multipart(&req));
        assert!(!is_json(&req));

        let req = TestRequest::default()
            .insert_header((header::CONTENT_TYPE, "application/json; charset=utf-8"))
            .to_http_request();
        assert!(is_json(&req));

        let req = TestRequest::default().to_http_request();
        assert!(!is_json(&req) && !is_multipart(&req));
    }

    #[test]
    fn unnamed_upload_is_rejected() {
        let upload = Upload {
            filename: Some(String::new()),
            bytes: vec![1, 2, 3],
        };
        assert_eq!(upload.validated().unwrap_err().to_string(), "No file selected");

        let upload = Upload {
            filename: Some("scan.png".into()),
            bytes: Vec::new(),
        };
        assert!(upload.validated().is_err());
    }
}
