use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use gridline_application::{UploadProgress, UploadRequest, UploadTransport};
use gridline_core::{AppError, AppResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Url};
use serde_json::{Value, json};
use tracing::debug;

use crate::http_record_gateway::USER_HEADER;
use crate::http_response::{read_json, transport_error};

/// Size of each streamed body chunk; progress is reported once per chunk.
pub const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Multipart upload adapter posting one `file` part plus metadata fields.
#[derive(Debug, Clone)]
pub struct HttpUploadTransport {
    http_client: reqwest::Client,
    endpoint: Url,
}

impl HttpUploadTransport {
    /// Creates a transport posting to `endpoint`.
    pub fn new(http_client: reqwest::Client, endpoint: &str) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|error| {
            AppError::Validation(format!("invalid upload endpoint '{endpoint}': {error}"))
        })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// Returns the upload endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn chunked_body(
    data: Arc<[u8]>,
    progress: UploadProgress,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let total = data.len();
    let total_bytes = u64::try_from(total).unwrap_or(u64::MAX);

    stream::iter(0..total.div_ceil(UPLOAD_CHUNK_BYTES)).map(move |index| {
        let start = index * UPLOAD_CHUNK_BYTES;
        let end = start.saturating_add(UPLOAD_CHUNK_BYTES).min(total);
        progress.report_bytes(u64::try_from(end).unwrap_or(u64::MAX), total_bytes);
        Ok(data[start..end].to_vec())
    })
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload(&self, request: UploadRequest, progress: UploadProgress) -> AppResult<Value> {
        let file = request.file;
        let action = format!("upload {}", file.file_name());
        let length = u64::try_from(file.size()).unwrap_or(u64::MAX);

        let mut part = Part::stream_with_length(
            Body::wrap_stream(chunked_body(file.data(), progress)),
            length,
        )
        .file_name(file.file_name().to_owned());
        if let Some(content_type) = file.content_type() {
            part = part.mime_str(content_type).map_err(|error| {
                AppError::Validation(format!("invalid content type '{content_type}': {error}"))
            })?;
        }

        let form = request
            .form_fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
            .part("file", part);

        debug!(
            item_id = %request.item_id,
            file = %file.file_name(),
            bytes = length,
            endpoint = %self.endpoint,
            "posting upload"
        );
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header(USER_HEADER, request.actor.subject())
            .multipart(form)
            .send()
            .await
            .map_err(|error| transport_error(&action, &error))?;

        match read_json(response, &action).await? {
            Value::Null => Ok(json!({})),
            receipt => Ok(receipt),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};

    use axum::extract::Multipart;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use gridline_application::{UploadProgress, UploadRequest, UploadTransport};
    use gridline_core::{ActorContext, AppError};
    use gridline_domain::{UploadFile, UploadItemId};
    use serde_json::{Map, Value, json};
    use tokio::net::TcpListener;

    use super::{HttpUploadTransport, UPLOAD_CHUNK_BYTES};

    async fn receive_upload(headers: HeaderMap, mut multipart: Multipart) -> Json<Value> {
        let mut fields = Map::new();
        let mut file_name = None;
        let mut size = 0;

        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_owned();
            if name == "file" {
                file_name = field.file_name().map(str::to_owned);
                size = field.bytes().await.map(|bytes| bytes.len()).unwrap_or_default();
            } else {
                let text = field.text().await.unwrap_or_default();
                fields.insert(name, Value::String(text));
            }
        }

        let user = headers
            .get("x-user")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Json(json!({
            "key": format!("reports/{}", file_name.unwrap_or_default()),
            "size": size,
            "user": user,
            "fields": fields,
        }))
    }

    async fn reject_upload() -> Response {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({"error": "file too large"})),
        )
            .into_response()
    }

    async fn spawn_upload_backend() -> String {
        let app = Router::new()
            .route("/upload", post(receive_upload))
            .route("/reject", post(reject_upload));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|_| unreachable!());
        let addr = listener.local_addr().unwrap_or_else(|_| unreachable!());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn request(size: usize) -> UploadRequest {
        UploadRequest {
            item_id: UploadItemId::new(1),
            file: UploadFile::new(
                "binder-07.pdf",
                Some("application/pdf".to_owned()),
                vec![7_u8; size],
            )
            .unwrap_or_else(|_| unreachable!()),
            form_fields: BTreeMap::from([
                ("prefix".to_owned(), "reports/2024".to_owned()),
                ("mode".to_owned(), "append".to_owned()),
            ]),
            actor: ActorContext::new("pat", None).unwrap_or_else(|_| unreachable!()),
        }
    }

    #[tokio::test]
    async fn upload_streams_the_file_and_reports_progress() {
        let base_url = spawn_upload_backend().await;
        let transport = HttpUploadTransport::new(reqwest::Client::new(), &format!("{base_url}/upload"))
            .unwrap_or_else(|_| unreachable!());

        let reports = Arc::new(AtomicU8::new(0));
        let highest = Arc::clone(&reports);
        let progress = UploadProgress::new(move |percent| {
            highest.fetch_max(percent, Ordering::SeqCst);
        });

        let size = UPLOAD_CHUNK_BYTES * 3 + 17;
        let receipt = transport.upload(request(size), progress).await;
        assert!(receipt.is_ok());
        let receipt = receipt.unwrap_or_default();

        assert_eq!(receipt["key"], json!("reports/binder-07.pdf"));
        assert_eq!(receipt["size"], json!(size));
        assert_eq!(receipt["user"], json!("pat"));
        assert_eq!(receipt["fields"]["prefix"], json!("reports/2024"));
        assert_eq!(receipt["fields"]["mode"], json!("append"));
        assert_eq!(reports.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn rejected_upload_maps_the_status() {
        let base_url = spawn_upload_backend().await;
        let transport = HttpUploadTransport::new(reqwest::Client::new(), &format!("{base_url}/reject"))
            .unwrap_or_else(|_| unreachable!());

        let result = transport.upload(request(32), UploadProgress::detached()).await;
        assert_eq!(
            result,
            Err(AppError::Upstream {
                status: 413,
                message: "file too large".to_owned()
            })
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(HttpUploadTransport::new(reqwest::Client::new(), "uploads").is_err());
    }
}
