//! HTTP request handlers for the web server.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::Pdf2ExamError;
use crate::pipeline::extract::extract_text;
use crate::pipeline::input::persist_upload;
use crate::prompts::DEFAULT_USER_QUERY;

const PDF_FIELD: &str = "pdf_file";
const QUERY_FIELD: &str = "user_query";

/// A pre-stream failure rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Pdf2ExamError> for ApiError {
    fn from(err: Pdf2ExamError) -> Self {
        match err {
            Pdf2ExamError::MissingField(_)
            | Pdf2ExamError::NotAPdf { .. }
            | Pdf2ExamError::MalformedUpload(_)
            | Pdf2ExamError::NoExtractableText => {
                ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("伺服器內部錯誤: {}", other),
            ),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                detail: &self.detail,
            }),
        )
            .into_response()
    }
}

/// Serve `index.html` from the static directory.
pub async fn index(State(state): State<AppState>) -> Response {
    let path = state.config.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            (StatusCode::NOT_FOUND, "index.html not found").into_response()
        }
    }
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

/// The uploaded form, read fully before anything else happens.
struct ExamForm {
    filename: Option<String>,
    pdf: Option<Bytes>,
    query: String,
}

async fn read_form(multipart: &mut Multipart) -> Result<ExamForm, ApiError> {
    let mut form = ExamForm {
        filename: None,
        pdf: None,
        query: String::new(),
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(PDF_FIELD) => {
                form.filename = field.file_name().map(str::to_string);
                form.pdf = Some(field.bytes().await?);
            }
            Some(QUERY_FIELD) => {
                form.query = field.text().await?;
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    Ok(form)
}

/// `POST /generate_exam`: extract the upload's text and stream the model's
/// answer back as it arrives.
///
/// Everything that can fail with a status code happens before the first byte
/// of the body; afterwards failures are fragments of the body itself.
pub async fn generate_exam(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(&mut multipart).await?;
    let pdf = form
        .pdf
        .filter(|bytes| !bytes.is_empty())
        .ok_or(Pdf2ExamError::MissingField(PDF_FIELD))?;
    let display_name = form.filename.as_deref().unwrap_or("upload.pdf").to_string();

    info!("Processing PDF: {} ({} bytes)", display_name, pdf.len());

    // The temp file lives only for the duration of extraction.
    let text = {
        let upload = persist_upload(&pdf, form.filename.as_deref(), &state.config.temp_dir)?;
        extract_text(state.extractor.clone(), upload.path().to_path_buf()).await?
    };
    info!(
        "PDF processing complete. Extracted text length: {}",
        text.chars().count()
    );

    if text.trim().is_empty() {
        return Err(Pdf2ExamError::NoExtractableText.into());
    }

    let query = match form.query.trim() {
        "" => DEFAULT_USER_QUERY.to_string(),
        q => q.to_string(),
    };
    debug!("User query: {}", query);

    let fragments = state.relay.stream(&text, &query);
    let body = Body::from_stream(fragments.map(Ok::<_, Infallible>));

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}
