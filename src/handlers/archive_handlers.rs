//! HTTP handlers for uploads, downloads and token deletion.
//!
//! `POST /` carries both operations and is told apart by content type:
//! multipart bodies are uploads, form-encoded bodies are deletions. All
//! lifecycle rules live in `LifecycleEngine`; this layer only decodes
//! requests and shapes responses.

use crate::{
    errors::AppError,
    services::lifecycle::{LifecycleError, UploadReceipt, UploadRequest},
    state::AppState,
};
use axum::{
    Form, Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-token");

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    pub delete: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    message: &'static str,
    file_url: String,
    upload: String,
    expires_at: String,
    delete_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// `GET /` — plain-text usage notes.
pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    let policy = state.engine.policy();
    let text = format!(
        concat!(
            "TEMPDROP\n",
            "========\n\n",
            "Temporary file host.\n\n",
            "default_age = {} days\n",
            "min_age     = {} minutes\n",
            "max_age     = {} days\n",
            "max_size    = {} bytes\n\n",
            "Upload: POST / as multipart/form-data\n",
            "  file     required  the file to upload\n",
            "  secret   optional  \"true\" for a longer, hard-to-guess URL\n",
            "  expires  optional  lifetime such as 30m, 12h or 3d\n\n",
            "The response carries an X-Token header with the management token.\n\n",
            "Delete: POST / as application/x-www-form-urlencoded\n",
            "  delete   required  the X-Token value from the upload\n",
        ),
        policy.default_lifetime.num_days(),
        policy.min_lifetime.num_minutes(),
        policy.max_lifetime.num_days(),
        state.max_upload_bytes,
    );
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text)
}

/// `POST /` — upload (multipart) or delete (form-encoded).
pub async fn submit(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let base = public_base(&state, request.headers());
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|_| AppError::bad_request("Error parsing form data"))?;
        upload(state, multipart, base).await
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(form) = Form::<DeleteForm>::from_request(request, &state)
            .await
            .map_err(|_| AppError::bad_request("Error parsing form data"))?;
        delete(state, form).await
    } else {
        Err(AppError::bad_request(
            "Expected multipart/form-data or application/x-www-form-urlencoded",
        ))
    }
}

async fn upload(
    state: AppState,
    mut multipart: Multipart,
    base: String,
) -> Result<Response, AppError> {
    let mut request = UploadRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                request.original_filename = field.file_name().map(str::to_owned);
                request.bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
            }
            Some("secret") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                request.long_name = value.trim() == "true";
            }
            Some("expires") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                request.expires = Some(value);
            }
            _ => {}
        }
    }

    let receipt = state.engine.upload(request, Utc::now()).await?;
    Ok(upload_response(&receipt, &base))
}

fn upload_response(receipt: &UploadReceipt, base: &str) -> Response {
    let body = UploadResponse {
        message: "File uploaded successfully",
        file_url: receipt.download_url(base),
        upload: receipt
            .uploaded_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        expires_at: receipt
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        delete_token: receipt.delete_token.clone(),
        alert: receipt.advisory.clone(),
    };

    let mut response = Json(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&receipt.delete_token) {
        response.headers_mut().insert(TOKEN_HEADER, value);
    }
    response
}

async fn delete(state: AppState, form: DeleteForm) -> Result<Response, AppError> {
    let token = form.delete.unwrap_or_default();
    state.engine.delete(token.trim()).await?;
    Ok(Json(MessageResponse {
        message: "File deleted successfully",
    })
    .into_response())
}

/// `GET /{name}` — stream a stored file with a type inferred from its name.
pub async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let blob = state.engine.open(&name).await.map_err(|err| match err {
        LifecycleError::NotFound => AppError::not_found("not found"),
        other => other.into(),
    })?;

    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    let mut response = Response::new(Body::from_stream(ReaderStream::new(blob.reader)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(blob.len));
    Ok(response)
}

/// `HEAD /{name}` — existence check with the same content type as GET.
pub async fn head(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    if !state.engine.exists(&name).await? {
        return Err(AppError::not_found("not found"));
    }
    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// Configured base, else the request `Origin`, else `https://{Host}`.
fn public_base(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.public_base_url {
        return base.clone();
    }
    let header_str = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(origin) = header_str(header::ORIGIN).filter(|o| !o.is_empty() && *o != "null") {
        return origin.trim_end_matches('/').to_string();
    }
    match header_str(header::HOST) {
        Some(host) => format!("https://{}", host),
        None => String::new(),
    }
}
