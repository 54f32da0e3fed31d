use crate::{
    classifier::ClassifierError,
    preprocess::{self, PreprocessError},
    server::SharedState,
    spool::SpoolError,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

const UPLOAD_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("multipart upload could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("no `file` field in upload")]
    MissingFile,
    #[error("uploaded file is empty")]
    EmptyFile,
    #[error("failed to spool upload: {0}")]
    Spool(#[from] SpoolError),
    #[error("failed to preprocess image: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("classification failed: {0}")]
    Classifier(#[from] ClassifierError),
}

impl PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Multipart(_) | PredictError::MissingFile | PredictError::EmptyFile => {
                StatusCode::BAD_REQUEST
            }
            PredictError::Preprocess(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PredictError::Spool(_) | PredictError::Classifier(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct PredictionResponse {
    pub filename: String,
    pub prediction: String,
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            let filename = field
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| "upload".to_string());
            let data = field.bytes().await?;
            upload = Some((filename, data));
            break;
        }
    }

    let (filename, data) = upload.ok_or(PredictError::MissingFile)?;
    if data.is_empty() {
        return Err(PredictError::EmptyFile);
    }

    let spooled = state.spool.stash(&filename, data).await?;
    let input = preprocess::load_tensor(spooled.path())?;
    let prediction = state.classifier.classify(&input)?;

    tracing::debug!(
        "Classified {} as {} ({:.3})",
        filename,
        prediction.label,
        prediction.confidence
    );

    Ok(Json(PredictionResponse {
        filename,
        prediction: prediction.label,
    }))
}
