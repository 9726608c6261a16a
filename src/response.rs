use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::{Diagnostic, Plant};
use crate::model::{ModelError, Prediction};

/// `{"status": ..., "data": ...}` or `{"status": ..., "error": ...}`, never both.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope {
            status: "success",
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn error(message: String) -> Self {
        Envelope {
            status: "error",
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file part")]
    NoFilePart,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("File type not allowed")]
    FileTypeNotAllowed,
    #[error("Invalid multipart body: {0}")]
    Multipart(String),
    #[error("Prediction error: {0}")]
    Prediction(#[from] ModelError),
    #[error("Database fetch error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("No data found for prediction")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFilePart
            | ApiError::NoSelectedFile
            | ApiError::FileTypeNotAllowed
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Prediction(_) | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        (status, Json(Envelope::error(self.to_string()))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnosticBody {
    pub id: i64,
    pub name_disease: String,
    pub disease_label: String,
    pub disease_image: serde_json::Value,
    pub indication: Option<String>,
    pub cause: Option<String>,
    pub solution: Option<String>,
}

impl TryFrom<Diagnostic> for DiagnosticBody {
    type Error = ApiError;

    fn try_from(row: Diagnostic) -> Result<Self, Self::Error> {
        let disease_image = match row.disease_image.as_deref() {
            Some(text) => serde_json::from_str(text).map_err(|e| {
                ApiError::Internal(format!("invalid disease_image for {}: {e}", row.disease_label))
            })?,
            None => serde_json::Value::Null,
        };

        Ok(DiagnosticBody {
            id: row.id,
            name_disease: row.name_disease,
            disease_label: row.disease_label,
            disease_image,
            indication: row.indication,
            cause: row.cause,
            solution: row.solution,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct NutrientData {
    pub predicted_label: String,
    pub confidence: f64,
    pub diagnostic: DiagnosticBody,
}

#[derive(Debug, Serialize)]
pub struct PlantData {
    pub predicted_label: String,
    pub confidence: f64,
    pub plant: Plant,
}

pub fn format_nutrient_response(
    prediction: Prediction,
    row: Diagnostic,
) -> Result<NutrientData, ApiError> {
    Ok(NutrientData {
        predicted_label: prediction.label,
        confidence: prediction.confidence as f64,
        diagnostic: row.try_into()?,
    })
}

pub fn format_plant_response(prediction: Prediction, row: Plant) -> Result<PlantData, ApiError> {
    Ok(PlantData {
        predicted_label: prediction.label,
        confidence: prediction.confidence as f64,
        plant: row,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::tests::{healthy_diagnostic, timun_plant};

    fn prediction(label: &str, confidence: f32) -> Prediction {
        Prediction {
            label: label.into(),
            confidence,
        }
    }

    #[test]
    fn envelopes_never_carry_data_and_error() {
        let ok = serde_json::to_value(Envelope::success(json!({"a": 1}))).unwrap();
        assert_eq!(ok, json!({"status": "success", "data": {"a": 1}}));

        let err = serde_json::to_value(Envelope::error("boom".into())).unwrap();
        assert_eq!(err, json!({"status": "error", "error": "boom"}));
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(ApiError::NoFilePart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::FileTypeNotAllowed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Database(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Prediction(ModelError::EmptyOutput).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn nutrient_response_parses_image_list() {
        let data =
            format_nutrient_response(prediction("Healthy", 0.75), healthy_diagnostic()).unwrap();
        let value = serde_json::to_value(&data).unwrap();

        assert_eq!(value["predicted_label"], "Healthy");
        assert_eq!(value["confidence"], 0.75);
        assert_eq!(value["diagnostic"]["name_disease"], "Tanaman Sehat");
        assert_eq!(
            value["diagnostic"]["disease_image"][0],
            "https://storage.googleapis.com/hidroqu/diagnostics/sehat-1.png"
        );
        assert_eq!(value["diagnostic"]["disease_image"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn malformed_disease_image_is_a_server_error() {
        let mut row = healthy_diagnostic();
        row.disease_image = Some("not json".into());
        let err = format_nutrient_response(prediction("Healthy", 0.5), row).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn plant_response_uses_column_names() {
        let data = format_plant_response(prediction("Timun", 0.5), timun_plant()).unwrap();
        let value = serde_json::to_value(&data).unwrap();

        assert_eq!(value["plant"]["latin_name"], "Cucumis sativus");
        assert_eq!(value["plant"]["duration_plant"], 45);
        let keys: Vec<_> = value["plant"].as_object().unwrap().keys().cloned().collect();
        for key in [
            "id",
            "name",
            "latin_name",
            "icon_plant",
            "description",
            "planting_guide",
            "fertilizer_type",
            "fun_fact",
            "duration_plant",
        ] {
            assert!(keys.iter().any(|k| k == key), "missing {key}");
        }
    }
}
