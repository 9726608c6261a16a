use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::{Diagnostic, Plant, RecordStore};
use crate::model::{ModelRegistry, Prediction, TaskKind};
use crate::response::{
    format_nutrient_response, format_plant_response, ApiError, Envelope, NutrientData, PlantData,
};
use crate::utils::is_allowed_file;

#[derive(Clone)]
pub struct AppState {
    pub models: ModelRegistry,
    pub store: Arc<dyn RecordStore>,
    pub allowed_extensions: Arc<[String]>,
}

pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/predictNutrient", post(predict_nutrient))
        .route("/predictPlant", post(predict_plant))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
        .route("/health", get(health_check))
        .route("/apispec_1.json", get(api_spec))
        .layer(TraceLayer::new_for_http())
}

/// What varies between the prediction endpoints.
#[async_trait]
trait PredictionEndpoint {
    const FILE_KEY: &'static str;
    const TASK: TaskKind;
    type Record: Send + 'static;
    type Data: Serialize;

    async fn lookup(
        store: &dyn RecordStore,
        label: &str,
    ) -> Result<Option<Self::Record>, sqlx::Error>;

    fn format(prediction: Prediction, record: Self::Record) -> Result<Self::Data, ApiError>;
}

struct NutrientEndpoint;

#[async_trait]
impl PredictionEndpoint for NutrientEndpoint {
    const FILE_KEY: &'static str = "nutrient_img";
    const TASK: TaskKind = TaskKind::Nutrient;
    type Record = Diagnostic;
    type Data = NutrientData;

    async fn lookup(store: &dyn RecordStore, label: &str) -> Result<Option<Diagnostic>, sqlx::Error> {
        store.find_diagnostic(label).await
    }

    fn format(prediction: Prediction, record: Diagnostic) -> Result<NutrientData, ApiError> {
        format_nutrient_response(prediction, record)
    }
}

struct PlantEndpoint;

#[async_trait]
impl PredictionEndpoint for PlantEndpoint {
    const FILE_KEY: &'static str = "plant_img";
    const TASK: TaskKind = TaskKind::Plant;
    type Record = Plant;
    type Data = PlantData;

    async fn lookup(store: &dyn RecordStore, label: &str) -> Result<Option<Plant>, sqlx::Error> {
        store.find_plant(label).await
    }

    fn format(prediction: Prediction, record: Plant) -> Result<PlantData, ApiError> {
        format_plant_response(prediction, record)
    }
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Finds the file part named `key`. Parts without a filename are plain
/// form fields and do not count as files.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    key: &str,
) -> Result<Upload, ApiError> {
    let mut multipart = multipart.map_err(|_| ApiError::NoFilePart)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        if field.name() != Some(key) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Multipart(e.to_string()))?;
        return Ok(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    Err(ApiError::NoFilePart)
}

async fn handle_prediction<E: PredictionEndpoint>(
    state: AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Envelope<E::Data>>, ApiError> {
    let upload = read_upload(multipart, E::FILE_KEY).await?;
    if upload.filename.is_empty() {
        return Err(ApiError::NoSelectedFile);
    }
    if !is_allowed_file(&upload.filename, &state.allowed_extensions) {
        return Err(ApiError::FileTypeNotAllowed);
    }

    let task = state.models.get(E::TASK);
    let prediction = tokio::task::spawn_blocking(move || task.predict(&upload.bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    info!(
        task = E::TASK.name(),
        label = %prediction.label,
        confidence = prediction.confidence,
        "prediction"
    );

    let record = E::lookup(state.store.as_ref(), &prediction.label)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(Envelope::success(E::format(prediction, record)?)))
}

async fn predict_nutrient(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Envelope<NutrientData>>, ApiError> {
    handle_prediction::<NutrientEndpoint>(state, multipart).await
}

async fn predict_plant(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Envelope<PlantData>>, ApiError> {
    handle_prediction::<PlantEndpoint>(state, multipart).await
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

fn upload_operation(summary: &str, field: &str, record_key: &str, example: Value) -> Value {
    json!({
        "summary": summary,
        "consumes": ["multipart/form-data"],
        "produces": ["application/json"],
        "parameters": [{
            "in": "formData",
            "name": field,
            "type": "file",
            "required": true,
            "description": "The image leaf to be analyzed (jpg, jpeg, png)."
        }],
        "responses": {
            "200": {
                "description": format!(
                    "status, data.predicted_label, data.confidence and data.{record_key}"
                ),
                "examples": { "application/json": example }
            },
            "400": { "description": "Missing file part, empty filename or disallowed extension" },
            "404": { "description": "No data found for prediction" },
            "500": { "description": "Prediction or database error" }
        }
    })
}

fn nutrient_example() -> Value {
    json!({
        "status": "success",
        "data": {
            "predicted_label": "Healthy",
            "confidence": 0.9999898672103882,
            "diagnostic": {
                "id": 1,
                "name_disease": "Tanaman Sehat",
                "disease_label": "Healthy",
                "disease_image": [
                    "https://storage.googleapis.com/hidroqu/diagnostics/sehat-1.png",
                    "https://storage.googleapis.com/hidroqu/diagnostics/sehat-2.png",
                    "https://storage.googleapis.com/hidroqu/diagnostics/sehat-3.jpg"
                ],
                "indication": "Daun berwarna hijau segar tanpa noda, struktur tanaman kokoh, bunga dan buah tumbuh normal, serta pertumbuhan keseluruhan terlihat harmonis.",
                "cause": "Lingkungan tumbuh yang ideal, asupan nutrisi mencukupi, penyiraman yang tepat, dan bebas dari serangan hama atau penyakit.",
                "solution": "Lanjutkan perawatan yang konsisten, pantau kondisi tanaman secara rutin, dan pastikan pH tanah tetap seimbang antara 5,5 hingga 7."
            }
        }
    })
}

fn plant_example() -> Value {
    json!({
        "status": "success",
        "data": {
            "predicted_label": "Timun",
            "confidence": 0.7341078519821167,
            "plant": {
                "id": 1,
                "name": "Timun",
                "latin_name": "Cucumis sativus",
                "icon_plant": "https://storage.googleapis.com/hidroqu/plants/icons/timun.svg",
                "description": "Timun adalah tanaman sayur merambat yang memiliki kandungan air tinggi dan sering digunakan dalam berbagai hidangan seperti salad atau acar.",
                "planting_guide": "Tanam timun di area yang mendapatkan sinar matahari penuh dengan tanah yang subur dan memiliki drainase baik. Pastikan tanaman memiliki penopang seperti rambatan.",
                "fertilizer_type": "Gunakan pupuk organik seperti kompos atau pupuk kandang setiap 10-14 hari untuk mendukung pertumbuhan buah.",
                "fun_fact": "Timun dikenal sebagai bahan alami untuk menghidrasi kulit dan sering digunakan dalam produk kecantikan.",
                "duration_plant": 45
            }
        }
    })
}

async fn api_spec() -> Json<Value> {
    Json(json!({
        "swagger": "2.0",
        "info": {
            "title": "HidroQu ML Docs",
            "description": "Documentation for HidroQu ML",
            "version": env!("CARGO_PKG_VERSION")
        },
        "paths": {
            "/predictNutrient": {
                "post": upload_operation(
                    "Handle nutrient prediction requests.",
                    "nutrient_img",
                    "diagnostic",
                    nutrient_example(),
                )
            },
            "/predictPlant": {
                "post": upload_operation(
                    "Handle plant prediction requests.",
                    "plant_img",
                    "plant",
                    plant_example(),
                )
            }
        }
    }))
}
