use axum::{Json, response::IntoResponse};
use utils::response::ApiResponse;

pub async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::success("ok"))
}
