//! # GET /health

use axum::http::StatusCode;

/// GET /health: プロセスが応答可能であることだけを返す。
pub async fn handle_health() -> StatusCode {
    StatusCode::OK
}
