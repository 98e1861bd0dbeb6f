//! # Gatewayエンドポイント
//!
//! - 投入API: `POST /task`、`DELETE /task/{batch}`
//! - 取得API: `GET /file/{batch}/{name...}`
//! - 共通: `GET /health`、許可されないメソッド（405）、未知のパス（404）

pub mod cleanup;
pub mod fetch;
pub mod health;
pub mod submit;

pub use cleanup::handle_cleanup;
pub use fetch::handle_fetch;
pub use health::handle_health;
pub use submit::handle_submit;

use ingest_types::{BAD_FETCH_METHOD_MSG, BAD_INDEX_TASK_METHOD_MSG};

use crate::error::GatewayError;

/// `/task` 系で許可されないメソッド。
pub async fn task_method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed(BAD_INDEX_TASK_METHOD_MSG)
}

/// `/file` 系で許可されないメソッド。
pub async fn file_method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed(BAD_FETCH_METHOD_MSG)
}

/// どのルートにも一致しないパス。
pub async fn route_not_found(uri: axum::http::Uri) -> GatewayError {
    GatewayError::NotFound(format!("未知のパス: {}", uri.path()))
}
