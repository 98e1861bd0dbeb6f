//! # Gateway エラー型
//!
//! 全エンドポイントで共通のエラー型。
//! 呼び出し元には `{"error": "<固定メッセージ>"}` のみを返し、
//! 内部の詳細はログにだけ残す。

use axum::http::StatusCode;
use axum::Json;
use ingest_types::*;

use crate::storage::StorageError;

/// 400 Bad Requestの分類。カテゴリごとにメッセージが固定されている。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestKind {
    /// multipartとして解釈できない、または先頭パート（タスク記述）がない
    TaskSubmissionInvalid,
    /// タスク記述のJSON・type・spec.ioConfigが不正
    TaskSpecInvalid,
    /// ファイル名が安全な相対パスでない
    MaliciousPath,
}

impl BadRequestKind {
    fn message(self) -> &'static str {
        match self {
            BadRequestKind::TaskSubmissionInvalid => BAD_INDEX_TASK_MSG,
            BadRequestKind::TaskSpecInvalid => BAD_INDEX_TASK_SPEC_MSG,
            BadRequestKind::MaliciousPath => MALICIOUS_PATH_MSG,
        }
    }
}

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト
    #[error("不正なリクエスト ({kind:?}): {detail}")]
    BadRequest { kind: BadRequestKind, detail: String },
    /// 未知または不正なバッチ／ファイル
    #[error("バッチまたはファイルが見つかりません: {0}")]
    NotFound(String),
    /// 許可されないHTTPメソッド（値は呼び出し元に返すメッセージ）
    #[error("許可されないメソッド: {0}")]
    MethodNotAllowed(&'static str),
    /// ストレージ操作に失敗
    #[error("ストレージ操作に失敗: {0}")]
    Storage(#[from] StorageError),
    /// 下流エンジンへのタスク転送に失敗
    #[error("下流エンジンへの転送に失敗: {0}")]
    Downstream(String),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn bad_request(kind: BadRequestKind, detail: impl Into<String>) -> Self {
        GatewayError::BadRequest {
            kind,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Storage(_) | GatewayError::Downstream(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 呼び出し元に返すメッセージ。内部の詳細は含めない。
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::BadRequest { kind, .. } => kind.message(),
            GatewayError::NotFound(_) => BAD_FILE_MSG,
            GatewayError::MethodNotAllowed(msg) => *msg,
            GatewayError::Storage(_) | GatewayError::Downstream(_) | GatewayError::Internal(_) => {
                INTERNAL_ERROR_MSG
            }
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "リクエスト処理に失敗");
        } else {
            tracing::warn!(error = %self, "リクエストを拒否");
        }
        (status, Json(ErrorBody::new(self.public_message()))).into_response()
    }
}
