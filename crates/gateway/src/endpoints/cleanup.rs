//! # DELETE /task/{batch}
//!
//! 下流エンジンがファイルの取得を終えた後に、バッチを明示的に削除する。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use ingest_types::BatchId;

use crate::config::SubmitterState;
use crate::error::GatewayError;

/// DELETE /task/{batch}: バッチを削除する。
///
/// 不正なバッチID、存在しないバッチ、削除の失敗はいずれも404として返す。
pub async fn handle_cleanup(
    State(state): State<Arc<SubmitterState>>,
    Path(raw_batch): Path<String>,
) -> Result<StatusCode, GatewayError> {
    let batch = BatchId::parse(&raw_batch)
        .ok_or_else(|| GatewayError::NotFound(format!("不正なバッチID: {raw_batch:?}")))?;

    match state.store.delete(&batch).await {
        Ok(true) => {
            tracing::info!(batch = %batch, "バッチを削除");
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(GatewayError::NotFound(format!("存在しないバッチ: {batch}"))),
        Err(e) => {
            tracing::error!(batch = %batch, error = %e, "バッチの削除に失敗");
            Err(GatewayError::NotFound(format!("バッチを削除できません: {batch}")))
        }
    }
}
