//! # GET /file/{batch}/{name...}
//!
//! 下流エンジンがステージング済みファイルを取得するためのエンドポイント。

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use ingest_types::{BatchId, ItemName};
use tokio_util::io::ReaderStream;

use crate::config::RetrieverState;
use crate::error::GatewayError;
use crate::storage::StorageError;

/// GET /file/{batch}/{name...}: ファイルの内容をストリームで返す。
///
/// パスは最初の `/` でバッチIDとファイル名に分割する。
/// どちらかが不正、または存在しない場合は404。
pub async fn handle_fetch(
    State(state): State<Arc<RetrieverState>>,
    Path(path): Path<String>,
) -> Result<Response, GatewayError> {
    let not_found = || GatewayError::NotFound(format!("不正なファイルパス: {path:?}"));

    let (raw_batch, raw_name) = path.split_once('/').ok_or_else(not_found)?;
    let batch = BatchId::parse(raw_batch).ok_or_else(not_found)?;
    let name = ItemName::parse(raw_name).ok_or_else(not_found)?;

    let reader = match state.store.get(&batch, &name).await {
        Ok(reader) => reader,
        Err(StorageError::NotFound(detail)) => return Err(GatewayError::NotFound(detail)),
        Err(e) => return Err(e.into()),
    };

    tracing::debug!(batch = %batch, item = %name, "ファイルを配信");
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}
