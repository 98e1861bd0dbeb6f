//! # POST /task
//!
//! multipartの先頭パートをタスク記述、残りのパートを取り込み対象ファイルとして受け取り、
//! ファイルを新しいバッチにステージングしてから、取得URLを注入したタスク記述を
//! 下流エンジンに転送する。
//!
//! 下流エンジンが200以外を返した場合、または途中で失敗した場合は
//! バッチを削除してから応答する。

use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures::TryStreamExt;
use ingest_types::{BatchId, HttpInputSource, ItemName};
use reqwest::Url;
use tokio_util::io::StreamReader;

use crate::config::SubmitterState;
use crate::error::{BadRequestKind, GatewayError};
use crate::relay::{forward_task, relay_response};
use crate::storage::{StagingStore, StorageError};
use crate::task::TaskDocument;

/// タスク記述（先頭パート）の最大バイト数。
pub(crate) const MAX_TASK_SPEC_BYTES: usize = 1024 * 1024;

/// ファイルパートの読み取り中に発生したmultipartのエラー。
///
/// ストレージへの書き込みは `io::Error` しか返さないため、これで包んで
/// ストレージ自体のI/Oエラーと区別する。
#[derive(Debug, thiserror::Error)]
#[error("ファイルパートの読み取りに失敗: {0}")]
struct PartReadError(MultipartError);

/// POST /task: ファイルをステージングし、タスクを下流エンジンに投入する。
///
/// 成功時・下流エンジンのエラー時ともに、下流のレスポンスをそのまま返す。
pub async fn handle_submit(
    State(state): State<Arc<SubmitterState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, GatewayError> {
    let mut multipart = multipart.map_err(|e| {
        GatewayError::bad_request(
            BadRequestKind::TaskSubmissionInvalid,
            format!("multipartとして解釈できません: {e}"),
        )
    })?;

    // 先頭パート: タスク記述
    let spec_part = multipart
        .next_field()
        .await
        .map_err(malformed_multipart)?
        .ok_or_else(|| {
            GatewayError::bad_request(BadRequestKind::TaskSubmissionInvalid, "パートがありません")
        })?;
    let spec_bytes = read_task_spec(spec_part).await?;
    let document = TaskDocument::parse(&spec_bytes)?;

    let batch = BatchId::generate();
    let guard = RollbackGuard::new(state.store.clone(), batch.clone());
    tracing::info!(batch = %batch, task_type = document.task_type(), "タスク投入を受付");

    match stage_and_forward(&state, &batch, &mut multipart, document).await {
        Ok(downstream) if downstream.status() == StatusCode::OK => {
            guard.commit();
            tracing::info!(batch = %batch, "下流エンジンがタスクを受理");
            Ok(relay_response(downstream))
        }
        Ok(downstream) => {
            tracing::warn!(
                batch = %batch,
                status = %downstream.status(),
                "下流エンジンがタスクを拒否、バッチを削除"
            );
            guard.rollback().await;
            Ok(relay_response(downstream))
        }
        Err(e) => {
            tracing::warn!(batch = %batch, error = %e, "タスク投入に失敗、バッチを削除");
            guard.rollback().await;
            Err(e)
        }
    }
}

/// 残りのパートをステージングし、書き換えたタスク記述を転送する。
async fn stage_and_forward(
    state: &SubmitterState,
    batch: &BatchId,
    multipart: &mut Multipart,
    mut document: TaskDocument,
) -> Result<reqwest::Response, GatewayError> {
    let mut uris = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed_multipart)? {
        let raw_name = field.file_name().unwrap_or_default().to_string();
        let name = ItemName::parse(&raw_name).ok_or_else(|| {
            GatewayError::bad_request(
                BadRequestKind::MaliciousPath,
                format!("不正なファイル名: {raw_name:?}"),
            )
        })?;

        let reader =
            StreamReader::new(field.map_err(|e| std::io::Error::other(PartReadError(e))));
        tokio::pin!(reader);
        let written = state
            .store
            .put(batch, &name, &mut reader)
            .await
            .map_err(classify_put_error)?;
        tracing::debug!(batch = %batch, item = %name, bytes = written, "ファイルをステージング");

        uris.push(fetch_url(&state.fetch_url_base, batch, &name)?.to_string());
    }

    tracing::info!(batch = %batch, files = uris.len(), "ステージング完了、下流エンジンに転送");
    document.set_input_source(HttpInputSource::new(uris))?;
    forward_task(&state.http_client, &state.indexer_endpoint, document.to_vec()?).await
}

/// 先頭パートを上限付きで読み切る。
async fn read_task_spec(mut field: Field<'_>) -> Result<Vec<u8>, GatewayError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(malformed_multipart)? {
        if buf.len() + chunk.len() > MAX_TASK_SPEC_BYTES {
            return Err(GatewayError::bad_request(
                BadRequestKind::TaskSpecInvalid,
                format!("タスク記述が上限 {MAX_TASK_SPEC_BYTES} バイトを超えています"),
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// 書き込み失敗のうち、原因がmultipartの読み取りにあるものは400として扱う。
fn classify_put_error(err: StorageError) -> GatewayError {
    if let StorageError::Io(io) = &err {
        if let Some(part) = io.get_ref().and_then(|inner| inner.downcast_ref::<PartReadError>()) {
            return GatewayError::bad_request(
                BadRequestKind::TaskSubmissionInvalid,
                part.to_string(),
            );
        }
    }
    err.into()
}

fn malformed_multipart(e: MultipartError) -> GatewayError {
    GatewayError::bad_request(
        BadRequestKind::TaskSubmissionInvalid,
        format!("multipartの読み取りに失敗: {e}"),
    )
}

/// アイテムの取得URLを組み立てる。
///
/// ベースURLのパスにバッチIDとファイル名の各セグメントを
/// パーセントエンコードして追加する。
pub fn fetch_url(base: &Url, batch: &BatchId, name: &ItemName) -> Result<Url, GatewayError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| GatewayError::Internal(format!("ベースURLにパスを追加できません: {base}")))?
        .pop_if_empty()
        .push(batch.as_str())
        .extend(name.segments());
    Ok(url)
}

/// 投入が確定しなかったバッチを削除するガード。
///
/// `commit` も `rollback` も呼ばれずに破棄された場合（呼び出し元の切断で
/// リクエストのFutureが破棄された場合など）は、ランタイム上で削除を予約する。
struct RollbackGuard {
    store: Arc<dyn StagingStore>,
    batch: Option<BatchId>,
}

impl RollbackGuard {
    fn new(store: Arc<dyn StagingStore>, batch: BatchId) -> Self {
        Self {
            store,
            batch: Some(batch),
        }
    }

    /// バッチを残す。
    fn commit(mut self) {
        self.batch = None;
    }

    /// バッチを削除し、完了を待つ。
    async fn rollback(mut self) {
        if let Some(batch) = self.batch.take() {
            delete_batch(self.store.as_ref(), &batch).await;
        }
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        tracing::warn!(batch = %batch, "投入が中断された、バッチの削除を予約");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                runtime.spawn(async move { delete_batch(store.as_ref(), &batch).await });
            }
            Err(_) => {
                tracing::error!(batch = %batch, "ランタイム外のため削除できません、保持期間チェックで回収");
            }
        }
    }
}

async fn delete_batch(store: &dyn StagingStore, batch: &BatchId) {
    if let Err(e) = store.delete(batch).await {
        tracing::error!(batch = %batch, error = %e, "バッチの削除に失敗");
    }
}
