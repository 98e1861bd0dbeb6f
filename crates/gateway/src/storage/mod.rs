//! # Staging Storage
//!
//! バッチIDをキーとするステージング領域の抽象インターフェース。
//! ローカルファイルシステム実装は `fs` サブモジュールを参照。
//!
//! ストレージはHTTPを一切知らない。全操作は永続領域を直接参照し、
//! メモリ上のキャッシュは持たない。

pub mod fs;

pub use fs::FsStagingStore;

use std::time::SystemTime;

use ingest_types::{BatchId, ItemName};
use tokio::io::AsyncRead;

/// ストレージから読み出したアイテムのバイト列。
pub type ItemReader = Box<dyn AsyncRead + Send + Unpin>;

/// ストレージ操作のエラー。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// バッチまたはアイテムが存在しない
    #[error("バッチまたはアイテムが存在しません: {0}")]
    NotFound(String),
    /// I/Oエラー
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),
}

/// 存在するバッチと、その最終更新時刻。
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub id: BatchId,
    /// バッチ自体（名前空間）の最終書き込み時刻。保持期間の判定に使う。
    pub modified: SystemTime,
}

/// ステージング領域の抽象インターフェース。
///
/// 1バッチ = 1名前空間。削除はバッチ単位でall-or-nothingに行われる。
/// 同一バッチへの `put` は1つの投入リクエストから逐次に呼ばれる前提で、
/// 同時書き込みの調停はしない。
#[async_trait::async_trait]
pub trait StagingStore: Send + Sync {
    /// バッチが無ければ作成し、アイテムを書き込む。内容はストリームで受け取る。
    async fn put(
        &self,
        batch: &BatchId,
        name: &ItemName,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError>;

    /// アイテムを読み出す。バッチかアイテムが無ければ `NotFound`。
    async fn get(&self, batch: &BatchId, name: &ItemName) -> Result<ItemReader, StorageError>;

    /// バッチ全体を削除する。存在しないバッチの削除も成功扱いで、
    /// 戻り値は削除対象が存在したかどうか。
    async fn delete(&self, batch: &BatchId) -> Result<bool, StorageError>;

    /// 存在する全バッチを最終更新時刻付きで列挙する。
    async fn list_batches(&self) -> Result<Vec<BatchEntry>, StorageError>;
}
