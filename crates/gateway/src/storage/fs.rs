//! # ローカルファイルシステム Staging Storage 実装
//!
//! ディレクトリ構成: `{root}/{batch_id}/{item_name}`
//!
//! バッチ削除は `{root}/.{batch_id}.{uuid}.deleting` へのリネーム後に
//! ツリーごと削除する。リネームは単一の操作なので、並行する読み出しからは
//! バッチ全体が見えるか、何も見えないかのどちらかになる。
//! 削除に失敗した `.deleting` ディレクトリも `list_batches` に現れるため、
//! 後続の保持期間チェックで回収される。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ingest_types::{BatchId, ItemName};
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{BatchEntry, ItemReader, StagingStore, StorageError};

/// ローカルディレクトリをステージング領域とする実装。
pub struct FsStagingStore {
    root: PathBuf,
}

impl FsStagingStore {
    /// 新しいFsStagingStoreを作成する。
    ///
    /// # 引数
    /// - `root`: 全バッチを格納するルートディレクトリ
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// ルートディレクトリを作成する（unixではパーミッション0700）。
    pub async fn init(&self) -> Result<(), StorageError> {
        create_private_dir(&self.root).await?;
        tracing::info!(root = %self.root.display(), "ステージング領域を初期化");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn batch_dir(&self, batch: &BatchId) -> PathBuf {
        self.root.join(batch.as_str())
    }

    fn item_path(&self, batch: &BatchId, name: &ItemName) -> PathBuf {
        let mut path = self.batch_dir(batch);
        path.extend(name.segments());
        path
    }
}

async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await
}

/// 「存在しない」とみなすI/Oエラーか。
/// 途中のセグメントが通常ファイルの場合（ENOTDIR）も含める。
fn is_absent(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

#[async_trait::async_trait]
impl StagingStore for FsStagingStore {
    async fn put(
        &self,
        batch: &BatchId,
        name: &ItemName,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError> {
        let path = self.item_path(batch, name);
        if let Some(parent) = path.parent() {
            create_private_dir(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(content, &mut file).await?;
        file.flush().await?;

        tracing::debug!(batch = %batch, item = %name, bytes = written, "アイテムを書き込み");
        Ok(written)
    }

    async fn get(&self, batch: &BatchId, name: &ItemName) -> Result<ItemReader, StorageError> {
        let path = self.item_path(batch, name);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if is_absent(&e) => {
                return Err(StorageError::NotFound(format!("{batch}/{name}")));
            }
            Err(e) => return Err(e.into()),
        };

        // ディレクトリはアイテムとして扱わない
        if file.metadata().await?.is_dir() {
            return Err(StorageError::NotFound(format!("{batch}/{name}")));
        }
        Ok(Box::new(file))
    }

    async fn delete(&self, batch: &BatchId) -> Result<bool, StorageError> {
        let dir = self.batch_dir(batch);
        let trash = self
            .root
            .join(format!(".{batch}.{}.deleting", uuid::Uuid::new_v4()));

        match tokio::fs::rename(&dir, &trash).await {
            Ok(()) => {}
            Err(e) if is_absent(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        tokio::fs::remove_dir_all(&trash).await?;
        tracing::debug!(batch = %batch, "バッチを削除");
        Ok(true)
    }

    async fn list_batches(&self) -> Result<Vec<BatchEntry>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut batches = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry.file_name().to_str().and_then(BatchId::parse) else {
                continue;
            };

            // 列挙後に並行して削除されたバッチは飛ばす
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if is_absent(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_dir() {
                continue;
            }

            batches.push(BatchEntry {
                id,
                modified: metadata.modified()?,
            });
        }

        Ok(batches)
    }
}
