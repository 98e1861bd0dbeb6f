//! # 保持期間スイーパー
//!
//! 一定間隔でステージング領域のバッチを列挙し、
//! 保持期間を過ぎたバッチを削除するバックグラウンドループ。
//!
//! 投入中・取得中のバッチとの排他は行わない。保持期間は下流エンジンの
//! 取得完了までの余裕として運用者が設定する（ベストエフォート）。

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ingest_types::BatchId;
use tokio_util::sync::CancellationToken;

use crate::storage::{StagingStore, StorageError};

/// 1サイクルの結果。
#[derive(Debug, Default)]
pub struct SweepReport {
    /// 削除したバッチ
    pub deleted: Vec<BatchId>,
    /// 削除に失敗したバッチとその理由（残りのバッチの処理は継続する）
    pub failures: Vec<(BatchId, StorageError)>,
}

/// 保持期間スイーパー。
pub struct RetentionSweeper {
    store: Arc<dyn StagingStore>,
    /// この時間より古いバッチを削除する
    retention: Duration,
    /// チェック間隔
    check_interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn StagingStore>, retention: Duration, check_interval: Duration) -> Self {
        Self {
            store,
            retention,
            check_interval,
        }
    }

    /// 1サイクル分のスイープを行う。
    ///
    /// バッチの列挙に失敗した場合はサイクル全体を中止してエラーを返す。
    /// 個々のバッチの削除失敗は `SweepReport::failures` に集める。
    pub async fn sweep(&self, now: SystemTime) -> Result<SweepReport, StorageError> {
        let batches = self.store.list_batches().await?;
        let mut report = SweepReport::default();

        for entry in batches {
            // 未来の時刻は経過0として扱う
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age <= self.retention {
                continue;
            }

            match self.store.delete(&entry.id).await {
                Ok(_) => report.deleted.push(entry.id),
                Err(e) => report.failures.push((entry.id, e)),
            }
        }

        Ok(report)
    }

    /// シャットダウンが通知されるまでスイープを繰り返す。
    ///
    /// 最初のサイクルは `check_interval` 経過後に実行する。
    /// 実行中のサイクルは途中で打ち切らず、サイクル間でのみ停止を確認する。
    pub async fn run(self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.check_interval;
        let mut ticker = tokio::time::interval_at(start, self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            retention_secs = self.retention.as_secs(),
            check_interval_secs = self.check_interval.as_secs(),
            "保持期間スイーパーを開始"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep(SystemTime::now()).await {
                Ok(report) => {
                    for (batch, e) in &report.failures {
                        tracing::error!(batch = %batch, error = %e, "期限切れバッチの削除に失敗");
                    }
                    tracing::info!(
                        deleted = report.deleted.len(),
                        failed = report.failures.len(),
                        "保持期間チェック完了"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "バッチの列挙に失敗、このサイクルを中止");
                }
            }
        }

        tracing::info!("保持期間スイーパーを停止");
    }
}
