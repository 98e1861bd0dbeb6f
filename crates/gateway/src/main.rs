//! # Ingest Gateway
//!
//! ## API エンドポイント
//! - `POST {tasks}/task`: ファイルのステージング + タスク投入
//! - `DELETE {tasks}/task/{batch}`: バッチ削除
//! - `GET {files}/file/{batch}/{name...}`: ステージング済みファイルの取得

use std::sync::Arc;

use clap::Parser;
use ingest_gateway::config::Args;
use ingest_gateway::server;
use ingest_gateway::storage::{FsStagingStore, StagingStore};
use ingest_gateway::sweeper::RetentionSweeper;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // rustlsのプロセス既定の暗号プロバイダ（TLSリスナー用）
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("暗号プロバイダは設定済み");
    }

    let config = Args::parse().into_config()?;

    let fs_store = FsStagingStore::new(&config.root_dir);
    fs_store.init().await?;
    let store: Arc<dyn StagingStore> = Arc::new(fs_store);

    let shutdown = CancellationToken::new();

    let sweeper = RetentionSweeper::new(
        store.clone(),
        config.retention_period,
        config.retention_check_period,
    );
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let served = server::run(&config, store, shutdown.clone()).await;
    shutdown.cancel();
    sweeper_task.await?;

    served
}

/// Ctrl+C（unixではSIGTERMも）を受けたら停止を通知する。
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+Cハンドラの登録に失敗");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERMハンドラの登録に失敗");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => return,
    }

    tracing::info!("終了シグナルを受信、停止します");
    shutdown.cancel();
}
