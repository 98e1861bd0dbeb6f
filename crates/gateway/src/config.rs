//! # Gateway設定・共有状態
//!
//! コマンドライン引数（環境変数でも指定可）からの設定読み込みと、
//! 各APIハンドラが共有する状態の定義。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use crate::storage::StagingStore;

/// 取得APIのエンドポイント（コンテキストパスからの相対）
pub const RETRIEVER_ENDPOINT: &str = "/file";

/// 投入APIのエンドポイント（コンテキストパスからの相対）
pub const SUBMITTER_ENDPOINT: &str = "/task";

/// コマンドライン引数。
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ingest-gateway",
    version,
    about = "Stages uploaded files so a batch-ingestion engine can pull them over HTTP"
)]
pub struct Args {
    /// Listen address for task submissions and cleanup
    #[arg(long, env = "GATEWAY_TASKS_ADDR", default_value = "0.0.0.0:8080")]
    pub tasks_addr: SocketAddr,

    /// URL sub-path for task submissions and cleanup
    #[arg(long, env = "GATEWAY_TASKS_CONTEXT_PATH", default_value = "/tasks")]
    pub tasks_context_path: String,

    /// Path to TLS certificate (PEM) for task submissions and cleanup
    #[arg(long, env = "GATEWAY_TASKS_TLS_CERT")]
    pub tasks_tls_cert: Option<PathBuf>,

    /// Path to TLS key (PEM) for task submissions and cleanup
    #[arg(long, env = "GATEWAY_TASKS_TLS_KEY")]
    pub tasks_tls_key: Option<PathBuf>,

    /// URL to send indexing tasks to
    #[arg(
        long,
        env = "GATEWAY_DRUID_INDEXER_ENDPOINT",
        default_value = "http://localhost:8888/druid/indexer/v1/task"
    )]
    pub druid_indexer_endpoint: Url,

    /// Listen address for retrieving submitted files
    #[arg(long, env = "GATEWAY_FILES_ADDR", default_value = "0.0.0.0:8080")]
    pub files_addr: SocketAddr,

    /// URL sub-path for retrieving submitted files
    #[arg(long, env = "GATEWAY_FILES_CONTEXT_PATH", default_value = "/files")]
    pub files_context_path: String,

    /// Path to TLS certificate (PEM) for retrieving submitted files
    #[arg(long, env = "GATEWAY_FILES_TLS_CERT")]
    pub files_tls_cert: Option<PathBuf>,

    /// Path to TLS key (PEM) for retrieving submitted files
    #[arg(long, env = "GATEWAY_FILES_TLS_KEY")]
    pub files_tls_key: Option<PathBuf>,

    /// Root URL files will be accessible from. Defaults to
    /// http(s)://{files-addr}{files-context-path}/file/
    #[arg(long, env = "GATEWAY_FILES_EXTERNAL_URL")]
    pub files_external_url: Option<String>,

    /// Path to TLS certificate when tasks and files share one listener
    #[arg(long, env = "GATEWAY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS key when tasks and files share one listener
    #[arg(long, env = "GATEWAY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// How long to retain submitted files before automatic deletion (e.g. "1h", "90m")
    #[arg(
        long,
        env = "GATEWAY_RETENTION_PERIOD",
        default_value = "1h",
        value_parser = humantime::parse_duration
    )]
    pub retention_period: Duration,

    /// How often to check for files past the retention period (e.g. "1h", "5m")
    #[arg(
        long,
        env = "GATEWAY_RETENTION_CHECK_PERIOD",
        default_value = "1h",
        value_parser = humantime::parse_duration
    )]
    pub retention_check_period: Duration,

    /// Root directory to store submitted files
    #[arg(long, env = "GATEWAY_ROOT_DIR", default_value = "/tmp/druid-index-gateway")]
    pub root_dir: PathBuf,
}

/// 設定の検証エラー。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TLS証明書と鍵の片方だけが指定された
    #[error("TLSの証明書と鍵は両方指定するか、どちらも指定しないでください ({0})")]
    IncompleteTls(&'static str),
    /// コンテキストパスが不正
    #[error("{flag} は空か '/' で始まる必要があります: {value:?}")]
    InvalidContextPath { flag: &'static str, value: String },
    /// 同一リスナー上でコンテキストパスが重複
    #[error("同一アドレスで待ち受ける場合、--files-context-path と --tasks-context-path は互いの接頭辞であってはいけません")]
    OverlappingContextPaths,
    /// 取得用ベースURLが不正
    #[error("ファイル取得用URLが不正です ({url}): {reason}")]
    InvalidExternalUrl { url: String, reason: String },
    /// 期間の指定が不正
    #[error("{0} は1以上である必要があります")]
    ZeroPeriod(&'static str),
}

/// TLS証明書と秘密鍵のペア（PEMファイルパス）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPair {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPair {
    /// 両方指定されていればペアを、どちらも無ければ `None` を返す。
    pub fn from_parts(
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
        which: &'static str,
    ) -> Result<Option<Self>, ConfigError> {
        match (cert, key) {
            (Some(cert), Some(key)) => Ok(Some(Self { cert, key })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteTls(which)),
        }
    }
}

/// 1つの待ち受け設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub addr: SocketAddr,
    pub tls: Option<TlsPair>,
}

impl Listener {
    fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// 投入APIと取得APIの配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// 1つのリスナーに両APIを載せる
    Shared(Listener),
    /// APIごとに別のリスナー
    Split { tasks: Listener, files: Listener },
}

impl Topology {
    fn files_listener(&self) -> &Listener {
        match self {
            Topology::Shared(listener) => listener,
            Topology::Split { files, .. } => files,
        }
    }
}

/// 検証済みのGateway設定。
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub topology: Topology,
    /// 投入APIのコンテキストパス（末尾 `/` なし）
    pub tasks_context_path: String,
    /// 取得APIのコンテキストパス（末尾 `/` なし）
    pub files_context_path: String,
    /// 下流エンジンのタスク投入URL
    pub indexer_endpoint: Url,
    /// 下流エンジンから見たファイル取得用ベースURL
    pub fetch_url_base: Url,
    pub root_dir: PathBuf,
    pub retention_period: Duration,
    pub retention_check_period: Duration,
}

impl Args {
    /// 引数を検証して `GatewayConfig` を構築する。
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let tasks_context_path =
            normalize_context_path(&self.tasks_context_path, "--tasks-context-path")?;
        let files_context_path =
            normalize_context_path(&self.files_context_path, "--files-context-path")?;

        let topology = if self.tasks_addr == self.files_addr {
            if files_context_path.starts_with(&tasks_context_path)
                || tasks_context_path.starts_with(&files_context_path)
            {
                return Err(ConfigError::OverlappingContextPaths);
            }
            Topology::Shared(Listener {
                addr: self.tasks_addr,
                tls: TlsPair::from_parts(self.tls_cert, self.tls_key, "--tls-cert/--tls-key")?,
            })
        } else {
            Topology::Split {
                tasks: Listener {
                    addr: self.tasks_addr,
                    tls: TlsPair::from_parts(
                        self.tasks_tls_cert,
                        self.tasks_tls_key,
                        "--tasks-tls-cert/--tasks-tls-key",
                    )?,
                },
                files: Listener {
                    addr: self.files_addr,
                    tls: TlsPair::from_parts(
                        self.files_tls_cert,
                        self.files_tls_key,
                        "--files-tls-cert/--files-tls-key",
                    )?,
                },
            }
        };

        // 未指定なら取得APIのリスナーから導出する（TLSの有無でスキームを決める）
        let external_url = match self.files_external_url {
            Some(url) => url,
            None => {
                let files = topology.files_listener();
                format!(
                    "{}://{}{}{}/",
                    files.scheme(),
                    files.addr,
                    files_context_path,
                    RETRIEVER_ENDPOINT
                )
            }
        };
        let fetch_url_base = parse_base_url(&external_url)?;

        if self.retention_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("--retention-period"));
        }
        if self.retention_check_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("--retention-check-period"));
        }

        Ok(GatewayConfig {
            topology,
            tasks_context_path,
            files_context_path,
            indexer_endpoint: self.druid_indexer_endpoint,
            fetch_url_base,
            root_dir: self.root_dir,
            retention_period: self.retention_period,
            retention_check_period: self.retention_check_period,
        })
    }
}

fn normalize_context_path(raw: &str, flag: &'static str) -> Result<String, ConfigError> {
    let trimmed = raw.trim_end_matches('/');
    if !trimmed.is_empty() && !trimmed.starts_with('/') {
        return Err(ConfigError::InvalidContextPath {
            flag,
            value: raw.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidExternalUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("スキームは http か https である必要があります".to_string()));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("ベースURLとして使用できません".to_string()));
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// 共有状態
// ---------------------------------------------------------------------------

/// 投入API（Ingestion Coordinator）の共有状態。
pub struct SubmitterState {
    /// ステージング領域
    pub store: Arc<dyn StagingStore>,
    /// 下流エンジンへのHTTPクライアント
    pub http_client: reqwest::Client,
    /// 下流エンジンのタスク投入URL
    pub indexer_endpoint: Url,
    /// 生成する取得URLのベース
    pub fetch_url_base: Url,
}

/// 取得API（Fetch Service）の共有状態。
pub struct RetrieverState {
    /// ステージング領域
    pub store: Arc<dyn StagingStore>,
}
