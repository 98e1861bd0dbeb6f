//! # Ingest Gateway
//!
//! バッチ取り込みエンジンの前段に置くステージング用Gateway。
//!
//! ## 役割
//! - multipartで受け取ったファイルをバッチ単位でステージング
//! - タスク記述の `spec.ioConfig.inputSource` をHTTP取得URLに書き換えて下流エンジンへ投入
//! - 下流エンジンからのファイル取得要求への応答
//! - 明示的な削除と、保持期間を過ぎたバッチの自動回収

pub mod config;
pub mod endpoints;
pub mod error;
pub mod relay;
pub mod server;
pub mod storage;
pub mod sweeper;
pub mod task;
