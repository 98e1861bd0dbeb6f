//! # Ingest Gateway 共有型定義
//!
//! Gatewayのワイヤ形式（エラーレスポンス、inputSource記述子）と、
//! ステージング領域で使用する識別子型を提供する。
//!
//! ## パス安全性
//! `BatchId` と `ItemName` はパース時に検証済みの値のみを保持する。
//! ストレージ層はこれらの型しか受け付けないため、
//! ディレクトリトラバーサルを含むパスがファイルシステムに到達することはない。

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 呼び出し元に返す固定エラーメッセージ
// ---------------------------------------------------------------------------

/// multipart形式として解釈できない、または先頭パートが存在しない投入。
pub const BAD_INDEX_TASK_MSG: &str = "Task submissions must be a multi-part upload with the task spec as the first part, and all files to ingest as the remaining parts with filenames";

/// タスク記述が受け付け可能な形をしていない。
pub const BAD_INDEX_TASK_SPEC_MSG: &str = "Task spec must be an index or index_parallel type task, complete except for .spec.ioConfig.inputSource, in valid JSON encoding";

/// ファイル名が安全な相対パスでない。
pub const MALICIOUS_PATH_MSG: &str =
    "File names must be relative paths that do not escape the upload directory";

/// 未知または不正なバッチ／ファイル。
pub const BAD_FILE_MSG: &str = "Unknown or Illegal Group or File";

/// 内部エラー。詳細は呼び出し元に返さない。
pub const INTERNAL_ERROR_MSG: &str = "Internal Error";

/// /task 系エンドポイントで許可されないメソッド。
pub const BAD_INDEX_TASK_METHOD_MSG: &str = "/task endpoint supports POST for submitting tasks, and /task/{group} supports DELETE for cleaning up file sets";

/// /file 系エンドポイントで許可されないメソッド。
pub const BAD_FETCH_METHOD_MSG: &str = "/file endpoints only support GET";

// ---------------------------------------------------------------------------
// タスク種別
// ---------------------------------------------------------------------------

/// 受け付けるタスク種別（`type` フィールドの値）。
pub const ACCEPTED_TASK_TYPES: [&str; 2] = ["index", "index_parallel"];

/// 差し替え後の `inputSource` の `type` 値。
pub const HTTP_INPUT_SOURCE_TYPE: &str = "http";

// ---------------------------------------------------------------------------
// ワイヤ形式
// ---------------------------------------------------------------------------

/// 全エラーレスポンスの本文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// 人間が読めるエラーメッセージ（カテゴリごとに固定）
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// `spec.ioConfig.inputSource` に注入されるHTTP入力ソース記述子。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInputSource {
    /// 常に `"http"`
    #[serde(rename = "type")]
    pub source_type: String,
    /// ステージング済みファイルの取得URL（投入順）
    pub uris: Vec<String>,
}

impl HttpInputSource {
    pub fn new(uris: Vec<String>) -> Self {
        Self {
            source_type: HTTP_INPUT_SOURCE_TYPE.to_string(),
            uris,
        }
    }
}

// ---------------------------------------------------------------------------
// 識別子
// ---------------------------------------------------------------------------

/// 1回のアップロード（バッチ）を識別する不透明なID。
///
/// 新規バッチのIDはGatewayが生成する（`generate`）。
/// パスから受け取ったIDは `parse` で単一のパスセグメントであることを検証する。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// 新しいランダムなバッチIDを生成する（UUID v4）。
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// 単一の安全なパスセグメントであればバッチIDとして受け付ける。
    pub fn parse(segment: &str) -> Option<Self> {
        is_safe_segment(segment).then(|| Self(segment.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BatchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// バッチ内の1ファイル（アイテム）の相対ファイル名。
///
/// `/` 区切りで入れ子にできるが、各セグメントは `is_safe_segment` を満たす必要がある。
/// 先頭の `./` は取り除かれる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemName(String);

impl ItemName {
    /// 呼び出し元が指定したファイル名を検証する。
    ///
    /// 空、`.`、`..`、絶対パス、`..` セグメントを含むもの、末尾 `/` は拒否される。
    pub fn parse(raw: &str) -> Option<Self> {
        let mut name = raw;
        while let Some(rest) = name.strip_prefix("./") {
            name = rest;
        }
        if name.is_empty() || name.starts_with('/') {
            return None;
        }
        name.split('/')
            .all(is_safe_segment)
            .then(|| Self(name.to_string()))
    }

    /// `/` で区切られたパスセグメント。
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// ファイルシステム上の1セグメントとして安全に使えるか。
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}
