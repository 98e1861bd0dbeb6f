//! # タスク記述
//!
//! 呼び出し元が送るタスク記述（JSON）を汎用の `serde_json::Value` として保持する。
//! 下流エンジン固有の未知フィールドはそのまま通過させ、
//! `spec.ioConfig.inputSource` だけを差し替える。

use ingest_types::{HttpInputSource, ACCEPTED_TASK_TYPES};
use serde_json::{Map, Value};

use crate::error::{BadRequestKind, GatewayError};

/// 検証済みのタスク記述。
///
/// `type` が受け付け可能な種別であり、`spec` と `spec.ioConfig` が
/// オブジェクトであることが保証されている。
#[derive(Debug, Clone)]
pub struct TaskDocument(Value);

impl TaskDocument {
    /// JSONバイト列をパースし、最低限の形を検証する。
    pub fn parse(bytes: &[u8]) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            GatewayError::bad_request(
                BadRequestKind::TaskSpecInvalid,
                format!("タスク記述のJSONパースに失敗: {e}"),
            )
        })?;
        Self::from_value(value)
    }

    /// パース済みのJSON値を検証する。
    pub fn from_value(value: Value) -> Result<Self, GatewayError> {
        let task_type = value.get("type").and_then(Value::as_str);
        if !task_type.is_some_and(|t| ACCEPTED_TASK_TYPES.contains(&t)) {
            return Err(GatewayError::bad_request(
                BadRequestKind::TaskSpecInvalid,
                format!("未対応のタスク種別: {:?}", value.get("type")),
            ));
        }

        let mut document = Self(value);
        document.io_config_mut()?;
        Ok(document)
    }

    /// `type` フィールドの値。
    pub fn task_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    /// `spec.ioConfig` への可変参照。形が崩れている場合は型付きのエラーを返す。
    fn io_config_mut(&mut self) -> Result<&mut Map<String, Value>, GatewayError> {
        let spec = self
            .0
            .get_mut("spec")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                GatewayError::bad_request(
                    BadRequestKind::TaskSpecInvalid,
                    "spec がオブジェクトではありません",
                )
            })?;

        spec.get_mut("ioConfig")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                GatewayError::bad_request(
                    BadRequestKind::TaskSpecInvalid,
                    "spec.ioConfig がオブジェクトではありません",
                )
            })
    }

    /// `spec.ioConfig.inputSource` をHTTP入力ソースで置き換える。
    pub fn set_input_source(&mut self, source: HttpInputSource) -> Result<(), GatewayError> {
        let source = serde_json::to_value(source)
            .map_err(|e| GatewayError::Internal(format!("inputSourceのシリアライズに失敗: {e}")))?;
        self.io_config_mut()?.insert("inputSource".to_string(), source);
        Ok(())
    }

    /// 下流エンジンに送るJSONバイト列。
    pub fn to_vec(&self) -> Result<Vec<u8>, GatewayError> {
        serde_json::to_vec(&self.0)
            .map_err(|e| GatewayError::Internal(format!("タスク記述のシリアライズに失敗: {e}")))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}
