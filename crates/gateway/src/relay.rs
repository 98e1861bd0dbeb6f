//! # 下流エンジンへの中継
//!
//! 書き換え済みのタスク記述を下流エンジンに転送し、
//! 下流のレスポンス（ステータス・ヘッダー・本文）を呼び出し元へそのまま返す。

use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::HeaderMap;
use axum::response::Response;
use reqwest::Url;

use crate::error::GatewayError;

/// 中継しないホップ単位のヘッダー（小文字）。
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// タスク記述を下流エンジンにPOSTする。
///
/// 接続失敗などでレスポンスが得られなかった場合のみエラーを返す。
/// 200以外のステータスも `Ok` で返し、判定は呼び出し側が行う。
pub(crate) async fn forward_task(
    client: &reqwest::Client,
    endpoint: &Url,
    document: Vec<u8>,
) -> Result<reqwest::Response, GatewayError> {
    client
        .post(endpoint.clone())
        .header(header::CONTENT_TYPE, "application/json")
        .body(document)
        .send()
        .await
        .map_err(|e| GatewayError::Downstream(format!("HTTP送信失敗 ({endpoint}): {e}")))
}

/// 下流のレスポンスを呼び出し元向けのレスポンスに変換する。本文はストリームのまま流す。
pub(crate) fn relay_response(downstream: reqwest::Response) -> Response {
    let status = downstream.status();
    let mut headers = HeaderMap::with_capacity(downstream.headers().len());
    for (name, value) in downstream.headers() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let mut response = Response::new(Body::from_stream(downstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
