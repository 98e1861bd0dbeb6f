//! # HTTPサーバー
//!
//! ルーターの組み立てと、設定に従った1つまたは2つのリスナーでの待ち受け。
//!
//! ## ルート
//! - `POST {tasks}/task`: タスク投入
//! - `DELETE {tasks}/task/{batch}`: バッチ削除
//! - `GET {files}/file/{batch}/{name...}`: ファイル取得
//! - `{tasks}/health`、`{files}/health`: メソッドを問わず200

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, delete, get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::{
    GatewayConfig, Listener, RetrieverState, SubmitterState, Topology, RETRIEVER_ENDPOINT,
    SUBMITTER_ENDPOINT,
};
use crate::endpoints::{
    file_method_not_allowed, handle_cleanup, handle_fetch, handle_health, handle_submit,
    route_not_found, task_method_not_allowed,
};
use crate::storage::StagingStore;

/// シャットダウン通知から接続を強制終了するまでの猶予
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn submit_routes(state: Arc<SubmitterState>, context_path: &str) -> Router {
    Router::new()
        .route(
            &format!("{context_path}{SUBMITTER_ENDPOINT}"),
            post(handle_submit).fallback(task_method_not_allowed),
        )
        .route(
            &format!("{context_path}{SUBMITTER_ENDPOINT}/{{*batch}}"),
            delete(handle_cleanup).fallback(task_method_not_allowed),
        )
        .route(&format!("{context_path}/health"), any(handle_health))
        // アップロードはディスクにストリームするため上限を設けない
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

fn fetch_routes(state: Arc<RetrieverState>, context_path: &str) -> Router {
    Router::new()
        .route(
            &format!("{context_path}{RETRIEVER_ENDPOINT}/{{*path}}"),
            get(handle_fetch).fallback(file_method_not_allowed),
        )
        .route(&format!("{context_path}/health"), any(handle_health))
        .with_state(state)
}

/// 投入APIのみのルーター。
pub fn build_submit_router(state: Arc<SubmitterState>, context_path: &str) -> Router {
    submit_routes(state, context_path).fallback(route_not_found)
}

/// 取得APIのみのルーター。
pub fn build_fetch_router(state: Arc<RetrieverState>, context_path: &str) -> Router {
    fetch_routes(state, context_path).fallback(route_not_found)
}

/// 1つのリスナーで両APIを提供するルーター。
///
/// コンテキストパスは互いの接頭辞でないことを設定の検証で保証している。
pub fn build_combined_router(
    submitter: Arc<SubmitterState>,
    tasks_context_path: &str,
    retriever: Arc<RetrieverState>,
    files_context_path: &str,
) -> Router {
    submit_routes(submitter, tasks_context_path)
        .merge(fetch_routes(retriever, files_context_path))
        .fallback(route_not_found)
}

/// 1つのリスナーでルーターを提供する。`shutdown` でグレースフルに停止する。
pub async fn serve(
    listener: Listener,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
        }
    });

    match listener.tls {
        Some(tls) => {
            let config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| anyhow::anyhow!("TLS証明書の読み込みに失敗 ({}): {e}", tls.cert.display()))?;
            tracing::info!(addr = %listener.addr, "HTTPSで待ち受けを開始");
            axum_server::bind_rustls(listener.addr, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::info!(addr = %listener.addr, "HTTPで待ち受けを開始");
            axum_server::bind(listener.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!(addr = %listener.addr, "待ち受けを終了");
    Ok(())
}

/// 設定に従って全リスナーを起動し、いずれかが終了するまで待つ。
///
/// 1つでもリスナーが終了（またはエラー）した時点で `shutdown` を通知し、
/// 残りのリスナーの停止を待ってから最初のエラーを返す。
pub async fn run(
    config: &GatewayConfig,
    store: Arc<dyn StagingStore>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let submitter = Arc::new(SubmitterState {
        store: store.clone(),
        http_client: reqwest::Client::new(),
        indexer_endpoint: config.indexer_endpoint.clone(),
        fetch_url_base: config.fetch_url_base.clone(),
    });
    let retriever = Arc::new(RetrieverState { store });

    tracing::info!(
        fetch_url_base = %config.fetch_url_base,
        indexer_endpoint = %config.indexer_endpoint,
        "Gatewayを起動します"
    );

    let mut servers = tokio::task::JoinSet::new();
    match &config.topology {
        Topology::Shared(listener) => {
            let app = build_combined_router(
                submitter,
                &config.tasks_context_path,
                retriever,
                &config.files_context_path,
            );
            servers.spawn(serve(listener.clone(), app, shutdown.clone()));
        }
        Topology::Split { tasks, files } => {
            let tasks_app = build_submit_router(submitter, &config.tasks_context_path);
            let files_app = build_fetch_router(retriever, &config.files_context_path);
            servers.spawn(serve(tasks.clone(), tasks_app, shutdown.clone()));
            servers.spawn(serve(files.clone(), files_app, shutdown.clone()));
        }
    }

    let mut result = Ok(());
    while let Some(joined) = servers.join_next().await {
        shutdown.cancel();
        let outcome = joined.map_err(anyhow::Error::from).and_then(|served| served);
        if let Err(e) = outcome {
            tracing::error!(error = %e, "リスナーが異常終了");
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStagingStore;
    use axum::http::StatusCode;
    use axum::Json;
    use ingest_types::*;
    use reqwest::multipart::{Form, Part};
    use reqwest::Url;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    /// モック下流エンジンが受け取ったタスク記述
    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    /// テスト用Gatewayの一式
    struct TestGateway {
        _dir: tempfile::TempDir,
        store: Arc<FsStagingStore>,
        base: String,
        client: reqwest::Client,
    }

    impl TestGateway {
        fn task_url(&self) -> String {
            format!("{}/tasks/task", self.base)
        }

        fn file_url(&self, path: &str) -> String {
            format!("{}/files/file/{path}", self.base)
        }

        async fn batch_count(&self) -> usize {
            self.store.list_batches().await.unwrap().len()
        }

        async fn submit(&self, form: Form) -> reqwest::Response {
            self.client
                .post(self.task_url())
                .multipart(form)
                .send()
                .await
                .unwrap()
        }
    }

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// 受け取ったタスク記述を記録し、指定のステータスで応答するモック下流エンジンを起動する。
    async fn spawn_mock_indexer(status: StatusCode) -> (Url, Received) {
        let received: Received = Arc::default();
        let app = Router::new().route(
            "/druid/indexer/v1/task",
            post({
                let received = received.clone();
                move |Json(body): Json<serde_json::Value>| async move {
                    received.lock().unwrap().push(body);
                    (
                        status,
                        [("x-druid-task-id", "task-1")],
                        Json(serde_json::json!({"task": "task-1"})),
                    )
                }
            }),
        );
        let addr = spawn(app).await;
        let url = Url::parse(&format!("http://{addr}/druid/indexer/v1/task")).unwrap();
        (url, received)
    }

    /// 共有リスナー構成のGatewayを起動する。
    async fn spawn_gateway(indexer_endpoint: Url) -> TestGateway {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStagingStore::new(dir.path().join("staging")));
        store.init().await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");

        let submitter = Arc::new(SubmitterState {
            store: store.clone(),
            http_client: reqwest::Client::new(),
            indexer_endpoint,
            fetch_url_base: Url::parse(&format!("{base}/files/file/")).unwrap(),
        });
        let retriever = Arc::new(RetrieverState {
            store: store.clone(),
        });
        let app = build_combined_router(submitter, "/tasks", retriever, "/files");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestGateway {
            _dir: dir,
            store,
            base,
            client: reqwest::Client::new(),
        }
    }

    fn spec_part(value: serde_json::Value) -> Part {
        Part::text(value.to_string()).file_name("spec.json")
    }

    fn file_part(name: &str, content: &'static [u8]) -> Part {
        Part::bytes(content).file_name(name.to_string())
    }

    fn index_spec() -> serde_json::Value {
        serde_json::json!({
            "type": "index_parallel",
            "spec": {
                "dataSchema": {"dataSource": "events"},
                "ioConfig": {"type": "index_parallel", "inputFormat": {"type": "json"}}
            }
        })
    }

    async fn error_of(response: reqwest::Response) -> (StatusCode, String) {
        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap();
        (status, body.error)
    }

    fn uris_of(task: &serde_json::Value) -> Vec<String> {
        task["spec"]["ioConfig"]["inputSource"]["uris"]
            .as_array()
            .unwrap()
            .iter()
            .map(|uri| uri.as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_submit_stages_files_and_forwards_rewritten_task() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .part("f1", file_part("a.json", b"{\"x\":1}"))
            .part("f2", file_part("b.json", b"{\"x\":2}"));
        let response = gw.submit(form).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-druid-task-id"], "task-1");
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"task": "task-1"}));

        let tasks = received.lock().unwrap().clone();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task["spec"]["ioConfig"]["inputSource"]["type"], "http");
        assert_eq!(task["spec"]["dataSchema"]["dataSource"], "events");
        assert_eq!(task["spec"]["ioConfig"]["inputFormat"]["type"], "json");

        // 投入順に並び、全て同じバッチを指す
        let uris = uris_of(task);
        assert_eq!(uris.len(), 2);
        assert!(uris[0].ends_with("/a.json"));
        assert!(uris[1].ends_with("/b.json"));
        let batch_of = |uri: &str| {
            uri.strip_prefix(&gw.file_url("")).unwrap().split('/').next().unwrap().to_string()
        };
        assert_eq!(batch_of(&uris[0]), batch_of(&uris[1]));

        // 取得URLから投入時と同一のバイト列が得られる
        for (uri, expected) in uris.iter().zip([&b"{\"x\":1}"[..], &b"{\"x\":2}"[..]]) {
            let response = gw.client.get(uri).send().await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["content-type"], "application/octet-stream");
            assert_eq!(&response.bytes().await.unwrap()[..], expected);
        }
        assert_eq!(gw.batch_count().await, 1);
    }

    #[tokio::test]
    async fn test_minimal_index_task_round_trip() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part(
                "spec",
                spec_part(serde_json::json!({"type": "index", "spec": {"ioConfig": {}}})),
            )
            .part("data", file_part("data.json", b"{\"a\":1}"));
        let response = gw.submit(form).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({"task": "task-1"})
        );

        let uri = uris_of(&received.lock().unwrap()[0])[0].clone();
        let batch = gw.store.list_batches().await.unwrap().remove(0).id;
        assert_eq!(uri, gw.file_url(&format!("{batch}/data.json")));

        let response = gw.client.get(&uri).send().await.unwrap();
        assert_eq!(&response.bytes().await.unwrap()[..], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_submit_without_files_forwards_empty_uris() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let response = gw
            .submit(Form::new().part("spec", spec_part(index_spec())))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let tasks = received.lock().unwrap().clone();
        assert!(uris_of(&tasks[0]).is_empty());
    }

    #[tokio::test]
    async fn test_nested_file_names_are_fetchable() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .part("f", file_part("./2024/01/my events.json", b"nested"))
            .percent_encode_noop();
        assert_eq!(gw.submit(form).await.status(), StatusCode::OK);

        let uri = uris_of(&received.lock().unwrap()[0])[0].clone();
        assert!(uri.ends_with("/2024/01/my%20events.json"), "{uri}");
        let response = gw.client.get(&uri).send().await.unwrap();
        assert_eq!(&response.bytes().await.unwrap()[..], b"nested");
    }

    #[tokio::test]
    async fn test_downstream_rejection_rolls_back_and_relays_status() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::BAD_REQUEST).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .part("f", file_part("a.json", b"{}"));
        let response = gw.submit(form).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"task": "task-1"}));

        // 応答時点でバッチは削除済み
        assert_eq!(gw.batch_count().await, 0);
        let uri = uris_of(&received.lock().unwrap()[0])[0].clone();
        assert_eq!(gw.client.get(&uri).send().await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_200_success_status_also_rolls_back() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::ACCEPTED).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .part("f", file_part("a.json", b"{}"));
        assert_eq!(gw.submit(form).await.status(), StatusCode::ACCEPTED);
        assert_eq!(gw.batch_count().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_downstream_rolls_back_with_internal_error() {
        // 一度bindしてすぐ閉じたポート
        let closed = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let gw = spawn_gateway(Url::parse(&format!("http://{closed}/task")).unwrap()).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .part("f", file_part("a.json", b"{}"));
        let (status, message) = error_of(gw.submit(form).await).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, INTERNAL_ERROR_MSG);
        assert_eq!(gw.batch_count().await, 0);
    }

    #[tokio::test]
    async fn test_traversal_file_name_is_rejected_without_writes() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        for bad in ["../x", "/etc/passwd", "a/../../b"] {
            let form = Form::new()
                .part("spec", spec_part(index_spec()))
                .part("ok", file_part("fine.json", b"{}"))
                .part("bad", file_part(bad, b"pwned"))
                .percent_encode_noop();
            let (status, message) = error_of(gw.submit(form).await).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
            assert_eq!(message, MALICIOUS_PATH_MSG);
        }

        // 先に書き込んだファイルもロールバックされ、ルート外には何も作られない
        assert_eq!(gw.batch_count().await, 0);
        assert!(!gw.store.root().join("x").exists());
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_part_without_file_name_is_rejected() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .text("unnamed", "value");
        let (status, message) = error_of(gw.submit(form).await).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, MALICIOUS_PATH_MSG);
        assert_eq!(gw.batch_count().await, 0);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_task_specs_are_rejected() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let cases = [
            serde_json::json!({"type": "kill", "spec": {"ioConfig": {}}}),
            serde_json::json!({"type": "index"}),
            serde_json::json!({"type": "index", "spec": {"ioConfig": "local"}}),
        ];
        for spec in cases {
            let form = Form::new()
                .part("spec", spec_part(spec.clone()))
                .part("f", file_part("a.json", b"{}"));
            let (status, message) = error_of(gw.submit(form).await).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{spec}");
            assert_eq!(message, BAD_INDEX_TASK_SPEC_MSG);
        }

        let form = Form::new().part("spec", Part::text("{not json"));
        let (status, message) = error_of(gw.submit(form).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, BAD_INDEX_TASK_SPEC_MSG);

        assert_eq!(gw.batch_count().await, 0);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_multipart_submission_is_rejected() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let response = gw
            .client
            .post(gw.task_url())
            .json(&index_spec())
            .send()
            .await
            .unwrap();
        let (status, message) = error_of(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, BAD_INDEX_TASK_MSG);

        let (status, message) = error_of(gw.submit(Form::new()).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, BAD_INDEX_TASK_MSG);
    }

    #[tokio::test]
    async fn test_truncated_file_part_is_a_bad_request() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        // ファイルパートの途中で終端境界が無いまま本文が終わる
        let body = format!(
            "--XBOUND\r\n\
             Content-Disposition: form-data; name=\"spec\"\r\n\r\n\
             {}\r\n\
             --XBOUND\r\n\
             Content-Disposition: form-data; name=\"f\"; filename=\"a.json\"\r\n\r\n\
             {{\"a\":1}}",
            index_spec()
        );
        let response = gw
            .client
            .post(gw.task_url())
            .header("content-type", "multipart/form-data; boundary=XBOUND")
            .body(body)
            .send()
            .await
            .unwrap();

        assert_eq!(
            error_of(response).await,
            (StatusCode::BAD_REQUEST, BAD_INDEX_TASK_MSG.to_string())
        );
        assert_eq!(gw.batch_count().await, 0);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_then_fetch_is_not_found() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let form = Form::new()
            .part("spec", spec_part(index_spec()))
            .part("f", file_part("a.json", b"{}"));
        assert_eq!(gw.submit(form).await.status(), StatusCode::OK);

        let uri = uris_of(&received.lock().unwrap()[0])[0].clone();
        let batch = uri
            .strip_prefix(&gw.file_url(""))
            .unwrap()
            .split('/')
            .next()
            .unwrap()
            .to_string();

        let response = gw
            .client
            .delete(format!("{}/{batch}", gw.task_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(gw.batch_count().await, 0);

        let (status, message) = error_of(gw.client.get(&uri).send().await.unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message, BAD_FILE_MSG);

        // 2回目の削除は存在しないバッチとして404
        let response = gw
            .client
            .delete(format!("{}/{batch}", gw.task_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(error_of(response).await, (StatusCode::NOT_FOUND, BAD_FILE_MSG.to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_rejects_invalid_batch_ids() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        for batch in ["..", "a%2Fb", "a/b"] {
            let response = gw
                .client
                .delete(format!("{}/{batch}", gw.task_url()))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{batch}");
        }
        assert!(gw.store.root().exists());
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_and_unknown_paths() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let id = BatchId::generate();
        let mut content: &[u8] = b"secret";
        gw.store
            .put(&id, &ItemName::parse("a.json").unwrap(), &mut content)
            .await
            .unwrap();

        for path in [
            "nobatch".to_string(),
            format!("{id}"),
            format!("{id}/"),
            format!("{id}/missing.json"),
            format!("{}/a.json", BatchId::generate()),
            format!("{id}/..%2F..%2Fetc%2Fpasswd"),
            format!("..%2F{id}/a.json"),
        ] {
            let (status, message) =
                error_of(gw.client.get(gw.file_url(&path)).send().await.unwrap()).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
            assert_eq!(message, BAD_FILE_MSG);
        }

        let response = gw.client.get(gw.file_url(&format!("{id}/a.json"))).send().await.unwrap();
        assert_eq!(&response.bytes().await.unwrap()[..], b"secret");
    }

    #[tokio::test]
    async fn test_disallowed_methods_return_405_with_fixed_message() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let response = gw.client.get(gw.task_url()).send().await.unwrap();
        assert_eq!(
            error_of(response).await,
            (StatusCode::METHOD_NOT_ALLOWED, BAD_INDEX_TASK_METHOD_MSG.to_string())
        );

        let response = gw
            .client
            .put(format!("{}/some-batch", gw.task_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(response).await,
            (StatusCode::METHOD_NOT_ALLOWED, BAD_INDEX_TASK_METHOD_MSG.to_string())
        );

        let response = gw.client.post(gw.file_url("b/a.json")).send().await.unwrap();
        assert_eq!(
            error_of(response).await,
            (StatusCode::METHOD_NOT_ALLOWED, BAD_FETCH_METHOD_MSG.to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_paths_and_health() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = spawn_gateway(indexer).await;

        let response = gw.client.get(format!("{}/nowhere", gw.base)).send().await.unwrap();
        assert_eq!(
            error_of(response).await,
            (StatusCode::NOT_FOUND, BAD_FILE_MSG.to_string())
        );

        for path in ["/tasks/health", "/files/health"] {
            let response = gw.client.get(format!("{}{path}", gw.base)).send().await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }

        // 監視側のメソッドに依存しない
        for path in ["/tasks/health", "/files/health"] {
            let url = format!("{}{path}", gw.base);
            assert_eq!(gw.client.post(&url).send().await.unwrap().status(), StatusCode::OK);
            assert_eq!(gw.client.delete(&url).send().await.unwrap().status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_split_routers_serve_only_their_api() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStagingStore::new(dir.path().join("staging")));
        store.init().await.unwrap();

        let submitter = Arc::new(SubmitterState {
            store: store.clone(),
            http_client: reqwest::Client::new(),
            indexer_endpoint: Url::parse("http://127.0.0.1:1/task").unwrap(),
            fetch_url_base: Url::parse("http://127.0.0.1:2/file/").unwrap(),
        });
        let retriever = Arc::new(RetrieverState {
            store: store.clone(),
        });
        let tasks = spawn(build_submit_router(submitter, "")).await;
        let files = spawn(build_fetch_router(retriever, "")).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("http://{tasks}/file/b/a.json")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = client.delete(format!("http://{files}/task/b")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = client.delete(format!("http://{tasks}/task/b")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_batches() {
        let (indexer, received) = spawn_mock_indexer(StatusCode::OK).await;
        let gw = Arc::new(spawn_gateway(indexer).await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let gw = gw.clone();
            handles.push(tokio::spawn(async move {
                let form = Form::new()
                    .part("spec", spec_part(index_spec()))
                    .part("f", Part::text(format!("{{\"n\":{i}}}")).file_name("data.json"));
                gw.submit(form).await.status()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), StatusCode::OK);
        }

        assert_eq!(gw.batch_count().await, 8);
        let mut uris: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .flat_map(uris_of)
            .collect();
        uris.sort();
        uris.dedup();
        assert_eq!(uris.len(), 8);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (indexer, _received) = spawn_mock_indexer(StatusCode::OK).await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStagingStore::new(dir.path().join("staging")));
        store.init().await.unwrap();

        let submitter = Arc::new(SubmitterState {
            store: store.clone(),
            http_client: reqwest::Client::new(),
            indexer_endpoint: indexer,
            fetch_url_base: Url::parse("http://127.0.0.1/file/").unwrap(),
        });
        let listener = Listener {
            addr: "127.0.0.1:0".parse().unwrap(),
            tls: None,
        };
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            build_submit_router(submitter, ""),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(15), server)
            .await
            .expect("サーバーが停止しない")
            .unwrap()
            .unwrap();
    }
}
