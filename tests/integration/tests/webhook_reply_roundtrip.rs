use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hat_cli::{build_server_state, Cli};
use hat_gateway::serve_webhook;
use httpmock::prelude::*;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningBridge {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl RunningBridge {
    async fn start(cli: &Cli) -> Result<Self> {
        let state = build_server_state(cli)?;
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind ephemeral listener")?;
        let addr = listener.local_addr().context("resolve listener addr")?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve_webhook(listener, state, async move {
            let _ = shutdown_rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    async fn deliver(&self, fields: &[(&str, &str)]) -> Result<Value> {
        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/check", self.addr))
            .form(fields)
            .send()
            .await
            .context("deliver event")?;
        anyhow::ensure!(response.status().is_success(), "status {}", response.status());
        response.json::<Value>().await.context("decode ack")
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.handle.await.context("join bridge")?
    }
}

fn write_prompt(root: &Path) -> PathBuf {
    let path = root.join("prompt.txt");
    std::fs::write(&path, "你是MBTI分院帽，用温暖的语气回答。").expect("write prompt");
    path
}

fn bridge_cli(server: &MockServer, root: &Path) -> Cli {
    let prompt = write_prompt(root);
    let kv_path = root.join("kv").join("state.redb");
    Cli::try_parse_from([
        "sorting-hat".to_string(),
        "--weibo-token=shared".to_string(),
        "--app-key=app-key".to_string(),
        "--app-secret=app-secret".to_string(),
        "--dev-uid=dev-uid".to_string(),
        format!("--weibo-api-base={}", server.base_url()),
        format!("--llm-api-base={}", server.base_url()),
        "--api-key=sk-test".to_string(),
        "--llm-max-retries=0".to_string(),
        "--dispatch-retry-delay-ms=1".to_string(),
        "--kv-backend=redb".to_string(),
        format!("--kv-path={}", kv_path.display()),
        format!("--system-prompt-file={}", prompt.display()),
    ])
    .expect("parse cli")
}

fn mock_authorize(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/oauth2/vp/authorize")
            .query_param("client_id", "app-key")
            .query_param("nonce", "eqiojronqnr");
        then.status(200).json_body(json!({"access_token": "tok-1"}));
    })
}

fn mock_llm<'a>(server: &'a MockServer, reply: &str) -> httpmock::Mock<'a> {
    let reply = reply.to_string();
    server.mock(move |when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer sk-test")
            .json_body_includes(r#"{"model": "deepseek-chat", "max_tokens": 4096}"#);
        then.status(200).json_body(json!({
            "choices": [{"message": {"role": "assistant", "content": reply.as_str()}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        }));
    })
}

#[tokio::test]
async fn integration_comment_event_is_answered_with_refreshed_token() {
    let server = MockServer::start();
    let root = tempfile::tempdir().expect("tempdir");
    let authorize = mock_authorize(&server);
    let llm = mock_llm(&server, "你好。\n\n欢迎来到分院帽。");
    let reply = server.mock(|when, then| {
        when.method(POST)
            .path("/2/comments/reply.json")
            .body_includes("access_token=tok-1")
            .body_includes("cid=5031749849974222")
            .body_includes("id=5031749803574665")
            .body_includes("rip=127.0.0.1");
        then.status(200).json_body(json!({"id": 1}));
    });

    let bridge = RunningBridge::start(&bridge_cli(&server, root.path()))
        .await
        .expect("start bridge");
    let body = json!({
        "id": 5031749849974222_u64,
        "text": "我是什么人格？",
        "user": {"id": 42, "screen_name": "bob"},
        "status": {"id": "5031749803574665", "text": "测一测"},
    })
    .to_string();
    let ack = bridge
        .deliver(&[
            ("event", "add"),
            ("content_type", "comment"),
            ("content_body", body.as_str()),
        ])
        .await
        .expect("deliver");
    assert_eq!(ack, json!({"result": true, "pull_later": false, "message": ""}));
    bridge.stop().await.expect("stop");

    authorize.assert_calls(1);
    llm.assert_calls(1);
    reply.assert_calls(1);
}

#[tokio::test]
async fn integration_redelivery_after_restart_is_suppressed() {
    let server = MockServer::start();
    let root = tempfile::tempdir().expect("tempdir");
    let authorize = mock_authorize(&server);
    let llm = mock_llm(&server, "你是INFJ。");
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/2/comments/create.json")
            .body_includes("id=777");
        then.status(200).json_body(json!({"id": 1}));
    });
    let body = json!({
        "id": 777,
        "text": "@MBTI分院帽之电子聊愈版 帮我分个院",
        "user": {"id": 1, "screen_name": "alice"},
    })
    .to_string();
    let fields = [
        ("event", "add"),
        ("content_type", "status"),
        ("content_body", body.as_str()),
    ];

    let first = RunningBridge::start(&bridge_cli(&server, root.path()))
        .await
        .expect("start first");
    first.deliver(&fields).await.expect("first delivery");
    first.stop().await.expect("stop first");
    create.assert_calls(1);

    let restarted = RunningBridge::start(&bridge_cli(&server, root.path()))
        .await
        .expect("start restarted");
    restarted.deliver(&fields).await.expect("redelivery");
    restarted.stop().await.expect("stop restarted");

    create.assert_calls(1);
    llm.assert_calls(1);
    authorize.assert_calls(1);
}
