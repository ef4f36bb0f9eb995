#![allow(dead_code)]

use anomaly_gateway::{
    auth::codec,
    config::Config,
    queue::memory::InMemoryPublisher,
};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

pub const CLIENT_ID: &str = "A";
pub const CLIENT_SECRET: &str = "B";

const RECORD_SEPARATOR: char = '\u{1e}';

pub type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub address: String,
    pub config: Config,
    pub publisher: Arc<InMemoryPublisher>,
    pub client: reqwest::Client,
}

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("AUTH_TOKEN_KEY", "integration_test_signing_key_0123456789"),
        ("AUTH_TOKEN_ISSUER", "anomaly-gateway-test"),
        ("AUTH_TOKEN_AUDIENCE", "anomaly-clients-test"),
        ("AUTH_TOKEN_EXPIRES_IN_MINUTES", "5"),
        ("AUTH_CLIENT_ID", CLIENT_ID),
        ("AUTH_CLIENT_SECRET", CLIENT_SECRET),
        ("QUEUE_BACKEND", "memory"),
        ("QUEUE_DATA_NAME", "data"),
        ("QUEUE_FEEDBACK_NAME", "feedback"),
        ("RUST_LOG", "warn"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }

    Config::from_map(&vars).expect("Failed to build test config")
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(&[]).await
}

pub async fn spawn_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let config = test_config(overrides);
    anomaly_gateway::init_tracing(&config.rust_log);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = format!("127.0.0.1:{}", port);

    let publisher = Arc::new(InMemoryPublisher::new(config.queue.max_batch_bytes));
    let app = anomaly_gateway::build_app(config.clone(), publisher.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        config,
        publisher,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub async fn get_token(&self, client_id: &str, client_secret: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/getToken"))
            .json(&serde_json::json!({ "clientId": client_id, "clientSecret": client_secret }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Token for the trusted client
    pub async fn token(&self) -> String {
        let response = self.get_token(CLIENT_ID, CLIENT_SECRET).await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    /// Correctly signed token whose lifetime ended an hour ago
    pub fn expired_token(&self) -> String {
        let issued = Utc::now() - ChronoDuration::hours(2);
        codec::issue_at(CLIENT_ID, &self.config.signing, issued, Uuid::new_v4())
            .unwrap()
            .into_token()
    }

    pub async fn post_json(&self, path: &str, token: Option<&str>, body: &Value) -> reqwest::Response {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub fn hub_url(&self, token: &str) -> String {
        format!(
            "ws://{}{}?access_token={}",
            self.address,
            self.config.hub.route(),
            token
        )
    }

    /// Open a hub connection and complete the protocol handshake
    pub async fn connect_hub(&self, token: &str) -> Result<HubSocket> {
        let (mut ws, _) = connect_async(self.hub_url(token)).await?;
        ws.send(WsMessage::Text(format!(
            "{{\"protocol\":\"json\",\"version\":1}}{}",
            RECORD_SEPARATOR
        )))
        .await?;

        match next_record(&mut ws, Duration::from_secs(5)).await? {
            HubEvent::Record(reply) => {
                anyhow::ensure!(reply == serde_json::json!({}), "unexpected handshake reply: {}", reply);
                Ok(ws)
            }
            other => anyhow::bail!("no handshake reply: {:?}", other),
        }
    }
}

/// What the hub did within a wait
#[derive(Debug)]
pub enum HubEvent {
    Record(Value),
    Closed,
    Silent,
}

/// Next JSON record from the hub, skipping pings
pub async fn next_record(ws: &mut HubSocket, wait: Duration) -> Result<HubEvent> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(msg))) => msg,
            // A reset after close is as good as a close
            Ok(Some(Err(_))) | Ok(None) => return Ok(HubEvent::Closed),
            Err(_) => return Ok(HubEvent::Silent),
        };

        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Ok(HubEvent::Closed),
            _ => continue,
        };

        for record in text.split(RECORD_SEPARATOR).filter(|r| !r.is_empty()) {
            let value: Value = serde_json::from_str(record)?;
            if value["type"] == 6 {
                continue;
            }
            return Ok(HubEvent::Record(value));
        }
    }
}

/// Next JSON record from the hub; panics if the hub closes or stays silent
pub async fn expect_record(ws: &mut HubSocket, wait: Duration) -> Value {
    match next_record(ws, wait).await.expect("Invalid hub record") {
        HubEvent::Record(value) => value,
        other => panic!("expected a hub record, got {:?}", other),
    }
}
