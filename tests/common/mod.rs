#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use sqlx::{Executor, PgPool};

use collab_api_rust::auth::{generate_jwt, AccountRole, Claims};
use collab_api_rust::config::CONFIG;
use collab_api_rust::database::DatabaseManager;
use collab_api_rust::{app, AppState};

/// One server per test, over its own `test_<uuid>` schema.
pub struct TestApp {
    pub base_url: String,
    pub pool: PgPool,
    pub client: reqwest::Client,
    schema: String,
}

/// `None` when DATABASE_URL is not configured; the calling test should return early.
pub async fn spawn_app() -> Result<Option<TestApp>> {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt().with_env_filter("warn").with_test_writer().try_init();

    let Some(url) = CONFIG.database.url.clone() else {
        eprintln!("DATABASE_URL not set; skipping database test");
        return Ok(None);
    };

    let schema = format!("test_{}", uuid::Uuid::new_v4().simple());
    let admin = DatabaseManager::connect_with(&url).await?;
    admin.execute(format!("CREATE SCHEMA \"{}\"", schema).as_str()).await?;
    admin.close().await;

    let search_path = format!("SET search_path TO \"{}\", public", schema);
    let pool = DatabaseManager::pool_options()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                conn.execute(search_path.as_str()).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await?;
    pool.execute(include_str!("schema.sql")).await.context("failed to create test tables")?;

    let state = AppState::new(pool.clone())?;
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app(state)).await;
    });

    let test_app = TestApp { base_url: format!("http://127.0.0.1:{}", port), pool, client: reqwest::Client::new(), schema };
    test_app.wait_ready(Duration::from_secs(10)).await?;
    Ok(Some(test_app))
}

impl TestApp {
    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn token(&self, username: &str) -> String {
        generate_jwt(&Claims::new(username, AccountRole::User, chrono::Duration::hours(1))).expect("token")
    }

    pub fn admin_token(&self, username: &str) -> String {
        generate_jwt(&Claims::new(username, AccountRole::Admin, chrono::Duration::hours(1))).expect("token")
    }

    pub fn get(&self, username: &str, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(self.token(username))
    }

    pub fn post(&self, username: &str, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(self.token(username))
    }

    pub fn patch(&self, username: &str, path: &str) -> RequestBuilder {
        self.client.patch(self.url(path)).bearer_auth(self.token(username))
    }

    pub fn delete(&self, username: &str, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(self.token(username))
    }

    /// Create a profile through the API and return its body.
    pub async fn profile(&self, username: &str, body: Value) -> Result<Value> {
        let resp = self.post(username, "/profiles").json(&body).send().await?;
        expect_status(resp, StatusCode::CREATED).await
    }

    /// Create a project owned by `owner` and return its id.
    pub async fn project(&self, owner: &str, name: &str) -> Result<String> {
        let resp = self.post(owner, "/projects").json(&serde_json::json!({ "name": name })).send().await?;
        let body = expect_status(resp, StatusCode::CREATED).await?;
        body["data"]["id"].as_str().map(str::to_string).context("project id missing")
    }

    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;
        if let Some(url) = CONFIG.database.url.as_deref() {
            let admin = DatabaseManager::connect_with(url).await?;
            admin.execute(format!("DROP SCHEMA \"{}\" CASCADE", self.schema).as_str()).await?;
            admin.close().await;
        }
        Ok(())
    }
}

/// Assert the status and hand back the JSON body (if any).
pub async fn expect_status(resp: reqwest::Response, status: StatusCode) -> Result<Value> {
    let actual = resp.status();
    let text = resp.text().await?;
    anyhow::ensure!(actual == status, "expected {}, got {}: {}", status, actual, text);
    if text.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}
