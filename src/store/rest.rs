//! REST counting store client.
//!
//! Speaks the Upstash-style single-command protocol: each request POSTs one
//! command array (`["INCRBY", key, amount]`) to the base URL with a bearer
//! token and reads back `{"result": ...}` or `{"error": "..."}`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{CountingStore, WindowCount};
use crate::error::{MaestroError, Result};

/// Counting store backed by a remote REST key-value service.
#[derive(Debug, Clone)]
pub struct RestCountingStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RestCountingStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Execute one command and return its raw result value.
    async fn command(&self, cmd: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&cmd)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MaestroError::Store(format!(
                "counting store returned {status}"
            )));
        }

        let reply: RestReply = response.json().await?;
        if let Some(error) = reply.error {
            return Err(MaestroError::Store(error));
        }
        Ok(reply.result)
    }

    /// Execute one command expecting an integer reply (absent key counts as 0).
    async fn int_command(&self, cmd: Value) -> Result<i64> {
        let result = self.command(cmd).await?;
        match &result {
            Value::Null => Ok(0),
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                MaestroError::Store(format!("non-integer counter reply: {result}"))
            }),
            // Some deployments reply with stringified integers.
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| MaestroError::Store(format!("non-integer counter reply: {result}"))),
            _ => Err(MaestroError::Store(format!(
                "unexpected counter reply: {result}"
            ))),
        }
    }
}

#[async_trait]
impl CountingStore for RestCountingStore {
    async fn incr_window(&self, key: &str, amount: u64, window_secs: u64) -> Result<WindowCount> {
        let count = self
            .int_command(json!(["INCRBY", key, amount.to_string()]))
            .await?;
        // First increment of the window arms the expiry. Arming is a
        // separate command: a crash between the two leaves the key without
        // a TTL, and that counter stops resetting until deleted by hand.
        // Single-key atomic arming would need server-side scripting, which
        // the one-command-per-request protocol does not carry.
        if count == amount as i64 {
            self.command(json!(["EXPIRE", key, window_secs.to_string()]))
                .await?;
        }
        debug!(key, count, "window counter incremented");
        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_at: Utc::now() + Duration::seconds(window_secs as i64),
        })
    }

    async fn incr_concurrency(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        let count = self.int_command(json!(["INCR", key])).await?;
        if count == 1 {
            // TTL guards against slots leaked by crashed holders.
            self.command(json!(["EXPIRE", key, ttl_secs.to_string()]))
                .await?;
        }
        Ok(count.max(0) as u64)
    }

    async fn decr_concurrency(&self, key: &str) -> Result<u64> {
        let left = self.int_command(json!(["DECR", key])).await?;
        if left <= 0 {
            self.command(json!(["DEL", key])).await?;
            return Ok(0);
        }
        Ok(left as u64)
    }

    async fn current_concurrency(&self, key: &str) -> Result<u64> {
        let current = self.int_command(json!(["GET", key])).await?;
        Ok(current.max(0) as u64)
    }
}
