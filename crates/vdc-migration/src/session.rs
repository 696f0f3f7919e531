//! Session tokens for the management API

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use vdc_migrator_validate::SessionProvider;
use vdc_shared_types::UnitId;

use crate::remote_client::{RemoteClient, TOKEN_HEADER};

pub const SESSIONS_PATH: &str = "/api/sessions";

#[derive(Debug, Deserialize)]
struct SessionDocument {
    #[serde(default)]
    token: Option<String>,
}

struct Session {
    obtained: Instant,
}

/// Logs in when there is no token yet or the current one is older than the
/// configured lifetime. Concurrent callers share a single login.
pub struct TokenSessionProvider {
    client: Arc<dyn RemoteClient>,
    username: String,
    password: Option<String>,
    ttl: Duration,
    session: Mutex<Option<Session>>,
}

impl TokenSessionProvider {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        username: impl Into<String>,
        password: Option<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            username: username.into(),
            password,
            ttl,
            session: Mutex::new(None),
        }
    }

    /// Forget the token so the next call logs in again.
    pub async fn invalidate(&self) {
        *self.session.lock().await = None;
        self.client.set_auth_token(None);
    }

    async fn login(&self, unit: &UnitId) -> anyhow::Result<String> {
        let password = self
            .password
            .as_deref()
            .context("no API password configured, set VDC_MIGRATION__ENDPOINT__PASSWORD")?;

        let response = self
            .client
            .post(
                SESSIONS_PATH,
                json!({ "username": self.username, "password": password }),
            )
            .await
            .with_context(|| format!("[{}] login as {} failed", unit, self.username))?;

        if let Some(token) = response.header(TOKEN_HEADER) {
            return Ok(token.to_string());
        }
        let document: SessionDocument = response.json()?;
        document
            .token
            .with_context(|| format!("[{}] login response carried no session token", unit))
    }
}

#[async_trait]
impl SessionProvider for TokenSessionProvider {
    async fn ensure_valid_session(&self, unit: &UnitId) -> anyhow::Result<()> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if current.obtained.elapsed() < self.ttl {
                debug!("[{}] session still valid", unit);
                return Ok(());
            }
            info!("[{}] session expired, logging in again", unit);
        }

        let token = self.login(unit).await?;
        self.client.set_auth_token(Some(token));
        *session = Some(Session {
            obtained: Instant::now(),
        });
        info!("[{}] logged in as {}", unit, self.username);
        Ok(())
    }
}

impl std::fmt::Debug for TokenSessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSessionProvider")
            .field("username", &self.username)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
