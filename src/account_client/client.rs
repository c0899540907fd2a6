//! Self-healing HTTP client for the Account Service
//!
//! The channel is dialed lazily and cached behind a read/write lock. Calls take
//! the read side only long enough to clone the handle. Dials run outside the
//! lock and take the write side only to swap the new channel in.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::AccountClientError;
use super::types::*;
use super::AccountService;
use crate::config::AccountServiceConfig;
use crate::rpc::types::{HealthCheckRequest, HealthCheckResponse, RequestMetadata};

const SERVICE_PATH: &str = "account.v1.AccountService";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity of the cached channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Ready,
    TransientFailure,
}

struct Channel {
    http: Client,
    state: ChannelState,
}

pub struct AccountClient {
    base_url: String,
    timeout: Duration,
    monitor_interval: Duration,
    channel: RwLock<Option<Channel>>,
}

impl AccountClient {
    pub fn new(config: &AccountServiceConfig) -> Self {
        Self::with_settings(
            config.addr.clone(),
            Duration::from_secs(config.timeout_seconds),
            Duration::from_secs(config.monitor_interval_seconds),
        )
    }

    pub fn with_settings(base_url: String, timeout: Duration, monitor_interval: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            monitor_interval,
            channel: RwLock::new(None),
        }
    }

    /// Current channel state; `None` until the first dial
    pub async fn state(&self) -> Option<ChannelState> {
        self.channel.read().await.as_ref().map(|c| c.state)
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}/{}", self.base_url, SERVICE_PATH, method)
    }

    /// Build a fresh channel and run the ping/pong handshake on it.
    async fn dial(&self) -> Channel {
        let http = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(HANDSHAKE_TIMEOUT))
            .build()
            .unwrap_or_default();

        let request = HealthCheckRequest {
            message: "ping".to_string(),
        };
        let handshake = http
            .post(self.url("HealthCheck"))
            .timeout(HANDSHAKE_TIMEOUT)
            .json(&request)
            .send()
            .await;

        let state = match handshake {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthCheckResponse>().await {
                Ok(body) if body.message == "pong" => ChannelState::Ready,
                Ok(body) => {
                    warn!(reply = %body.message, "account service handshake returned unexpected reply");
                    ChannelState::TransientFailure
                }
                Err(e) => {
                    warn!(error = %e, "account service handshake reply could not be decoded");
                    ChannelState::TransientFailure
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "account service handshake rejected");
                ChannelState::TransientFailure
            }
            Err(e) => {
                warn!(error = %e, addr = %self.base_url, "account service handshake failed");
                ChannelState::TransientFailure
            }
        };

        if state == ChannelState::Ready {
            info!(addr = %self.base_url, "account service channel ready");
        }
        Channel { http, state }
    }

    /// First dial. The lock is only taken to install the result, so callers
    /// racing the dial see no channel and fail at the readiness gate.
    async fn ensure_channel(&self) {
        if self.channel.read().await.is_some() {
            return;
        }
        let channel = self.dial().await;
        let mut guard = self.channel.write().await;
        if guard.is_none() {
            *guard = Some(channel);
        }
    }

    /// Rebuild the channel from scratch; the old one serves until the swap
    pub async fn reconnect(&self) -> ChannelState {
        let channel = self.dial().await;
        let state = channel.state;
        *self.channel.write().await = Some(channel);
        state
    }

    async fn mark_unhealthy(&self) {
        if let Some(channel) = self.channel.write().await.as_mut() {
            channel.state = ChannelState::TransientFailure;
        }
    }

    /// Periodically rebuild the channel while it is not ready.
    pub async fn run_monitor(&self, shutdown: CancellationToken) {
        info!(interval = ?self.monitor_interval, "account client monitor started");
        let mut ticker = tokio::time::interval(self.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("account client monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if self.is_healthy().await {
                        continue;
                    }
                    match self.reconnect().await {
                        ChannelState::Ready => info!("account service connection restored"),
                        ChannelState::TransientFailure => {
                            debug!("account service still unreachable")
                        }
                    }
                }
            }
        }
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, AccountClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Enveloped,
    {
        self.ensure_channel().await;

        let http = {
            let guard = self.channel.read().await;
            match guard.as_ref() {
                Some(channel) if channel.state == ChannelState::Ready => channel.http.clone(),
                _ => {
                    return Err(AccountClientError::ConnectionFailed(
                        "account service channel is not ready".to_string(),
                    ));
                }
            }
        };

        let response = match http.post(self.url(method)).json(body).send().await {
            Ok(r) => r,
            Err(e) => {
                let err = AccountClientError::from(e);
                if matches!(err, AccountClientError::ConnectionFailed(_)) {
                    self.mark_unhealthy().await;
                }
                return Err(err);
            }
        };

        match response.status() {
            StatusCode::SERVICE_UNAVAILABLE => {
                return Err(AccountClientError::Unavailable(format!(
                    "{method} returned 503"
                )));
            }
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
                return Err(AccountClientError::Timeout(format!(
                    "{method} returned {}",
                    response.status()
                )));
            }
            s if !s.is_success() => {
                return Err(AccountClientError::Transport(format!(
                    "{method} returned unexpected status {s}"
                )));
            }
            _ => {}
        }

        let decoded: Resp = response
            .json()
            .await
            .map_err(|e| AccountClientError::Decode(e.to_string()))?;

        let status = decoded.status();
        if !status.success {
            debug!(method, message = %status.message, "account service rejected call");
            return Err(AccountClientError::Rejected {
                message: status.message.clone(),
            });
        }
        Ok(decoded)
    }
}

#[async_trait]
impl AccountService for AccountClient {
    async fn is_healthy(&self) -> bool {
        matches!(self.state().await, Some(ChannelState::Ready))
    }

    async fn validate_and_get_accounts(
        &self,
        account_ids: &[String],
        meta: &RequestMetadata,
    ) -> Result<Vec<AccountDetails>, AccountClientError> {
        let req = ValidateAndGetAccountsRequest {
            account_ids,
            metadata: meta,
        };
        let resp: ValidateAndGetAccountsResponse =
            self.call("ValidateAndGetAccounts", &req).await?;
        Ok(resp.accounts)
    }

    async fn lock_accounts(
        &self,
        account_ids: &[String],
        transaction_id: Uuid,
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError> {
        let req = LockAccountsRequest {
            account_ids,
            transaction_id: transaction_id.to_string(),
            metadata: meta,
        };
        let _: AckResponse = self.call("LockAccounts", &req).await?;
        Ok(())
    }

    async fn unlock_accounts(
        &self,
        transaction_id: Uuid,
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError> {
        let req = UnlockAccountsRequest {
            transaction_id: transaction_id.to_string(),
            metadata: meta,
        };
        let _: AckResponse = self.call("UnlockAccounts", &req).await?;
        Ok(())
    }

    async fn update_accounts_balance(
        &self,
        transaction_id: Uuid,
        updates: &[BalanceUpdate],
        meta: &RequestMetadata,
    ) -> Result<(), AccountClientError> {
        let req = UpdateAccountsBalanceRequest {
            transaction_id: transaction_id.to_string(),
            updates,
            metadata: meta,
        };
        let _: AckResponse = self.call("UpdateAccountsBalance", &req).await?;
        Ok(())
    }

    async fn get_balance(
        &self,
        account_id: &str,
        meta: &RequestMetadata,
    ) -> Result<AccountBalance, AccountClientError> {
        let req = GetBalanceRequest {
            account_id,
            metadata: meta,
        };
        let resp: GetBalanceResponse = self.call("GetBalance", &req).await?;
        resp.balance.ok_or_else(|| {
            AccountClientError::Decode(format!("GetBalance returned no balance for {account_id}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};

    async fn spawn_account_service(pong: &'static str) -> String {
        let app = Router::new()
            .route(
                "/account.v1.AccountService/HealthCheck",
                post(move || async move {
                    Json(json!({"message": pong, "timestamp": chrono::Utc::now()}))
                }),
            )
            .route(
                "/account.v1.AccountService/ValidateAndGetAccounts",
                post(|Json(body): Json<Value>| async move {
                    let accounts: Vec<Value> = body["account_ids"]
                        .as_array()
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|id| json!({"account_id": id, "customer_id": "c-1", "balance": "500", "version": 1}))
                        .collect();
                    Json(json!({"accounts": accounts, "response": {"message": "ok", "success": true}}))
                }),
            )
            .route(
                "/account.v1.AccountService/LockAccounts",
                post(|| async {
                    Json(json!({"response": {"message": "account acc-A is locked", "success": false}}))
                }),
            )
            .route(
                "/account.v1.AccountService/GetBalance",
                post(|| async {
                    Json(json!({"account_id": "acc-A", "balance": "12.5", "version": 3,
                                "response": {"message": "ok", "success": true}}))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> AccountClient {
        AccountClient::with_settings(base_url, Duration::from_secs(2), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_fast_with_connection_failed() {
        let client = client("http://127.0.0.1:1".to_string());
        let meta = RequestMetadata::new("u1", "req-1");

        let err = client
            .validate_and_get_accounts(&["acc-A".to_string()], &meta)
            .await
            .unwrap_err();

        assert!(matches!(err, AccountClientError::ConnectionFailed(_)));
        assert!(err.is_retryable());
        assert!(!client.is_healthy().await);
    }

    #[tokio::test]
    async fn test_lazy_dial_and_handshake() {
        let client = client(spawn_account_service("pong").await);
        assert_eq!(client.state().await, None);

        let meta = RequestMetadata::new("u1", "req-1");
        let accounts = client
            .validate_and_get_accounts(&["acc-A".to_string(), "acc-B".to_string()], &meta)
            .await
            .unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].account_id, "acc-B");
        assert_eq!(accounts[0].balance, Decimal::from(500));
        assert_eq!(client.state().await, Some(ChannelState::Ready));
    }

    #[tokio::test]
    async fn test_bad_handshake_reply_is_not_ready() {
        let client = client(spawn_account_service("nope").await);
        assert_eq!(client.reconnect().await, ChannelState::TransientFailure);
        assert!(!client.is_healthy().await);
    }

    #[tokio::test]
    async fn test_rejection_carries_remote_message() {
        let client = client(spawn_account_service("pong").await);
        let meta = RequestMetadata::new("u1", "req-1");

        let err = client
            .lock_accounts(&["acc-A".to_string()], Uuid::new_v4(), &meta)
            .await
            .unwrap_err();

        assert_eq!(err.remote_message(), Some("account acc-A is locked"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_balance() {
        let client = client(spawn_account_service("pong").await);
        let meta = RequestMetadata::new("u1", "req-1");

        let balance = client.get_balance("acc-A", &meta).await.unwrap();
        assert_eq!(balance.balance, Decimal::new(125, 1));
        assert_eq!(balance.version, 3);
    }

    #[tokio::test]
    async fn test_slow_dial_does_not_block_readers() {
        let app = Router::new().route(
            "/account.v1.AccountService/HealthCheck",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(800)).await;
                Json(json!({"message": "pong", "timestamp": chrono::Utc::now()}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = std::sync::Arc::new(client(format!("http://{addr}")));
        let dialing = {
            let client = client.clone();
            tokio::spawn(async move { client.reconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = tokio::time::timeout(Duration::from_millis(200), client.state())
            .await
            .expect("state() waited on the dial");
        assert_eq!(state, None);
        let healthy = tokio::time::timeout(Duration::from_millis(200), client.is_healthy())
            .await
            .expect("is_healthy() waited on the dial");
        assert!(!healthy);

        assert_eq!(dialing.await.unwrap(), ChannelState::Ready);
        assert_eq!(client.state().await, Some(ChannelState::Ready));
    }

    #[tokio::test]
    async fn test_monitor_exits_on_cancel() {
        let client = std::sync::Arc::new(client("http://127.0.0.1:1".to_string()));
        let token = CancellationToken::new();
        let handle = {
            let client = client.clone();
            let token = token.clone();
            tokio::spawn(async move { client.run_monitor(token).await })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
        assert_eq!(client.state().await, Some(ChannelState::TransientFailure));
    }
}
