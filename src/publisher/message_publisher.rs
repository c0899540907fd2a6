//! Redis Streams publisher with health monitor
//!
//! ```text
//! noop            messaging disabled, publishes are skipped
//! connected  ──probe fails──▶ disconnected ──reconnect ok──▶ connected
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Delivery, EventPublisher, PublishError};
use crate::config::MessagePublisherConfig;
use crate::metrics;
use crate::transaction::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherMode {
    Noop,
    Connected,
    Disconnected,
}

impl PublisherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherMode::Noop => "noop",
            PublisherMode::Connected => "connected",
            PublisherMode::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for PublisherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Link {
    Noop,
    Connected(MultiplexedConnection),
    Disconnected,
}

impl Link {
    fn mode(&self) -> PublisherMode {
        match self {
            Link::Noop => PublisherMode::Noop,
            Link::Connected(_) => PublisherMode::Connected,
            Link::Disconnected => PublisherMode::Disconnected,
        }
    }
}

pub struct MessagePublisher {
    client: Option<redis::Client>,
    topic: String,
    health_interval: Duration,
    probe_timeout: Duration,
    retry_interval: Duration,
    max_reconnect_attempts: u32,
    link: RwLock<Link>,
    /// Attempts made in the current outage
    reconnect_attempts: AtomicU32,
}

impl MessagePublisher {
    /// Publisher that accepts and drops every event
    pub fn noop() -> Self {
        Self::with_link(None, &MessagePublisherConfig::default(), Link::Noop)
    }

    fn with_link(
        client: Option<redis::Client>,
        config: &MessagePublisherConfig,
        link: Link,
    ) -> Self {
        Self {
            client,
            topic: config.publish_topic.clone(),
            health_interval: Duration::from_secs(config.health_check_interval_seconds.max(1)),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds.max(1)),
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
            max_reconnect_attempts: config.max_reconnect_attempts.max(1),
            link: RwLock::new(link),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Build from config. An unreachable broker yields a disconnected
    /// publisher, never an error.
    pub async fn connect(config: &MessagePublisherConfig) -> Result<Self, PublishError> {
        if !config.enabled {
            info!("message publishing disabled");
            return Ok(Self::noop());
        }

        let client = redis::Client::open(config.broker_addr.as_str())
            .map_err(|e| PublishError::Broker(format!("invalid broker address: {e}")))?;
        let publisher = Self::with_link(Some(client), config, Link::Disconnected);

        match publisher.open_connection().await {
            Ok(conn) => {
                *publisher.link.write().await = Link::Connected(conn);
                info!(topic = %publisher.topic, "message publisher connected");
            }
            Err(e) => {
                warn!(error = %e, "message broker unreachable at startup, starting disconnected");
            }
        }
        Ok(publisher)
    }

    pub async fn mode(&self) -> PublisherMode {
        self.link.read().await.mode()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    async fn open_connection(&self) -> Result<MultiplexedConnection, PublishError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PublishError::Broker("no broker configured".to_string()))?;

        let connect = async {
            let mut conn = client.get_multiplexed_tokio_connection().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        };

        match tokio::time::timeout(self.probe_timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(PublishError::Broker(e.to_string())),
            Err(_) => Err(PublishError::Broker("broker probe timeout".to_string())),
        }
    }

    /// Bounded `PING` on the live connection
    async fn probe(&self) -> bool {
        let mut conn = match &*self.link.read().await {
            Link::Connected(conn) => conn.clone(),
            _ => return false,
        };
        let mut ping_cmd = redis::cmd("PING");
        let ping = ping_cmd.query_async::<_, String>(&mut conn);
        matches!(tokio::time::timeout(self.probe_timeout, ping).await, Ok(Ok(_)))
    }

    async fn mark_disconnected(&self) {
        let mut link = self.link.write().await;
        if matches!(*link, Link::Connected(_)) {
            *link = Link::Disconnected;
        }
    }

    /// Try to rebuild the connection up to `max_reconnect_attempts` times,
    /// sleeping `retry_interval * attempt` between tries.
    pub async fn reconnect(&self, shutdown: &CancellationToken) -> bool {
        for attempt in 1..=self.max_reconnect_attempts {
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);

            match self.open_connection().await {
                Ok(conn) => {
                    *self.link.write().await = Link::Connected(conn);
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    info!(attempt, "message broker reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, max = self.max_reconnect_attempts, error = %e, "broker reconnect failed");
                }
            }

            if attempt < self.max_reconnect_attempts {
                tokio::select! {
                    _ = shutdown.cancelled() => return false,
                    _ = tokio::time::sleep(self.retry_interval * attempt) => {}
                }
            }
        }
        false
    }

    /// One health check: probe when connected, reconnect when not.
    pub async fn check_health(&self, shutdown: &CancellationToken) -> PublisherMode {
        match self.mode().await {
            PublisherMode::Noop => {}
            PublisherMode::Connected => {
                if self.probe().await {
                    debug!("message broker probe ok");
                } else {
                    warn!("message broker probe failed, tearing down connection");
                    self.mark_disconnected().await;
                    self.reconnect(shutdown).await;
                }
            }
            PublisherMode::Disconnected => {
                self.reconnect(shutdown).await;
            }
        }
        self.mode().await
    }

    pub async fn run_health_monitor(&self, shutdown: CancellationToken) {
        if self.mode().await == PublisherMode::Noop {
            debug!("publisher health monitor not needed in noop mode");
            return;
        }

        info!(interval = ?self.health_interval, "publisher health monitor started");
        let mut ticker = tokio::time::interval(self.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("publisher health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_health(&shutdown).await;
                }
            }
        }
    }
}

#[async_trait]
impl EventPublisher for MessagePublisher {
    async fn publish(&self, event: &Event) -> Result<Delivery, PublishError> {
        let mut conn = match &*self.link.read().await {
            Link::Noop => return Ok(Delivery::Skipped),
            Link::Disconnected => {
                metrics::record_publish("disconnected");
                return Err(PublishError::Disconnected);
            }
            Link::Connected(conn) => conn.clone(),
        };

        let payload = serde_json::to_string(&event.data)
            .map_err(|e| PublishError::Serialize(e.to_string()))?;

        let result = redis::cmd("XADD")
            .arg(&self.topic)
            .arg("*")
            .arg("event_id")
            .arg(event.id.to_string())
            .arg("type")
            .arg(&event.event_type)
            .arg("aggregate_id")
            .arg(&event.aggregate_id)
            .arg("aggregate_type")
            .arg(&event.aggregate_type)
            .arg("payload")
            .arg(payload)
            .query_async::<_, String>(&mut conn)
            .await;

        match result {
            Ok(entry_id) => {
                metrics::record_publish("published");
                debug!(event_id = %event.id, entry_id = %entry_id, "event appended to stream");
                Ok(Delivery::Published)
            }
            Err(e) => {
                metrics::record_publish("error");
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    self.mark_disconnected().await;
                }
                Err(PublishError::Broker(e.to_string()))
            }
        }
    }
}
