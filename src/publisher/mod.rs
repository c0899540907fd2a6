//! Outbox publisher
//!
//! Publishing is best-effort: the event row is already committed by the time
//! anything reaches the broker.

mod message_publisher;

pub use message_publisher::{MessagePublisher, PublisherMode};

use async_trait::async_trait;
use thiserror::Error;

use crate::transaction::Event;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("currently disconnected")]
    Disconnected,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("failed to serialize event: {0}")]
    Serialize(String),
}

/// What happened to a publish that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Published,
    /// Messaging is disabled
    Skipped,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<Delivery, PublishError>;
}

#[cfg(test)]
pub mod recording {
    //! Publisher double that records what it was asked to send

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct RecordingPublisher {
        published: Mutex<Vec<Event>>,
        disconnected: AtomicBool,
    }

    impl RecordingPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn disconnected() -> Self {
            let p = Self::default();
            p.disconnected.store(true, Ordering::SeqCst);
            p
        }

        pub fn published(&self) -> Vec<Event> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: &Event) -> Result<Delivery, PublishError> {
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(PublishError::Disconnected);
            }
            self.published.lock().unwrap().push(event.clone());
            Ok(Delivery::Published)
        }
    }
}
