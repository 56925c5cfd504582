//! Keep-alive supervision of a feed connection
//!
//! After `message_timeout` of silence a ping is sent; if nothing at all
//! arrives within `ping_timeout` after that, the connection is dead.

use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::error::{MarketDataError, Result};
use crate::feed::FeedConnection;
use crate::messages::FeedEvent;

#[derive(Debug)]
pub struct Liveness {
    message_timeout: Duration,
    ping_timeout: Duration,
    ping_outstanding: bool,
}

impl Liveness {
    pub fn new(message_timeout: Duration, ping_timeout: Duration) -> Self {
        Self {
            message_timeout,
            ping_timeout,
            ping_outstanding: false,
        }
    }

    /// Next event from `conn`, probing it when silent
    ///
    /// Cancel safe as long as the connection's `next_event` is.
    pub async fn next_event(&mut self, conn: &mut dyn FeedConnection) -> Result<FeedEvent> {
        loop {
            let window = if self.ping_outstanding {
                self.ping_timeout
            } else {
                self.message_timeout
            };

            match timeout(window, conn.next_event()).await {
                Ok(event) => {
                    self.ping_outstanding = false;
                    return event;
                }
                Err(_) if self.ping_outstanding => {
                    return Err(MarketDataError::LivenessTimeout(
                        self.message_timeout + self.ping_timeout,
                    ));
                }
                Err(_) => {
                    debug!(silent_for = ?window, "Connection silent, sending keep-alive");
                    conn.ping().await?;
                    self.ping_outstanding = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Yields scripted events, then hangs forever. Pongs are only produced
    /// when `answers_pings` is set.
    struct Scripted {
        events: VecDeque<FeedEvent>,
        answers_pings: bool,
        pings: usize,
    }

    #[async_trait]
    impl FeedConnection for Scripted {
        async fn next_event(&mut self) -> Result<FeedEvent> {
            match self.events.pop_front() {
                Some(event) => Ok(event),
                None => std::future::pending().await,
            }
        }

        async fn ping(&mut self) -> Result<()> {
            self.pings += 1;
            if self.answers_pings {
                self.events.push_back(FeedEvent::Heartbeat);
            }
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_dead_connection_times_out() {
        let mut conn = Scripted {
            events: VecDeque::new(),
            answers_pings: false,
            pings: 0,
        };
        let mut liveness = Liveness::new(Duration::from_millis(20), Duration::from_millis(20));

        let result = liveness.next_event(&mut conn).await;
        assert!(matches!(result, Err(MarketDataError::LivenessTimeout(_))));
        assert_eq!(conn.pings, 1);
    }

    #[tokio::test]
    async fn test_pong_keeps_connection_alive() {
        let mut conn = Scripted {
            events: VecDeque::new(),
            answers_pings: true,
            pings: 0,
        };
        let mut liveness = Liveness::new(Duration::from_millis(20), Duration::from_millis(200));

        let event = liveness.next_event(&mut conn).await.unwrap();
        assert_eq!(event, FeedEvent::Heartbeat);
        assert_eq!(conn.pings, 1);

        // the ping was answered, so the next silence gets a fresh ping
        let event = liveness.next_event(&mut conn).await.unwrap();
        assert_eq!(event, FeedEvent::Heartbeat);
        assert_eq!(conn.pings, 2);
    }

    #[tokio::test]
    async fn test_data_passes_through() {
        let mut conn = Scripted {
            events: VecDeque::from([FeedEvent::Closed("bye".to_string())]),
            answers_pings: false,
            pings: 0,
        };
        let mut liveness = Liveness::new(Duration::from_secs(5), Duration::from_secs(5));
        let event = liveness.next_event(&mut conn).await.unwrap();
        assert_eq!(event, FeedEvent::Closed("bye".to_string()));
        assert_eq!(conn.pings, 0);
    }
}
