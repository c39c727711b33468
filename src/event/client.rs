//! Cached outbound forwarding connections.
//!
//! One connection per remote server address, created lazily and reused
//! across forwards. Callers report transport-class failures on the handle
//! they were given; a background sweep drops failed entries once per
//! minute so a fresh connection is built on the next forward.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::proto::event::event_streaming_client::EventStreamingClient;

const REAP_INTERVAL: Duration = Duration::from_secs(60);

struct PooledConn {
    channel: Channel,
    failed: Arc<AtomicBool>,
}

/// A client handed out by the pool.
///
/// Failures observed by the caller are reported here and make the
/// underlying connection eligible for reaping.
pub struct PooledClient {
    pub client: EventStreamingClient<Channel>,
    failed: Arc<AtomicBool>,
}

impl PooledClient {
    /// Flag the underlying connection as failed.
    pub fn report_failure(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }
}

/// Process-wide cache of forwarding connections keyed by address.
pub struct ForwardingClientPool {
    conns: RwLock<HashMap<String, PooledConn>>,
}

impl ForwardingClientPool {
    /// Create the pool and start its background reaper.
    pub fn new() -> Arc<Self> {
        let pool = Arc::new(Self {
            conns: RwLock::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&pool);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                pool.reap();
            }
        });

        pool
    }

    /// Get a client for `address`, connecting lazily on first use.
    pub fn get(&self, address: &str) -> Result<PooledClient, tonic::transport::Error> {
        {
            let conns = self.conns.read().expect("pool lock poisoned");
            if let Some(conn) = conns.get(address) {
                return Ok(PooledClient {
                    client: EventStreamingClient::new(conn.channel.clone()),
                    failed: conn.failed.clone(),
                });
            }
        }

        let mut conns = self.conns.write().expect("pool lock poisoned");
        if let Some(conn) = conns.get(address) {
            return Ok(PooledClient {
                client: EventStreamingClient::new(conn.channel.clone()),
                failed: conn.failed.clone(),
            });
        }

        let channel = Endpoint::from_shared(format!("http://{address}"))?.connect_lazy();
        let failed = Arc::new(AtomicBool::new(false));
        conns.insert(
            address.to_string(),
            PooledConn {
                channel: channel.clone(),
                failed: failed.clone(),
            },
        );

        Ok(PooledClient {
            client: EventStreamingClient::new(channel),
            failed,
        })
    }

    fn reap(&self) {
        let mut conns = self.conns.write().expect("pool lock poisoned");
        conns.retain(|address, conn| {
            let keep = !conn.failed.load(Ordering::SeqCst);
            if !keep {
                debug!(address = %address, "Dropping failed forwarding connection");
            }
            keep
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.conns.read().expect("pool lock poisoned").len()
    }
}
