use super::Connectivity;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Network state reported by the host platform.
#[derive(Debug)]
pub struct ManualConnectivity {
    online: AtomicBool,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for ManualConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Device network check: a TCP connect to a host other than the API.
pub struct ProbeConnectivity {
    addr: String,
    timeout: Duration,
}

impl ProbeConnectivity {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: PROBE_TIMEOUT,
        }
    }
}

#[async_trait]
impl Connectivity for ProbeConnectivity {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                tracing::debug!(addr = %self.addr, error = %err, "network probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.addr, "network probe timed out");
                false
            }
        }
    }
}
