use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

use crate::wire;

const SNMP_PORT: u16 = 161;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues unicast SNMP v2c GET requests for single scalar OIDs.
///
/// `lock` serializes the entire body of `get_string` — connect, send,
/// receive, close — across every caller. This is deliberate admission
/// control: one device query in flight at a time, not a performance
/// ceiling.
pub struct Retriever {
    community: String,
    lock: Mutex<()>,
    next_request_id: AtomicI32,
}

impl Retriever {
    pub fn new(community: String) -> Self {
        Retriever {
            community,
            lock: Mutex::new(()),
            next_request_id: AtomicI32::new(1),
        }
    }

    /// Opens a fresh socket, performs one GET, and decodes the reply as
    /// text. Any non-octet-string reply is an error, not a different
    /// success variant — the caller has nothing useful to do with, say, an
    /// integer answer to an OID it expected to be a name.
    pub async fn get_string(&self, oid: &str, ip: &str) -> Result<String> {
        let _guard = self.lock.lock().await;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = wire::encode_get_request(&self.community, request_id, oid)?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("unable to open a UDP socket for SNMP GET")?;

        let target: SocketAddr = format!("{}:{}", ip, SNMP_PORT)
            .parse()
            .with_context(|| format!("invalid device address {:?}", ip))?;

        socket
            .connect(target)
            .await
            .with_context(|| format!("unable to reach {}", target))?;
        socket
            .send(&request)
            .await
            .context("unable to send SNMP GET request")?;

        let mut buf = vec![0u8; 65535];
        let len = timeout(REQUEST_TIMEOUT, socket.recv(&mut buf))
            .await
            .with_context(|| format!("SNMP GET to {} timed out", ip))?
            .with_context(|| format!("error receiving SNMP GET response from {}", ip))?;

        let vb = wire::decode_get_response(&buf[..len])?;

        vb.value
            .as_text()
            .with_context(|| format!("device {} returned a wrong value", ip))
    }
}
