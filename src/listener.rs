use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::UdpSocket;

use crate::daemon::Daemon;
use crate::flap::{is_link_event, Flap};
use crate::wire;

/// Owns the trap-ingress UDP socket. Does no per-packet work itself beyond
/// decode and dispatch, so a slow or hung handler never stalls intake —
/// the OS receive buffer is the only queue in front of it.
pub struct Listener {
    daemon: Arc<Daemon>,
}

impl Listener {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Listener { daemon }
    }

    /// Binds and runs the listen loop. Returning is always fatal to the
    /// process — there is no graceful-stop path.
    pub async fn run(self) -> Result<()> {
        let addr = self.daemon.config.listen_socket_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .with_context(|| format!("unable to bind trap listener to {}", addr))?;

        info!("listening for SNMP traps on {}", addr);

        let mut buf = vec![0u8; 65535];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("error receiving trap datagram: {}", e);
                    continue;
                }
            };

            let data = buf[..len].to_vec();
            let daemon = self.daemon.clone();

            tokio::spawn(async move {
                handle_datagram(daemon, &data, src.ip()).await;
            });
        }
    }
}

async fn handle_datagram(daemon: Arc<Daemon>, data: &[u8], source_ip: IpAddr) {
    let trap = match wire::decode_trap(data) {
        Ok(trap) => trap,
        Err(e) => {
            debug!("discarding undecodable datagram from {}: {}", source_ip, e);
            return;
        }
    };

    let configured_community = &daemon.config.community;
    if !configured_community.is_empty() && trap.community != *configured_community {
        debug!("discarding trap from {} with mismatched community", source_ip);
        return;
    }

    if !is_link_event(&trap) {
        return;
    }

    let mut flap = Flap::from_trap(&trap, source_ip);
    debug!("sid={}: link event trap received from {}", flap.sid, source_ip);

    if let Err(e) = flap.save(daemon.store.as_ref()).await {
        warn!("sid={}: unable to save flap: {}", flap.sid, e);
        return;
    }

    flap.fetch_missing_data(&daemon.cache, &daemon.retriever).await;

    if let Err(e) = flap.update(daemon.store.as_ref()).await {
        warn!("sid={}: unable to update flap: {}", flap.sid, e);
    }
}
