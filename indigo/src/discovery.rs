//! INDIGO server discovery
//!
//! Port probing and mDNS browsing for INDIGO servers on the local network.

use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::transport::ServerTarget;
use crate::INDIGO_DEFAULT_PORT;

/// mDNS service type INDIGO servers advertise
pub const INDIGO_SERVICE_TYPE: &str = "_indigo._tcp.local.";

/// Probe `host:port` for a listening server
pub async fn probe_server(host: &str, port: u16, timeout: Duration) -> Option<ServerTarget> {
    let addr = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Some(ServerTarget {
            server_id: format!("{}:{}", host, port),
            host: host.to_string(),
            port,
        }),
        Ok(Err(e)) => {
            tracing::debug!("No INDIGO server at {}: {}", addr, e);
            None
        }
        Err(_) => {
            tracing::debug!("Probe of {} timed out after {:?}", addr, timeout);
            None
        }
    }
}

/// Probe localhost on the default port
pub async fn discover_localhost() -> Option<ServerTarget> {
    probe_server("127.0.0.1", INDIGO_DEFAULT_PORT, Duration::from_millis(500)).await
}

/// Browse for servers advertising `_indigo._tcp.local.` for up to `timeout`
pub async fn discover_mdns(timeout: Duration) -> Vec<ServerTarget> {
    let mut servers = Vec::new();

    let mdns = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Failed to create mDNS daemon: {}. mDNS discovery unavailable.", e);
            return servers;
        }
    };

    let receiver = match mdns.browse(INDIGO_SERVICE_TYPE) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Failed to browse mDNS services: {}. mDNS discovery unavailable.", e);
            return servers;
        }
    };

    tracing::info!("Searching for INDIGO servers via mDNS for {:?}...", timeout);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = HashSet::new();

    loop {
        let event = match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                tracing::warn!("mDNS receive error: {}", e);
                break;
            }
            Err(_) => break,
        };

        match event {
            ServiceEvent::ServiceResolved(info) => {
                let port = info.get_port();
                let Some(addr) = info.get_addresses().iter().next() else {
                    continue;
                };
                let target = ServerTarget {
                    server_id: service_name(info.get_fullname()),
                    host: addr.to_string(),
                    port,
                };
                if seen.insert((target.host.clone(), target.port)) {
                    tracing::info!("Found INDIGO server via mDNS: {}", target);
                    servers.push(target);
                }
            }
            ServiceEvent::ServiceFound(ty, fullname) => {
                tracing::debug!("mDNS service found: {} ({})", fullname, ty);
            }
            _ => {}
        }
    }

    if let Err(e) = mdns.shutdown() {
        tracing::warn!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("mDNS discovery complete. Found {} INDIGO server(s).", servers.len());
    servers
}

/// Instance name from a full service name such as `indigo_server._indigo._tcp.local.`
fn service_name(fullname: &str) -> String {
    fullname
        .strip_suffix(INDIGO_SERVICE_TYPE)
        .map(|name| name.trim_end_matches('.'))
        .filter(|name| !name.is_empty())
        .unwrap_or(fullname)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = probe_server("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, port);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(probe_server("127.0.0.1", port, Duration::from_secs(1)).await.is_none());
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("indigo_server._indigo._tcp.local."), "indigo_server");
        assert_eq!(service_name("odd.name"), "odd.name");
    }
}
