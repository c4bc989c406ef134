//! UPnP service SSDP search client.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use tokio::net::UdpSocket;

use crate::{
    ssdp::{SearchMessage, DEFAULT_SSDP_TTL, SSDP_ADDR},
    wire::{find_header, parse_http_date},
    CLIENT_AGENT,
};

/// One deduplicated M-SEARCH response, the discovery cache entry for a
/// device. Ephemeral: created per search, discarded after use.
#[derive(Debug, Clone)]
pub struct MSearchResult {
    pub usn: String,
    pub st: String,
    /// Description URL of the responding device.
    pub location: String,
    /// `max-age` seconds the response stays valid.
    pub cache_control: usize,
    pub date: time::OffsetDateTime,
    pub server: String,
}

/// Parses an M-SEARCH response (1.3.3). Responses missing required headers
/// are rejected; the caller discards them silently.
pub fn parse_search_response(payload: &str) -> anyhow::Result<MSearchResult> {
    let cache_control = find_header(payload, "CACHE-CONTROL").context("CACHE-CONTROL not present")?;
    let (_, max_age) = cache_control
        .split_once('=')
        .context("CACHE-CONTROL max-age not well formatted")?;
    let cache_control = max_age
        .trim()
        .parse()
        .context("CACHE-CONTROL max-age not well formatted")?;

    // DATE is recommended, not required (1.3.3)
    let date = find_header(payload, "DATE")
        .and_then(|raw| parse_http_date(raw).ok())
        .unwrap_or_else(time::OffsetDateTime::now_utc);

    let location = find_header(payload, "LOCATION").context("LOCATION not present")?;
    let server = find_header(payload, "SERVER").context("SERVER not present")?;
    let st = find_header(payload, "ST").context("ST not present")?;
    let usn = find_header(payload, "USN").context("USN not present")?;

    Ok(MSearchResult {
        usn: usn.to_string(),
        st: st.to_string(),
        location: location.to_string(),
        cache_control,
        date,
        server: server.to_string(),
    })
}

/// MX value for a control point that did not pick one, scaled with the size
/// of the controlled fleet.
pub fn default_mx(controls: usize) -> u64 {
    match controls {
        0..=4 => 2,
        5..=9 => 4,
        n => (n / 2) as u64,
    }
}

/// Keeps one result per USN, preferring the most recently dated response.
pub(crate) fn dedupe_by_usn(results: Vec<MSearchResult>) -> Vec<MSearchResult> {
    let mut by_usn: HashMap<String, MSearchResult> = HashMap::new();
    for result in results {
        match by_usn.get(&result.usn) {
            Some(existing) if existing.date > result.date => {}
            _ => {
                by_usn.insert(result.usn.clone(), result);
            }
        }
    }
    by_usn.into_values().collect()
}

#[derive(Debug)]
pub struct SearchClient {
    socket: UdpSocket,
}

impl SearchClient {
    pub async fn bind() -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .await
            .context("bind search socket")?;
        socket
            .set_multicast_ttl_v4(DEFAULT_SSDP_TTL)
            .context("set multicast ttl")?;
        Ok(Self { socket })
    }

    /// Multicasts one M-SEARCH for `st` and collects responses from the same
    /// socket until `mx + 1` seconds elapse. Unparseable responses are
    /// discarded.
    pub async fn search(&self, st: &str, mx: u64) -> anyhow::Result<Vec<MSearchResult>> {
        let message = SearchMessage {
            host: Some(SSDP_ADDR),
            st: Some(st.to_string()),
            mx: Some(mx),
            user_agent: Some(CLIENT_AGENT.to_string()),
        };
        self.socket
            .send_to(message.to_string().as_bytes(), SSDP_ADDR)
            .await
            .context("send m-search")?;

        let mut results = Vec::new();
        let mut buf = [0; 2048];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(mx + 1);
        loop {
            let read = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
            match read {
                Ok(Ok((read, source))) => {
                    let Ok(payload) = std::str::from_utf8(&buf[..read]) else {
                        continue;
                    };
                    tracing::debug!(addr = %source, "Received m-search response");
                    match parse_search_response(payload) {
                        Ok(result) => results.push(result),
                        Err(e) => tracing::debug!("Discarding search response: {e}"),
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Search socket read failed: {e}");
                }
                Err(_elapsed) => {
                    tracing::debug!("Listen for m-search responses ended by timeout");
                    break;
                }
            }
        }
        Ok(dedupe_by_usn(results))
    }
}

#[cfg(test)]
mod tests {
    use super::{default_mx, dedupe_by_usn, parse_search_response};

    const RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age = 600\r\n\
DATE: Sat, 01 Aug 2026 10:00:00 GMT\r\n\
EXT:\r\n\
LOCATION: http://192.168.1.10:8080/device.xml\r\n\
SERVER: DFOS/0.1 UPnP/2.0 devhub/0.1.0\r\n\
ST: urn:schemas-upnp-org:device:BinaryLight:1\r\n\
USN: uuid:55076f6e-6b79-4d65-6401-00d0b811d10b::urn:schemas-upnp-org:device:BinaryLight:1\r\n\r\n";

    #[test]
    fn parses_m_search_response() {
        let result = parse_search_response(RESPONSE).unwrap();
        assert_eq!(result.cache_control, 600);
        assert_eq!(result.location, "http://192.168.1.10:8080/device.xml");
        assert_eq!(result.st, "urn:schemas-upnp-org:device:BinaryLight:1");
        assert!(result.usn.starts_with("uuid:55076f6e"));
    }

    #[test]
    fn tolerates_compact_cache_control() {
        let response = RESPONSE.replace("max-age = 600", "max-age=1800");
        let result = parse_search_response(&response).unwrap();
        assert_eq!(result.cache_control, 1800);
    }

    #[test]
    fn missing_required_header_is_an_error() {
        let response = RESPONSE.replace("LOCATION", "X-LOCATION");
        assert!(parse_search_response(&response).is_err());

        let response = RESPONSE.replace("DATE", "X-DATE");
        assert!(parse_search_response(&response).is_ok());
    }

    #[test]
    fn dedupe_prefers_most_recent() {
        let mut old = parse_search_response(RESPONSE).unwrap();
        old.date -= time::Duration::minutes(5);
        old.location = "http://192.168.1.10:8081/stale.xml".to_string();
        let fresh = parse_search_response(RESPONSE).unwrap();

        let deduped = dedupe_by_usn(vec![old, fresh.clone()]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].location, fresh.location);
    }

    #[test]
    fn fleet_scaled_mx() {
        assert_eq!(default_mx(1), 2);
        assert_eq!(default_mx(4), 2);
        assert_eq!(default_mx(9), 4);
        assert_eq!(default_mx(20), 10);
    }
}
