//! Wire level primitives shared by SSDP and GENA.
//!
//! Protocol logic in this crate produces and consumes [`UdpPacket`] and
//! [`TcpPacket`] records instead of touching sockets directly, so the
//! message generation and matching code stays testable without a network.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Context;
use tokio::net::UdpSocket;

/// A datagram together with its addressing. `source` is meaningful for
/// received packets, `receiver` for packets waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    pub source: SocketAddr,
    pub receiver: SocketAddr,
    pub payload: String,
}

impl UdpPacket {
    pub fn outbound(receiver: SocketAddr, payload: impl Into<String>) -> Self {
        Self {
            source: unspecified_addr(),
            receiver,
            payload: payload.into(),
        }
    }

    pub fn inbound(source: SocketAddr, payload: impl Into<String>) -> Self {
        Self {
            source,
            receiver: unspecified_addr(),
            payload: payload.into(),
        }
    }
}

/// A TCP message. `receiver` is a `host:port` authority because GENA
/// callback hosts are resolved at dial time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpPacket {
    pub source: SocketAddr,
    pub receiver: String,
    pub payload: String,
}

impl TcpPacket {
    pub fn outbound(receiver: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            source: unspecified_addr(),
            receiver: receiver.into(),
            payload: payload.into(),
        }
    }

    pub fn inbound(source: SocketAddr, payload: impl Into<String>) -> Self {
        Self {
            source,
            receiver: String::new(),
            payload: payload.into(),
        }
    }
}

fn unspecified_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
}

/// Scans an HTTP-over-UDP payload for a header line. Header names match
/// case sensitively; the returned value is trimmed of surrounding
/// whitespace. When several lines match, the last one wins.
///
/// A line that contains the name but not as a `name:` prefix (e.g. the
/// request line for `find_header(msg, "M-SEARCH")`) is reported with the
/// whole trimmed line as its value.
pub fn find_header<'a>(payload: &'a str, name: &str) -> Option<&'a str> {
    let mut found = None;
    for line in payload.lines() {
        if line.contains(name) {
            let value = line
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(line);
            found = Some(value.trim());
        }
    }
    found
}

/// Local address used for presentation and callback URLs. Routes a throwaway
/// datagram socket towards a public address to learn which interface the OS
/// would pick; nothing is actually sent.
pub async fn local_addr() -> anyhow::Result<std::net::IpAddr> {
    let probe = Ipv4Addr::new(8, 8, 8, 8);
    let socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .context("bind probe socket")?;
    socket
        .connect(SocketAddr::V4(SocketAddrV4::new(probe, 80)))
        .await
        .context("route probe socket")?;
    Ok(socket.local_addr().context("get local addr")?.ip())
}

const HTTP_DATE_FORMAT: &str = "[weekday repr:short], [day padding:zero] [month repr:short] [year] [hour]:[minute]:[second] GMT";

/// RFC 1123 date for `DATE` response headers.
pub fn http_date() -> String {
    let now = time::OffsetDateTime::now_utc();
    let format =
        time::format_description::parse_borrowed::<2>(HTTP_DATE_FORMAT).expect("infallible");
    now.format(&format).expect("infallible")
}

/// Parses an RFC 1123 `DATE` header value.
pub fn parse_http_date(value: &str) -> anyhow::Result<time::OffsetDateTime> {
    let format =
        time::format_description::parse_borrowed::<2>(HTTP_DATE_FORMAT).expect("infallible");
    let parsed = time::PrimitiveDateTime::parse(value, &format).context("parse http date")?;
    Ok(parsed.assume_utc())
}

#[cfg(test)]
mod tests {
    use super::{find_header, http_date, parse_http_date};

    #[test]
    fn header_values_are_trimmed() {
        let payload = "HTTP/1.1 200 OK\r\nST:   upnp:rootdevice \r\nMX: 3\r\nEXT:\r\n\r\n";
        assert_eq!(find_header(payload, "ST"), Some("upnp:rootdevice"));
        assert_eq!(find_header(payload, "MX"), Some("3"));
        assert_eq!(find_header(payload, "EXT"), Some(""));
        assert_eq!(find_header(payload, "LOCATION"), None);
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let payload = "NOTIFY * HTTP/1.1\r\nHost: 239.255.255.250:1900\r\n";
        assert_eq!(find_header(payload, "HOST"), None);
        assert_eq!(find_header(payload, "Host"), Some("239.255.255.250:1900"));
    }

    #[test]
    fn request_line_is_detectable() {
        let payload = "M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n";
        assert_eq!(find_header(payload, "M-SEARCH"), Some("M-SEARCH * HTTP/1.1"));
    }

    #[test]
    fn date_round_trip() {
        let date = http_date();
        assert!(date.ends_with("GMT"));
        parse_http_date(&date).unwrap();
    }
}
