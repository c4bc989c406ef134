use core::str;
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    ops::Range,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use rand::Rng;
use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    device_description::{DeviceSpec, RootDevice},
    wire::{http_date, UdpPacket},
    SERVER_AGENT,
};

pub(crate) const SSDP_IP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(SSDP_IP_ADDR, 1900));
pub const DEFAULT_SSDP_TTL: u32 = 2;

/// Seconds of validity advertised in NOTIFY messages.
const NOTIFY_VALIDITY_SECONDS: usize = 1800;
/// Devices re-advertise after half the advertised validity.
const NOTIFY_INTERVAL: Duration = Duration::from_secs(NOTIFY_VALIDITY_SECONDS as u64 / 2);
/// Seconds of validity advertised in M-SEARCH responses.
const SEARCH_RESPONSE_VALIDITY_SECONDS: usize = 600;
/// Pause between consecutive multicast sends to avoid burst loss.
const PACKET_SPACING: Duration = Duration::from_millis(100);

async fn sleep_rand_millis_duration(range: &Range<u64>) {
    let millis = {
        let mut rng = rand::rng();
        rng.random_range(range.clone())
    };
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

fn bind_ssdp_socket(ttl: Option<u32>) -> anyhow::Result<UdpSocket> {
    let local_ip = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 1900);
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(ttl.unwrap_or(DEFAULT_SSDP_TTL))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_loop_v4(true)?;
    socket.join_multicast_v4(&SSDP_IP_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    socket.bind(&SocketAddr::V4(local_ip).into())?;
    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// M-SEARCH request. Control points send it; devices answer it.
#[derive(Debug, Clone)]
pub struct SearchMessage {
    pub host: Option<SocketAddr>,
    /// Search target. Required by the protocol but carried as an option so
    /// the listener can log the violation instead of failing the parse.
    pub st: Option<String>,
    /// Maximum wait in seconds. Device responses are delayed a random
    /// duration below it to balance load on the control point.
    pub mx: Option<u64>,
    pub user_agent: Option<String>,
}

impl std::fmt::Display for SearchMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "M-SEARCH * HTTP/1.1\r\n\
HOST: {SSDP_IP_ADDR}:1900\r\n\
MAN: \"ssdp:discover\"\r\n"
        )?;
        if let Some(mx) = self.mx {
            write!(f, "MX: {mx}\r\n")?;
        }
        if let Some(st) = &self.st {
            write!(f, "ST: {st}\r\n")?;
        }
        if let Some(user_agent) = &self.user_agent {
            write!(f, "USER-AGENT: {user_agent}\r\n")?;
        }
        write!(f, "\r\n")
    }
}

/// NOTIFY advertisement received from another device on the group.
#[derive(Debug, Clone)]
pub struct NotifyMessage {
    pub nt: String,
    pub nts: String,
    pub usn: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SsdpMessage {
    Search(SearchMessage),
    Notify(NotifyMessage),
}

impl SsdpMessage {
    /// Parses an HTTP-over-UDP payload. Header names are matched case
    /// sensitively.
    pub fn parse(payload: &str) -> anyhow::Result<Self> {
        let mut lines = payload.lines();
        let request_line = lines.next().context("request line")?;
        let (method, _) = request_line.split_once(' ').context("split request line")?;
        let headers = lines.filter_map(|l| l.split_once(':'));
        match method {
            "M-SEARCH" => {
                let mut host = None;
                let mut st = None;
                let mut mx = None;
                let mut user_agent = None;
                for (name, value) in headers {
                    let value = value.trim();
                    match name {
                        "HOST" => host = value.parse().ok(),
                        "ST" => st = Some(value.to_string()),
                        "MX" => mx = value.parse().ok(),
                        "USER-AGENT" => user_agent = Some(value.to_string()),
                        _ => (),
                    }
                }
                Ok(SsdpMessage::Search(SearchMessage {
                    host,
                    st,
                    mx,
                    user_agent,
                }))
            }
            "NOTIFY" => {
                let mut nt = None;
                let mut nts = None;
                let mut usn = None;
                let mut location = None;
                for (name, value) in headers {
                    let value = value.trim();
                    match name {
                        "NT" => nt = Some(value.to_string()),
                        "NTS" => nts = Some(value.to_string()),
                        "USN" => usn = Some(value.to_string()),
                        "LOCATION" => location = Some(value.to_string()),
                        _ => (),
                    }
                }
                Ok(SsdpMessage::Notify(NotifyMessage {
                    nt: nt.context("missing nt")?,
                    nts: nts.context("missing nts")?,
                    usn: usn.context("missing usn")?,
                    location,
                }))
            }
            _ => Err(anyhow::anyhow!("unknown method encountered: {method}")),
        }
    }
}

fn alive_message(nt: &str, usn: &str, location: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
HOST: {SSDP_IP_ADDR}:1900\r\n\
CACHE-CONTROL: max-age = {NOTIFY_VALIDITY_SECONDS}\r\n\
LOCATION: {location}\r\n\
NT: {nt}\r\n\
NTS: ssdp:alive\r\n\
SERVER: {SERVER_AGENT}\r\n\
USN: {usn}\r\n\
\r\n"
    )
}

fn byebye_message(nt: &str, usn: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
HOST: {SSDP_IP_ADDR}:1900\r\n\
NT: {nt}\r\n\
NTS: ssdp:byebye\r\n\
USN: {usn}\r\n\
\r\n"
    )
}

fn search_response_message(st: &str, usn: &str, location: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age = {SEARCH_RESPONSE_VALIDITY_SECONDS}\r\n\
DATE: {date}\r\n\
EXT:\r\n\
LOCATION: {location}\r\n\
SERVER: {SERVER_AGENT}\r\n\
ST: {st}\r\n\
USN: {usn}\r\n\
\r\n",
        date = http_date(),
    )
}

fn device_location<'a>(root: &'a RootDevice, device: &'a DeviceSpec) -> &'a str {
    device
        .presentation_url
        .as_deref()
        .or(root.device.presentation_url.as_deref())
        .unwrap_or_default()
}

/// The advertisement set of a root device: one `upnp:rootdevice` message,
/// two per device (UDN and device type) and one per service.
pub fn alive_notifications(root: &RootDevice) -> Vec<UdpPacket> {
    let mut result = Vec::new();
    let location = device_location(root, &root.device);
    let root_usn = format!("{}::upnp:rootdevice", root.device.udn);
    result.push(UdpPacket::outbound(
        SSDP_ADDR,
        alive_message("upnp:rootdevice", &root_usn, location),
    ));

    for device in root.all_devices() {
        let location = device_location(root, device);
        let udn = device.udn.as_str();
        result.push(UdpPacket::outbound(
            SSDP_ADDR,
            alive_message(udn, udn, location),
        ));
        let usn = format!("{}::{}", udn, device.device_type);
        result.push(UdpPacket::outbound(
            SSDP_ADDR,
            alive_message(&device.device_type, &usn, location),
        ));
    }

    for device in root.all_devices() {
        let location = device_location(root, device);
        for service in &device.service_list {
            let usn = format!("{}::{}", device.udn, service.service_type);
            result.push(UdpPacket::outbound(
                SSDP_ADDR,
                alive_message(&service.service_type, &usn, location),
            ));
        }
    }

    result
}

/// Shutdown advertisement for the root device.
pub fn byebye_notification(root: &RootDevice) -> UdpPacket {
    let usn = format!("{}::upnp:rootdevice", root.device.udn);
    UdpPacket::outbound(SSDP_ADDR, byebye_message("upnp:rootdevice", &usn))
}

/// Computes the unicast responses this root owes for a search target. An
/// empty result means the search is not for this device.
pub fn search_responses(root: &RootDevice, st: &str, requester: SocketAddr) -> Vec<UdpPacket> {
    let mut result = Vec::new();
    let root_udn = root.device.udn.as_str();

    if st == "ssdp:all" {
        for device in root.all_devices() {
            let location = device_location(root, device);
            let udn = device.udn.as_str();
            result.push(UdpPacket::outbound(
                requester,
                search_response_message(st, udn, location),
            ));
            if udn == root_udn {
                let usn = format!("{udn}::upnp:rootdevice");
                result.push(UdpPacket::outbound(
                    requester,
                    search_response_message(st, &usn, location),
                ));
            }
            let usn = format!("{}::{}", udn, device.device_type);
            result.push(UdpPacket::outbound(
                requester,
                search_response_message(st, &usn, location),
            ));
            for service in &device.service_list {
                let usn = format!("{}::{}", udn, service.service_type);
                result.push(UdpPacket::outbound(
                    requester,
                    search_response_message(st, &usn, location),
                ));
            }
        }
        return result;
    }

    if st == "upnp:rootdevice" {
        let usn = format!("{root_udn}::upnp:rootdevice");
        let location = device_location(root, &root.device);
        result.push(UdpPacket::outbound(
            requester,
            search_response_message(st, &usn, location),
        ));
        return result;
    }

    for device in root.all_devices() {
        let location = device_location(root, device);
        if st == device.udn.as_str() {
            result.push(UdpPacket::outbound(
                requester,
                search_response_message(st, device.udn.as_str(), location),
            ));
        } else if st == device.device_type {
            let usn = format!("{}::{}", device.udn, device.device_type);
            result.push(UdpPacket::outbound(
                requester,
                search_response_message(st, &usn, location),
            ));
        } else {
            for service in &device.service_list {
                if st == service.service_type {
                    let usn = format!("{}::{}", device.udn, service.service_type);
                    result.push(UdpPacket::outbound(
                        requester,
                        search_response_message(st, &usn, location),
                    ));
                }
            }
        }
    }

    result
}

/// Device side SSDP engine: joins the multicast group, advertises the root
/// periodically and answers M-SEARCH requests.
#[derive(Debug)]
pub struct SsdpListener {
    socket: Arc<UdpSocket>,
    root: Arc<RootDevice>,
}

impl SsdpListener {
    pub fn bind(root: Arc<RootDevice>, ttl: Option<u32>) -> anyhow::Result<Self> {
        let socket = bind_ssdp_socket(ttl).context("failed to bind ssdp socket")?;
        Ok(Self {
            socket: Arc::new(socket),
            root,
        })
    }

    pub async fn listen(&mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        self.advertise().await?;

        let mut notify_interval = tokio::time::interval(NOTIFY_INTERVAL);
        notify_interval.tick().await;

        let mut buf = [0; 2048];
        loop {
            tokio::select! {
                read = self.socket.recv_from(&mut buf) => {
                    match read {
                        Ok((read, sender)) => {
                            let data = &buf[..read];
                            if let Err(e) = self.handle_message(data, sender) {
                                tracing::warn!("Failed to handle ssdp message: {e}");
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Ssdp socket read failed: {e}");
                        }
                    }
                }
                _ = cancellation_token.cancelled() => {
                    self.handle_shutdown().await?;
                    return Ok(())
                }
                _ = notify_interval.tick() => {
                    self.advertise().await?;
                }
            }
        }
    }

    async fn advertise(&self) -> anyhow::Result<()> {
        let notifications = alive_notifications(&self.root);
        tracing::debug!(
            messages = notifications.len(),
            "Advertising device {}",
            self.root.device.friendly_name
        );
        for packet in notifications {
            self.socket
                .send_to(packet.payload.as_bytes(), packet.receiver)
                .await?;
            tokio::time::sleep(PACKET_SPACING).await;
        }
        Ok(())
    }

    fn handle_message(&self, data: &[u8], sender: SocketAddr) -> anyhow::Result<()> {
        let payload = str::from_utf8(data).context("construct string from bytes")?;
        match SsdpMessage::parse(payload)? {
            SsdpMessage::Search(search) => {
                let Some(st) = search.st else {
                    tracing::warn!(addr = %sender, "Received M-SEARCH without ST header");
                    return Ok(());
                };
                tracing::debug!(
                    user_agent = ?search.user_agent,
                    mx = ?search.mx,
                    st = %st,
                    addr = %sender,
                    "Search message"
                );
                let responses = search_responses(&self.root, &st, sender);
                if responses.is_empty() {
                    tracing::debug!(st = %st, "Search not for this device");
                    return Ok(());
                }
                let socket = self.socket.clone();
                let mx = search.mx;
                tokio::spawn(async move {
                    // MX delay balances load on the control point (1.3.2).
                    if let Some(mx) = mx.filter(|mx| *mx >= 1) {
                        sleep_rand_millis_duration(&(0..mx * 1000)).await;
                    }
                    for response in responses {
                        if let Err(e) = socket
                            .send_to(response.payload.as_bytes(), response.receiver)
                            .await
                        {
                            tracing::warn!("Failed to send search response: {e}");
                        }
                    }
                });
            }
            SsdpMessage::Notify(notify) => {
                tracing::trace!(nt = %notify.nt, nts = %notify.nts, "Received notify message");
            }
        }
        Ok(())
    }

    async fn handle_shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Sending bye bye message");
        let packet = byebye_notification(&self.root);
        self.socket
            .send_to(packet.payload.as_bytes(), packet.receiver)
            .await?;
        Ok(())
    }
}
