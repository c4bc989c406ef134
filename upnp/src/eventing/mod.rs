//! GENA eventing, device side.
//!
//! The subscription registry is shared state in name only: a single daemon
//! task owns it and everything else talks to it through three channels
//! (insert/update, delete, state-change notifications), so SEQ numbers stay
//! monotonic per subscriber without a lock in sight.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, Instant, SystemTime},
};

use anyhow::Context;
use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    device_description::Service,
    scpd::Scpd,
    wire::http_date,
    SERVER_AGENT,
};

mod registry;

pub use registry::{EventLevel, Subscription};
pub(crate) use registry::{Notification, NotifyJob, SubscriptionRegistry, VariableChange};

/// Granted when the subscriber does not request a timeout.
pub const DEFAULT_SUBSCRIPTION_TIMEOUT_SECONDS: u64 = 1800;
/// How often the daemon checks for subscriptions that ran out their timeout.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum RegistryUpdate {
    New(Subscription),
    Renew { sid: i64 },
}

/// Handle to the eventing daemon. Cloneable and cheap; every clone feeds
/// the same registry owner task.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    insert_update: mpsc::UnboundedSender<RegistryUpdate>,
    delete: mpsc::UnboundedSender<i64>,
    notify: mpsc::UnboundedSender<Notification>,
}

impl SubscriptionManager {
    /// Spawns the registry daemon. It runs until the token is cancelled.
    pub fn start(cancellation_token: CancellationToken) -> Self {
        let (insert_update, insert_update_rx) = mpsc::unbounded_channel();
        let (delete, delete_rx) = mpsc::unbounded_channel();
        let (notify, notify_rx) = mpsc::unbounded_channel();
        tokio::spawn(subscription_daemon(
            insert_update_rx,
            delete_rx,
            notify_rx,
            cancellation_token,
        ));
        Self {
            insert_update,
            delete,
            notify,
        }
    }

    /// Announces that a service handler changed state. Values are matched
    /// against the service state table; names not in the table are dropped.
    /// Delivery happens on the daemon, the call never blocks.
    pub fn notify_subscribers(&self, service: &Service, changes: &[(&str, &str)]) {
        self.notify_with_scpd(&service.scpd, &service.service_id, changes);
    }

    /// Same as [`Self::notify_subscribers`] for callers that hold the
    /// service description apart from the service entry (e.g. handlers).
    pub fn notify_with_scpd(&self, scpd: &Scpd, service_id: &str, changes: &[(&str, &str)]) {
        let changes: Vec<VariableChange> = changes
            .iter()
            .filter_map(|(name, value)| {
                let (_, variable) = scpd.state_variable_named(name)?;
                Some(VariableChange {
                    name: variable.name.clone(),
                    value: value.to_string(),
                    send_events: variable.send_events,
                    multicast: variable.multicast,
                })
            })
            .collect();
        let _ = self.notify.send(Notification {
            service_id: service_id.to_string(),
            changes,
        });
    }

    fn insert(&self, subscription: Subscription) {
        let _ = self.insert_update.send(RegistryUpdate::New(subscription));
    }

    fn renew(&self, sid: i64) {
        let _ = self.insert_update.send(RegistryUpdate::Renew { sid });
    }

    fn remove(&self, sid: i64) {
        let _ = self.delete.send(sid);
    }
}

async fn subscription_daemon(
    mut insert_update: mpsc::UnboundedReceiver<RegistryUpdate>,
    mut delete: mpsc::UnboundedReceiver<i64>,
    mut notify: mpsc::UnboundedReceiver<Notification>,
    cancellation_token: CancellationToken,
) {
    tracing::info!("Starting subscription daemon");
    let mut registry = SubscriptionRegistry::default();
    let mut sweep = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
    sweep.tick().await;
    loop {
        tokio::select! {
            // Registry updates win over notifications so a subscription
            // registered (or removed) before a state change is visible to it.
            biased;
            Some(update) = insert_update.recv() => match update {
                RegistryUpdate::New(subscription) => {
                    tracing::debug!(sid = subscription.sid, "Registering subscription");
                    registry.insert(subscription);
                }
                RegistryUpdate::Renew { sid } => {
                    if !registry.renew(sid, Instant::now()) {
                        tracing::warn!(sid, "Renewal for unknown subscription");
                    }
                }
            },
            Some(sid) = delete.recv() => {
                if registry.remove(sid).is_some() {
                    tracing::debug!(sid, "Subscription removed");
                } else {
                    tracing::debug!(sid, "Unsubscribe for unknown subscription");
                }
            },
            Some(notification) = notify.recv() => {
                if notification.changes.iter().any(|c| c.multicast) {
                    tracing::debug!("Multicast eventing requested, path not implemented");
                }
                for job in registry.collect_notifications(&notification) {
                    tokio::spawn(deliver_notification(job));
                }
            },
            _ = sweep.tick() => {
                let removed = registry.sweep_expired(Instant::now());
                if !removed.is_empty() {
                    tracing::debug!(?removed, "Expired subscriptions removed");
                }
            },
            _ = cancellation_token.cancelled() => {
                tracing::info!(active = registry.len(), "Subscription daemon stopped");
                return;
            },
        }
    }
}

/// Best-effort delivery of one NOTIFY. Failures are logged; the
/// subscription stays registered no matter what.
async fn deliver_notification(job: NotifyJob) {
    let result = async {
        let mut stream = TcpStream::connect(&job.packet.receiver)
            .await
            .context("dial subscriber callback")?;
        stream
            .write_all(job.packet.payload.as_bytes())
            .await
            .context("send notification")?;
        let mut buf = [0; 1024];
        let read = stream.read(&mut buf).await.context("read response")?;
        let response = String::from_utf8_lossy(&buf[..read]);
        tracing::debug!(
            sid = job.sid,
            response = %response.lines().next().unwrap_or_default(),
            "Subscription delivery acknowledged"
        );
        Ok::<_, anyhow::Error>(())
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(sid = job.sid, "Failed to deliver notification: {e}");
    }
}

fn unique_sid() -> i64 {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("clock after unix epoch")
        .as_nanos() as i64;
    loop {
        let prev = LAST.load(Ordering::SeqCst);
        let candidate = now.max(prev + 1);
        if LAST
            .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate;
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Callback header carries a list of angle-bracketed URLs; the first one
/// wins.
fn parse_callback(raw: &str) -> anyhow::Result<reqwest::Url> {
    let first = raw
        .split(',')
        .map(str::trim)
        .find_map(|part| {
            part.strip_prefix('<')
                .and_then(|part| part.strip_suffix('>'))
        })
        .or_else(|| {
            // tolerate a bare URL without brackets
            (!raw.trim().is_empty()).then(|| raw.trim())
        })
        .context("empty callback header")?;
    reqwest::Url::parse(first).context("parse callback url")
}

fn parse_timeout(raw: Option<&str>) -> u64 {
    raw.and_then(|raw| raw.strip_prefix("Second-"))
        .and_then(|seconds| seconds.parse().ok())
        .unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT_SECONDS)
}

fn parse_statevar(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn subscribe_accepted(sid: i64, timeout_seconds: u64, statevar: &[String]) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("DATE", http_date())
        .header("SERVER", SERVER_AGENT)
        .header("SID", sid.to_string())
        .header("CONTENT-LENGTH", "0")
        .header("TIMEOUT", format!("Second-{timeout_seconds}"));
    if !statevar.is_empty() {
        builder = builder.header("ACCEPTED-STATEVAR", statevar.join(","));
    }
    builder
        .body(Body::empty())
        .expect("valid response")
}

/// SUBSCRIBE handler (UPnP 4.1.2). New subscriptions carry `NT` and
/// `CALLBACK` and no `SID`; renewals carry only `SID`. Any other
/// combination is a protocol violation.
pub(crate) fn handle_subscribe(
    manager: &SubscriptionManager,
    service: &Service,
    headers: &HeaderMap,
) -> Response {
    let sid = header(headers, "SID");
    let nt = header(headers, "NT");
    let callback = header(headers, "CALLBACK");
    let timeout_seconds = parse_timeout(header(headers, "TIMEOUT"));

    if let (Some(sid), None, None) = (sid, nt, callback) {
        // renewal
        let Ok(sid) = sid.parse::<i64>() else {
            return StatusCode::PRECONDITION_FAILED.into_response();
        };
        tracing::debug!(sid, "Renewing subscription");
        manager.renew(sid);
        return subscribe_accepted(sid, timeout_seconds, &[]);
    }

    if sid.is_none() && nt == Some("upnp:event") && callback.is_some() {
        let callback = match parse_callback(callback.expect("checked above")) {
            Ok(callback) => callback,
            Err(e) => {
                tracing::warn!("Failed to parse callback url: {e}");
                return StatusCode::PRECONDITION_FAILED.into_response();
            }
        };
        let statevar = parse_statevar(header(headers, "STATEVAR"));
        let sid = unique_sid();
        let subscription = Subscription {
            sid,
            service_id: service.service_id.clone(),
            callback,
            statevar: statevar.clone(),
            event_key: 0,
            created_at: Instant::now(),
            timeout: Duration::from_secs(timeout_seconds),
        };
        tracing::debug!(sid, service = %service.service_id, "Accepting subscription");
        manager.insert(subscription);
        return subscribe_accepted(sid, timeout_seconds, &statevar);
    }

    tracing::warn!("Received invalid subscription message: invalid combination of SID, NT, CALLBACK");
    StatusCode::BAD_REQUEST.into_response()
}

/// UNSUBSCRIBE handler. Requires a valid `SID`.
pub(crate) fn handle_unsubscribe(manager: &SubscriptionManager, headers: &HeaderMap) -> Response {
    let Some(sid) = header(headers, "SID").and_then(|sid| sid.parse::<i64>().ok()) else {
        return StatusCode::PRECONDITION_FAILED.into_response();
    };
    tracing::debug!(sid, "Received unsubscribe message");
    manager.remove(sid);
    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::Duration,
    };

    use axum::http::{HeaderMap, StatusCode};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        device_description::Service,
        scpd::{DataType, Scpd, SpecVersion, StateVariable},
    };

    use super::{handle_subscribe, handle_unsubscribe, parse_callback, parse_timeout, SubscriptionManager};

    fn switch_power() -> Service {
        let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
        scpd.add_state_variable(
            StateVariable::evented("actualState", DataType::String).with_default("0"),
        );
        scpd.add_state_variable(StateVariable::plain("hidden", DataType::String));
        Service {
            service_type: "urn:schemas-upnp-org:service:SwitchPower:1".into(),
            service_id: "urn:upnp-org:serviceId:SwitchPower".into(),
            scpd_url: "/SwitchPower".into(),
            control_url: "/SwitchPower/control".into(),
            event_sub_url: "/SwitchPower/event".into(),
            handler: None,
            scpd,
        }
    }

    fn subscribe_headers(callback: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("NT", "upnp:event".parse().unwrap());
        headers.insert("CALLBACK", format!("<{callback}>").parse().unwrap());
        headers.insert("TIMEOUT", "Second-1800".parse().unwrap());
        headers
    }

    #[test]
    fn callback_and_timeout_parsing() {
        let url = parse_callback("<http://192.168.1.5:4444/cb>, <http://fallback:1/>").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.5:4444/cb");
        assert!(parse_callback("not a url").is_err());

        assert_eq!(parse_timeout(Some("Second-300")), 300);
        assert_eq!(parse_timeout(Some("garbage")), 1800);
        assert_eq!(parse_timeout(None), 1800);
    }

    async fn read_notify(listener: &TcpListener) -> String {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 4096];
        let read = stream.read(&mut buf).await.unwrap();
        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        String::from_utf8_lossy(&buf[..read]).to_string()
    }

    #[tokio::test]
    async fn subscribe_notify_unsubscribe_flow() {
        let token = CancellationToken::new();
        let manager = SubscriptionManager::start(token.clone());
        let service = Arc::new(switch_power());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let callback = format!("http://127.0.0.1:{}/", listener.local_addr().unwrap().port());

        let response = handle_subscribe(&manager, &service, &subscribe_headers(&callback));
        assert_eq!(response.status(), StatusCode::OK);
        let sid = response
            .headers()
            .get("SID")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(!sid.is_empty());
        assert_eq!(
            response.headers().get("TIMEOUT").unwrap(),
            "Second-1800"
        );

        // first state change: SEQ starts at 0
        manager.notify_subscribers(&service, &[("actualState", "1"), ("hidden", "x")]);
        let notify = tokio::time::timeout(Duration::from_secs(2), read_notify(&listener))
            .await
            .expect("notification expected");
        assert!(notify.starts_with("NOTIFY / HTTP/1.0\r\n"));
        assert!(notify.contains(&format!("SID: {sid}\r\n")));
        assert!(notify.contains("SEQ: 0\r\n"));
        assert!(notify.contains("<actualState>1</actualState>"));
        assert!(!notify.contains("hidden"));

        // second change increments the key
        manager.notify_subscribers(&service, &[("actualState", "0")]);
        let notify = tokio::time::timeout(Duration::from_secs(2), read_notify(&listener))
            .await
            .expect("notification expected");
        assert!(notify.contains("SEQ: 1\r\n"));

        // unsubscribe stops delivery
        let mut headers = HeaderMap::new();
        headers.insert("SID", sid.parse().unwrap());
        let response = handle_unsubscribe(&manager, &headers);
        assert_eq!(response.status(), StatusCode::OK);

        manager.notify_subscribers(&service, &[("actualState", "1")]);
        let silence =
            tokio::time::timeout(Duration::from_secs(2), read_notify(&listener)).await;
        assert!(silence.is_err(), "no NOTIFY may arrive after unsubscribe");

        token.cancel();
    }

    #[tokio::test]
    async fn invalid_header_combinations_are_rejected() {
        let token = CancellationToken::new();
        let manager = SubscriptionManager::start(token.clone());
        let service = switch_power();

        // SID together with NT
        let mut headers = subscribe_headers("http://127.0.0.1:9/");
        headers.insert("SID", "123".parse().unwrap());
        let response = handle_subscribe(&manager, &service, &headers);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // broken callback
        let mut headers = HeaderMap::new();
        headers.insert("NT", "upnp:event".parse().unwrap());
        headers.insert("CALLBACK", "<not a url>".parse().unwrap());
        let response = handle_subscribe(&manager, &service, &headers);
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

        // unsubscribe without sid
        let response = handle_unsubscribe(&manager, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

        token.cancel();
    }
}
