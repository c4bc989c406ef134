//! Subscription registry owned by the eventing daemon.
//!
//! Nothing outside the daemon task ever touches the registry; readers get
//! the clones the daemon snapshots into [`NotifyJob`]s.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use reqwest::Url;

use crate::wire::{TcpPacket, UdpPacket};

/// Event keys live in `[0, 2^31 - 1)` and wrap to 1, never back to 0: zero
/// marks the first notification of a subscription's lifetime only.
pub(crate) const EVENT_KEY_MODULUS: u32 = i32::MAX as u32;

pub(crate) fn next_event_key(key: u32) -> u32 {
    let next = key + 1;
    if next >= EVENT_KEY_MODULUS {
        1
    } else {
        next
    }
}

/// Multicast eventing group (UPnP 4.3.3).
pub(crate) const MULTICAST_EVENT_HOST: &str = "239.255.255.246:7900";

/// Importance level attached to multicast event messages.
#[derive(Debug, Clone, Copy)]
#[allow(unused)]
pub enum EventLevel {
    Emergency,
    Fault,
    Warning,
    Info,
    Debug,
    General,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self {
            EventLevel::Emergency => "emergency",
            EventLevel::Fault => "fault",
            EventLevel::Warning => "warning",
            EventLevel::Info => "info",
            EventLevel::Debug => "debug",
            EventLevel::General => "general",
        };
        write!(f, "upnp:/{level}")
    }
}

/// One accepted SUBSCRIBE: who to call back, what to include, and where the
/// per-subscriber sequence currently stands.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub sid: i64,
    pub service_id: String,
    pub callback: Url,
    /// Requested variable name filter; empty means all evented variables.
    pub statevar: Vec<String>,
    pub event_key: u32,
    pub created_at: Instant,
    pub timeout: Duration,
}

impl Subscription {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.timeout
    }
}

/// A state change of one variable, annotated with the flags the fan-out
/// filter needs.
#[derive(Debug, Clone)]
pub(crate) struct VariableChange {
    pub name: String,
    pub value: String,
    pub send_events: bool,
    pub multicast: bool,
}

/// A state change announcement for one service.
#[derive(Debug)]
pub(crate) struct Notification {
    pub service_id: String,
    pub changes: Vec<VariableChange>,
}

/// A NOTIFY ready to be delivered to one subscriber.
#[derive(Debug)]
pub(crate) struct NotifyJob {
    pub sid: i64,
    pub packet: TcpPacket,
}

#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    by_sid: HashMap<i64, Subscription>,
    by_service: HashMap<String, Vec<i64>>,
}

impl SubscriptionRegistry {
    pub fn insert(&mut self, subscription: Subscription) {
        self.by_service
            .entry(subscription.service_id.clone())
            .or_default()
            .push(subscription.sid);
        self.by_sid.insert(subscription.sid, subscription);
    }

    /// Resets the timeout clock of an active subscription.
    pub fn renew(&mut self, sid: i64, now: Instant) -> bool {
        match self.by_sid.get_mut(&sid) {
            Some(subscription) => {
                subscription.created_at = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, sid: i64) -> Option<Subscription> {
        let subscription = self.by_sid.remove(&sid)?;
        if let Some(sids) = self.by_service.get_mut(&subscription.service_id) {
            sids.retain(|s| *s != sid);
        }
        Some(subscription)
    }

    /// Drops every subscription whose timeout elapsed without renewal.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<i64> {
        let expired: Vec<i64> = self
            .by_sid
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.sid)
            .collect();
        for sid in &expired {
            self.remove(*sid);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_sid.len()
    }

    /// Snapshots the subscribers of the notified service into delivery jobs.
    /// The stored event key advances by one per included variable; the job
    /// carries the key the subscription had before the advance.
    pub fn collect_notifications(&mut self, notification: &Notification) -> Vec<NotifyJob> {
        let Some(sids) = self.by_service.get(&notification.service_id) else {
            return Vec::new();
        };
        let sids = sids.clone();

        let mut jobs = Vec::new();
        for sid in sids {
            let Some(subscription) = self.by_sid.get_mut(&sid) else {
                continue;
            };
            let included: Vec<(&str, &str)> = notification
                .changes
                .iter()
                .filter(|change| {
                    change.send_events
                        && (subscription.statevar.is_empty()
                            || subscription.statevar.iter().any(|n| *n == change.name))
                })
                .map(|change| (change.name.as_str(), change.value.as_str()))
                .collect();
            if included.is_empty() {
                continue;
            }
            let seq = subscription.event_key;
            for _ in &included {
                subscription.event_key = next_event_key(subscription.event_key);
            }
            jobs.push(NotifyJob {
                sid,
                packet: generate_notify_message(&subscription.callback, sid, seq, &included),
            });
        }
        jobs
    }
}

/// Unicast NOTIFY message (UPnP 4.3.2).
pub(crate) fn generate_notify_message(
    callback: &Url,
    sid: i64,
    seq: u32,
    changes: &[(&str, &str)],
) -> TcpPacket {
    let host = callback_authority(callback);
    let mut payload = String::new();
    payload.push_str(&format!("NOTIFY {} HTTP/1.0\r\n", callback.path()));
    payload.push_str(&format!("HOST: {host}\r\n"));
    payload.push_str("CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n");
    payload.push_str("NT: upnp:event\r\n");
    payload.push_str("NTS: upnp:propchange\r\n");
    payload.push_str(&format!("SID: {sid}\r\n"));
    payload.push_str(&format!("SEQ: {seq}\r\n"));
    payload.push_str("\r\n");
    payload.push_str(&property_set(changes));

    TcpPacket::outbound(host, payload)
}

/// Multicast NOTIFY message (UPnP 4.3.3). Generated but currently never
/// emitted; the multicast eventing path is not implemented.
#[allow(unused)]
pub(crate) fn generate_multicast_notify_message(
    usn: &str,
    service_id: &str,
    seq: u32,
    level: EventLevel,
    changes: &[(&str, &str)],
) -> UdpPacket {
    let mut payload = String::new();
    payload.push_str("NOTIFY * HTTP/1.0\r\n");
    payload.push_str(&format!("HOST: {MULTICAST_EVENT_HOST}\r\n"));
    payload.push_str("CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n");
    payload.push_str(&format!("USN: {usn}\r\n"));
    payload.push_str(&format!("SVCID: {service_id}\r\n"));
    payload.push_str("NT: upnp:event\r\n");
    payload.push_str("NTS: upnp:propchange\r\n");
    payload.push_str(&format!("SEQ: {seq}\r\n"));
    payload.push_str(&format!("LVL: {level}\r\n"));
    payload.push_str("\r\n");
    payload.push_str(&property_set(changes));

    UdpPacket::outbound(
        MULTICAST_EVENT_HOST.parse().expect("valid group address"),
        payload,
    )
}

fn property_set(changes: &[(&str, &str)]) -> String {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str("<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\">\r\n");
    body.push_str("<e:property>\r\n");
    for (name, value) in changes {
        let value = quick_xml::escape::escape(*value);
        body.push_str(&format!("<{name}>{value}</{name}>\r\n"));
    }
    body.push_str("</e:property>\r\n");
    body.push_str("</e:propertyset>\r\n");
    body
}

fn callback_authority(callback: &Url) -> String {
    let host = callback.host_str().unwrap_or_default();
    match callback.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use reqwest::Url;

    use super::{
        generate_notify_message, next_event_key, Notification, Subscription,
        SubscriptionRegistry, VariableChange, EVENT_KEY_MODULUS,
    };

    fn subscription(sid: i64, statevar: Vec<String>) -> Subscription {
        Subscription {
            sid,
            service_id: "urn:upnp-org:serviceId:SwitchPower".to_string(),
            callback: Url::parse("http://192.168.1.33:4444/").unwrap(),
            statevar,
            event_key: 0,
            created_at: Instant::now(),
            timeout: Duration::from_secs(1800),
        }
    }

    fn change(name: &str, value: &str, send_events: bool) -> VariableChange {
        VariableChange {
            name: name.to_string(),
            value: value.to_string(),
            send_events,
            multicast: false,
        }
    }

    fn notification(changes: Vec<VariableChange>) -> Notification {
        Notification {
            service_id: "urn:upnp-org:serviceId:SwitchPower".to_string(),
            changes,
        }
    }

    #[test]
    fn event_keys_skip_zero_on_wrap() {
        assert_eq!(next_event_key(0), 1);
        assert_eq!(next_event_key(1), 2);
        assert_eq!(next_event_key(EVENT_KEY_MODULUS - 2), EVENT_KEY_MODULUS - 1);
        // 2^31 - 2 is the largest representable key, after it comes 1
        assert_eq!(next_event_key(EVENT_KEY_MODULUS - 1), 1);
    }

    #[test]
    fn sequence_starts_at_zero_and_increments() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(1, vec![]));

        let jobs = registry.collect_notifications(&notification(vec![change(
            "actualState",
            "1",
            true,
        )]));
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].packet.payload.contains("SEQ: 0\r\n"));
        assert!(jobs[0].packet.payload.contains("SID: 1\r\n"));
        assert!(jobs[0].packet.payload.contains("<actualState>1</actualState>\r\n"));

        let jobs = registry.collect_notifications(&notification(vec![change(
            "actualState",
            "0",
            true,
        )]));
        assert!(jobs[0].packet.payload.contains("SEQ: 1\r\n"));
    }

    #[test]
    fn key_advances_per_included_variable() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(1, vec![]));

        let jobs = registry.collect_notifications(&notification(vec![
            change("actualState", "1", true),
            change("brightness", "80", true),
        ]));
        assert!(jobs[0].packet.payload.contains("SEQ: 0\r\n"));

        let jobs = registry.collect_notifications(&notification(vec![change(
            "actualState",
            "0",
            true,
        )]));
        assert!(jobs[0].packet.payload.contains("SEQ: 2\r\n"));
    }

    #[test]
    fn non_evented_variables_are_never_delivered() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(1, vec![]));

        let jobs = registry.collect_notifications(&notification(vec![change(
            "hidden",
            "x",
            false,
        )]));
        assert!(jobs.is_empty());
    }

    #[test]
    fn statevar_filter_limits_payload() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(1, vec!["actualState".to_string()]));

        let jobs = registry.collect_notifications(&notification(vec![
            change("actualState", "1", true),
            change("temperature", "21", true),
        ]));
        assert_eq!(jobs.len(), 1);
        let payload = &jobs[0].packet.payload;
        assert!(payload.contains("<actualState>1</actualState>"));
        assert!(!payload.contains("temperature"));
    }

    #[test]
    fn removed_subscription_gets_no_jobs() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(7, vec![]));
        assert!(registry.remove(7).is_some());
        assert_eq!(registry.len(), 0);

        let jobs = registry.collect_notifications(&notification(vec![change(
            "actualState",
            "1",
            true,
        )]));
        assert!(jobs.is_empty());
    }

    #[test]
    fn renew_resets_the_clock_and_sweep_removes_expired() {
        let mut registry = SubscriptionRegistry::default();
        let mut stale = subscription(1, vec![]);
        stale.timeout = Duration::from_secs(10);
        stale.created_at = Instant::now() - Duration::from_secs(60);
        registry.insert(stale.clone());
        stale.sid = 2;
        registry.insert(stale);

        assert!(registry.renew(2, Instant::now()));
        let removed = registry.sweep_expired(Instant::now());
        assert_eq!(removed, vec![1]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn notify_message_shape() {
        let callback = Url::parse("http://192.168.1.33:4444/events").unwrap();
        let packet = generate_notify_message(&callback, 42, 0, &[("actualState", "1")]);
        assert_eq!(packet.receiver, "192.168.1.33:4444");
        let expected = "NOTIFY /events HTTP/1.0\r\n\
HOST: 192.168.1.33:4444\r\n\
CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n\
NT: upnp:event\r\n\
NTS: upnp:propchange\r\n\
SID: 42\r\n\
SEQ: 0\r\n\
\r\n\
<?xml version=\"1.0\"?>\r\n\
<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\">\r\n\
<e:property>\r\n\
<actualState>1</actualState>\r\n\
</e:property>\r\n\
</e:propertyset>\r\n";
        assert_eq!(packet.payload, expected);
    }
}
