//! GENA client, control point side: subscribes to a remote service's event
//! URL and receives NOTIFY callbacks on a local listener.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;

use crate::{
    device_description::{RootDevice, Service},
    eventing::DEFAULT_SUBSCRIPTION_TIMEOUT_SECONDS,
    wire::{local_addr, TcpPacket},
    CLIENT_AGENT,
};

/// Subscription requests are short lived; a device that does not answer in
/// this window is treated as gone.
const SUBSCRIBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Callback invoked with the textual body of every received NOTIFY.
pub type NotifyHandler = Arc<dyn Fn(String) + Send + Sync>;

/// An active subscription on a remote service. Dropping the struct does not
/// unsubscribe; use [`unsubscribe_from_service`] and [`EventSubscription::stop`].
#[derive(Debug, Clone)]
pub struct EventSubscription {
    pub sid: String,
    cancellation: CancellationToken,
}

impl EventSubscription {
    /// Stops the local callback listener.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }
}

fn notify_body(payload: &str) -> &str {
    payload
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or(payload)
}

async fn listen_for_notifications(
    listener: TcpListener,
    handler: NotifyHandler,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, source) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept notification connection: {e}");
                        continue;
                    }
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0; 4096];
                    let read = match stream.read(&mut buf).await {
                        Ok(read) => read,
                        Err(e) => {
                            tracing::warn!("Failed to read notification: {e}");
                            return;
                        }
                    };
                    let packet =
                        TcpPacket::inbound(source, String::from_utf8_lossy(&buf[..read]));
                    tracing::debug!(addr = %packet.source, "Received subscription message");
                    if let Err(e) = stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await {
                        tracing::warn!("Failed to write the notification response: {e}");
                    }
                    handler(notify_body(&packet.payload).to_string());
                });
            }
            _ = cancellation_token.cancelled() => return,
        }
    }
}

/// Subscribes to `service`'s event URL. Spawns a local TCP listener for the
/// callbacks and hands every NOTIFY body to `handler`. The listener runs
/// until `cancellation_token` (or the returned subscription) is cancelled.
pub async fn subscribe_to_service(
    root: &RootDevice,
    service: &Service,
    handler: impl Fn(String) + Send + Sync + 'static,
    statevar: &[String],
    cancellation_token: CancellationToken,
) -> anyhow::Result<EventSubscription> {
    let listener = TcpListener::bind("0.0.0.0:0")
        .await
        .context("bind callback listener")?;
    let port = listener.local_addr().context("get callback addr")?.port();
    let cancellation = cancellation_token.child_token();
    tokio::spawn(listen_for_notifications(
        listener,
        Arc::new(handler),
        cancellation.clone(),
    ));

    let callback = format!("http://{}:{}", local_addr().await?, port);
    tracing::info!("Listening for subscription messages at {callback}");

    let subscription_url = root
        .service_url(&service.event_sub_url)
        .context("resolve event subscription url")?;
    tracing::debug!("Attempting subscription at: {subscription_url}");

    let client = reqwest::Client::builder()
        .timeout(SUBSCRIBE_REQUEST_TIMEOUT)
        .build()
        .context("build http client")?;
    let mut request = client
        .request(
            reqwest::Method::from_bytes(b"SUBSCRIBE").expect("valid method"),
            subscription_url,
        )
        .header("USER-AGENT", CLIENT_AGENT)
        .header("CALLBACK", format!("<{callback}>"))
        .header("NT", "upnp:event")
        .header(
            "TIMEOUT",
            format!("Second-{DEFAULT_SUBSCRIPTION_TIMEOUT_SECONDS}"),
        );
    // STATEVAR is recommended, not required (4.1.2)
    if !statevar.is_empty() {
        request = request.header("STATEVAR", statevar.join(","));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            cancellation.cancel();
            return Err(e).context("send subscription request");
        }
    };
    if response.status() != reqwest::StatusCode::OK {
        cancellation.cancel();
        anyhow::bail!("subscription returned with code: {}", response.status());
    }

    let sid = response
        .headers()
        .get("SID")
        .and_then(|sid| sid.to_str().ok())
        .map(str::to_string)
        .filter(|sid| !sid.is_empty());
    let Some(sid) = sid else {
        cancellation.cancel();
        anyhow::bail!("subscription accepted without SID header");
    };
    tracing::info!(sid = %sid, "Subscription accepted");

    Ok(EventSubscription { sid, cancellation })
}

/// Cancels a subscription on the remote device.
pub async fn unsubscribe_from_service(
    root: &RootDevice,
    service: &Service,
    sid: &str,
) -> anyhow::Result<()> {
    let unsubscription_url = root
        .service_url(&service.event_sub_url)
        .context("resolve event subscription url")?;
    tracing::debug!("Attempting unsubscription at: {unsubscription_url}");

    let client = reqwest::Client::builder()
        .timeout(SUBSCRIBE_REQUEST_TIMEOUT)
        .build()
        .context("build http client")?;
    let response = client
        .request(
            reqwest::Method::from_bytes(b"UNSUBSCRIBE").expect("valid method"),
            unsubscription_url,
        )
        .header("SID", sid)
        .send()
        .await
        .context("send unsubscription request")?;

    anyhow::ensure!(
        response.status() == reqwest::StatusCode::OK,
        "unsubscription returned with code: {}",
        response.status()
    );
    tracing::info!(sid = %sid, "Unsubscribed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::notify_body;

    #[test]
    fn body_is_split_from_headers() {
        let payload = "NOTIFY / HTTP/1.0\r\n\
HOST: 127.0.0.1:4444\r\n\
NT: upnp:event\r\n\
NTS: upnp:propchange\r\n\
SID: 17\r\n\
SEQ: 0\r\n\
\r\n\
<?xml version=\"1.0\"?>\r\n\
<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\"><e:property><actualState>1</actualState></e:property></e:propertyset>\r\n";
        let body = notify_body(payload);
        assert!(body.starts_with("<?xml"));
        assert!(body.contains("<actualState>1</actualState>"));

        // headerless payloads are handed over untouched
        assert_eq!(notify_body("plain"), "plain");
    }
}
