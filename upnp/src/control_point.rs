//! Control point façade: composes SSDP search, description fetch, SOAP
//! invocation and GENA subscriptions behind one handle.

use std::collections::HashMap;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::{
    device_description::{RootDevice, Service},
    event_client::{self, EventSubscription},
    scpd::{DataType, FormalAction, Scpd},
    search_client::{MSearchResult, SearchClient},
    service_client::{ActionCallError, ServiceClient},
    FromXml,
};

#[derive(Debug)]
pub struct ControlPoint {
    search: SearchClient,
    http: reqwest::Client,
    /// Active event subscriptions keyed by `(UDN, ServiceId)`.
    subscriptions: HashMap<(String, String), EventSubscription>,
}

impl ControlPoint {
    pub async fn new() -> anyhow::Result<Self> {
        Ok(Self {
            search: SearchClient::bind().await?,
            http: reqwest::Client::new(),
            subscriptions: HashMap::new(),
        })
    }

    /// Raw SSDP search.
    pub async fn search(&self, st: &str, mx: u64) -> anyhow::Result<Vec<MSearchResult>> {
        self.search.search(st, mx).await
    }

    /// Searches for `st` and fetches the description of every responder.
    /// Responders whose description cannot be fetched or parsed are skipped.
    pub async fn discover(&self, st: &str, mx: u64) -> anyhow::Result<Vec<RootDevice>> {
        let results = self.search(st, mx).await?;
        let mut devices: HashMap<String, RootDevice> = HashMap::new();
        for result in results {
            match self.describe(&result.location).await {
                Ok(root) => {
                    devices.insert(root.device.udn.to_string(), root);
                }
                Err(e) => {
                    tracing::debug!(location = %result.location, "Skipping device: {e}");
                }
            }
        }
        Ok(devices.into_values().collect())
    }

    /// Fetches and parses a device description document.
    pub async fn describe(&self, location: &str) -> anyhow::Result<RootDevice> {
        let text = self.fetch_text(location).await?;
        let mut root = RootDevice::read_xml(&mut quick_xml::Reader::from_str(&text))
            .context("parse device description")?;
        // Real devices frequently omit both presentationURL and URLBase; the
        // description location is then the only usable base.
        if root.base_url().is_err() {
            let mut origin = reqwest::Url::parse(location).context("parse location url")?;
            origin.set_path("/");
            root.url_base = Some(origin.to_string());
        }
        Ok(root)
    }

    /// Builds a SOAP client for one of the device's services by fetching
    /// and parsing its SCPD document.
    pub async fn service_client(
        &self,
        root: &RootDevice,
        service: &Service,
    ) -> anyhow::Result<ServiceClient> {
        let scpd_url = root.service_url(&service.scpd_url)?;
        let text = self.fetch_text(scpd_url.as_str()).await?;
        let scpd =
            Scpd::read_xml(&mut quick_xml::Reader::from_str(&text)).context("parse scpd")?;
        let control_url = root.service_url(&service.control_url)?;
        Ok(ServiceClient::new(
            scpd,
            service.service_type.clone(),
            control_url,
        ))
    }

    /// Subscribes to the service's events and remembers the SID under
    /// `(UDN, ServiceId)`.
    pub async fn subscribe(
        &mut self,
        root: &RootDevice,
        service: &Service,
        handler: impl Fn(String) + Send + Sync + 'static,
        statevar: &[String],
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<String> {
        let subscription =
            event_client::subscribe_to_service(root, service, handler, statevar, cancellation_token)
                .await?;
        let sid = subscription.sid.clone();
        self.subscriptions.insert(
            (root.device.udn.to_string(), service.service_id.clone()),
            subscription,
        );
        Ok(sid)
    }

    /// Unsubscribes the subscription remembered for `(UDN, ServiceId)` and
    /// stops its callback listener.
    pub async fn unsubscribe(&mut self, root: &RootDevice, service: &Service) -> anyhow::Result<()> {
        let key = (root.device.udn.to_string(), service.service_id.clone());
        let subscription = self
            .subscriptions
            .remove(&key)
            .context("no subscription for this service")?;
        let result =
            event_client::unsubscribe_from_service(root, service, &subscription.sid).await;
        subscription.stop();
        result
    }

    async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        let request = self
            .http
            .request(reqwest::Method::GET, url)
            .build()
            .context("build request")?;
        let response = self.http.execute(request).await.context("fetch url")?;
        response.text().await.context("read response body")
    }
}

fn is_string_variable(scpd: &Scpd, action_argument: &crate::scpd::FormalArgument) -> bool {
    scpd.state_variable(action_argument.related_variable)
        .map(|variable| variable.data_type == DataType::String)
        .unwrap_or(false)
}

/// A setter-shaped action: exactly one string in-argument and one string
/// out-argument.
pub fn find_setter(scpd: &Scpd) -> Option<&FormalAction> {
    scpd.actions().iter().find(|action| {
        let ins: Vec<_> = action.in_arguments().collect();
        let outs: Vec<_> = action.out_arguments().collect();
        ins.len() == 1
            && outs.len() == 1
            && is_string_variable(scpd, ins[0])
            && is_string_variable(scpd, outs[0])
    })
}

/// A getter-shaped action: no in-arguments, one string out-argument.
pub fn find_getter(scpd: &Scpd) -> Option<&FormalAction> {
    scpd.actions().iter().find(|action| {
        let outs: Vec<_> = action.out_arguments().collect();
        action.in_arguments().next().is_none()
            && outs.len() == 1
            && is_string_variable(scpd, outs[0])
    })
}

/// A remote UPnP service seen through the transport-neutral [`device::Device`]
/// surface. SetState/GetState are synthesized from setter/getter shaped
/// actions when the service has them.
pub struct UpnpDevice {
    friendly_name: String,
    client: ServiceClient,
    setter: Option<String>,
    getter: Option<String>,
}

impl UpnpDevice {
    pub fn from_service(friendly_name: impl Into<String>, client: ServiceClient) -> Self {
        let setter = find_setter(&client.scpd).map(|a| a.name.clone());
        let getter = find_getter(&client.scpd).map(|a| a.name.clone());
        Self {
            friendly_name: friendly_name.into(),
            client,
            setter,
            getter,
        }
    }

    fn error_response(error: ActionCallError) -> device::Response {
        match error {
            ActionCallError::Fault(fault) => device::Response::error(
                fault.code.code(),
                fault.description.unwrap_or_default(),
            ),
            other => device::Response::error(501, other.to_string()),
        }
    }

    fn first_out_value(outs: Vec<device::Argument>) -> device::Response {
        device::Response::ok(outs.into_iter().next().map(|a| a.value).unwrap_or_default())
    }

    pub async fn set_state(&self, value: &str) -> device::Response {
        let Some(setter) = &self.setter else {
            return device::Response::error(602, "service has no setter action");
        };
        let action = self
            .client
            .scpd
            .find_action(setter)
            .expect("setter derived from scpd");
        let argument_name = action
            .in_arguments()
            .next()
            .expect("setter has one in argument")
            .name
            .clone();
        match self
            .client
            .invoke(setter, &[device::Argument::new(argument_name, value)])
            .await
        {
            Ok(outs) => Self::first_out_value(outs),
            Err(e) => Self::error_response(e),
        }
    }

    pub async fn get_state(&self) -> device::Response {
        let Some(getter) = &self.getter else {
            return device::Response::error(602, "service has no getter action");
        };
        match self.client.invoke(getter, &[]).await {
            Ok(outs) => Self::first_out_value(outs),
            Err(e) => Self::error_response(e),
        }
    }
}

#[async_trait::async_trait]
impl device::Device for UpnpDevice {
    fn name(&self) -> &str {
        &self.friendly_name
    }

    async fn invoke(&self, arguments: &[device::Argument]) -> device::Response {
        match arguments.first() {
            Some(argument) => self.set_state(&argument.value).await,
            None => self.get_state().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::scpd::{DataType, FormalAction, FormalArgument, Scpd, SpecVersion, StateVariable};

    use super::{find_getter, find_setter};

    fn switch_power_scpd() -> Scpd {
        let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
        let state = scpd.add_state_variable(
            StateVariable::evented("actualState", DataType::String).with_default("0"),
        );
        let count = scpd.add_state_variable(StateVariable::plain("toggleCount", DataType::Ui4));
        scpd.add_action(FormalAction::new(
            "GetToggleCount",
            vec![FormalArgument::output("Count", count)],
        ))
        .unwrap();
        scpd.add_action(FormalAction::new(
            "Turn",
            vec![
                FormalArgument::input("StateValue", state),
                FormalArgument::output("ActualValue", state),
            ],
        ))
        .unwrap();
        scpd.add_action(FormalAction::new(
            "GetStatus",
            vec![FormalArgument::output("ResultStatus", state)],
        ))
        .unwrap();
        scpd
    }

    #[test]
    fn setter_and_getter_recognition() {
        let scpd = switch_power_scpd();
        assert_eq!(find_setter(&scpd).unwrap().name, "Turn");
        // GetToggleCount returns an integer, so GetStatus is the getter
        assert_eq!(find_getter(&scpd).unwrap().name, "GetStatus");
    }

    #[test]
    fn services_without_matching_shapes_have_none() {
        let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
        let count = scpd.add_state_variable(StateVariable::plain("toggleCount", DataType::Ui4));
        scpd.add_action(FormalAction::new(
            "GetToggleCount",
            vec![FormalArgument::output("Count", count)],
        ))
        .unwrap();
        assert!(find_setter(&scpd).is_none());
        assert!(find_getter(&scpd).is_none());
    }
}
