//! Device description data model and its XML document form.
//!
//! A [`RootDevice`] is built once at process startup and never mutated
//! afterwards; service handlers are the only mutable behavior hanging off
//! of it.

use std::{fmt::Display, net::IpAddr, str::FromStr, sync::Arc};

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

use crate::{
    scpd::{Scpd, SpecVersion},
    FromXml, IntoXml, XmlReaderExt,
};

pub const DEVICE_XMLNS: &str = "urn:schemas-upnp-org:device-1-0";

/// Synchronous action handler a service owner registers. It runs on a
/// blocking worker, bounded by the SOAP dispatch timeout.
pub type ServiceHandler = Arc<dyn Fn(&[device::Argument]) -> device::Response + Send + Sync>;

/// Wraps a closure into the [`ServiceHandler`] shape.
pub fn service_handler<F>(f: F) -> ServiceHandler
where
    F: Fn(&[device::Argument]) -> device::Response + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone)]
pub struct RootDevice {
    pub spec_version: SpecVersion,
    /// Deprecated from UPnP 1.1 onwards, still emitted by plenty of devices
    /// in the wild. Never serialized, only kept as a parse fallback for URL
    /// construction.
    pub url_base: Option<String>,
    pub device: DeviceSpec,
}

impl RootDevice {
    pub fn new(device: DeviceSpec) -> Self {
        Self {
            spec_version: SpecVersion::upnp_v2_0(),
            url_base: None,
            device,
        }
    }

    /// Every service of the root and of all embedded devices, depth first.
    pub fn all_services(&self) -> impl Iterator<Item = &Service> {
        self.device.all_services()
    }

    /// The root and all embedded devices, depth first.
    pub fn all_devices(&self) -> impl Iterator<Item = &DeviceSpec> {
        self.device.all_devices()
    }

    pub fn find_service_by_type(&self, service_type: &str) -> Option<&Service> {
        self.all_services().find(|s| s.service_type == service_type)
    }

    pub fn find_service_by_id(&self, service_id: &str) -> Option<&Service> {
        self.all_services().find(|s| s.service_id == service_id)
    }

    /// Base URL for resolving the relative service URLs. The presentation
    /// URL wins; `URLBase` is the pre-1.1 fallback.
    pub fn base_url(&self) -> anyhow::Result<reqwest::Url> {
        let presentation = self
            .device
            .presentation_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty());
        if let Some(presentation) = presentation {
            match reqwest::Url::parse(presentation) {
                Ok(url) => return Ok(url),
                Err(e) => {
                    tracing::warn!("Failed to parse presentation url {presentation}: {e}");
                }
            }
        }
        let url_base = self
            .url_base
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .context("device without valid url")?;
        reqwest::Url::parse(url_base).context("parse URLBase")
    }

    /// Absolute URL of a service endpoint given its relative path.
    pub fn service_url(&self, relative: &str) -> anyhow::Result<reqwest::Url> {
        let mut url = self.base_url()?;
        url.set_path(relative);
        Ok(url)
    }

    /// Renders the description document served at the presentation URL.
    pub fn into_xml(&self) -> anyhow::Result<String> {
        let mut w = quick_xml::Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
        let root =
            BytesStart::new("root").with_attributes([("xmlns", DEVICE_XMLNS), ("configId", "1")]);
        let root_end = root.to_end().into_owned();
        w.write_event(Event::Start(root))?;
        self.spec_version.write_xml(&mut w)?;
        self.device.write_xml(&mut w)?;
        w.write_event(Event::End(root_end))?;
        Ok(String::from_utf8(w.into_inner())?)
    }
}

impl<'a> FromXml<'a> for RootDevice {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let root = r.read_to_start()?.into_owned();
        anyhow::ensure!(root.local_name().as_ref() == b"root");

        let mut spec_version = None;
        let mut url_base = None;
        let mut device = None;

        loop {
            let event = r.read_event_err_eof()?.into_owned();
            match event {
                Event::Start(start) => match start.local_name().as_ref() {
                    b"specVersion" => {
                        spec_version = Some(read_spec_version(r)?);
                    }
                    b"URLBase" => {
                        url_base = Some(r.read_text(start.name())?.to_string());
                    }
                    b"device" => {
                        device = Some(DeviceSpec::read_xml(r)?);
                    }
                    _ => {
                        r.read_to_end(start.name())?;
                    }
                },
                Event::End(end) if end.local_name().as_ref() == b"root" => break,
                _ => {}
            }
        }

        Ok(Self {
            spec_version: spec_version.context("spec version")?,
            url_base,
            device: device.context("device")?,
        })
    }
}

// The <specVersion> start tag is already consumed by the caller's loop.
fn read_spec_version(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<SpecVersion> {
    let mut major = None;
    let mut minor = None;
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) => {
                let end = start.name();
                match start.local_name().as_ref() {
                    b"major" => major = Some(r.read_text(end)?.parse()?),
                    b"minor" => minor = Some(r.read_text(end)?.parse()?),
                    _ => {
                        r.read_to_end(end)?;
                    }
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"specVersion" => break,
            _ => {}
        }
    }
    Ok(SpecVersion {
        major: major.context("spec version major")?,
        minor: minor.context("spec version minor")?,
    })
}

#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub device_type: String,
    pub udn: Udn,
    pub friendly_name: String,
    /// Manufacturer name. Should be < 64 characters.
    pub manufacturer: String,
    pub manufacturer_url: Option<String>,
    pub model_name: String,
    pub model_url: Option<String>,
    /// Should be < 128 characters
    pub model_description: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub upc: Option<String>,
    pub presentation_url: Option<String>,
    pub icon_list: Vec<Icon>,
    pub service_list: Vec<Service>,
    pub embedded_devices: Vec<DeviceSpec>,
}

impl DeviceSpec {
    pub fn all_services(&self) -> Box<dyn Iterator<Item = &Service> + '_> {
        let self_services = self.service_list.iter();
        let nested = self.embedded_devices.iter().flat_map(|d| d.all_services());
        Box::new(self_services.chain(nested))
    }

    pub fn all_devices(&self) -> Box<dyn Iterator<Item = &DeviceSpec> + '_> {
        let nested = self.embedded_devices.iter().flat_map(|d| d.all_devices());
        Box::new(std::iter::once(self).chain(nested))
    }

    /// Path component of the presentation URL, used for route registration.
    pub fn presentation_path(&self) -> Option<String> {
        let url = self.presentation_url.as_deref()?;
        reqwest::Url::parse(url)
            .ok()
            .map(|url| url.path().to_string())
    }
}

impl IntoXml for DeviceSpec {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("device");
        let parent_end = parent.to_end().into_owned();
        w.write_event(Event::Start(parent)).map_err(std::io::Error::other)?;
        w.create_element("deviceType")
            .write_text_content(BytesText::new(&self.device_type)).map_err(std::io::Error::other)?;
        let udn = self.udn.to_string();
        w.create_element("UDN")
            .write_text_content(BytesText::new(&udn)).map_err(std::io::Error::other)?;
        w.create_element("friendlyName")
            .write_text_content(BytesText::new(&self.friendly_name)).map_err(std::io::Error::other)?;
        w.create_element("manufacturer")
            .write_text_content(BytesText::new(&self.manufacturer)).map_err(std::io::Error::other)?;
        if let Some(manufacturer_url) = &self.manufacturer_url {
            w.create_element("manufacturerURL")
                .write_text_content(BytesText::new(manufacturer_url)).map_err(std::io::Error::other)?;
        }
        w.create_element("modelName")
            .write_text_content(BytesText::new(&self.model_name)).map_err(std::io::Error::other)?;
        if let Some(model_url) = &self.model_url {
            w.create_element("modelURL")
                .write_text_content(BytesText::new(model_url)).map_err(std::io::Error::other)?;
        }
        if let Some(model_description) = &self.model_description {
            w.create_element("modelDescription")
                .write_text_content(BytesText::new(model_description)).map_err(std::io::Error::other)?;
        }
        if let Some(model_number) = &self.model_number {
            w.create_element("modelNumber")
                .write_text_content(BytesText::new(model_number)).map_err(std::io::Error::other)?;
        }
        if let Some(serial_number) = &self.serial_number {
            w.create_element("serialNumber")
                .write_text_content(BytesText::new(serial_number)).map_err(std::io::Error::other)?;
        }
        if let Some(upc) = &self.upc {
            w.create_element("UPC")
                .write_text_content(BytesText::new(upc)).map_err(std::io::Error::other)?;
        }
        if let Some(presentation_url) = &self.presentation_url {
            w.create_element("presentationURL")
                .write_text_content(BytesText::new(presentation_url)).map_err(std::io::Error::other)?;
        }
        w.create_element("iconList").write_inner_content(|w| {
            for icon in &self.icon_list {
                w.write_serializable("icon", icon)
                    .expect("serialization not fail");
            }
            Ok::<(), quick_xml::Error>(())
        })
        .map_err(std::io::Error::other)?;
        w.create_element("serviceList").write_inner_content(|w| {
            for service in &self.service_list {
                service.write_xml(w)?;
            }
            Ok::<(), quick_xml::Error>(())
        })
        .map_err(std::io::Error::other)?;
        if !self.embedded_devices.is_empty() {
            w.create_element("deviceList").write_inner_content(|w| {
                for embedded in &self.embedded_devices {
                    embedded.write_xml(w)?;
                }
                Ok::<(), quick_xml::Error>(())
            })
            .map_err(std::io::Error::other)?;
        }
        w.write_event(Event::End(parent_end))
            .map_err(std::io::Error::other)
    }
}

impl<'a> FromXml<'a> for DeviceSpec {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut device_type = None;
        let mut udn = None;
        let mut friendly_name = None;
        let mut manufacturer = None;
        let mut manufacturer_url = None;
        let mut model_name = None;
        let mut model_url = None;
        let mut model_description = None;
        let mut model_number = None;
        let mut serial_number = None;
        let mut upc = None;
        let mut presentation_url = None;
        let mut icon_list = Vec::new();
        let mut service_list = Vec::new();
        let mut embedded_devices = Vec::new();

        loop {
            let event = r.read_event_err_eof()?.into_owned();
            match event {
                Event::Start(start) => {
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"deviceType" => device_type = Some(r.read_text(end_name)?.to_string()),
                        b"UDN" => udn = Some(Udn::from_str(&r.read_text(end_name)?)?),
                        b"friendlyName" => friendly_name = Some(r.read_text(end_name)?.to_string()),
                        b"manufacturer" => manufacturer = Some(r.read_text(end_name)?.to_string()),
                        b"manufacturerURL" => {
                            manufacturer_url = Some(r.read_text(end_name)?.to_string())
                        }
                        b"modelName" => model_name = Some(r.read_text(end_name)?.to_string()),
                        b"modelURL" => model_url = Some(r.read_text(end_name)?.to_string()),
                        b"modelDescription" => {
                            model_description = Some(r.read_text(end_name)?.to_string())
                        }
                        b"modelNumber" => model_number = Some(r.read_text(end_name)?.to_string()),
                        b"serialNumber" => serial_number = Some(r.read_text(end_name)?.to_string()),
                        b"UPC" => upc = Some(r.read_text(end_name)?.to_string()),
                        b"presentationURL" => {
                            presentation_url = Some(r.read_text(end_name)?.to_string())
                        }
                        b"iconList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(start) => {
                                    anyhow::ensure!(start.local_name().as_ref() == b"icon");
                                    icon_list.push(Icon::read_xml(r)?);
                                }
                                Event::End(end) => {
                                    anyhow::ensure!(end.local_name().as_ref() == b"iconList");
                                    break;
                                }
                                Event::Text(_) => {}
                                other => {
                                    anyhow::bail!("expected icon or list end, got {other:?}")
                                }
                            }
                        },
                        b"serviceList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(start) => {
                                    anyhow::ensure!(start.local_name().as_ref() == b"service");
                                    service_list.push(Service::read_xml(r)?);
                                }
                                Event::End(end) => {
                                    anyhow::ensure!(end.local_name().as_ref() == b"serviceList");
                                    break;
                                }
                                Event::Text(_) => {}
                                other => {
                                    anyhow::bail!("expected service or list end, got {other:?}")
                                }
                            }
                        },
                        b"deviceList" => loop {
                            match r.read_event_err_eof()?.into_owned() {
                                Event::Start(start) => {
                                    anyhow::ensure!(start.local_name().as_ref() == b"device");
                                    embedded_devices.push(DeviceSpec::read_xml(r)?);
                                }
                                Event::End(end) => {
                                    anyhow::ensure!(end.local_name().as_ref() == b"deviceList");
                                    break;
                                }
                                Event::Text(_) => {}
                                other => {
                                    anyhow::bail!("expected device or list end, got {other:?}")
                                }
                            }
                        },
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(
                        end.local_name().as_ref() == b"device",
                        "expected device end, got {end:?}",
                    );
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            device_type: device_type.context("device type")?,
            udn: udn.context("udn")?,
            friendly_name: friendly_name.context("friendly name")?,
            manufacturer: manufacturer.context("manufacturer name")?,
            manufacturer_url,
            model_name: model_name.context("model name")?,
            model_url,
            model_description,
            model_number,
            serial_number,
            upc,
            presentation_url,
            icon_list,
            service_list,
            embedded_devices,
        })
    }
}

/// Unique Device Name. Universally-unique identifier for the device, whether
/// root or embedded. Shall be the same over time for a specific device
/// instance (i.e., shall survive reboots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Udn(String);

impl Udn {
    pub fn new(uuid: uuid::Uuid) -> Self {
        Self(format!("uuid:{uuid}"))
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.0
            .strip_prefix("uuid:")
            .expect("constructed with prefix")
            .parse()
            .expect("constructed from uuid")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Udn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Udn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid: uuid::Uuid = s
            .strip_prefix("uuid:")
            .context("udn should start with uuid:")?
            .parse()
            .context("parse uuid")?;
        Ok(Self::new(uuid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    pub mimetype: String,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub url: String,
}

impl<'a> FromXml<'a> for Icon {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut mimetype = None;
        let mut width = None;
        let mut height = None;
        let mut depth = None;
        let mut url = None;

        loop {
            match r.read_event_err_eof()?.into_owned() {
                Event::Start(start) => {
                    let end = start.name();
                    match start.local_name().as_ref() {
                        b"mimetype" => mimetype = Some(r.read_text(end)?.to_string()),
                        b"width" => width = Some(r.read_text(end)?.parse()?),
                        b"height" => height = Some(r.read_text(end)?.parse()?),
                        b"depth" => depth = Some(r.read_text(end)?.parse()?),
                        b"url" => url = Some(r.read_text(end)?.to_string()),
                        _ => {
                            r.read_to_end(end)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"icon");
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            mimetype: mimetype.context("get mimetype")?,
            width: width.context("get width")?,
            height: height.context("get height")?,
            depth: depth.context("get depth")?,
            url: url.context("get url")?,
        })
    }
}

/// A service entry of a device: its identity, the three endpoint URLs
/// (distinct across all services of a root), the control handler and the
/// service description document.
#[derive(Clone)]
pub struct Service {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
    pub handler: Option<ServiceHandler>,
    pub scpd: Scpd,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("service_type", &self.service_type)
            .field("service_id", &self.service_id)
            .field("scpd_url", &self.scpd_url)
            .field("control_url", &self.control_url)
            .field("event_sub_url", &self.event_sub_url)
            .field("handler", &self.handler.as_ref().map(|_| "<handler>"))
            .field("scpd", &self.scpd)
            .finish()
    }
}

impl IntoXml for Service {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("service");
        let parent_end = parent.to_end().into_owned();
        w.write_event(Event::Start(parent)).map_err(std::io::Error::other)?;
        w.create_element("serviceType")
            .write_text_content(BytesText::new(&self.service_type)).map_err(std::io::Error::other)?;
        w.create_element("serviceId")
            .write_text_content(BytesText::new(&self.service_id)).map_err(std::io::Error::other)?;
        w.create_element("SCPDURL")
            .write_text_content(BytesText::new(&self.scpd_url)).map_err(std::io::Error::other)?;
        w.create_element("controlURL")
            .write_text_content(BytesText::new(&self.control_url)).map_err(std::io::Error::other)?;
        w.create_element("eventSubURL")
            .write_text_content(BytesText::new(&self.event_sub_url)).map_err(std::io::Error::other)?;
        w.write_event(Event::End(parent_end))
            .map_err(std::io::Error::other)
    }
}

impl<'a> FromXml<'a> for Service {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut service_type = None;
        let mut service_id = None;
        let mut scpd_url = None;
        let mut control_url = None;
        let mut event_sub_url = None;

        loop {
            match r.read_event_err_eof()?.into_owned() {
                Event::Start(start) => {
                    let end = start.name();
                    match start.local_name().as_ref() {
                        b"serviceType" => service_type = Some(r.read_text(end)?.to_string()),
                        b"serviceId" => service_id = Some(r.read_text(end)?.to_string()),
                        b"SCPDURL" => scpd_url = Some(r.read_text(end)?.to_string()),
                        b"controlURL" => control_url = Some(r.read_text(end)?.to_string()),
                        b"eventSubURL" => event_sub_url = Some(r.read_text(end)?.to_string()),
                        _ => {
                            r.read_to_end(end)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"service");
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            service_type: service_type.context("service type")?,
            service_id: service_id.context("service id")?,
            scpd_url: scpd_url.context("scpdurl")?,
            control_url: control_url.context("control url")?,
            event_sub_url: event_sub_url.context("event sub url")?,
            handler: None,
            scpd: Scpd::default(),
        })
    }
}

/// Builds the presentation URL a hosted device advertises.
pub fn presentation_url(addr: IpAddr, port: u16, path: &str) -> String {
    format!("http://{addr}:{port}{path}")
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::{scpd::SpecVersion, FromXml};

    use super::{DeviceSpec, Icon, RootDevice, Service, Udn};

    fn smart_light() -> RootDevice {
        let uuid = uuid::Uuid::from_str("55076f6e-6b79-4d65-6401-00d0b811d10b").unwrap();
        RootDevice {
            spec_version: SpecVersion::upnp_v2_0(),
            url_base: None,
            device: DeviceSpec {
                device_type: "urn:schemas-upnp-org:device:BinaryLight:1".into(),
                udn: Udn::new(uuid),
                friendly_name: "SmartLight".into(),
                manufacturer: "DF Corp.".into(),
                manufacturer_url: Some("http://superlight.df".into()),
                model_name: "SmartLight pro plus".into(),
                model_url: Some("http://superlight.df/smartlight-pro-plus".into()),
                model_description: Some("The best smart light".into()),
                model_number: Some("422".into()),
                serial_number: Some("123-456-789-0".into()),
                upc: Some("12345678900987654321".into()),
                presentation_url: Some("http://192.168.1.10:8080/device.xml".into()),
                icon_list: vec![Icon {
                    mimetype: "image/jpeg".into(),
                    width: 48,
                    height: 48,
                    depth: 24,
                    url: "/images/icon-48x48.jpg".into(),
                }],
                service_list: vec![Service {
                    service_type: "urn:schemas-upnp-org:service:SwitchPower:1".into(),
                    service_id: "urn:upnp-org:serviceId:SwitchPower".into(),
                    scpd_url: "/SwitchPower".into(),
                    control_url: "/SwitchPower/control".into(),
                    event_sub_url: "/SwitchPower/event".into(),
                    handler: None,
                    scpd: Default::default(),
                }],
                embedded_devices: vec![],
            },
        }
    }

    #[test]
    fn description_round_trip() {
        let root = smart_light();
        let xml = root.into_xml().unwrap();
        assert!(xml.contains("<root xmlns=\"urn:schemas-upnp-org:device-1-0\" configId=\"1\">"));

        let parsed = RootDevice::read_xml(&mut quick_xml::Reader::from_str(&xml)).unwrap();
        assert_eq!(parsed.spec_version, root.spec_version);
        assert_eq!(parsed.device.udn, root.device.udn);
        assert_eq!(parsed.device.device_type, root.device.device_type);
        assert_eq!(parsed.device.friendly_name, root.device.friendly_name);
        assert_eq!(parsed.device.upc, root.device.upc);
        assert_eq!(parsed.device.presentation_url, root.device.presentation_url);
        assert_eq!(parsed.device.icon_list, root.device.icon_list);
        let service = &parsed.device.service_list[0];
        assert_eq!(service.service_id, "urn:upnp-org:serviceId:SwitchPower");
        assert_eq!(service.control_url, "/SwitchPower/control");
    }

    #[test]
    fn parse_tolerates_unknown_and_missing_optionals() {
        let raw = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" configId="1">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <URLBase>http://192.168.1.20:49152/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:BinaryLight:1</deviceType>
    <UDN>uuid:ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241</UDN>
    <friendlyName>Hall light</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>L-1</modelName>
    <vendorExtension><whatever/></vendorExtension>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:SwitchPower:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:SwitchPower</serviceId>
        <SCPDURL>/SwitchPower.xml</SCPDURL>
        <controlURL>/SwitchPower/Control</controlURL>
        <eventSubURL>/SwitchPower/Event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;
        let parsed = RootDevice::read_xml(&mut quick_xml::Reader::from_str(raw)).unwrap();
        assert_eq!(parsed.url_base.as_deref(), Some("http://192.168.1.20:49152/"));
        assert!(parsed.device.presentation_url.is_none());
        assert_eq!(parsed.device.service_list.len(), 1);

        // No presentation URL, so URLBase is the fallback base.
        let url = parsed.service_url("/SwitchPower/Event").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.20:49152/SwitchPower/Event");
    }

    #[test]
    fn presentation_url_wins_over_url_base() {
        let mut root = smart_light();
        root.url_base = Some("http://10.0.0.1:9999/".into());
        let url = root.service_url("/SwitchPower/control").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.10:8080/SwitchPower/control");
    }
}
