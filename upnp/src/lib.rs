//! UPnP 1.1/2.0 device and control point stack.
//!
//! The crate hosts both roles of the protocol family:
//! - device side: SSDP advertising and search responses ([`ssdp`]), the
//!   description/control/event HTTP endpoints ([`router`]), SOAP action
//!   dispatch ([`action`]) and GENA eventing ([`eventing`]);
//! - control point side: SSDP search ([`search_client`]), SOAP invocation
//!   ([`service_client`]), GENA subscriptions ([`event_client`]) and the
//!   composed façade ([`control_point`]).
//!
//! Both roles share the [`device_description`] data model and the [`scpd`]
//! service description model.

pub mod action;
pub mod control_point;
pub mod device_description;
pub mod event_client;
pub mod eventing;
pub mod router;
pub mod scpd;
pub mod search_client;
pub mod service_client;
/// Simple Service Discovery Protocol ([SSDP](https://en.wikipedia.org/wiki/Simple_Service_Discovery_Protocol)) implementation
pub mod ssdp;
pub mod urn;
pub mod wire;

/// Server token advertised in SSDP, SOAP and GENA responses.
pub const SERVER_AGENT: &str = concat!("DFOS/0.1 UPnP/2.0 devhub/", env!("CARGO_PKG_VERSION"));
/// User agent sent with control point requests.
pub const CLIENT_AGENT: &str = concat!("DFOS/0.1 UPnP/2.0 devhub-ctl/", env!("CARGO_PKG_VERSION"));

/// Useful unitily functions for [Reader](quick_xml::Reader)
pub trait XmlReaderExt<'a> {
    fn read_event_err_eof(&mut self) -> anyhow::Result<quick_xml::events::Event<'a>>;
    fn read_to_start(&mut self) -> anyhow::Result<quick_xml::events::BytesStart<'a>>;
}

impl<'a> XmlReaderExt<'a> for quick_xml::Reader<&'a [u8]> {
    fn read_event_err_eof(&mut self) -> anyhow::Result<quick_xml::events::Event<'a>> {
        let event = self.read_event()?;
        match event {
            quick_xml::events::Event::Eof => Err(anyhow::anyhow!("early eof")),
            _ => Ok(event),
        }
    }
    fn read_to_start(&mut self) -> anyhow::Result<quick_xml::events::BytesStart<'a>> {
        loop {
            let event = self.read_event_err_eof()?.into_owned();
            if let quick_xml::events::Event::Start(e) = event {
                break Ok(e);
            }
        }
    }
}

pub type XmlWriter = quick_xml::Writer<Vec<u8>>;

/// Allows structs to serialize themselves into xml fragments
pub trait IntoXml {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()>;

    fn into_string(&self) -> std::io::Result<String> {
        let mut w = quick_xml::Writer::new(Vec::new());
        self.write_xml(&mut w)?;
        Ok(String::from_utf8(w.into_inner()).expect("produced value to be utf-8"))
    }
}

/// Allows structs to deserialize themselves from xml reader
pub trait FromXml<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self>
    where
        Self: Sized;
}

impl<T: IntoXml> IntoXml for Vec<T> {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        for el in self {
            el.write_xml(w)?;
        }
        Ok(())
    }
}
