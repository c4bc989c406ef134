use core::str;
use std::str::FromStr;

use anyhow::Context;
use axum::{http::HeaderMap, response::IntoResponse};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use reqwest::StatusCode;

use crate::{wire::http_date, FromXml, IntoXml, XmlReaderExt, XmlWriter, SERVER_AGENT};

pub const UPNP_CONTROL_XMLNS: &str = "urn:schemas-upnp-org:control-1-0";
pub const SOAP_ENVELOPE_XMLNS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// SOAP 1.1 envelope wrapper around a body payload.
#[derive(Debug)]
pub struct SoapMessage<T> {
    inner: T,
}

impl<T> SoapMessage<T> {
    pub fn new(payload: T) -> Self {
        Self { inner: payload }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<'a, T: FromXml<'a>> SoapMessage<T> {
    pub fn from_xml(raw_xml: &'a [u8]) -> anyhow::Result<Self> {
        use quick_xml::Reader;
        let mut r = Reader::from_reader(raw_xml);
        Self::read_xml(&mut r)
    }
}

impl<'a, T: FromXml<'a>> FromXml<'a> for SoapMessage<T> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let envelope = r.read_to_start()?.into_owned();
        anyhow::ensure!(envelope.local_name().as_ref() == b"Envelope");
        let body = r.read_to_start()?.into_owned();
        anyhow::ensure!(body.local_name().as_ref() == b"Body");

        let payload = T::read_xml(r)?;

        r.read_to_end(body.name())?;
        r.read_to_end(envelope.name())?;
        Ok(Self { inner: payload })
    }
}

impl<T: IntoXml> SoapMessage<T> {
    pub fn into_xml(self) -> anyhow::Result<String> {
        use quick_xml::Writer;
        let mut w = Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let envelope = BytesStart::new("s:Envelope").with_attributes([
            ("xmlns:s", SOAP_ENVELOPE_XMLNS),
            ("s:encodingStyle", SOAP_ENCODING),
        ]);
        let envelope_end = envelope.to_end().into_owned();
        w.write_event(Event::Start(envelope.clone()))?;

        let body = BytesStart::new("s:Body");
        let body_end = body.to_end().into_owned();
        w.write_event(Event::Start(body))?;

        self.inner.write_xml(&mut w)?;

        w.write_event(Event::End(body_end))?;
        w.write_event(Event::End(envelope_end))?;
        Ok(String::from_utf8(w.into_inner())?)
    }
}

impl<T: IntoXml> IntoResponse for SoapMessage<T> {
    fn into_response(self) -> axum::response::Response {
        let mut header_map = HeaderMap::new();
        header_map.insert(
            axum::http::header::CONTENT_TYPE,
            "text/xml; charset=\"utf-8\"".parse().expect("valid header"),
        );
        if let Ok(date) = http_date().parse() {
            header_map.insert(axum::http::header::DATE, date);
        }
        header_map.insert(
            axum::http::header::SERVER,
            SERVER_AGENT.parse().expect("valid header"),
        );
        let body = self.into_xml().expect("serialization not fail");
        (header_map, body).into_response()
    }
}

/// An invoked action inside a SOAP request body: the action's local name and
/// its actual in-arguments in document order.
#[derive(Debug, Clone)]
pub struct ActionPayload {
    pub name: String,
    pub arguments: Vec<device::Argument>,
}

impl<'a> FromXml<'a> for ActionPayload {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let action_tag = r.read_to_start()?.into_owned();
        let action_tag_end = action_tag.to_end().into_owned();
        let action_name = String::from_utf8(action_tag.local_name().into_inner().to_vec())?;
        let mut arguments = Vec::new();

        loop {
            let next = r.read_event_err_eof()?.into_owned();
            match next {
                Event::Start(var) => {
                    let name = String::from_utf8(var.local_name().into_inner().to_vec())?;
                    let value = r.read_text(var.name())?;
                    arguments.push(device::Argument::new(name, value.to_string()));
                }
                Event::End(end) if end == action_tag_end => {
                    break;
                }
                _ => (),
            }
        }

        Ok(Self {
            name: action_name,
            arguments,
        })
    }
}

impl ActionPayload {
    pub fn argument(&self, name: &str) -> Option<&device::Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// Successful action response: `<u:{name}Response>` carrying out-arguments.
#[derive(Debug)]
pub struct ActionResponse {
    pub action_name: String,
    pub service_type: String,
    pub arguments: Vec<device::Argument>,
}

impl IntoXml for ActionResponse {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        let action = BytesStart::new(format!("u:{}Response", self.action_name))
            .with_attributes([("xmlns:u", self.service_type.as_str())]);
        let action_end = action.to_end().into_owned();
        w.write_event(Event::Start(action)).map_err(std::io::Error::other)?;

        for argument in &self.arguments {
            w.create_element(&argument.name)
                .write_text_content(BytesText::new(&argument.value)).map_err(std::io::Error::other)?;
        }

        w.write_event(Event::End(action_end))
            .map_err(std::io::Error::other)
    }
}

impl ActionResponse {
    fn read_xml<'a>(
        r: &mut quick_xml::Reader<&'a [u8]>,
        service_type: String,
        action_tag_name: quick_xml::name::QName<'_>,
    ) -> anyhow::Result<Self> {
        let mut arguments = Vec::new();

        while let Ok(event) = r.read_event() {
            match event {
                Event::Start(start) => {
                    let name = String::from_utf8(start.local_name().as_ref().to_vec())?;
                    let value = r.read_text(start.name())?;
                    arguments.push(device::Argument::new(name, value.to_string()));
                }
                Event::End(end) if end.name() == action_tag_name => {
                    break;
                }
                Event::Text(_) => {}
                other => {
                    anyhow::bail!("expected action end, got {other:?}");
                }
            }
        }

        let action_name = str::from_utf8(action_tag_name.local_name().into_inner())
            .context("convert action tag name to string")?;
        let action_name = action_name
            .strip_suffix("Response")
            .context("strip Response suffix")?
            .to_owned();

        Ok(Self {
            action_name,
            service_type,
            arguments,
        })
    }
}

impl IntoResponse for ActionResponse {
    fn into_response(self) -> axum::response::Response {
        SoapMessage::new(self).into_response()
    }
}

/// Client side body parse: either the action response or a decoded fault.
impl<'a> FromXml<'a> for Result<ActionResponse, ActionError> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let start = r.read_to_start()?.into_owned();
        match start.local_name().as_ref() {
            b"Fault" => Ok(Err(ActionError::read_xml(r, start.name())?)),
            other if other.ends_with(b"Response") => {
                let service_type = start
                    .attributes()
                    .flatten()
                    .filter_map(|attr| attr.unescape_value().ok())
                    .find(|attr| attr.starts_with("urn"))
                    .map(|attr| attr.to_string())
                    .unwrap_or_default();
                ActionResponse::read_xml(r, service_type, start.name()).map(Ok)
            }
            other => Err(anyhow::anyhow!("expected fault or response, got {other:?}")),
        }
    }
}

/// Builds the SOAP request for one action invocation into a single buffer.
pub struct ActionCallPayload {
    w: quick_xml::Writer<Vec<u8>>,
    action_name: String,
}

impl ActionCallPayload {
    pub fn new(action_name: &str, service_type: &str) -> quick_xml::Result<Self> {
        let mut w = quick_xml::Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let envelope = BytesStart::new("s:Envelope").with_attributes([
            ("xmlns:s", SOAP_ENVELOPE_XMLNS),
            ("s:encodingStyle", SOAP_ENCODING),
        ]);
        w.write_event(Event::Start(envelope))?;
        let body = BytesStart::new("s:Body");
        w.write_event(Event::Start(body))?;

        let action_name = format!("u:{action_name}");
        let action =
            BytesStart::new(&action_name).with_attributes([("xmlns:u", service_type)]);
        w.write_event(Event::Start(action))?;

        Ok(Self { w, action_name })
    }

    pub fn write_argument(&mut self, name: &str, value: &str) -> quick_xml::Result<()> {
        self.w
            .create_element(name)
            .write_text_content(BytesText::new(value))?;
        Ok(())
    }

    /// Closes the envelope and returns the raw request body.
    pub fn finish(mut self) -> quick_xml::Result<String> {
        self.w
            .write_event(Event::End(BytesEnd::new(self.action_name)))?;
        self.w.write_event(Event::End(BytesEnd::new("s:Body")))?;
        self.w
            .write_event(Event::End(BytesEnd::new("s:Envelope")))?;
        Ok(String::from_utf8(self.w.into_inner())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorCode {
    /// No action by that name at this service.
    InvalidAction,
    /// Could be any of the following: not enough in args, args in the wrong
    /// order, one or more in args are of the wrong data type.
    InvalidArguments,
    /// Current state of the service prevents invoking the action, the
    /// handler reported an application error, or it ran out of time.
    ActionFailed,
    /// The argument value is invalid
    ArgumentInvalid,
    /// An argument value is less than the minimum or more than the maximum
    /// value of the allowed value range, or is not in the allowed value list
    ArgumentValueOutOfRange,
    OptionalActionNotImplemented,
    OutOfMemory,
    HumanInterventionRequired,
    StringArgumentTooLong,
    Other(u16),
}

impl ActionErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ActionErrorCode::InvalidAction => 401,
            ActionErrorCode::InvalidArguments => 402,
            ActionErrorCode::ActionFailed => 501,
            ActionErrorCode::ArgumentInvalid => 600,
            ActionErrorCode::ArgumentValueOutOfRange => 601,
            ActionErrorCode::OptionalActionNotImplemented => 602,
            ActionErrorCode::OutOfMemory => 603,
            ActionErrorCode::HumanInterventionRequired => 604,
            ActionErrorCode::StringArgumentTooLong => 605,
            ActionErrorCode::Other(code) => *code,
        }
    }
}

impl From<u16> for ActionErrorCode {
    fn from(value: u16) -> Self {
        match value {
            401 => ActionErrorCode::InvalidAction,
            402 => ActionErrorCode::InvalidArguments,
            501 => ActionErrorCode::ActionFailed,
            600 => ActionErrorCode::ArgumentInvalid,
            601 => ActionErrorCode::ArgumentValueOutOfRange,
            602 => ActionErrorCode::OptionalActionNotImplemented,
            603 => ActionErrorCode::OutOfMemory,
            604 => ActionErrorCode::HumanInterventionRequired,
            605 => ActionErrorCode::StringArgumentTooLong,
            _ => ActionErrorCode::Other(value),
        }
    }
}

impl From<ActionErrorCode> for ActionError {
    fn from(code: ActionErrorCode) -> Self {
        Self {
            code,
            description: None,
        }
    }
}

/// SOAP fault carried inside `<UPnPError>`.
#[derive(Debug)]
pub struct ActionError {
    pub code: ActionErrorCode,
    pub description: Option<String>,
}

impl ActionError {
    pub fn invalid_action() -> Self {
        Self {
            code: ActionErrorCode::InvalidAction,
            description: Some("Action requested not implemented".to_string()),
        }
    }

    pub fn invalid_arguments() -> Self {
        Self {
            code: ActionErrorCode::InvalidArguments,
            description: Some("Actual arguments do not match formal argument".to_string()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            code: ActionErrorCode::ActionFailed,
            description: Some("Timeout".to_string()),
        }
    }

    pub fn action_failed(description: impl Into<String>) -> Self {
        Self {
            code: ActionErrorCode::ActionFailed,
            description: Some(description.into()),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            code: ActionErrorCode::ActionFailed,
            description: Some(err.to_string()),
        }
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(description) = &self.description {
            write!(f, "{}: {}", self.code.code(), description)
        } else {
            write!(f, "{}", self.code.code())
        }
    }
}
impl std::error::Error for ActionError {}

impl IntoXml for ActionError {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("s:Fault");
        let parent_end = parent.to_end().into_owned();
        w.write_event(Event::Start(parent.clone())).map_err(std::io::Error::other)?;

        w.create_element("faultcode")
            .write_text_content(BytesText::new("s:Client")).map_err(std::io::Error::other)?;
        w.create_element("faultstring")
            .write_text_content(BytesText::new("UPnPError")).map_err(std::io::Error::other)?;
        let detail = BytesStart::new("detail");
        let detail_end = detail.to_end().into_owned();
        w.write_event(Event::Start(detail.clone())).map_err(std::io::Error::other)?;

        w.create_element("UPnPError")
            .with_attribute(("xmlns", UPNP_CONTROL_XMLNS))
            .write_inner_content(|w| {
                w.create_element("errorCode")
                    .write_text_content(BytesText::new(&self.code.code().to_string()))?;
                if let Some(description) = &self.description {
                    w.create_element("errorDescription")
                        .write_text_content(BytesText::new(description))?;
                }
                Ok::<(), quick_xml::Error>(())
            })
            .map_err(std::io::Error::other)?;

        w.write_event(Event::End(detail_end)).map_err(std::io::Error::other)?;
        w.write_event(Event::End(parent_end))
            .map_err(std::io::Error::other)
    }
}

impl ActionError {
    fn read_xml<'a>(
        r: &mut quick_xml::Reader<&'a [u8]>,
        end_tag: quick_xml::name::QName<'_>,
    ) -> anyhow::Result<Self> {
        let fault_code = r.read_to_start()?.into_owned();
        anyhow::ensure!(fault_code.local_name().as_ref() == b"faultcode");
        r.read_to_end(fault_code.name())?;
        let fault_string = r.read_to_start()?.into_owned();
        anyhow::ensure!(fault_string.local_name().as_ref() == b"faultstring");
        let fault_string_text = r.read_text(fault_string.name())?;
        anyhow::ensure!(fault_string_text == "UPnPError");
        let detail = r.read_to_start()?.into_owned();
        anyhow::ensure!(detail.local_name().as_ref() == b"detail");
        let upnp_error = r.read_to_start()?.into_owned();
        anyhow::ensure!(upnp_error.local_name().as_ref() == b"UPnPError");
        let error_code = r.read_to_start()?.into_owned();
        anyhow::ensure!(error_code.local_name().as_ref() == b"errorCode");
        let code = r.read_text(error_code.name())?;
        let code: u16 = code.parse().context("parse error code")?;
        let mut description = None;

        while let Ok(event) = r.read_event() {
            match event {
                Event::Start(start) => {
                    anyhow::ensure!(start.local_name().as_ref() == b"errorDescription");
                    description = Some(r.read_text(start.name())?.to_string());
                    r.read_to_end(upnp_error.name())?;
                    break;
                }
                Event::End(end) => {
                    anyhow::ensure!(end == upnp_error.to_end());
                    break;
                }
                Event::Text(_) => {}
                other => Err(anyhow::anyhow!(
                    "expected description or fault end, got {other:?}",
                ))?,
            }
        }

        r.read_to_end(detail.name())?;
        r.read_to_end(end_tag)?;

        Ok(Self {
            code: code.into(),
            description,
        })
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> axum::response::Response {
        let status_code = StatusCode::INTERNAL_SERVER_ERROR;
        let body = SoapMessage::new(self);
        (status_code, body).into_response()
    }
}

/// Parses the value of a `SOAPACTION: "<ServiceType>#<ActionName>"` header.
pub fn parse_soapaction(header: &str) -> anyhow::Result<(String, String)> {
    let mut header = header.trim();
    if let Some(stripped) = header.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        header = stripped;
    }
    let (service_type, action) = header.split_once('#').context("split soapaction header")?;
    // sanity check that the left side looks like a service urn
    crate::urn::URN::from_str(service_type).context("parse soapaction service type")?;
    Ok((service_type.to_string(), action.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{
        parse_soapaction, ActionCallPayload, ActionError, ActionErrorCode, ActionPayload,
        ActionResponse, SoapMessage,
    };

    #[test]
    fn parse_action_payload_xml() {
        let raw = br#"<?xml version="1.0"?>
<s:Envelope
xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:actionName xmlns:u="urn:schemas-upnp-org:service:serviceType:v">
<argumentName>in arg value</argumentName>
<anotherArgument>another value</anotherArgument>
<!-- other in args and their values go here, if any -->
</u:actionName>
</s:Body>
</s:Envelope>"#;
        let payload: SoapMessage<ActionPayload> = SoapMessage::from_xml(raw).unwrap();
        let payload = payload.into_inner();
        assert_eq!(payload.name, "actionName");
        assert_eq!(payload.arguments.len(), 2);
        assert_eq!(payload.arguments[0].name, "argumentName");
        assert_eq!(payload.arguments[0].value, "in arg value");
        assert_eq!(payload.argument("anotherArgument").unwrap().value, "another value");
    }

    #[test]
    fn request_builder_round_trips_through_payload_parse() {
        let mut call =
            ActionCallPayload::new("Turn", "urn:schemas-upnp-org:service:SwitchPower:1").unwrap();
        call.write_argument("StateValue", "1").unwrap();
        let raw = call.finish().unwrap();

        let payload: SoapMessage<ActionPayload> = SoapMessage::from_xml(raw.as_bytes()).unwrap();
        let payload = payload.into_inner();
        assert_eq!(payload.name, "Turn");
        assert_eq!(payload.arguments[0].name, "StateValue");
        assert_eq!(payload.arguments[0].value, "1");
    }

    #[test]
    fn response_xml_contains_out_arguments() {
        let response = ActionResponse {
            action_name: "Turn".to_string(),
            service_type: "urn:schemas-upnp-org:service:SwitchPower:1".to_string(),
            arguments: vec![device::Argument::new("ActualValue", "1")],
        };
        let xml = SoapMessage::new(response).into_xml().unwrap();
        assert!(xml.contains("<u:TurnResponse xmlns:u=\"urn:schemas-upnp-org:service:SwitchPower:1\">"));
        assert!(xml.contains("<ActualValue>1</ActualValue>"));

        let parsed: SoapMessage<Result<ActionResponse, ActionError>> =
            SoapMessage::from_xml(xml.as_bytes()).unwrap();
        let parsed = parsed.into_inner().unwrap();
        assert_eq!(parsed.action_name, "Turn");
        assert_eq!(parsed.arguments[0].value, "1");
    }

    #[test]
    fn fault_round_trip() {
        let fault = ActionError::action_failed("Test application error");
        let xml = SoapMessage::new(fault).into_xml().unwrap();
        assert!(xml.contains("<UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\">"));
        assert!(xml.contains("<errorCode>501</errorCode>"));
        assert!(xml.contains("<errorDescription>Test application error</errorDescription>"));

        let parsed: SoapMessage<Result<ActionResponse, ActionError>> =
            SoapMessage::from_xml(xml.as_bytes()).unwrap();
        let err = parsed.into_inner().unwrap_err();
        assert_eq!(err.code, ActionErrorCode::ActionFailed);
        assert_eq!(err.description.as_deref(), Some("Test application error"));
    }

    #[test]
    fn soapaction_header_parse() {
        let (service_type, action) =
            parse_soapaction("\"urn:schemas-upnp-org:service:SwitchPower:1#Turn\"").unwrap();
        assert_eq!(service_type, "urn:schemas-upnp-org:service:SwitchPower:1");
        assert_eq!(action, "Turn");
        assert!(parse_soapaction("not-a-soapaction").is_err());
    }
}
