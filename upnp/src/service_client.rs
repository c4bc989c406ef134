//! SOAP action invocation against a remote service's control URL.

use std::fmt::Display;

use anyhow::Context;

use crate::{
    action::{ActionCallPayload, ActionError, ActionResponse, SoapMessage},
    scpd::{FormalAction, Scpd},
    FromXml,
};

#[derive(Debug)]
pub enum ActionCallError {
    /// The remote service's SCPD does not list the action.
    NotSupported,
    Http(reqwest::Error),
    /// The device answered with a SOAP fault.
    Fault(ActionError),
    Other(anyhow::Error),
}

pub type ActionCallResult<T> = Result<T, ActionCallError>;

impl Display for ActionCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionCallError::NotSupported => write!(f, "Action not supported"),
            ActionCallError::Http(e) => write!(f, "Http error: {e}"),
            ActionCallError::Fault(fault) => fault.fmt(f),
            ActionCallError::Other(e) => write!(f, "Other: {e}"),
        }
    }
}

impl std::error::Error for ActionCallError {}

impl From<reqwest::Error> for ActionCallError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<anyhow::Error> for ActionCallError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value)
    }
}

impl From<ActionError> for ActionCallError {
    fn from(value: ActionError) -> Self {
        Self::Fault(value)
    }
}

/// Client for one remote service: its parsed SCPD plus the control URL to
/// POST invocations at.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    pub service_type: String,
    pub control_url: reqwest::Url,
    pub scpd: Scpd,
}

impl ServiceClient {
    pub fn new(scpd: Scpd, service_type: String, control_url: reqwest::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            service_type,
            control_url,
            scpd,
        }
    }

    pub fn action(&self, name: &str) -> ActionCallResult<&FormalAction> {
        self.scpd
            .find_action(name)
            .ok_or(ActionCallError::NotSupported)
    }

    /// Builds the request body for `action`, pairing the formal
    /// in-arguments by name with the provided values.
    fn request_body(
        &self,
        action: &FormalAction,
        arguments: &[device::Argument],
    ) -> anyhow::Result<String> {
        let mut call = ActionCallPayload::new(&action.name, &self.service_type)
            .context("start action payload")?;
        for formal in action.in_arguments() {
            let value = arguments
                .iter()
                .find(|a| a.name == formal.name)
                .with_context(|| format!("missing value for argument {}", formal.name))?;
            call.write_argument(&formal.name, &value.value)
                .context("write argument")?;
        }
        call.finish().context("finish action payload")
    }

    /// Invokes `action` and returns the out-arguments in response order.
    pub async fn invoke(
        &self,
        action: &str,
        arguments: &[device::Argument],
    ) -> ActionCallResult<Vec<device::Argument>> {
        let formal = self.action(action)?;
        let body = self.request_body(formal, arguments)?;
        let soapaction = format!("\"{}#{}\"", self.service_type, formal.name);

        let request = self
            .http
            .request(reqwest::Method::POST, self.control_url.clone())
            .header("SOAPACTION", soapaction)
            .header(
                reqwest::header::CONTENT_TYPE,
                "text/xml; charset=\"utf-8\"",
            )
            .body(body)
            .build()?;
        let response = self.http.execute(request).await?;
        tracing::trace!("{action} action response status: {}", response.status());
        let text = response.text().await?;

        let mut reader = quick_xml::Reader::from_str(&text);
        let response =
            SoapMessage::<Result<ActionResponse, ActionError>>::read_xml(&mut reader)
                .context("parse action response")?
                .into_inner()?;
        Ok(response.arguments)
    }
}

#[cfg(test)]
mod tests {
    use crate::scpd::{DataType, FormalAction, FormalArgument, Scpd, SpecVersion, StateVariable};

    use super::{ActionCallError, ServiceClient};

    fn client() -> ServiceClient {
        let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
        let var = scpd.add_state_variable(StateVariable::evented("actualState", DataType::String));
        scpd.add_action(FormalAction::new(
            "Turn",
            vec![
                FormalArgument::input("StateValue", var),
                FormalArgument::output("ActualValue", var),
            ],
        ))
        .unwrap();
        ServiceClient::new(
            scpd,
            "urn:schemas-upnp-org:service:SwitchPower:1".to_string(),
            reqwest::Url::parse("http://192.168.1.10:8080/SwitchPower/control").unwrap(),
        )
    }

    #[test]
    fn unknown_action_is_not_supported() {
        let client = client();
        assert!(matches!(
            client.action("Blink"),
            Err(ActionCallError::NotSupported)
        ));
    }

    #[test]
    fn request_body_pairs_arguments_by_name() {
        let client = client();
        let action = client.action("Turn").unwrap();
        let body = client
            .request_body(action, &[device::Argument::new("StateValue", "1")])
            .unwrap();
        assert!(body.contains("<u:Turn xmlns:u=\"urn:schemas-upnp-org:service:SwitchPower:1\">"));
        assert!(body.contains("<StateValue>1</StateValue>"));

        let missing = client.request_body(action, &[]);
        assert!(missing.is_err());
    }
}
