//! Axum router exposing a hosted root device: description documents, SCPD
//! documents, SOAP control and GENA event endpoints for every service of
//! the root and of its embedded devices.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get, post},
    Router,
};
use axum_extra::headers::{self, HeaderMapExt};
use tokio_util::sync::CancellationToken;

use crate::{
    action::{parse_soapaction, ActionError, ActionPayload, ActionResponse, SoapMessage},
    device_description::{RootDevice, Service},
    eventing::{self, SubscriptionManager},
    scpd::FormalAction,
    IntoXml,
};

/// A control handler gets this long to produce its response.
pub const SOAP_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

fn xml_response(xml: String) -> impl IntoResponse {
    let mut header_map = HeaderMap::new();
    header_map.typed_insert(headers::ContentType::xml());
    (header_map, xml)
}

/// Registers all routes a root device serves. URLs are looked up by exact
/// path; anything else lands in the fallback.
pub fn build_router(root: Arc<RootDevice>, events: SubscriptionManager) -> Router {
    let mut router = Router::new();

    for (index, device) in root.all_devices().enumerate() {
        let Some(path) = device.presentation_path() else {
            tracing::warn!(
                "Device {} has no presentation url, skipping description route",
                device.friendly_name
            );
            continue;
        };
        let xml = if index == 0 {
            root.into_xml().expect("descriptions serialize without errors")
        } else {
            device
                .into_string()
                .expect("descriptions serialize without errors")
        };
        router = router.route(&path, get(move || async move { xml_response(xml) }));

        for service in device.service_list.clone() {
            let scpd_xml = service
                .scpd
                .into_xml()
                .expect("services serialize without errors");
            router = router.route(
                &service.scpd_url.clone(),
                get(move || async move { xml_response(scpd_xml) }),
            );

            let control_service = service.clone();
            router = router.route(
                &service.control_url.clone(),
                post(move |headers: HeaderMap, body: String| async move {
                    handle_control(control_service, headers, body).await
                }),
            );

            let manager = events.clone();
            router = router.route(
                &service.event_sub_url.clone(),
                any(move |method: Method, headers: HeaderMap| async move {
                    handle_event(manager, service, method, headers).await
                }),
            );
        }
    }

    router.fallback(fallback)
}

/// Serves the device until the cancellation token fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    root: Arc<RootDevice>,
    events: SubscriptionManager,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let router = build_router(root, events);
    axum::serve(listener, router)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await?;
    Ok(())
}

async fn fallback(method: Method, uri: Uri) -> impl IntoResponse {
    match method.as_str() {
        // a miss on a control or event endpoint, not a description lookup
        "POST" | "SUBSCRIBE" | "UNSUBSCRIBE" => {
            tracing::warn!(%uri, "Request for unknown control/event endpoint");
            (
                StatusCode::NOT_IMPLEMENTED,
                "This device does not implement the requested endpoint",
            )
        }
        _ => {
            tracing::warn!(%uri, "Request for unknown resource");
            (
                StatusCode::NOT_FOUND,
                "You requested some descriptor that is not here. Are you sure you are talking with the right device?",
            )
        }
    }
}

/// Matches each formal in-argument by name against the actual arguments.
/// Missing arguments fail the call; extra request children are discarded.
fn ordered_in_arguments(
    formal: &FormalAction,
    payload: &ActionPayload,
) -> Result<Vec<device::Argument>, ActionError> {
    let mut arguments = Vec::new();
    for formal_argument in formal.in_arguments() {
        let actual = payload
            .argument(&formal_argument.name)
            .ok_or_else(ActionError::invalid_arguments)?;
        arguments.push(actual.clone());
    }
    Ok(arguments)
}

async fn handle_control(
    service: Service,
    headers: HeaderMap,
    body: String,
) -> Result<ActionResponse, ActionError> {
    let payload: SoapMessage<ActionPayload> =
        SoapMessage::from_xml(body.as_bytes()).map_err(ActionError::from)?;
    let payload = payload.into_inner();

    // Dispatch goes by the envelope's local name; the header only gets a
    // consistency check.
    if let Some(header) = headers.get("soapaction").and_then(|v| v.to_str().ok()) {
        if let Ok((_, header_action)) = parse_soapaction(header) {
            if header_action != payload.name {
                tracing::warn!(
                    "Inconsistency between soapaction header and action payload: {} vs {}",
                    header_action,
                    payload.name,
                );
            }
        }
    }
    tracing::info!("Action {} invoked", payload.name);

    let formal = service
        .scpd
        .find_action(&payload.name)
        .ok_or_else(ActionError::invalid_action)?;
    let arguments = ordered_in_arguments(formal, &payload)?;

    let handler = service
        .handler
        .clone()
        .ok_or_else(|| ActionError::action_failed("no handler registered"))?;
    let invocation = tokio::task::spawn_blocking(move || handler(&arguments));
    let response = match tokio::time::timeout(SOAP_HANDLER_TIMEOUT, invocation).await {
        Err(_elapsed) => return Err(ActionError::timeout()),
        Ok(Err(join_error)) => {
            tracing::error!("Action handler panicked: {join_error}");
            return Err(ActionError::action_failed("handler failure"));
        }
        Ok(Ok(response)) => response,
    };

    if response.error_code != 0 {
        return Err(ActionError::action_failed(response.error_message));
    }

    // Every out-argument carries the handler's single value.
    let arguments = formal
        .out_arguments()
        .map(|out| device::Argument::new(out.name.clone(), response.value.clone()))
        .collect();
    Ok(ActionResponse {
        action_name: payload.name,
        service_type: service.service_type.clone(),
        arguments,
    })
}

async fn handle_event(
    manager: SubscriptionManager,
    service: Service,
    method: Method,
    headers: HeaderMap,
) -> axum::response::Response {
    match method.as_str() {
        "SUBSCRIBE" => eventing::handle_subscribe(&manager, &service, &headers),
        "UNSUBSCRIBE" => eventing::handle_unsubscribe(&manager, &headers),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::http::HeaderMap;

    use crate::{
        action::{ActionCallPayload, ActionErrorCode, ActionPayload, SoapMessage},
        device_description::Service,
        scpd::{DataType, FormalAction, FormalArgument, Scpd, SpecVersion, StateVariable},
    };

    use super::{handle_control, ordered_in_arguments};

    fn switch_power(state: Arc<Mutex<String>>) -> Service {
        let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
        let var = scpd.add_state_variable(
            StateVariable::evented("actualState", DataType::String).with_default("0"),
        );
        scpd.add_action(FormalAction::new(
            "Turn",
            vec![
                FormalArgument::input("StateValue", var),
                FormalArgument::output("ActualValue", var),
            ],
        ))
        .unwrap();

        Service {
            service_type: "urn:schemas-upnp-org:service:SwitchPower:1".into(),
            service_id: "urn:upnp-org:serviceId:SwitchPower".into(),
            scpd_url: "/SwitchPower".into(),
            control_url: "/SwitchPower/control".into(),
            event_sub_url: "/SwitchPower/event".into(),
            handler: Some(crate::device_description::service_handler(
                move |args: &[device::Argument]| {
                    let value = args.first().map(|a| a.value.clone()).unwrap_or_default();
                    if value == "7" {
                        return device::Response::error(101, "Test application error");
                    }
                    *state.lock().unwrap() = value.clone();
                    device::Response::ok(value)
                },
            )),
            scpd,
        }
    }

    fn turn_request(value: &str) -> String {
        let mut call =
            ActionCallPayload::new("Turn", "urn:schemas-upnp-org:service:SwitchPower:1").unwrap();
        call.write_argument("StateValue", value).unwrap();
        call.finish().unwrap()
    }

    #[test]
    fn in_arguments_follow_declared_order() {
        let service = switch_power(Default::default());
        let formal = service.scpd.find_action("Turn").unwrap();

        let raw = {
            let mut call =
                ActionCallPayload::new("Turn", "urn:schemas-upnp-org:service:SwitchPower:1")
                    .unwrap();
            // extra argument before the expected one
            call.write_argument("Garbage", "x").unwrap();
            call.write_argument("StateValue", "1").unwrap();
            call.finish().unwrap()
        };
        let payload: SoapMessage<ActionPayload> = SoapMessage::from_xml(raw.as_bytes()).unwrap();
        let payload = payload.into_inner();

        let ordered = ordered_in_arguments(formal, &payload).unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name, "StateValue");

        let empty = ActionPayload {
            name: "Turn".into(),
            arguments: vec![],
        };
        let err = ordered_in_arguments(formal, &empty).unwrap_err();
        assert_eq!(err.code, ActionErrorCode::InvalidArguments);
    }

    #[tokio::test]
    async fn control_success_returns_out_arguments() {
        let state = Arc::new(Mutex::new("0".to_string()));
        let service = switch_power(state.clone());

        let mut headers = HeaderMap::new();
        headers.insert(
            "soapaction",
            "\"urn:schemas-upnp-org:service:SwitchPower:1#Turn\""
                .parse()
                .unwrap(),
        );
        let response = handle_control(service, headers, turn_request("1"))
            .await
            .unwrap();
        assert_eq!(response.action_name, "Turn");
        assert_eq!(response.arguments.len(), 1);
        assert_eq!(response.arguments[0].name, "ActualValue");
        assert_eq!(response.arguments[0].value, "1");
        assert_eq!(*state.lock().unwrap(), "1");
    }

    #[tokio::test]
    async fn control_maps_handler_error_to_fault() {
        let service = switch_power(Default::default());
        let err = handle_control(service, HeaderMap::new(), turn_request("7"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ActionErrorCode::ActionFailed);
        assert_eq!(err.description.as_deref(), Some("Test application error"));
    }

    #[tokio::test]
    async fn control_rejects_unknown_action() {
        let service = switch_power(Default::default());
        let raw = {
            let call = ActionCallPayload::new(
                "Blink",
                "urn:schemas-upnp-org:service:SwitchPower:1",
            )
            .unwrap();
            call.finish().unwrap()
        };
        let err = handle_control(service, HeaderMap::new(), raw)
            .await
            .unwrap_err();
        assert_eq!(err.code, ActionErrorCode::InvalidAction);
    }
}
