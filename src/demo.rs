//! Demo devices hosted by the device binary: a binary light with a
//! SwitchPower service and a temperature sensor service.

use std::{
    net::IpAddr,
    sync::{Arc, Mutex},
};

use upnp::{
    device_description::{
        presentation_url, service_handler, DeviceSpec, Icon, RootDevice, Service, Udn,
    },
    eventing::SubscriptionManager,
    scpd::{DataType, FormalAction, FormalArgument, Scpd, SpecVersion, StateVariable},
    urn::{DeviceType, ServiceType, URN},
};

const DEVICE_DESCRIPTION_PATH: &str = "/device.xml";

fn switch_power_scpd() -> Scpd {
    let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
    let state = scpd.add_state_variable(
        StateVariable::evented("actualState", DataType::String).with_default("0"),
    );
    scpd.add_action(FormalAction::new(
        "Turn",
        vec![
            FormalArgument::input("StateValue", state),
            FormalArgument::output("ActualValue", state),
        ],
    ))
    .expect("state variable is in the table");
    scpd.add_action(FormalAction::new(
        "GetStatus",
        vec![FormalArgument::output("ResultStatus", state)],
    ))
    .expect("state variable is in the table");
    scpd
}

fn switch_power(events: SubscriptionManager) -> Service {
    let service_id = "urn:upnp-org:serviceId:SwitchPower".to_string();
    let scpd = switch_power_scpd();
    let handler_scpd = scpd.clone();
    let handler_service_id = service_id.clone();
    let state = Arc::new(Mutex::new("0".to_string()));

    let handler = move |arguments: &[device::Argument]| {
        // Turn carries the new state; GetStatus has no in-arguments.
        match arguments.first() {
            Some(argument) => {
                if argument.value == "7" {
                    return device::Response::error(101, "Test application error");
                }
                let value = argument.value.clone();
                *state.lock().expect("handler lock not poisoned") = value.clone();
                events.notify_with_scpd(
                    &handler_scpd,
                    &handler_service_id,
                    &[("actualState", value.as_str())],
                );
                device::Response::ok(value)
            }
            None => device::Response::ok(state.lock().expect("handler lock not poisoned").clone()),
        }
    };

    Service {
        service_type: URN::upnp_service(ServiceType::SwitchPower, 1).to_string(),
        service_id,
        scpd_url: "/SwitchPower".to_string(),
        control_url: "/SwitchPower/control".to_string(),
        event_sub_url: "/SwitchPower/event".to_string(),
        handler: Some(service_handler(handler)),
        scpd,
    }
}

fn temperature_sensor() -> Service {
    let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
    let temperature = scpd.add_state_variable(
        StateVariable::evented("temperature", DataType::String).with_default("20"),
    );
    scpd.add_action(FormalAction::new(
        "GetTemperature",
        vec![FormalArgument::output("CurrentTemperature", temperature)],
    ))
    .expect("state variable is in the table");

    let reading = Arc::new(Mutex::new("21".to_string()));
    let handler = move |_arguments: &[device::Argument]| {
        device::Response::ok(reading.lock().expect("handler lock not poisoned").clone())
    };

    Service {
        service_type: URN::upnp_service(ServiceType::TemperatureSensor, 1).to_string(),
        service_id: "urn:upnp-org:serviceId:TemperatureSensor".to_string(),
        scpd_url: "/TemperatureSensor".to_string(),
        control_url: "/TemperatureSensor/control".to_string(),
        event_sub_url: "/TemperatureSensor/event".to_string(),
        handler: Some(service_handler(handler)),
        scpd,
    }
}

/// A binary light root device listening at `addr:port`.
pub fn smart_light(index: usize, addr: IpAddr, port: u16, events: SubscriptionManager) -> RootDevice {
    RootDevice::new(DeviceSpec {
        device_type: URN::upnp_device(DeviceType::BinaryLight, 1).to_string(),
        udn: Udn::new(uuid::Uuid::new_v4()),
        friendly_name: format!("SmartLight-{index}"),
        manufacturer: "DF Corp.".to_string(),
        manufacturer_url: Some("http://superlight.df".to_string()),
        model_name: "SmartLight pro plus".to_string(),
        model_url: Some("http://superlight.df/smartlight-pro-plus".to_string()),
        model_description: Some("The best smart light".to_string()),
        model_number: Some("422".to_string()),
        serial_number: Some("123-456-789-0".to_string()),
        upc: Some("12345678900987654321".to_string()),
        presentation_url: Some(presentation_url(addr, port, DEVICE_DESCRIPTION_PATH)),
        icon_list: vec![
            Icon {
                mimetype: "image/jpeg".to_string(),
                width: 48,
                height: 48,
                depth: 24,
                url: "/images/icon-48x48.jpg".to_string(),
            },
            Icon {
                mimetype: "image/jpeg".to_string(),
                width: 120,
                height: 120,
                depth: 24,
                url: "/images/icon-120x120.jpg".to_string(),
            },
        ],
        service_list: vec![switch_power(events), temperature_sensor()],
        embedded_devices: vec![],
    })
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use tokio_util::sync::CancellationToken;
    use upnp::eventing::SubscriptionManager;

    use super::smart_light;

    #[tokio::test]
    async fn demo_light_handler_semantics() {
        let events = SubscriptionManager::start(CancellationToken::new());
        let root = smart_light(0, IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, events);
        let service = &root.device.service_list[0];
        let handler = service.handler.clone().unwrap();

        let ok = handler(&[device::Argument::new("StateValue", "1")]);
        assert!(ok.is_ok());
        assert_eq!(ok.value, "1");

        let read_back = handler(&[]);
        assert_eq!(read_back.value, "1");

        let err = handler(&[device::Argument::new("StateValue", "7")]);
        assert_eq!(err.error_code, 101);
        assert_eq!(err.error_message, "Test application error");
    }

    #[tokio::test]
    async fn demo_light_urls_are_distinct() {
        let events = SubscriptionManager::start(CancellationToken::new());
        let root = smart_light(0, IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, events);
        let mut paths: Vec<&str> = root
            .all_services()
            .flat_map(|s| {
                [
                    s.scpd_url.as_str(),
                    s.control_url.as_str(),
                    s.event_sub_url.as_str(),
                ]
            })
            .collect();
        let total = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), total);
    }
}
