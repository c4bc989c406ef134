use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceType {
    BinaryLight,
    DimmableLight,
    MediaServer,
    Other(String),
}

impl From<&str> for DeviceType {
    fn from(value: &str) -> DeviceType {
        match value {
            "BinaryLight" => DeviceType::BinaryLight,
            "DimmableLight" => DeviceType::DimmableLight,
            "MediaServer" => DeviceType::MediaServer,
            _ => DeviceType::Other(value.to_string()),
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceType::BinaryLight => "BinaryLight",
            DeviceType::DimmableLight => "DimmableLight",
            DeviceType::MediaServer => "MediaServer",
            DeviceType::Other(other) => other,
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceType {
    SwitchPower,
    Dimming,
    TemperatureSensor,
    Other(String),
}

impl From<&str> for ServiceType {
    fn from(value: &str) -> ServiceType {
        match value {
            "SwitchPower" => ServiceType::SwitchPower,
            "Dimming" => ServiceType::Dimming,
            "TemperatureSensor" => ServiceType::TemperatureSensor,
            other => ServiceType::Other(other.to_string()),
        }
    }
}

impl Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceType::SwitchPower => "SwitchPower",
            ServiceType::Dimming => "Dimming",
            ServiceType::TemperatureSensor => "TemperatureSensor",
            ServiceType::Other(other) => other,
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrnType {
    Device(DeviceType),
    Service(ServiceType),
}

/// Uniform Resource Name. Provides a unique and persistent identifier for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct URN {
    /// `schemas-upnp-org` for standardized types, a vendor domain otherwise.
    pub domain: String,
    pub version: u8,
    pub urn_type: UrnType,
}

impl Serialize for URN {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl URN {
    pub fn upnp_device(device: DeviceType, version: u8) -> Self {
        Self {
            domain: "schemas-upnp-org".to_string(),
            version,
            urn_type: UrnType::Device(device),
        }
    }

    pub fn upnp_service(service: ServiceType, version: u8) -> Self {
        Self {
            domain: "schemas-upnp-org".to_string(),
            version,
            urn_type: UrnType::Service(service),
        }
    }
}

impl Display for URN {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (urn_type, name) = match &self.urn_type {
            UrnType::Device(device) => ("device", device.to_string()),
            UrnType::Service(service) => ("service", service.to_string()),
        };

        write!(
            f,
            "urn:{domain}:{urn_type}:{name}:{version}",
            domain = self.domain,
            version = self.version
        )
    }
}

impl FromStr for URN {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(5, ':');
        let urn = parts.next().context("urn prefix")?;
        anyhow::ensure!(urn == "urn");
        let domain = parts.next().context("domain")?;
        let schema_type = parts.next().context("schema type")?;
        let name = parts.next().context("service/device name")?;
        let version = parts.next().context("service/device version")?.parse()?;
        let urn_type = match schema_type {
            "device" => UrnType::Device(DeviceType::from(name)),
            "service" => UrnType::Service(ServiceType::from(name)),
            rest => return Err(anyhow::anyhow!("unknown urn type: {rest}")),
        };
        Ok(URN {
            domain: domain.to_string(),
            version,
            urn_type,
        })
    }
}
