use anyhow::Context;
use clap::Parser;
use device::Device;
use tokio_util::sync::CancellationToken;
use upnp::{
    control_point::{ControlPoint, UpnpDevice},
    search_client::default_mx,
    urn::{DeviceType, ServiceType, URN},
};

#[path = "../logging.rs"]
mod logging;

/// Discovers UPnP devices, drives their actions and listens for events.
#[derive(Parser, Debug)]
struct Args {
    /// Number of control points in the fleet; scales the default MX
    #[arg(long = "upnp-ctrl", default_value_t = 1)]
    upnp_ctrl: usize,
    /// Search target; defaults to the binary light device type
    #[arg(long)]
    st: Option<String>,
    /// MX seconds for the search; non-positive picks a fleet-scaled value
    #[arg(long, default_value_t = 0)]
    mx: i64,
    /// Enable debug logging
    #[arg(short = 'd')]
    debug: bool,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let st = args
        .st
        .unwrap_or_else(|| URN::upnp_device(DeviceType::BinaryLight, 1).to_string());
    let mx = if args.mx > 0 {
        args.mx as u64
    } else {
        default_mx(args.upnp_ctrl)
    };

    let mut control_point = ControlPoint::new().await.context("bind control point")?;
    tracing::info!(%st, mx, "Searching for devices");
    let devices = control_point.discover(&st, mx).await?;
    tracing::info!("Found {} devices", devices.len());
    for root in &devices {
        tracing::info!(
            name = %root.device.friendly_name,
            udn = %root.device.udn,
            device_type = %root.device.device_type,
            "Discovered device"
        );
    }

    let switch_power = URN::upnp_service(ServiceType::SwitchPower, 1).to_string();
    let Some(root) = devices
        .iter()
        .find(|root| root.find_service_by_type(&switch_power).is_some())
    else {
        tracing::info!("No device with a SwitchPower service around, nothing to drive");
        return Ok(());
    };
    let service = root
        .find_service_by_type(&switch_power)
        .expect("device selected for this service");

    let client = control_point.service_client(root, service).await?;
    let light = UpnpDevice::from_service(root.device.friendly_name.clone(), client);

    let cancellation_token = CancellationToken::new();
    let sid = control_point
        .subscribe(
            root,
            service,
            |body| tracing::info!("Event received: {body}"),
            &[],
            cancellation_token.clone(),
        )
        .await
        .context("subscribe to switch power events")?;
    tracing::info!(%sid, "Subscribed to {}", service.service_id);

    let response = light.invoke(&[device::Argument::new("StateValue", "1")]).await;
    if response.is_ok() {
        tracing::info!("Turned {} on", light.name());
    } else {
        tracing::warn!(
            code = response.error_code,
            "Turn failed: {}",
            response.error_message
        );
    }

    // leave the callback listener a moment to catch the change notification
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let state = light.get_state().await;
    if state.is_ok() {
        tracing::info!("{} reports state {}", light.name(), state.value);
    }

    control_point.unsubscribe(root, service).await?;
    cancellation_token.cancel();
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.debug);

    if let Err(e) = run(args).await {
        tracing::error!("Fatal initialization failure: {e:#}");
        std::process::exit(1);
    }
}
