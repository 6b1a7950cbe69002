use std::sync::{
    Arc,
    atomic::{AtomicI32, Ordering},
};

use anyhow::Context as _;
use clap::Parser;
use deviot::{
    DataSender, Gateway,
    common::{Action, Envelope, Property, Thing},
    config::GatewayConfig,
    instance::{Instance, Operations},
};
use serde_json::{Value, json};
use tokio::time::Duration;

#[derive(Parser)]
struct Args {
    /// Gateway name
    #[arg(long, env = "DEVIOT_GATEWAY", default_value = "deviot-demo")]
    name: String,

    /// DevIoT management server URL
    #[arg(long, env = "DEVIOT_SERVER", default_value = "http://127.0.0.1:9000")]
    server: String,

    /// MQTT broker URL
    #[arg(long, env = "DEVIOT_BROKER", default_value = "tcp://127.0.0.1:1883")]
    broker: String,

    /// Owner account
    #[arg(long, env = "DEVIOT_ACCOUNT", default_value = "")]
    account: String,

    /// Seconds between temperature readings
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

fn data(id: &str, value: Value) -> Envelope {
    let mut data = Envelope::new();
    data.insert(id.to_owned(), value);
    data
}

struct Lamp {
    id: &'static str,
    on: bool,
    sender: DataSender,
}

impl Lamp {
    fn set_on(&mut self, on: bool) {
        self.on = on;
        tracing::info!(id = self.id, on, "Lamp switched");
        self.sender.send_detached(data(self.id, json!({ "on": on })));
    }
}

impl Instance for Lamp {
    fn init(&mut self, thing: &mut Thing, ops: &mut Operations<Self>) {
        thing
            .add_action(Action::new("setOn").with_parameter(Property::bool("on").with_value(false)))
            .add_property(Property::bool("on").with_value(self.on));

        ops.add("setOn", Lamp::set_on);
    }
}

struct Thermometer {
    offset: Arc<AtomicI32>,
}

impl Thermometer {
    fn calibrate(&mut self, offset: i32) {
        tracing::info!(offset, "Thermometer calibrated");
        self.offset.store(offset, Ordering::Relaxed);
    }
}

impl Instance for Thermometer {
    fn init(&mut self, thing: &mut Thing, ops: &mut Operations<Self>) {
        thing
            .add_action(
                Action::new("calibrate").with_parameter(Property::int("offset").with_value(0)),
            )
            .add_property(
                Property::int("temperature")
                    .with_range([-40, 85])
                    .with_unit("C")
                    .with_description("Simulated room temperature"),
            );

        ops.add("calibrate", Thermometer::calibrate);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    deviot::log::init();

    let config = GatewayConfig::new(args.name, args.server, args.account);
    let gateway = Gateway::mqtt(&config, &args.broker).context("invalid gateway configuration")?;

    gateway.register("lamp1", "Lamp", Lamp {
        id: "lamp1",
        on: false,
        sender: gateway.sender(),
    });

    let offset = Arc::new(AtomicI32::new(0));
    gateway.register("temp1", "Thermometer", Thermometer { offset: offset.clone() });

    gateway
        .start()
        .await
        .context("failed to connect to mqtt broker")?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    let mut reading = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let temperature = 20 + (reading % 6) as i32 + offset.load(Ordering::Relaxed);
        reading = reading.wrapping_add(1);

        if let Err(e) = gateway
            .send_data(&data("temp1", json!({ "temperature": temperature })))
            .await
        {
            tracing::warn!("Failed to send temperature: {e}");
        }
    }

    gateway.stop().await?;

    Ok(())
}
