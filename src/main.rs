/*!
 * vhal - vehicle HAL virtualization command line tool
 *
 * `vhal serve` exposes the in-memory fake vehicle through the gRPC proxy;
 * every other subcommand is a client of a running proxy.
 */

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vhal::fake::parse_prop_id;
use vhal::hal::{
    completion_channel, GetValueRequest, RawPropValues, SetValueRequest, StatusCode,
    SubscribeOptions, VehicleHardware, VehiclePropValue, GLOBAL_AREA_ID,
};
use vhal::{logging, FakeVehicleHardware, GrpcVehicleHardware, GrpcVehicleProxyServer, VhalConfig};

#[derive(Parser)]
#[command(name = "vhal")]
#[command(version, about = "gRPC vehicle HAL proxy and client", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "VHAL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the fake vehicle over gRPC until interrupted
    Serve {
        /// Listening address (overrides [server] listen_addr)
        #[arg(short, long)]
        listen: Option<String>,

        /// Set/get completion timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List the property configs of a proxy
    Configs {
        #[command(flatten)]
        remote: Remote,

        /// Print the configs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read one property area
    Get {
        #[command(flatten)]
        remote: Remote,

        /// Property id, decimal or 0x hex
        #[arg(value_parser = prop_id)]
        prop: i32,

        #[arg(short, long, default_value_t = GLOBAL_AREA_ID)]
        area: i32,
    },

    /// Write one property area
    Set {
        #[command(flatten)]
        remote: Remote,

        /// Property id, decimal or 0x hex
        #[arg(value_parser = prop_id)]
        prop: i32,

        #[arg(short, long, default_value_t = GLOBAL_AREA_ID)]
        area: i32,

        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        int32: Vec<i32>,

        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        int64: Vec<i64>,

        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        float: Vec<f32>,

        #[arg(long)]
        string: Option<String>,
    },

    /// Print property change events
    Watch {
        #[command(flatten)]
        remote: Remote,

        /// Subscribe to this property first, decimal or 0x hex
        #[arg(short, long, value_parser = prop_id)]
        prop: Option<i32>,

        /// Sample rate in Hz for continuous properties
        #[arg(short, long, default_value_t = 0.0)]
        rate: f32,

        /// Exit after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Run a debug dump on the proxy's hardware
    Dump {
        #[command(flatten)]
        remote: Remote,

        /// Dump options passed through verbatim
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Check the health of the proxy's hardware
    Health(Remote),
}

#[derive(Args)]
struct Remote {
    /// Proxy address (overrides [client] service_addr)
    #[arg(short, long, env = "VHAL_SERVER")]
    server: Option<String>,
}

fn prop_id(arg: &str) -> std::result::Result<i32, String> {
    parse_prop_id(arg).ok_or_else(|| format!("invalid property id: {}", arg))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => VhalConfig::from_file(path)?,
        None => VhalConfig::default(),
    };
    logging::init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Serve { listen, timeout_ms } => serve(config, listen, timeout_ms).await,
        Command::Configs { remote, json } => {
            let hardware = connect(&config, &remote)?;
            let configs = hardware.get_all_property_configs().await;
            if configs.is_empty() {
                bail!("no property configs received");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&configs)?);
                return Ok(());
            }
            for config in configs {
                println!(
                    "{:#x} {:?} {:?} areas {:x?}",
                    config.prop,
                    config.access,
                    config.change_mode,
                    config.area_ids()
                );
            }
            Ok(())
        }
        Command::Get { remote, prop, area } => {
            let hardware = connect(&config, &remote)?;
            let (tx, rx) = completion_channel();
            let request = GetValueRequest {
                request_id: 0,
                prop: VehiclePropValue::new(prop, area),
            };
            check(hardware.get_values(tx, vec![request]).await)?;
            for result in rx.recv().await? {
                check(result.status)?;
                if let Some(value) = result.prop {
                    print_value(&value);
                }
            }
            Ok(())
        }
        Command::Set {
            remote,
            prop,
            area,
            int32,
            int64,
            float,
            string,
        } => {
            let hardware = connect(&config, &remote)?;
            let value = VehiclePropValue {
                prop,
                area_id: area,
                value: RawPropValues {
                    int32_values: int32,
                    int64_values: int64,
                    float_values: float,
                    string_value: string.unwrap_or_default(),
                    ..Default::default()
                },
                ..Default::default()
            };
            let (tx, rx) = completion_channel();
            let request = SetValueRequest {
                request_id: 0,
                value,
            };
            check(hardware.set_values(tx, vec![request]).await)?;
            for result in rx.recv().await? {
                check(result.status)?;
            }
            println!("OK");
            Ok(())
        }
        Command::Watch {
            remote,
            prop,
            rate,
            count,
        } => watch(&config, &remote, prop, rate, count).await,
        Command::Dump { remote, options } => {
            let hardware = connect(&config, &remote)?;
            let result = hardware.dump(&options).await;
            print!("{}", result.buffer);
            Ok(())
        }
        Command::Health(remote) => {
            let hardware = connect(&config, &remote)?;
            check(hardware.check_health().await)?;
            println!("OK");
            Ok(())
        }
    }
}

async fn serve(config: VhalConfig, listen: Option<String>, timeout_ms: Option<u64>) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(listen) = listen {
        server_config.listen_addr = listen;
    }
    if let Some(timeout_ms) = timeout_ms {
        server_config.hardware_op_timeout_ms = timeout_ms;
    }

    let hardware = Arc::new(FakeVehicleHardware::with_extra_properties(
        config.properties.clone(),
    ));
    let server = GrpcVehicleProxyServer::new(server_config.proxy_config(), hardware);
    server.start().await?;

    info!("vhal proxy v{} serving the fake vehicle", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    server.shutdown().await;
    server.wait().await?;
    Ok(())
}

async fn watch(
    config: &VhalConfig,
    remote: &Remote,
    prop: Option<i32>,
    rate: f32,
    count: Option<usize>,
) -> Result<()> {
    let hardware = connect(config, remote)?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    hardware.register_on_property_change_event(Box::new(move |values: Vec<VehiclePropValue>| {
        for value in values {
            let _ = tx.send(value);
        }
    }));

    if !hardware.wait_for_connected(Duration::from_secs(10)).await {
        bail!("could not open the property value stream");
    }
    let areas = match prop {
        Some(prop) => subscribe_areas(&hardware, prop, rate).await?,
        None => Vec::new(),
    };

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            value = rx.recv() => match value {
                Some(value) => {
                    print_value(&value);
                    seen += 1;
                    if count.is_some_and(|count| seen >= count) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if let Some(prop) = prop {
        unsubscribe_areas(&hardware, prop, &areas).await?;
    }
    hardware.shutdown().await;
    Ok(())
}

/// Subscribe to every area of `prop`, returning the areas subscribed
async fn subscribe_areas(
    hardware: &dyn VehicleHardware,
    prop: i32,
    rate: f32,
) -> Result<Vec<i32>> {
    let areas = hardware
        .get_all_property_configs()
        .await
        .into_iter()
        .find(|config| config.prop == prop)
        .map(|config| config.area_ids())
        .with_context(|| format!("no config for property {:#x}", prop))?;
    let options = SubscribeOptions {
        prop_id: prop,
        area_ids: areas.clone(),
        sample_rate: rate,
        ..Default::default()
    };
    check(hardware.subscribe(options).await)?;
    Ok(areas)
}

async fn unsubscribe_areas(
    hardware: &dyn VehicleHardware,
    prop: i32,
    areas: &[i32],
) -> Result<()> {
    for &area_id in areas {
        check(hardware.unsubscribe(prop, area_id).await)?;
    }
    Ok(())
}

fn connect(config: &VhalConfig, remote: &Remote) -> Result<GrpcVehicleHardware> {
    let mut client_config = config.client.clone();
    if let Some(server) = &remote.server {
        client_config.service_addr = server.clone();
    }
    Ok(GrpcVehicleHardware::new(client_config)?)
}

fn check(status: StatusCode) -> Result<()> {
    if !status.is_ok() {
        bail!("vehicle hardware returned {}", status);
    }
    Ok(())
}

fn print_value(value: &VehiclePropValue) {
    let raw = &value.value;
    let mut payload = Vec::new();
    if !raw.int32_values.is_empty() {
        payload.push(format!("int32 {:?}", raw.int32_values));
    }
    if !raw.int64_values.is_empty() {
        payload.push(format!("int64 {:?}", raw.int64_values));
    }
    if !raw.float_values.is_empty() {
        payload.push(format!("float {:?}", raw.float_values));
    }
    if !raw.string_value.is_empty() {
        payload.push(format!("string {:?}", raw.string_value));
    }
    if !raw.byte_values.is_empty() {
        payload.push(format!("bytes {:02x?}", raw.byte_values));
    }
    println!(
        "{:#x} area {:#x} [{}] {:?} @ {}",
        value.prop,
        value.area_id,
        payload.join(", "),
        value.status,
        value.timestamp
    );
}
