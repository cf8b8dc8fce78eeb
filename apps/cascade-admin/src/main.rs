// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use cascade::{
    cascade_core::{AccessTarget, AdminStatus, FeatureId, ImageKind, Opcode, TransportCmd},
    cascade_if::Device,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade-admin", about = "Inspect and configure cascade accelerator boards", version)]
struct Cli {
    /// Yaml configuration, defaults to $CASCADE_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Board to talk to, as numbered by `list`.
    #[arg(long, short, global = true, default_value_t = 0)]
    device: usize,

    /// Print results as json.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List every board found.
    List,
    /// Generation and chip counts of a board.
    HwInfo,
    GetFeature {
        feature: Feature,
        #[arg(long, default_value_t = 0)]
        chip: u32,
    },
    SetFeature {
        feature: Feature,
        #[arg(long, default_value_t = 0)]
        chip: u32,
        /// Up to twelve parameter words, decimal or 0x prefixed.
        #[arg(value_parser = parse_u32)]
        params: Vec<u32>,
    },
    /// Data moved since the counters were last read. Reading resets them.
    Throughput,
    ReadReg {
        #[arg(value_parser = parse_u32)]
        addr: u32,
        #[arg(long, default_value_t = 0)]
        chip: u32,
        #[arg(long, default_value = "mpu")]
        target: AccessTarget,
    },
    WriteReg {
        #[arg(value_parser = parse_u32)]
        addr: u32,
        #[arg(value_parser = parse_u32)]
        value: u32,
        #[arg(long, default_value_t = 0)]
        chip: u32,
        #[arg(long, default_value = "mpu")]
        target: AccessTarget,
    },
    /// Send a firmware or model image to the board.
    Download { kind: ImageKind, file: PathBuf },
    /// Turn firmware thermal throttling on or off on every chip.
    Thermal { state: Switch },
    Gpio {
        #[command(subcommand)]
        op: GpioCmd,
    },
    /// Acknowledge a pending legacy interrupt and show what it signalled.
    Event,
}

#[derive(Subcommand)]
enum GpioCmd {
    Read {
        #[arg(long, default_value_t = 0)]
        chip: u32,
        io: u32,
    },
    Write {
        #[arg(long, default_value_t = 0)]
        chip: u32,
        io: u32,
        level: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Feature {
    Info,
    Throughput,
    InterfaceInfo,
    PowerManagement,
    Frequency,
    Gpio,
    HwInfo,
    MpuUtilization,
}

impl From<Feature> for FeatureId {
    fn from(value: Feature) -> Self {
        match value {
            Feature::Info => FeatureId::Info,
            Feature::Throughput => FeatureId::Throughput,
            Feature::InterfaceInfo => FeatureId::InterfaceInfo,
            Feature::PowerManagement => FeatureId::PowerManagement,
            Feature::Frequency => FeatureId::Frequency,
            Feature::Gpio => FeatureId::Gpio,
            Feature::HwInfo => FeatureId::HwInfo,
            Feature::MpuUtilization => FeatureId::MpuUtilization,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("{value}: {err}"))
}

struct Output {
    json: bool,
}

impl Output {
    fn command(&self, cmd: &TransportCmd) -> Result<(), Box<dyn std::error::Error>> {
        let status = cmd.status();
        if self.json {
            println!(
                "{}",
                json!({ "status": status.0, "data": cmd.cq.data.to_vec() })
            );
        } else {
            println!("status: {status}");
            for (index, word) in cmd.cq.data.iter().enumerate() {
                println!("  data[{index:2}] = 0x{word:08x}");
            }
        }

        if status != AdminStatus::NO_ERROR {
            return Err(format!("device reported {status}").into());
        }
        Ok(())
    }

    fn value(&self, name: &str, value: u32) {
        if self.json {
            let mut map = serde_json::Map::new();
            map.insert(name.to_string(), json!(value));
            println!("{}", serde_json::Value::Object(map));
        } else {
            println!("{name}: 0x{value:08x}");
        }
    }

    fn done(&self, what: &str) {
        if self.json {
            println!("{}", json!({ "ok": what }));
        } else {
            println!("{what}");
        }
    }
}

fn list(devices: &[Device], out: &Output) {
    if out.json {
        let boards = devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                json!({
                    "index": index,
                    "id": device.id,
                    "transport": device.transport_name(),
                    "generation": device.topology().generation.to_string(),
                    "chips": device.topology().total_chip_count,
                })
            })
            .collect::<Vec<_>>();
        println!("{}", json!(boards));
        return;
    }

    println!("Cascade devices: {}", devices.len());
    for (index, device) in devices.iter().enumerate() {
        let topology = device.topology();
        println!(
            "[{index}] {} {} chips={} groups={}",
            device.transport_name(),
            topology.generation,
            topology.total_chip_count,
            topology.group_count
        );
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cascade::config::load(cli.config.as_deref())?;
    let out = Output { json: cli.json };

    let mut devices = cascade::detect_devices(&config)?;
    if let Cmd::List = cli.command {
        list(&devices, &out);
        return Ok(());
    }

    if cli.device >= devices.len() {
        return Err(format!(
            "device {} not found, {} boards detected",
            cli.device,
            devices.len()
        )
        .into());
    }
    let device = devices.swap_remove(cli.device);
    tracing::debug!("using {} device {}", device.transport_name(), device.id);

    match cli.command {
        Cmd::List => {}
        Cmd::HwInfo => {
            let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::HwInfo);
            device.admin_command(&mut cmd)?;
            out.command(&cmd)?;
        }
        Cmd::GetFeature { feature, chip } => {
            let mut cmd = TransportCmd::feature(Opcode::GetFeature, feature.into()).with_chip(chip);
            device.admin_command(&mut cmd)?;
            out.command(&cmd)?;
        }
        Cmd::SetFeature {
            feature,
            chip,
            params,
        } => {
            let mut cmd = TransportCmd::feature(Opcode::SetFeature, feature.into())
                .with_chip(chip)
                .with_params(&params);
            device.admin_command(&mut cmd)?;
            out.command(&cmd)?;
        }
        Cmd::Throughput => {
            let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Throughput);
            device.admin_command(&mut cmd)?;
            out.command(&cmd)?;
        }
        Cmd::ReadReg { addr, chip, target } => {
            let value = device.read_register(chip, addr, target)?;
            out.value(&format!("0x{addr:08x}"), value);
        }
        Cmd::WriteReg {
            addr,
            value,
            chip,
            target,
        } => {
            device.write_register(chip, addr, value, target)?;
            out.done("written");
        }
        Cmd::Download { kind, file } => {
            let image = std::fs::read(&file)?;
            device.download(kind, &image)?;
            out.done("downloaded");
        }
        Cmd::Thermal { state } => {
            device.set_thermal_throttling(matches!(state, Switch::On))?;
            out.done("thermal throttling updated");
        }
        Cmd::Event => match device.pending_event()? {
            Some(event) => out.done(&event),
            None => out.done("no pending event"),
        },
        Cmd::Gpio { op } => match op {
            GpioCmd::Read { chip, io } => {
                device.set_gpio_target((chip << 8) | io);
                out.value("level", device.read_gpio()?);
            }
            GpioCmd::Write { chip, io, level } => {
                device.write_gpio(chip, io, level)?;
                out.done("written");
            }
        },
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
