//! Device probe
//!
//! Connects to a device under test through its console server, discovers the
//! host and BMC addresses, and prints a short inventory.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example probe -- --config dut.json
//! ```
//!
//! Skip the direct SSH sessions and only use the console:
//! ```bash
//! cargo run --example probe -- --config dut.json --console-only
//! ```

use std::env;
use std::path::PathBuf;

use dutshell::queries;
use dutshell::{Session, SystemUnderTest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut dut = SystemUnderTest::from_path(&args.config)?;
    println!("=== {} ===\n", dut);

    dut.connect_console().await?;
    dut.discover().await?;
    println!("Discovered: {}\n", dut);

    if let Some(console) = dut.console() {
        let hw_error = queries::has_hardware_error(console).await?;
        println!("Hardware error in dmesg: {}", if hw_error { "YES" } else { "no" });

        if let Some(command) = &args.command {
            let result = console.execute(command).await?;
            println!("\n$ {}\n{}", command, result.stdout);
        }
    }

    if !args.console_only {
        dut.connect_host().await?;
        if let Some(host) = dut.host() {
            println!("OS:   {}", queries::os_version(host).await?);
            println!("CPU:  {}", queries::cpu_model(host).await?);
            println!("BIOS: {}", queries::bios_version(host).await?);
        }

        dut.connect_bmc().await?;
        if let Some(bmc) = dut.bmc() {
            let result = bmc.execute("ipmitool mc info").await?;
            if result.is_success() {
                println!("BMC:  {}", queries::bmc_version(bmc).await?);
            } else {
                println!("BMC:  ipmitool unavailable ({})", result.stderr.trim());
            }
        }
    }

    dut.disconnect_all().await?;
    println!("\nDisconnected.");
    Ok(())
}

struct Args {
    config: PathBuf,
    command: Option<String>,
    console_only: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = PathBuf::from("dut.json");
        let mut command = None;
        let mut console_only = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        config = PathBuf::from(&args[i]);
                    }
                }
                "--exec" | "-e" => {
                    i += 1;
                    if i < args.len() {
                        command = Some(args[i].clone());
                    }
                }
                "--console-only" => {
                    console_only = true;
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            config,
            command,
            console_only,
        }
    }

    fn print_help() {
        println!(
            r#"dutshell device probe

Connects through the console server, discovers host and BMC addresses,
and prints an inventory of the device.

USAGE:
    cargo run --example probe -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Device description JSON (default: dut.json)
    -e, --exec <COMMAND>   Also run COMMAND on the console and print its output
        --console-only     Do not open the host and BMC SSH sessions
        --help             Print help

ENVIRONMENT:
    RUST_LOG               Log filter (default: info)
"#
        );
    }
}
