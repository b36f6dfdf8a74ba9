//! Binary entrypoint for the Meshtraccar CLI.
//!
//! Commands:
//! - `start` - subscribe to the broker and forward positions until Ctrl-C
//! - `init` - create a starter `config.toml`
//! - `decode <HEX>` - decode and decrypt one captured envelope, print a JSON summary
//!
//! See the library crate docs for module‑level details: `meshtraccar::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;

use meshtraccar::bridge::MessageIngress;
use meshtraccar::config::Config;
use meshtraccar::meshtastic::crypto::Decryptor;
use meshtraccar::meshtastic::summary::{port_label, summarize_port_payload};
use meshtraccar::meshtastic::{decode_envelope, PacketPayload};
use meshtraccar::protobuf::meshtastic_generated as proto;

#[derive(Parser)]
#[command(name = "meshtraccar")]
#[command(about = "Forward Meshtastic positions from MQTT to a Traccar server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Decode one hex-encoded ServiceEnvelope using the configured channel keys
    Decode {
        /// Raw MQTT payload as hex (whitespace and colons are ignored)
        hex: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let mut config = Config::load(&cli.config).await?;
            config.apply_env_overrides();
            init_logging(&Some(config.clone()), cli.verbose);
            config.validate()?;
            info!("Starting Meshtraccar v{}", env!("CARGO_PKG_VERSION"));

            let (ingress, cache) = MessageIngress::from_config(&config)?;
            meshtraccar::mqtt::run_subscriber(&config.mqtt, Arc::new(ingress)).await?;
            info!(
                "Bridge stopped ({} devices cached, {} evicted)",
                cache.len(),
                cache.evictions()
            );
        }
        Commands::Init { force } => {
            init_logging(&None, cli.verbose);
            if !force && tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    cli.config
                ));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Decode { hex } => {
            init_logging(&None, cli.verbose);
            let mut config = match Config::load(&cli.config).await {
                Ok(config) => config,
                Err(e) => {
                    warn!("{} (using default channel keys)", e);
                    Config::default()
                }
            };
            config.apply_env_overrides();
            let decryptor = Decryptor::from_config(&config.channel)?;
            let raw = parse_hex(&hex)?;
            println!("{}", describe_envelope(&decryptor, &raw)?);
        }
    }

    Ok(())
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .unwrap_or(digits.as_str())
        .to_string();
    if let Some(pos) = digits.chars().position(|c| !c.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid hex digit at position {}", pos));
    }
    if digits.len() % 2 != 0 {
        return Err(anyhow!("hex input has an odd number of digits"));
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| -> Result<u8> {
            let pair = std::str::from_utf8(pair)?;
            Ok(u8::from_str_radix(pair, 16)?)
        })
        .collect()
}

fn describe_envelope(decryptor: &Decryptor, raw: &[u8]) -> Result<serde_json::Value> {
    let Some(packet) = decode_envelope(raw)? else {
        return Ok(serde_json::json!({ "status": "no_packet" }));
    };
    let ctx = &packet.context;
    let (encrypted, data) = match &packet.payload {
        PacketPayload::Encrypted(bytes) => (true, decryptor.decrypt(ctx, bytes)?),
        PacketPayload::Plaintext(data) => (false, data.clone()),
    };
    let summary = proto::PortNum::try_from(data.portnum)
        .ok()
        .and_then(|port| summarize_port_payload(port, &data.payload));

    Ok(serde_json::json!({
        "status": "ok",
        "device_id": ctx.device_id,
        "from": ctx.from,
        "to": ctx.to_hex(),
        "packet_id": ctx.packet_id,
        "channel_id": ctx.channel_id,
        "gateway_id": ctx.gateway_id,
        "rx_time": ctx.rx_time,
        "encrypted": encrypted,
        "port": port_label(data.portnum),
        "payload_len": data.payload.len(),
        "summary": summary,
    }))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match (verbosity, config) {
        (0, Some(cfg)) => cfg.logging.level_filter(),
        (0, None) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // Dependencies are chatty at debug level
    builder.filter_module("rumqttc", log::LevelFilter::Info);
    builder.filter_module("reqwest", log::LevelFilter::Info);
    builder.filter_module("hyper", log::LevelFilter::Info);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // When stdout is not a terminal (service manager), only the file gets the line
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
