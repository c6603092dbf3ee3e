//! Issuer-side CLI: generate a secrets bundle, issue per-device
//! subscriptions, and encode frames for broadcast.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ectf_core::{
    encode_frame, Blake3Compressor, DecoderImage, Error as CoreError, Mt19937Expander, SecretsBundle,
    FRAME_SIZE,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ectf-issuer", version, about = "Conditional-access secrets, subscription, and frame issuer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a fresh secrets bundle for the given channels (channel 0 is
    /// added automatically).
    GenSecrets {
        #[arg(long)]
        force: bool,
        secrets_file: PathBuf,
        channels: Vec<u32>,
    },
    /// Issue a subscription for one device/channel over a timestamp window.
    GenSubscription {
        #[arg(long)]
        force: bool,
        secrets_file: PathBuf,
        subscription_file: PathBuf,
        device_id: u32,
        start: u64,
        end: u64,
        channel: u32,
    },
    /// Encode and sign one frame for broadcast.
    EncodeFrame {
        secrets_file: PathBuf,
        channel: u32,
        frame: String,
        timestamp: u64,
    },
    /// Build the decoder-image artifacts (`keys.bin`, `emergency.bin`,
    /// `public.bin`) for one device.
    Provision {
        #[arg(long)]
        force: bool,
        secrets_file: PathBuf,
        output_dir: PathBuf,
        device_id: u32,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Maps each `core::Error` variant to a distinct nonzero exit code; any
/// other failure (I/O, parsing, CLI usage) falls back to a generic code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::InvalidWindow { .. }) => 1,
        Some(CoreError::UnknownChannel(_)) => 2,
        Some(CoreError::MalformedSubscription(_)) => 3,
        Some(CoreError::MonotonicityViolation) => 4,
        Some(CoreError::SignatureInvalid) => 5,
        Some(CoreError::OutOfWindow) => 6,
        Some(CoreError::IoError) => 7,
        None => 100,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenSecrets { force, secrets_file, channels } => gen_secrets(&secrets_file, &channels, force),
        Command::GenSubscription { force, secrets_file, subscription_file, device_id, start, end, channel } => {
            gen_subscription(&secrets_file, &subscription_file, device_id, start, end, channel, force)
        }
        Command::EncodeFrame { secrets_file, channel, frame, timestamp } => {
            encode_frame_cmd(&secrets_file, channel, &frame, timestamp)
        }
        Command::Provision { force, secrets_file, output_dir, device_id } => {
            provision(&secrets_file, &output_dir, device_id, force)
        }
    }
}

fn refuse_overwrite(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    Ok(())
}

fn prompt_passphrase() -> Option<String> {
    match rpassword::prompt_password("Private key passphrase (leave blank for unencrypted): ") {
        Ok(pw) if !pw.is_empty() => Some(pw),
        Ok(_) => None,
        Err(_) => None,
    }
}

fn gen_secrets(secrets_file: &Path, channels: &[u32], force: bool) -> Result<()> {
    refuse_overwrite(secrets_file, force)?;

    let passphrase = prompt_passphrase();
    if passphrase.is_none() {
        warn!("no passphrase supplied; private key will be written as unencrypted PKCS#8");
    }

    let bundle = SecretsBundle::generate(channels, passphrase.as_deref())?;
    let json = bundle.to_json()?;
    fs::write(secrets_file, json).with_context(|| format!("writing {}", secrets_file.display()))?;

    info!(channels = ?bundle.channels, path = %secrets_file.display(), "wrote secrets bundle");
    Ok(())
}

fn gen_subscription(
    secrets_file: &Path,
    subscription_file: &Path,
    device_id: u32,
    start: u64,
    end: u64,
    channel: u32,
    force: bool,
) -> Result<()> {
    refuse_overwrite(subscription_file, force)?;

    let bundle = load_bundle(secrets_file)?;
    let blob =
        ectf_core::gen_subscription::<Blake3Compressor, Mt19937Expander>(&bundle, device_id, channel, start, end)?;

    fs::write(subscription_file, blob).with_context(|| format!("writing {}", subscription_file.display()))?;
    info!(device_id, channel, start, end, path = %subscription_file.display(), "wrote subscription");
    Ok(())
}

fn encode_frame_cmd(secrets_file: &Path, channel: u32, frame: &str, timestamp: u64) -> Result<()> {
    let bundle = load_bundle(secrets_file)?;
    let passphrase = prompt_passphrase();
    let signing_key = bundle.signing_key(passphrase.as_deref())?;
    let roots = bundle.channel_roots(channel)?;

    let frame_bytes = frame.as_bytes();
    if frame_bytes.len() > FRAME_SIZE {
        bail!("frame is {} bytes, maximum is {FRAME_SIZE}", frame_bytes.len());
    }
    let mut padded = [0u8; FRAME_SIZE];
    padded[FRAME_SIZE - frame_bytes.len()..].copy_from_slice(frame_bytes);

    let encoded =
        encode_frame::<Blake3Compressor>(&signing_key, roots.forward, roots.backward, channel, &padded, timestamp);

    println!("{}", hex::encode(encoded.to_bytes()));
    info!(channel, timestamp, "encoded frame");
    Ok(())
}

fn provision(secrets_file: &Path, output_dir: &Path, device_id: u32, force: bool) -> Result<()> {
    let keys_path = output_dir.join("keys.bin");
    let emergency_path = output_dir.join("emergency.bin");
    let public_path = output_dir.join("public.bin");
    for path in [&keys_path, &emergency_path, &public_path] {
        refuse_overwrite(path, force)?;
    }

    fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

    let bundle = load_bundle(secrets_file)?;
    let image = DecoderImage::build::<Blake3Compressor, Mt19937Expander>(&bundle, device_id)?;

    fs::write(&keys_path, &image.keys)?;
    fs::write(&emergency_path, image.emergency)?;
    fs::write(&public_path, image.public_key)?;

    info!(device_id, dir = %output_dir.display(), "wrote decoder image");
    Ok(())
}

fn load_bundle(secrets_file: &Path) -> Result<SecretsBundle> {
    let json = fs::read_to_string(secrets_file).with_context(|| format!("reading {}", secrets_file.display()))?;
    Ok(SecretsBundle::from_json(&json)?)
}
