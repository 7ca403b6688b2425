//! ProvStamp CLI
//!
//! Commands: run, process, keygen, verify
//! `run` drives the watch loop; `process` pushes a single file through
//! the pipeline; `verify` re-checks a detached signature offline.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use provstamp_core::{
    pipeline::{PipelineOptions, PublishPipeline},
    signing, watch, Config, HttpContentStore, JsonlLedger, KeyError, KeyManager, KeyPaths,
    SegmentCompositor, SignatureRecord,
};

#[derive(Parser)]
#[command(name = "provstamp-cli")]
#[command(about = "ProvStamp - Image Provenance Pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, default_value = "provstamp.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured folder and process arrivals
    Run {
        /// Reuse the key pair generated under this timestamp stamp
        #[arg(long)]
        key_stamp: Option<String>,
    },

    /// Push a single file through the pipeline
    Process {
        /// Input image
        file: PathBuf,

        /// Reuse the key pair generated under this timestamp stamp
        #[arg(long)]
        key_stamp: Option<String>,
    },

    /// Generate a new key pair and exit
    Keygen,

    /// Verify a detached signature against a public key
    Verify {
        /// Armored public key file
        #[arg(short, long)]
        key: PathBuf,

        /// Composed artifact to re-hash
        #[arg(short, long)]
        artifact: PathBuf,

        /// Deployment identity bound into the payload
        #[arg(short, long)]
        identity: String,

        /// Signature, base64
        #[arg(short, long)]
        signature: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { key_stamp } => {
            let config = Config::load(&cli.config)?;
            config.ensure_folders()?;
            let mut pipeline = build_pipeline(&config, key_stamp.as_deref())?;
            tracing::info!(fingerprint = %pipeline.fingerprint(), "pipeline ready");

            // Service managers stop the process; the flag is the
            // cooperative cancellation point for embedded use.
            let stop = AtomicBool::new(false);
            watch::run(
                &mut pipeline,
                &config.paths.watch_folder,
                &config.settings.image_extension,
                config.settings.halt_on_error,
                &stop,
            )?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Process { file, key_stamp } => {
            let config = Config::load(&cli.config)?;
            config.ensure_folders()?;
            let mut pipeline = build_pipeline(&config, key_stamp.as_deref())?;
            let mut rng = StdRng::from_entropy();
            match pipeline.process_file(&file, &mut rng) {
                Ok(entry) => {
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("job failed for {}: {e}", file.display());
                    Ok(ExitCode::from(2))
                }
            }
        }

        Commands::Keygen => {
            let config = Config::load(&cli.config)?;
            config.ensure_folders()?;
            let stamp = key_stamp_now();
            let paths = KeyPaths::for_stamp(&config.paths.keys_folder, &stamp);
            let keys = KeyManager::generate(&paths, &config.settings.passphrase, &mut OsRng)?;
            println!(
                "{}",
                serde_json::json!({
                    "stamp": stamp,
                    "fingerprint": keys.fingerprint(),
                    "private_key": paths.private_key,
                    "public_key": paths.public_key,
                })
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Verify {
            key,
            artifact,
            identity,
            signature,
        } => {
            let verifying_key = provstamp_core::keys::load_verifying_key(&key)?;
            let bytes = std::fs::read(&artifact)?;
            let hash = signing::signed_hash(&bytes);
            let payload = signing::signature_payload(identity.as_bytes(), &hash);
            let record = SignatureRecord {
                payload_hash: provstamp_core::sha256_hex(&payload),
                signature: BASE64.decode(signature.as_bytes())?,
            };
            let valid = signing::verify(&verifying_key, &payload, &record);
            println!(
                "{}",
                serde_json::json!({ "valid": valid, "signed_hash": hash })
            );
            if valid {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
    }
}

fn build_pipeline(
    config: &Config,
    key_stamp: Option<&str>,
) -> Result<PublishPipeline, Box<dyn std::error::Error>> {
    let keys = load_keys(config, key_stamp)?;
    Ok(PublishPipeline::new(
        PipelineOptions::from_config(config),
        keys,
        Box::new(SegmentCompositor),
        Box::new(HttpContentStore::new(config.settings.store_api.clone())),
        Box::new(JsonlLedger::new(config.paths.ledger_file.clone())),
    ))
}

fn load_keys(config: &Config, key_stamp: Option<&str>) -> Result<KeyManager, KeyError> {
    match key_stamp {
        Some(stamp) => {
            let paths = KeyPaths::for_stamp(&config.paths.keys_folder, stamp);
            if config.settings.passphrase_prompt {
                KeyManager::load_with_reprompt(
                    &paths,
                    &config.settings.passphrase,
                    3,
                    prompt_passphrase,
                )
            } else {
                KeyManager::load(&paths, &config.settings.passphrase)
            }
        }
        None => {
            let paths = KeyPaths::for_stamp(&config.paths.keys_folder, &key_stamp_now());
            if config.settings.passphrase_prompt {
                KeyManager::load_or_generate_with_reprompt(
                    &paths,
                    &config.settings.passphrase,
                    3,
                    &mut OsRng,
                    prompt_passphrase,
                )
            } else {
                KeyManager::load_or_generate(&paths, &config.settings.passphrase, &mut OsRng)
            }
        }
    }
}

fn key_stamp_now() -> String {
    Utc::now().format("%m%d%y%H%M").to_string()
}

fn prompt_passphrase() -> io::Result<String> {
    eprint!("Enter the passphrase for the private key: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
