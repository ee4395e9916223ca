//! DAPS client demo
//!
//! Requests a DAT for the connector, verifies it against the DAPS key set
//! and prints its claims.
//!
//! ```text
//! daps-client-demo <config.json> <SKI:keyid:AKI> <private-key.pem>
//! ```
//!
//! The config file holds a serialized `DapsConfig`, for example
//! `{"daps_url": "https://daps.example.com", "token_path": "/auth/token"}`.
//! Logging is controlled with `RUST_LOG`.

use std::env;
use std::fs;

use anyhow::{Context, bail};
use daps_client::{DapsClient, DapsConfig, KeyFingerprint};
use secrecy::SecretString;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the claims, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [config_path, fingerprint, key_path] = args.as_slice() else {
        bail!("usage: daps-client-demo <config.json> <SKI:keyid:AKI> <private-key.pem>");
    };

    let config: DapsConfig = serde_json::from_str(
        &fs::read_to_string(config_path).with_context(|| format!("reading {config_path}"))?,
    )
    .context("parsing DAPS config")?;
    let fingerprint: KeyFingerprint = fingerprint.parse().context("parsing key fingerprint")?;
    let pem = SecretString::new(
        fs::read_to_string(key_path).with_context(|| format!("reading {key_path}"))?,
    );

    let identity = config.load_identity(fingerprint, &pem)?;
    let client = DapsClient::builder(config, identity).build()?;
    info!(subject = %client.subject(), token_url = %client.endpoint().token_url(), "Requesting DAT");

    let dat = client.get_dat().await?;
    info!(
        issued_at = dat.issued_at,
        expires_at = dat.claims.exp,
        "DAT validated"
    );

    // A second call within the lifespan is served from the cache
    let cached = client.get_dat().await?;
    if cached.token != dat.token {
        bail!("cached DAT differs from the one just fetched");
    }

    println!("{}", serde_json::to_string_pretty(&dat.claims)?);
    Ok(())
}
