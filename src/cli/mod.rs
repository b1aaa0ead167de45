//! Command-line surface: `init`, `pair set|get`, `serve`.

pub mod init_cmd;
pub mod pair_cmd;
pub mod serve_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bridgecli", about = "One-directional EVM-to-EVM asset bridge relay")]
pub struct Cli {
    /// Config/data home directory. Defaults to `$HOME/.bridgecli`.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a fresh config template to the home directory.
    Init,
    /// Inspect or register a token pair.
    Pair {
        #[command(subcommand)]
        action: PairAction,
    },
    /// Run the relay until a termination signal arrives.
    Serve,
}

#[derive(Subcommand)]
pub enum PairAction {
    /// Register a source-chain token mapped to a destination-chain token.
    Set {
        in_addr: String,
        out_addr: String,
        /// Marks the source token as already-wrapped (reserved, currently a no-op direction).
        #[arg(long)]
        in_type_wrapped: bool,
    },
    /// Look up a registered pair.
    Get { in_addr: String },
}

#[derive(Debug)]
pub enum CliError {
    Config(crate::config::ConfigError),
    Store(crate::store::StoreError),
    Io(String),
    InvalidAddress(String),
    NotFound(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "configuration error: {e}"),
            CliError::Store(e) => write!(f, "store error: {e}"),
            CliError::Io(msg) => write!(f, "io error: {msg}"),
            CliError::InvalidAddress(addr) => write!(f, "invalid address: {addr}"),
            CliError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<crate::config::ConfigError> for CliError {
    fn from(e: crate::config::ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<crate::store::StoreError> for CliError {
    fn from(e: crate::store::StoreError) -> Self {
        CliError::Store(e)
    }
}

pub(crate) fn resolve_home(home: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match home {
        Some(h) => Ok(h),
        None => crate::config::BridgeConfig::default_home().map_err(CliError::Config),
    }
}

/// Validates and checksums a `0x`-prefixed 40-hex-char address. Checksum
/// casing follows EIP-55 exactly as `ethers_core::utils::to_checksum` does.
pub(crate) fn checksum_address(addr: &str) -> Result<String, CliError> {
    let parsed: ethers_core::types::Address = addr
        .parse()
        .map_err(|_| CliError::InvalidAddress(addr.to_string()))?;
    Ok(ethers_core::utils::to_checksum(&parsed, None))
}
