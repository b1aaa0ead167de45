//! Thin RPC clients over the source and destination EVM chains.
//!
//! Both are narrow, purpose-built traits rather than a general-purpose chain
//! abstraction: the Bridge Core only ever needs the handful of operations
//! listed on [`source_reader::SourceReader`] and [`dest_client::DestinationClient`].

pub mod dest_client;
pub mod source_reader;

use std::time::Duration;

use ethers_providers::Http;

/// Fixed per-call HTTP timeout shared by both chain clients.
const RPC_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds an `ethers` HTTP transport with [`RPC_HTTP_TIMEOUT`] applied,
/// rather than the unbounded default `reqwest::Client`.
pub(crate) fn http_transport(endpoint: &str) -> Result<Http, String> {
    let url = endpoint.parse().map_err(|e| format!("invalid RPC endpoint {endpoint}: {e}"))?;
    let client = reqwest::Client::builder()
        .timeout(RPC_HTTP_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;
    Ok(Http::new_with_client(url, client))
}
