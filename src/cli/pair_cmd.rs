use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::{checksum_address, CliError};
use crate::config::BridgeConfig;
use crate::ledger::{Pair, PairDirection, PairRegistry};
use crate::store::SledStore;

fn open_registry(home: &Path) -> Result<PairRegistry<SledStore>, CliError> {
    let config = BridgeConfig::load(home)?;
    let db = Arc::new(SledStore::open(&config.db_path)?);
    Ok(PairRegistry::new(db))
}

pub fn set(home: &Path, in_addr: &str, out_addr: &str, in_type_wrapped: bool) -> Result<(), CliError> {
    let in_addr = checksum_address(in_addr)?;
    let out_addr = checksum_address(out_addr)?;
    let registry = open_registry(home)?;

    let pair = Pair {
        in_addr: in_addr.clone(),
        out_addr: out_addr.clone(),
        in_type: if in_type_wrapped {
            PairDirection::Wrapped
        } else {
            PairDirection::Original
        },
    };
    registry.put(&pair)?;

    info!(in_addr = %in_addr, out_addr = %out_addr, "registered pair");
    println!("registered pair {in_addr} -> {out_addr}");
    Ok(())
}

pub fn get(home: &Path, in_addr: &str) -> Result<(), CliError> {
    let in_addr = checksum_address(in_addr)?;
    let registry = open_registry(home)?;

    match registry.get(&in_addr)? {
        Some(pair) => {
            println!(
                "in={} out={} type={:?}",
                pair.in_addr, pair.out_addr, pair.in_type
            );
            Ok(())
        }
        None => Err(CliError::NotFound(format!("no pair registered for {in_addr}"))),
    }
}
