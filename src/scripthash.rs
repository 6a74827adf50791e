//! Scripthash (address fingerprint) derivation.
//!
//! The cache, the indexer and the dispatcher all key history by the Electrum
//! wire encoding of a scripthash: sha256 of the output script, byte-reversed,
//! hex-encoded. Esplora indexes by the forward encoding, so the lookup path
//! reverses on its way out.

use std::str::FromStr;

use anyhow::{Context, Result};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Network};

/// Convert script bytes to the Electrum scripthash hex (little endian).
pub fn electrum_scripthash(script: &[u8]) -> String {
    let hash = sha256::Hash::hash(script);
    let mut bytes = hash.to_byte_array();
    bytes.reverse();
    hex::encode(bytes)
}

/// Derive the Electrum scripthash for a textual address.
pub fn address_scripthash(address: &str, network: Network) -> Result<String> {
    let address = Address::from_str(address)
        .with_context(|| format!("failed to parse address {}", address))?
        .require_network(network)
        .with_context(|| format!("address is not valid for {}", network))?;
    Ok(electrum_scripthash(address.script_pubkey().as_bytes()))
}

/// Reverse the byte order of a hex string.
pub fn reverse_hex(hex_str: &str) -> Result<String> {
    let mut bytes = hex::decode(hex_str)
        .with_context(|| format!("failed to decode hex string {}", hex_str))?;
    bytes.reverse();
    Ok(hex::encode(bytes))
}
