//! Electrum-style JSON-RPC gateway.
//!
//! Wallet clients connect over persistent TLS sockets and speak
//! newline-delimited JSON-RPC 2.0; chain data comes from one of three
//! interchangeable backends (an Esplora-style explorer, a companion node
//! RPC, or static fixture files). A background indexer scans recent blocks
//! and keeps a capacity-bounded per-scripthash history cache warm.

pub mod backend;
pub mod cache;
pub mod esplora;
pub mod indexer;
pub mod protocol;
pub mod scripthash;
pub mod server;
