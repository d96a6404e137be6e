//! Trinkgeld Core – gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate enthaelt die Bausteine die von allen anderen Crates
//! verwendet werden: Identifikationstypen (Wallet-Adresse, Kanal-ID,
//! Stream-ID), Betrags- und Allokationstypen sowie den zentralen
//! Fehler-Enum.

pub mod error;
pub mod types;

pub use error::{Result, TrinkgeldError};
pub use types::{Address, Allocation, Allowance, Amount, ChannelId, StreamId, ViewerId};
