//! Trinkgeld Protokoll
//!
//! Definiert das RPC-Protokoll zum ClearNode-Koordinator (JSON-Envelopes
//! mit Methodenname, Parametern und optionaler Signatur), das zugehoerige
//! Wire-Format (Length-Prefix + JSON) sowie die Ereignistypen des
//! Broadcast-Topics fuer die WebRTC-Signalisierung.

pub mod rpc;
pub mod signal;
pub mod wire;

pub use rpc::{RpcEnvelope, RpcPayload};
pub use signal::{topic_name, SignalAbsender, SignalEreignis};
pub use wire::{FrameCodec, RpcFrame};
