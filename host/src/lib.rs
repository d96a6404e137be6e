//! Trinkgeld Host – Broadcaster-Konsole
//!
//! Verbindet die ClearNode-Engine mit Konfiguration und Logging. Die
//! WebRTC-Seite (SignalHub) wird von der einbettenden Anwendung mit
//! ihrem Peer-Kollaborateur verdrahtet; die Konsole deckt den
//! Abwicklungs-Pfad ab: Session, Kanal, Trinkgeld-Eingang, Claim.

pub mod abwicklung;
pub mod config;

pub use config::HostConfig;
