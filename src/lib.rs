//! # OCPP Charge Point
//!
//! Charge-point side runtime for OCPP 1.6J with the Security Whitepaper
//! extensions: registration, the transactional message queue, per-connector
//! status machines, transaction handling with meter sampling, smart-charging
//! profiles and certificate provisioning over a JSON-over-WebSocket channel.
//!
//! ## Architecture
//!
//! - **support**: OCPP-J framing
//! - **message**: message classification and the transactional queue
//! - **status**: per-connector state machines with notification debounce
//! - **transaction**: active/stopped session tracking and meter sampling
//! - **smart_charging**: charging-profile validation and composition
//! - **store**: durable-store trait plus an in-memory implementation
//! - **transport**: WebSocket client seam (`tokio-tungstenite`)
//! - **charge_point**: the aggregate, inbound dispatch, typed handlers

pub mod callbacks;
pub mod charge_point;
pub mod config;
pub mod errors;
pub mod message;
pub mod security;
pub mod smart_charging;
pub mod status;
pub mod store;
pub mod support;
pub mod timers;
pub mod transaction;
pub mod transport;

// Re-export commonly used types at crate root
pub use callbacks::{CertificateVerification, ChargePointCallbacks};
pub use charge_point::{ChargePoint, ConnectionState, PowerMeter, SessionStartedReason};
pub use config::{ChargePointSettings, OcppConfig};
pub use errors::{ChargePointError, Result};
pub use store::{DataStore, MemoryStore};
pub use transport::{Transport, TransportEvent, WebsocketClient, WebsocketOptions};
