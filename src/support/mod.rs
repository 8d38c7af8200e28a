//! Cross-cutting utilities: OCPP-J framing.

pub mod ocpp_frame;

pub use ocpp_frame::OcppFrame;
