//! The hardware module contains channel implementations that can stand in for a
//! real diagnostic adapter.
//!
//! Physical adapters (SocketCAN ISO-TP, ELM327 and friends) live outside this
//! crate; anything implementing [crate::channel::RequestChannel] can be handed
//! to the decoder.

pub mod simulation;

pub use simulation::{SimResponse, SimulationChannel};
