//! Network module - N-port network response representation
//!
//! Provides the core Network struct and the network algebra used by the
//! calibration engine and the coupler model: transfer parameters, cascade,
//! de-embedding, port connection and three-port embedding.

mod connect;
mod core;
mod io;
mod operators;
mod params;

pub use connect::{connect_s, embed_three_port, innerconnect_s, terminate};
pub use core::Network;
pub use operators::cascade_t;
