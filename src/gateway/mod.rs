//! Gateway process wiring

mod server;

pub use server::{DrainHandler, Gateway, authenticator_from_config};
