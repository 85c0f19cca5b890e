pub mod api;
pub mod chat;
pub mod protocol;
pub mod registry;
pub mod telemetry;
pub mod terminal;
pub mod transport;
