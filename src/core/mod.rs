pub mod config;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod modbus;
pub mod observer;
pub mod packer;
pub mod register;
pub mod server;
pub mod store;
pub mod types;

pub use config::*;
pub use error::*;
pub use generator::*;
pub use ingest::*;
pub use modbus::*;
pub use observer::*;
pub use packer::*;
pub use register::*;
pub use server::*;
pub use store::*;
pub use types::*;
