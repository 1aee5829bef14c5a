use std::sync::Arc;
use std::time::Duration;

use log::info;

use modbus_slave_sim::prelude::*;

/// Boots a server with a handful of sample registers, mirroring the kind of
/// setup `spec.md` leaves to the external configuration surface. Run with
/// `RUST_LOG=info cargo run --example serve`.
#[tokio::main]
async fn main() {
    env_logger::init();

    let store = Arc::new(RegisterStore::new());
    let ingest = ConfigIngest::new(store.clone());

    ingest
        .install(
            AddressSpace::HoldingRegisters,
            0,
            DeclaredType::Int16,
            Generator::Constant(RegisterValue::Int16(1000)),
            Duration::from_secs(1),
            Some("static demo reading".to_string()),
        )
        .await
        .expect("valid install");

    ingest
        .install(
            AddressSpace::HoldingRegisters,
            10,
            DeclaredType::Float32,
            Generator::Sine {
                amplitude: 10.0,
                offset: 50.0,
                frequency: 0.05,
            },
            Duration::from_secs(1),
            Some("sine wave demo reading".to_string()),
        )
        .await
        .expect("valid install");

    ingest
        .install_bit_overlay(
            AddressSpace::HoldingRegisters,
            100,
            vec![(0, BitChangeType::Periodic, Duration::from_secs(5), None)],
        )
        .await
        .expect("valid overlay");

    let config = ServerConfig::from_env();
    info!("starting modbus-slave-sim demo on {}", config.bind_address());

    let server = Server::new(config, store);
    server.serve().await.expect("server loop");
}
