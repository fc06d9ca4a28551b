//! Serves a small register bank on 127.0.0.1:1502 and keeps its input
//! registers moving, the way a device process owns its read-only tables.
//!
//! Run with `RUST_LOG=debug` to see every request.

use modslave_server::{logging_hook, ModbusTcpServer, RegisterBank, RegisterHandler, ServerConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let bank = Arc::new(RegisterBank::new(64, 64, 64, 64));
    bank.set_holding_register(0, 1234)?;
    bank.set_discrete_input(0, true)?;

    let ticker = Arc::clone(&bank);
    tokio::spawn(async move {
        let mut counter = 0u16;
        loop {
            counter = counter.wrapping_add(1);
            let _ = ticker.set_input_register(0, counter);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let config = ServerConfig::default()
        .with_read_timeout(Duration::from_secs(30))
        .with_conn_state(logging_hook());
    let server = ModbusTcpServer::bind("127.0.0.1:1502", RegisterHandler::new(bank))
        .await?
        .with_config(config);
    println!("listening on {}", server.local_addr()?);
    server.run().await?;
    Ok(())
}
