use clap::Parser;
use modslave_server::{ModbusTcpServer, RegisterHandler, Serialized};
use modslave_tools::common::{init_tracing, BankArgs, ListenArgs};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "modslave", about = "Modbus/TCP slave serving in-memory register tables")]
struct Args {
    #[command(flatten)]
    listen: ListenArgs,
    #[command(flatten)]
    banks: BankArgs,
    /// Handle one request at a time across all connections.
    #[arg(long)]
    serialize: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let bank = Arc::new(args.banks.build());
    let handler = RegisterHandler::new(Arc::clone(&bank));
    let config = args.listen.server_config();
    let addr = args.listen.addr();

    info!(
        addr,
        coils = bank.coils.len(),
        discrete_inputs = bank.discrete_inputs.len(),
        input_registers = bank.input_registers.len(),
        holding_registers = bank.holding_registers.len(),
        serialize = args.serialize,
        "starting modbus tcp slave"
    );

    if args.serialize {
        let server = ModbusTcpServer::bind(addr, Serialized::new(handler))
            .await?
            .with_config(config);
        info!(local_addr = %server.local_addr()?, "listening");
        server.run().await?;
    } else {
        let server = ModbusTcpServer::bind(addr, handler)
            .await?
            .with_config(config);
        info!(local_addr = %server.local_addr()?, "listening");
        server.run().await?;
    }
    Ok(())
}
