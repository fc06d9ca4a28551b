use clap::Args;
use modslave_core::frame::{MAX_ADU_LEN, MBAP_HEADER_LEN};
use modslave_server::{logging_hook, RegisterBank, ServerConfig, DEFAULT_ADDR};
use std::time::Duration;

/// Every address a 16-bit offset can reach.
pub const FULL_TABLE: usize = 0x1_0000;

#[derive(Debug, Clone, Args)]
pub struct ListenArgs {
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub listen: String,
    /// Close a connection that takes longer than this to deliver a request.
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,
    /// Close a connection whose reply takes longer than this to flush.
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,
    #[arg(long, default_value_t = MAX_ADU_LEN, value_parser = parse_frame_len)]
    pub max_frame_len: usize,
    /// Log every connection state transition at debug level.
    #[arg(long)]
    pub log_states: bool,
}

impl ListenArgs {
    /// Address to bind; an empty `--listen` falls back to [`DEFAULT_ADDR`].
    pub fn addr(&self) -> &str {
        let addr = self.listen.trim();
        if addr.is_empty() {
            DEFAULT_ADDR
        } else {
            addr
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default().with_max_frame_len(self.max_frame_len);
        if let Some(ms) = self.read_timeout_ms {
            config = config.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.write_timeout_ms {
            config = config.with_write_timeout(Duration::from_millis(ms));
        }
        if self.log_states {
            config = config.with_conn_state(logging_hook());
        }
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct BankArgs {
    #[arg(long, default_value_t = FULL_TABLE, value_parser = parse_table_len)]
    pub coils: usize,
    #[arg(long, default_value_t = FULL_TABLE, value_parser = parse_table_len)]
    pub discrete_inputs: usize,
    #[arg(long, default_value_t = FULL_TABLE, value_parser = parse_table_len)]
    pub input_registers: usize,
    #[arg(long, default_value_t = FULL_TABLE, value_parser = parse_table_len)]
    pub holding_registers: usize,
}

impl BankArgs {
    pub fn build(&self) -> RegisterBank {
        RegisterBank::new(
            self.coils,
            self.discrete_inputs,
            self.input_registers,
            self.holding_registers,
        )
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .try_init();
}

pub fn parse_table_len(input: &str) -> Result<usize, String> {
    let len = parse_number(input)?;
    if len > FULL_TABLE {
        return Err(format!("table length {input} exceeds {FULL_TABLE}"));
    }
    Ok(len)
}

pub fn parse_frame_len(input: &str) -> Result<usize, String> {
    let len = parse_number(input)?;
    if len <= MBAP_HEADER_LEN {
        return Err(format!("frame length {input} leaves no room for a request"));
    }
    Ok(len)
}

/// Decimal, or hex with a `0x` prefix.
fn parse_number(input: &str) -> Result<usize, String> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

#[cfg(test)]
mod tests {
    use super::{parse_frame_len, parse_table_len, BankArgs, ListenArgs, FULL_TABLE};
    use clap::Parser;
    use std::time::Duration;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        listen: ListenArgs,
        #[command(flatten)]
        banks: BankArgs,
    }

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_table_len("0x6E"), Ok(0x6E));
        assert_eq!(parse_table_len("110"), Ok(110));
        assert_eq!(parse_table_len("65536"), Ok(FULL_TABLE));
        assert!(parse_table_len("65537").is_err());
        assert!(parse_table_len("many").is_err());
        assert!(parse_frame_len("7").is_err());
        assert_eq!(parse_frame_len("260"), Ok(260));
    }

    #[test]
    fn defaults_serve_full_tables_on_1502() {
        let cli = Cli::parse_from(["modslave"]);
        assert_eq!(cli.listen.listen, "0.0.0.0:1502");
        assert_eq!(cli.banks.coils, FULL_TABLE);
        let config = cli.listen.server_config();
        assert_eq!(config.max_frame_len, 260);
        assert!(config.read_timeout.is_none());
        assert!(config.conn_state.is_none());
    }

    #[test]
    fn empty_listen_uses_the_default_address() {
        let cli = Cli::parse_from(["modslave", "--listen", ""]);
        assert_eq!(cli.listen.addr(), "0.0.0.0:1502");
        let cli = Cli::parse_from(["modslave", "--listen", "  "]);
        assert_eq!(cli.listen.addr(), "0.0.0.0:1502");
        let cli = Cli::parse_from(["modslave", "--listen", "127.0.0.1:5020"]);
        assert_eq!(cli.listen.addr(), "127.0.0.1:5020");
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::parse_from([
            "modslave",
            "--listen",
            "127.0.0.1:5020",
            "--read-timeout-ms",
            "1500",
            "--write-timeout-ms",
            "200",
            "--max-frame-len",
            "128",
            "--holding-registers",
            "0x100",
            "--log-states",
        ]);
        let config = cli.listen.server_config();
        assert_eq!(config.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.write_timeout, Some(Duration::from_millis(200)));
        assert_eq!(config.max_frame_len, 128);
        assert!(config.conn_state.is_some());
        assert_eq!(cli.banks.build().holding_registers.len(), 0x100);
    }
}
