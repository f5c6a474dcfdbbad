use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Wallet address to inspect
    pub wallet: String,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Refresh continuously at this interval in seconds
    #[arg(short, long)]
    pub watch: Option<u64>,

    /// Transactions shown per page
    #[arg(long, default_value_t = 10)]
    pub tx_page_size: usize,
}
