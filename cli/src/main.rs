//! leasekeeper - ephemeral cloud instances with enforced firewalls and self-destruct timers

use clap::Parser;
use leasekeeper_cli::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    // Registry and services are single-threaded; every task runs on this set.
    let local = tokio::task::LocalSet::new();
    if let Err(e) = local.run_until(cli.run()).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
