//! `leasekeeper serve`: run the orchestrator until stdin closes or `quit`.

use anyhow::Result;
use clap::Args;
use leasekeeper_common::Creator;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

use crate::app;
use crate::application::ports::ConfigStore;
use crate::commands::console::{self, Reply};
use crate::infra::config::YamlConfigStore;
use crate::output::OutputContext;

/// Arguments for the serve command.
#[derive(Args)]
pub struct ServeArgs {
    /// Requester id used for console provisioning without `--user`
    #[arg(long, default_value = "operator")]
    pub operator: String,

    /// Skip the background sweep and scheduled renders
    #[arg(long)]
    pub no_background: bool,
}

/// Run the serve command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the API key is
/// missing, or stdin cannot be read.
pub async fn run(no_color: bool, quiet: bool, args: ServeArgs) -> Result<()> {
    let store = YamlConfigStore;
    let config = store.load()?;
    let orchestrator = app::build(&config, OutputContext::new(no_color, quiet))?;
    let console_out = OutputContext::new(no_color, quiet);
    info!(config = %store.path()?.display(), "orchestrator starting");

    orchestrator.startup().await;
    let background = if args.no_background {
        Vec::new()
    } else {
        orchestrator.spawn_background()
    };
    let operator = Creator::new(args.operator.clone(), args.operator);
    console_out.header("leasekeeper console. Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let command = match console::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                // clap renders help and usage errors itself.
                println!("{}", err.render());
                continue;
            }
        };
        match console::execute(&orchestrator, &operator, command).await {
            Ok(Reply::Quit) => break,
            Ok(Reply::Ack(msg)) => console_out.success(&msg),
            Ok(Reply::Lines(lines)) => {
                for line in lines {
                    println!("  {line}");
                }
            }
            Ok(Reply::Fields(fields)) => {
                for (key, value) in fields {
                    console_out.kv(&format!("{key:<8}"), &value);
                }
            }
            Err(err) => console_out.error(&err.to_string()),
        }
    }

    orchestrator.shutdown();
    for handle in background {
        if let Err(err) = handle.await {
            warn!(error = %err, "background loop ended abnormally");
        }
    }
    info!("orchestrator stopped");
    Ok(())
}
