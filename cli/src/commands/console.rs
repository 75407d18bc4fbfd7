//! Operator console grammar and dispatch.
//!
//! Each stdin line is parsed with clap and executed against the
//! orchestrator. Execution returns a `Reply`; printing is the caller's job.

use clap::{Args, Parser, Subcommand};
use leasekeeper_common::{Creator, InstanceRecord};

use crate::application::orchestrator::{DestroyAck, Orchestrator};
use crate::application::ports::{Clock, CloudProvider, Notifier, PanelPublisher, PanelStateStore};
use crate::application::services::instance_actions::PowerAction;
use crate::application::services::render_serializer::RenderTrigger;
use crate::domain::error::OrchestratorError;
use crate::domain::instance::ProvisionRequest;
use crate::domain::timer::format_remaining;

#[derive(Parser, Debug)]
#[command(name = "console", no_binary_name = true, disable_version_flag = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Create an instance from a snapshot
    Provision(ProvisionArgs),
    /// Refresh and show one instance
    Status { id: String },
    /// Destroy an instance and confirm it is gone
    Destroy { id: String },
    /// Extend the self-destruct timer
    Extend { id: String },
    /// Power on an instance
    Start { id: String },
    /// Power off an instance
    Stop { id: String },
    /// Reboot an instance
    Restart { id: String },
    /// List active instances
    List,
    /// Regenerate the summary panel now
    Render,
    /// Stop the console
    #[command(alias = "exit")]
    Quit,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct ProvisionArgs {
    /// Snapshot id to restore
    pub image: String,
    /// Instance label
    pub name: String,
    /// Region id, e.g. `dfw`
    pub region: String,
    /// Requester id the instance belongs to
    #[arg(long)]
    pub user: Option<String>,
    /// Requester display name
    #[arg(long)]
    pub display: Option<String>,
}

/// What the console prints after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack(String),
    Lines(Vec<String>),
    /// Labelled values, one per line.
    Fields(Vec<(&'static str, String)>),
    Quit,
}

/// Parse one console line.
///
/// # Errors
///
/// Returns clap's error (including help output) for unknown or malformed commands.
pub fn parse(line: &str) -> Result<ConsoleCommand, clap::Error> {
    ConsoleLine::try_parse_from(line.split_whitespace()).map(|l| l.command)
}

/// Execute a parsed command against the orchestrator.
///
/// # Errors
///
/// Returns the orchestrator's error for the command.
pub async fn execute<P, N, C, B, S>(
    orchestrator: &Orchestrator<P, N, C, B, S>,
    operator: &Creator,
    command: ConsoleCommand,
) -> Result<Reply, OrchestratorError>
where
    P: CloudProvider + 'static,
    N: Notifier + 'static,
    C: Clock + 'static,
    B: PanelPublisher + 'static,
    S: PanelStateStore + 'static,
{
    let reply = match command {
        ConsoleCommand::Provision(args) => {
            let requester = match args.user {
                Some(id) => {
                    let display = args.display.unwrap_or_else(|| id.clone());
                    Creator::new(id, display)
                }
                None => operator.clone(),
            };
            let name = args.name.clone();
            // Progress and the outcome arrive as notices.
            let _task = orchestrator.provision(requester, ProvisionRequest::new(args.image, args.name, args.region))?;
            Reply::Ack(format!("provisioning {name} started"))
        }
        ConsoleCommand::Status { id } => {
            let record = orchestrator.request_status(&id).await?;
            Reply::Fields(describe(&record, orchestrator.context().now()))
        }
        ConsoleCommand::Destroy { id } => Reply::Ack(match orchestrator.request_destroy(&id)? {
            DestroyAck::Started => format!("destroying {id}"),
            DestroyAck::AlreadyInProgress => format!("{id} is already being destroyed"),
            DestroyAck::AlreadyDestroyed => format!("{id} is already destroyed"),
        }),
        ConsoleCommand::Extend { id } => {
            let expires_at = orchestrator.extend_timer(&id)?;
            Reply::Ack(format!("{id} now self-destructs at {}", expires_at.format("%H:%M UTC")))
        }
        ConsoleCommand::Start { id } => power(orchestrator, &id, PowerAction::Start).await?,
        ConsoleCommand::Stop { id } => power(orchestrator, &id, PowerAction::Stop).await?,
        ConsoleCommand::Restart { id } => power(orchestrator, &id, PowerAction::Restart).await?,
        ConsoleCommand::List => {
            let now = orchestrator.context().now();
            let active = orchestrator.context().registry.list_active();
            if active.is_empty() {
                Reply::Lines(vec!["no active instances".to_string()])
            } else {
                Reply::Lines(active.iter().map(|r| summary_line(r, now)).collect())
            }
        }
        ConsoleCommand::Render => {
            orchestrator.request_render(RenderTrigger::Manual);
            Reply::Ack("render requested".to_string())
        }
        ConsoleCommand::Quit => Reply::Quit,
    };
    Ok(reply)
}

async fn power<P, N, C, B, S>(
    orchestrator: &Orchestrator<P, N, C, B, S>,
    id: &str,
    action: PowerAction,
) -> Result<Reply, OrchestratorError>
where
    P: CloudProvider + 'static,
    N: Notifier + 'static,
    C: Clock + 'static,
    B: PanelPublisher + 'static,
    S: PanelStateStore + 'static,
{
    let record = orchestrator.power(id, action).await?;
    Ok(Reply::Ack(format!("{action} accepted; {} is {}", record.display_name(), record.status)))
}

fn summary_line(record: &InstanceRecord, now: chrono::DateTime<chrono::Utc>) -> String {
    let remaining = record
        .self_destruct
        .as_ref()
        .map_or_else(|| "no timer".to_string(), |t| format_remaining(t.remaining(now)));
    format!(
        "{id}  {name}  {status}  {ip}  {owner}  {remaining}",
        id = record.id,
        name = record.display_name(),
        status = record.status,
        ip = record.ip.as_deref().unwrap_or("-"),
        owner = record.creator.display_name,
    )
}

fn describe(record: &InstanceRecord, now: chrono::DateTime<chrono::Utc>) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", record.id.clone()),
        ("name", record.display_name().to_string()),
        ("status", record.status.to_string()),
        ("ip", record.ip.clone().unwrap_or_else(|| "-".to_string())),
        ("region", record.region.clone().unwrap_or_else(|| "-".to_string())),
        ("owner", record.creator.display_name.clone()),
    ];
    if let Some(timer) = &record.self_destruct {
        fields.push((
            "expires",
            format!(
                "{} ({}, extended {}x)",
                timer.expires_at.format("%Y-%m-%d %H:%M UTC"),
                format_remaining(timer.remaining(now)),
                timer.extended_count
            ),
        ));
    }
    if record.recovered {
        fields.push(("origin", "recovered from provider listing".to_string()));
    }
    fields
}
