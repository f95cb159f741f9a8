// ABOUTME: Entry point for clawgate — a CLI around the tool-call permission gate.
// ABOUTME: Classifies commands, gates single invocations, and manages audit and rules.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use clawgate::audit::{AuditFilter, ExportFormat};
use clawgate::config::Config;
use clawgate::gate::{ApprovalAction, ApprovalMode, ApprovalScope, GateDecision, GateState, Gatekeeper};
use clawgate::logging::init_logging;
use clawgate::permission::PermissionLevel;
use clawgate::registry::StaticRegistry;
use clawgate::risk::{ClassifierPolicy, RiskClassifier, RiskLevel};

#[derive(Parser)]
#[command(name = "clawgate")]
#[command(about = "Permission gate for agent tool calls")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.clawgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a shell command without gating it
    Classify {
        command: String,
    },
    /// Gate a single tool invocation, prompting when approval is needed
    Check {
        #[arg(long)]
        tool: String,
        /// Tool arguments as JSON
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long, default_value = "cli")]
        session: String,
        /// Override the configured approval mode
        #[arg(long)]
        mode: Option<ApprovalMode>,
    },
    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Manage persisted permission rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Aggregate counts, optionally for one session
    Stats {
        #[arg(long)]
        session: Option<String>,
    },
    /// Most recent entries, newest first
    Recent {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
        #[arg(long)]
        tool: Option<String>,
        #[arg(long)]
        min_risk: Option<RiskLevel>,
    },
    /// Export every retained entry
    Export {
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },
    /// Drop all entries
    Clear,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// List persisted rules
    List,
    /// Persist an allow rule
    Allow {
        tool: String,
        #[arg(long)]
        path: Option<String>,
    },
    /// Persist a deny rule
    Deny {
        tool: String,
        #[arg(long)]
        path: Option<String>,
    },
    /// Persist an ask rule
    Ask {
        tool: String,
        #[arg(long)]
        path: Option<String>,
    },
    /// Remove a persisted rule
    Remove {
        tool: String,
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Classify { command } => {
            let classifier = RiskClassifier::new(ClassifierPolicy {
                low_requires_approval: config.gate.low_requires_approval,
            });
            let classification = classifier.classify_command(&command);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Commands::Check {
            tool,
            args,
            session,
            mode,
        } => {
            let args: Value = serde_json::from_str(&args).context("--args must be valid JSON")?;
            let gate = gatekeeper(&config)?;
            let mode = mode.unwrap_or(config.gate.mode);
            let decision = gate.check_and_gate_with(&tool, &args, &session, mode);
            let decision = match decision.terminal {
                GateState::QueuedForApproval => prompt_for_approval(&gate, &config, &session, decision).await?,
                _ => decision,
            };
            println!("{}", serde_json::to_string_pretty(&decision)?);
            if !decision.allowed {
                std::process::exit(1);
            }
        }
        Commands::Audit { command } => run_audit(&config, command)?,
        Commands::Rules { command } => run_rules(&config, command)?,
    }

    Ok(())
}

fn gatekeeper(config: &Config) -> Result<Gatekeeper> {
    Gatekeeper::from_config(config, Arc::new(StaticRegistry::builtin()))
}

/// Ask on stdin. No answer before the timeout counts as a denial.
async fn prompt_for_approval(
    gate: &Gatekeeper,
    config: &Config,
    session: &str,
    decision: GateDecision,
) -> Result<GateDecision> {
    let Some(id) = decision.approval_id.clone() else {
        bail!("queued decision without an approval id");
    };
    if let Some(reason) = &decision.reason {
        eprintln!("{reason}");
    }
    eprint!("approve? [y]es / [s]ession / [n]o / [d]eny for session: ");

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let answer = tokio::time::timeout(config.gate.approval_timeout(), stdin.read_line(&mut line)).await;

    let (action, scope) = match answer {
        Ok(Ok(_)) => match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => (ApprovalAction::Approve, ApprovalScope::Once),
            "s" | "session" => (ApprovalAction::Approve, ApprovalScope::Session),
            "d" => (ApprovalAction::Deny, ApprovalScope::Session),
            _ => (ApprovalAction::Deny, ApprovalScope::Once),
        },
        Ok(Err(err)) => {
            warn!(error = %err, "could not read approval answer");
            (ApprovalAction::Deny, ApprovalScope::Once)
        }
        Err(_) => {
            warn!(id = id.as_str(), "approval timed out");
            eprintln!();
            (ApprovalAction::Deny, ApprovalScope::Once)
        }
    };

    if !gate.resolve_approval(session, &id, action, scope) {
        bail!("approval {id} is no longer pending");
    }
    let terminal = match action {
        ApprovalAction::Approve => GateState::ApprovedTerminal,
        ApprovalAction::Deny => GateState::DeniedTerminal,
    };
    let reason = gate.audit().recent(1).into_iter().next().and_then(|entry| entry.reason);
    Ok(GateDecision {
        allowed: terminal.permits_execution(),
        terminal,
        reason,
        approval_id: Some(id),
        risk_level: decision.risk_level,
    })
}

fn run_audit(config: &Config, command: AuditCommand) -> Result<()> {
    let gate = gatekeeper(config)?;
    match command {
        AuditCommand::Stats { session } => {
            let stats = gate.audit_stats(session.as_deref());
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        AuditCommand::Recent { count, tool, min_risk } => {
            let mut filter = AuditFilter::default();
            if let Some(tool) = &tool {
                filter = filter.tool(tool);
            }
            if let Some(level) = min_risk {
                filter = filter.min_risk(level);
            }
            let entries: Vec<_> = gate.audit().query(&filter).into_iter().rev().take(count).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        AuditCommand::Export { format } => {
            print!("{}", gate.export_audit(format)?);
        }
        AuditCommand::Clear => {
            let removed = gate.audit().clear()?;
            info!(removed, "audit log cleared");
            println!("cleared {removed} entries");
        }
    }
    Ok(())
}

fn run_rules(config: &Config, command: RulesCommand) -> Result<()> {
    let gate = gatekeeper(config)?;
    let store = gate.store();
    match command {
        RulesCommand::List => {
            println!("{}", serde_json::to_string_pretty(&store.persisted_rules())?);
        }
        RulesCommand::Allow { tool, path } => {
            store.persist_permission(&tool, PermissionLevel::AllowSession, path.as_deref())?;
        }
        RulesCommand::Deny { tool, path } => {
            store.persist_permission(&tool, PermissionLevel::Deny, path.as_deref())?;
        }
        RulesCommand::Ask { tool, path } => {
            store.persist_permission(&tool, PermissionLevel::Ask, path.as_deref())?;
        }
        RulesCommand::Remove { tool, path } => {
            if !store.remove_persisted(&tool, path.as_deref())? {
                bail!("no persisted rule for {tool}");
            }
        }
    }
    Ok(())
}
