mod address;
mod beads;
mod checkpoint;
mod commands;
mod config;
mod deacon;
mod error;
mod hook;
mod identity;
mod mux;
mod namepool;
mod runtime;
mod sling;
mod spawn;
mod subprocess;
mod telemetry;
mod template;
mod vcs;
mod witness;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::convoy::ConvoyArgs;
use commands::deacon::DeaconArgs;
use commands::doctor::DoctorArgs;
use commands::done::DoneArgs;
use commands::handoff::HandoffArgs;
use commands::hook::HookArgs;
use commands::mail::MailArgs;
use commands::prime::PrimeArgs;
use commands::schema::SchemaArgs;
use commands::shutdown::ShutdownArgs;
use commands::sling::SlingArgs;
use commands::spawn::SpawnArgs;
use commands::start::StartArgs;
use commands::status::StatusArgs;
use commands::witness::WitnessArgs;

#[derive(Debug, Parser)]
#[command(
    name = "gt",
    version,
    about = "Multi-agent workspace orchestrator for LLM coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Startup protocol: read the hook, print the current step, go
    Prime(PrimeArgs),
    /// Dispatch work units to agents
    Sling(SlingArgs),
    /// Attach or inspect hooks
    Hook(HookArgs),
    /// Signal completion of the hooked work
    Done(DoneArgs),
    /// End a session cleanly, leaving context for the successor
    Handoff(HandoffArgs),
    /// Spawn a polecat into a rig
    Spawn(SpawnArgs),
    /// Per-rig patrol and cleanup
    Witness(WitnessArgs),
    /// Town-wide health rounds, force-kills, and zombie scans
    Deacon(DeaconArgs),
    /// Tracking convoys
    Convoy(ConvoyArgs),
    /// Store-backed agent mail
    Mail(MailArgs),
    /// Validate the town and companion tools
    Doctor(DoctorArgs),
    /// Town overview
    Status(StatusArgs),
    /// Scaffold a town
    Start(StartArgs),
    /// Stop agents by scope
    Shutdown(ShutdownArgs),
    /// Print config JSON Schemas
    Schema(SchemaArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Prime(_) => "prime",
            Self::Sling(_) => "sling",
            Self::Hook(_) => "hook",
            Self::Done(_) => "done",
            Self::Handoff(_) => "handoff",
            Self::Spawn(_) => "spawn",
            Self::Witness(_) => "witness",
            Self::Deacon(_) => "deacon",
            Self::Convoy(_) => "convoy",
            Self::Mail(_) => "mail",
            Self::Doctor(_) => "doctor",
            Self::Status(_) => "status",
            Self::Start(_) => "start",
            Self::Shutdown(_) => "shutdown",
            Self::Schema(_) => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Prime(args) => args.execute(),
        Commands::Sling(args) => args.execute(),
        Commands::Hook(args) => args.execute(),
        Commands::Done(args) => args.execute(),
        Commands::Handoff(args) => args.execute(),
        Commands::Spawn(args) => args.execute(),
        Commands::Witness(args) => args.execute(),
        Commands::Deacon(args) => args.execute(),
        Commands::Convoy(args) => args.execute(),
        Commands::Mail(args) => args.execute(),
        Commands::Doctor(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Start(args) => args.execute(),
        Commands::Shutdown(args) => args.execute(),
        Commands::Schema(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                if !exit_err.is_silent() {
                    eprintln!("error: {exit_err}");
                }
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
