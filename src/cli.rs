use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative infrastructure orchestration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack declaration file
    #[arg(
        short = 'f',
        long = "file",
        global = true,
        default_value = "stack.toml",
        env = "STRATUS_STACK"
    )]
    pub file: PathBuf,

    /// State file (defaults to the stack file with a .state.json extension)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse the stack file and validate the dependency graph
    Validate,

    /// Preview the operations apply would perform
    Plan,

    /// Converge infrastructure to match the declaration
    Apply(ApplyArgs),

    /// Tear down every resource recorded in state
    Destroy(DestroyArgs),

    /// Inspect recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Show exported outputs from the last apply
    Outputs(OutputsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan without calling providers
    #[arg(short, long)]
    pub dry_run: bool,

    /// Number of concurrent operations
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Refresh recorded outputs from providers before planning
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of concurrent operations
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one resource record
    Show { name: String },

    /// Drop a record from state without touching the remote object
    Rm { name: String },
}

#[derive(Args)]
pub struct OutputsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}
