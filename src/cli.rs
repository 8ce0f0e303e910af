use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "dircheck",
    version,
    about = "Directory database consistency checking and repair tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Check(CheckArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ScopeArg {
    Base,
    One,
    Sub,
}

impl ScopeArg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::One => "one",
            Self::Sub => "sub",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Directory snapshot to check (and, in fix mode, to write repairs back to).
    #[arg(long)]
    pub db_path: PathBuf,

    /// Restrict the check to one subtree; omitted means the whole database.
    #[arg(long)]
    pub base_dn: Option<String>,

    #[arg(long, value_enum, default_value_t = ScopeArg::Sub)]
    pub scope: ScopeArg,

    /// Apply repairs instead of only reporting defects.
    #[arg(long, default_value_t = false)]
    pub fix: bool,

    /// Assume yes on every confirmation prompt.
    #[arg(long, default_value_t = false)]
    pub yes: bool,

    /// Suppress prompts entirely; combined with --fix, --yes decides.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,

    /// Echo every modification before applying it.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Allow seizing unowned FSMO roles onto the current server.
    #[arg(long, default_value_t = false)]
    pub seize_fsmo_role: bool,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}
