use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{metrics::DEFAULT_MAX_K, options::Options, sorter::DEFAULT_CACHE_CAPACITY};

#[derive(Debug, Parser)]
#[command(
    name = "bmneval",
    about = "Mine BMN call recommenders from code contexts and evaluate them on IDE completion events"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract usages from a context corpus and group them by type
    Sort(SortArgs),
    /// Mine one model per type (sorting the corpus first)
    Mine(MineArgs),
    /// Replay applied completions against the mined models
    Evaluate(EvaluateArgs),
    /// Count events by kind in an event corpus
    CountEvents(CountEventsArgs),
    /// Count contexts and the types they reference in a context corpus
    CountTypes(CountTypesArgs),
    /// Show store locations and contents
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Corpus selection --

#[derive(Debug, Args)]
pub struct ContextCorpus {
    /// Root directory of the context archives
    #[arg(long, value_name = "DIR")]
    pub contexts: PathBuf,

    /// Only read archives whose relative path matches this glob
    #[arg(long, value_name = "GLOB")]
    pub only: Option<String>,

    /// Usages buffered in memory before writing to the bucket store
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_size: usize,
}

#[derive(Debug, Args)]
pub struct EventCorpus {
    /// Root directory of the event archives
    #[arg(long, value_name = "DIR")]
    pub events: PathBuf,

    /// Only read archives whose relative path matches this glob
    #[arg(long, value_name = "GLOB")]
    pub only: Option<String>,
}

// -- Sort / Mine --

#[derive(Debug, Parser)]
pub struct SortArgs {
    #[command(flatten)]
    pub corpus: ContextCorpus,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct MineArgs {
    /// Root directory of the context archives
    #[arg(long, value_name = "DIR", required_unless_present = "skip_sort")]
    pub contexts: Option<PathBuf>,

    /// Only read archives whose relative path matches this glob
    #[arg(long, value_name = "GLOB")]
    pub only: Option<String>,

    /// Usages buffered in memory before writing to the bucket store
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_size: usize,

    /// Mine from the existing buckets instead of re-sorting the corpus
    #[arg(long)]
    pub skip_sort: bool,

    #[command(flatten)]
    pub features: FeatureArgs,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FeatureArgs {
    /// Ignore the class context
    #[arg(long)]
    pub no_cctx: bool,

    /// Ignore the method context
    #[arg(long)]
    pub no_mctx: bool,

    /// Ignore the definition site
    #[arg(long)]
    pub no_def: bool,

    /// Ignore method calls
    #[arg(long)]
    pub no_calls: bool,

    /// Include call sites taking the instance as a parameter
    #[arg(long)]
    pub params: bool,

    /// Include field, property and event references
    #[arg(long)]
    pub members: bool,

    /// Drop table rows observed fewer than N times
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub at_least: u32,
}

impl FeatureArgs {
    /// The options these flags describe, validated the same way as the
    /// textual form.
    pub fn options(&self) -> crate::Result<Options> {
        Options {
            class_context: !self.no_cctx,
            method_context: !self.no_mctx,
            definition: !self.no_def,
            calls: !self.no_calls,
            params: self.params,
            members: self.members,
            at_least: self.at_least,
        }
        .to_string()
        .parse()
    }
}

// -- Evaluate --

#[derive(Debug, Parser)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub corpus: EventCorpus,

    /// Options the models were mined with, e.g. cctx+mctx+def+calls+atleast1
    /// (default: the options recorded by the last `mine`)
    #[arg(long, value_name = "SPEC", value_parser = parse_options)]
    pub options: Option<Options>,

    /// Highest rank to report
    #[arg(long, default_value_t = DEFAULT_MAX_K)]
    pub max_k: usize,

    /// Restart the counters after each archive report
    #[arg(long)]
    pub reset_per_archive: bool,

    /// Evaluate archives in parallel
    #[arg(long)]
    pub parallel: bool,

    /// Output the final table as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_options(s: &str) -> Result<Options, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

// -- Count events --

#[derive(Debug, Parser)]
pub struct CountEventsArgs {
    #[command(flatten)]
    pub corpus: EventCorpus,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Count types --

#[derive(Debug, Parser)]
pub struct CountTypesArgs {
    /// Root directory of the context archives
    #[arg(long, value_name = "DIR")]
    pub contexts: PathBuf,

    /// Only read archives whose relative path matches this glob
    #[arg(long, value_name = "GLOB")]
    pub only: Option<String>,

    /// List every referenced type
    #[arg(long)]
    pub list: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "bmneval",
            &mut std::io::stdout(),
        );
    }
}
