use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    collection_db::DEFAULT_MAX_BATCH_SIZE,
    embedding::DEFAULT_EMBED_BATCH_SIZE,
    index_builder::DEFAULT_COLLECTION,
    search::DEFAULT_OVERFETCH_FACTOR,
};

#[derive(Debug, Parser)]
#[command(
    name = "postseek",
    about = "Semantic search over social media posts"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Collection to build or search
    #[arg(long, global = true, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

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
    /// Load a corpus export and rebuild the index from it
    Build(BuildArgs),
    /// Search indexed posts by meaning
    Search(SearchArgs),
    /// List the distinct profiles in the index
    Profiles(ProfilesArgs),
    /// Show index status and statistics
    Status(StatusArgs),
    /// Manage the embedding model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Path to the delimited corpus file
    pub corpus: PathBuf,

    /// Field delimiter of the corpus file
    #[arg(long, default_value_t = ';')]
    pub delimiter: char,

    /// Texts embedded per model call
    #[arg(long, default_value_t = DEFAULT_EMBED_BATCH_SIZE)]
    pub embed_batch_size: usize,

    /// Entries written per store insert
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub insert_batch_size: usize,

    /// Hide the embedding progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'k', long, default_value = "5")]
    pub top_k: usize,

    /// Only return posts by this profile
    #[arg(short = 'p', long)]
    pub profile: Option<String>,

    /// Only return posts with at least this many interactions
    #[arg(short = 'm', long, allow_negative_numbers = true)]
    pub min_interactions: Option<i64>,

    /// Blend similarity with interaction volume when ranking
    #[arg(short = 'b', long)]
    pub boost_interactions: bool,

    /// Candidates fetched per result when boosting
    #[arg(long, default_value_t = DEFAULT_OVERFETCH_FACTOR)]
    pub overfetch: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Profiles --

#[derive(Debug, Parser)]
pub struct ProfilesArgs {
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

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID in config.redb
    Set {
        /// Model ID (HuggingFace)
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
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
            "postseek",
            &mut std::io::stdout(),
        );
    }
}
