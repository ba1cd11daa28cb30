use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "jsondex",
    about = "A JSON document search server with per-collection writers"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the MCP tool server on stdio
    Serve,
    /// Queue documents from a JSON Lines file and wait until they are indexed
    Import(ImportArgs),
    /// Search a collection
    Search(SearchArgs),
    /// Retrieve a document by type and id
    Get(GetArgs),
    /// List collections
    Collections {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a collection's document count and configuration
    Info {
        /// Collection name
        collection: String,
    },
    /// Queue a checkpoint and wait for it to be reached
    Checkpoint(CheckpointArgs),
    /// Replace a collection's configuration with the contents of a JSON file
    SetConfig {
        /// Collection name
        collection: String,
        /// Path to the configuration JSON
        file: PathBuf,
    },
    /// Edit a category hierarchy
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// Read or change server settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Import --

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// Target collection
    pub collection: String,

    /// JSON Lines file, one document per line
    pub file: PathBuf,

    /// Run every document through this pipe instead of indexing it directly
    #[arg(long)]
    pub pipe: Option<String>,

    /// Commit once the documents are indexed, making them searchable
    #[arg(long)]
    pub commit: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Collection to search
    pub collection: String,

    /// Full-text query, or a JSON search request if it starts with `{`
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Skip this many results
    #[arg(long, default_value = "0")]
    pub from: usize,

    /// Only return documents of this type
    #[arg(short = 't', long)]
    pub doc_type: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Collection name
    pub collection: String,
    /// Document type
    pub doc_type: String,
    /// Document id
    pub doc_id: String,
}

// -- Checkpoint --

#[derive(Debug, Parser)]
pub struct CheckpointArgs {
    /// Collection name
    pub collection: String,

    /// Commit when the checkpoint is reached
    #[arg(long)]
    pub commit: bool,
}

// -- Category --

#[derive(Debug, Subcommand)]
pub enum CategoryAction {
    /// Make `parent` a parent of `category`
    AddParent {
        collection: String,
        taxonomy: String,
        category: String,
        parent: String,
    },
    /// Remove `parent` from the parents of `category`
    RemoveParent {
        collection: String,
        taxonomy: String,
        category: String,
        parent: String,
    },
    /// Remove a category and every edge touching it
    Remove {
        collection: String,
        taxonomy: String,
        category: String,
    },
}

// -- Settings --

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Show one setting
    Get {
        /// Setting name
        key: String,
    },
    /// Store a setting; takes effect on the next start
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// Remove a stored setting, reverting to its default
    Clear {
        /// Setting name
        key: String,
    },
    /// Show every effective setting
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
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
            "jsondex",
            &mut std::io::stdout(),
        );
    }
}
