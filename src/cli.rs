use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate prompt text in a workflow file or a directory of workflows
    #[command(group(ArgGroup::new("source").required(true).args(["input", "input_dir"])))]
    Translate {
        /// Input workflow file (API format JSON)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory searched recursively for workflow files
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Output file, or output directory together with --input-dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target language (overrides the configuration)
        #[arg(short, long)]
        target_lang: Option<String>,
    },

    /// Translate a workflow and queue it on a node-graph server
    Submit {
        /// Input workflow file (API format JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Server URL (overrides host.endpoint)
        #[arg(long)]
        endpoint: Option<String>,

        /// Submit without auto-translation
        #[arg(long)]
        no_translate: bool,
    },

    /// Show whether a text would be translated, and from which language
    Check {
        /// Text to classify
        text: String,

        /// Target language (overrides the configuration)
        #[arg(short, long)]
        target_lang: Option<String>,
    },

    /// Print the default configuration, or write it to a file
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
