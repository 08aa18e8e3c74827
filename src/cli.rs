use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "brsr-search",
    about = "Semantic search over company sustainability reports"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Metadata table (CSV with COMPANY, FROM YEAR, TO YEAR, ATTACHMENT)
    #[arg(long, global = true)]
    pub metadata: Option<PathBuf>,

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
    /// Index report PDFs (files or directories)
    Index(IndexArgs),
    /// Search indexed reports
    Search(SearchArgs),
    /// List canonical company names
    Companies(JsonArgs),
    /// Resolve a company name and list its report years
    CompanyInfo(CompanyInfoArgs),
    /// List indexed documents
    Documents(JsonArgs),
    /// Show system status and statistics
    Status(JsonArgs),
    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// PDF files or directories to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Only index files in directories whose relative path matches this glob
    #[arg(short, long)]
    pub glob: Option<String>,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Company name (fuzzy matched against the metadata table)
    #[arg(short, long)]
    pub company: Option<String>,

    /// Report year, used as a ranking hint
    #[arg(short, long)]
    pub year: Option<String>,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Company info --

#[derive(Debug, Parser)]
pub struct CompanyInfoArgs {
    /// Company name, possibly misspelled or abbreviated
    pub name: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective value of every setting
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name (e.g. chunk_size, backend)
        key: String,
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Unset { key: String },
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
            "brsr-search",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["brsr-search", "search", "water usage"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "water usage");
                assert_eq!(args.count, 5);
                assert_eq!(args.company, None);
                assert_eq!(args.year, None);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_with_filters() {
        let cli = Cli::parse_from([
            "brsr-search",
            "search",
            "emissions",
            "-c",
            "Acme",
            "-y",
            "2023",
            "-n",
            "3",
            "--metadata",
            "meta.csv",
        ]);
        assert_eq!(cli.metadata, Some(PathBuf::from("meta.csv")));
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.company.as_deref(), Some("Acme"));
                assert_eq!(args.year.as_deref(), Some("2023"));
                assert_eq!(args.count, 3);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn index_requires_a_path() {
        assert!(Cli::try_parse_from(["brsr-search", "index"]).is_err());
        let cli =
            Cli::parse_from(["brsr-search", "index", "reports/", "-g", "*.pdf"]);
        match cli.command {
            Command::Index(args) => {
                assert_eq!(args.paths, vec![PathBuf::from("reports/")]);
                assert_eq!(args.glob.as_deref(), Some("*.pdf"));
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(
            Cli::try_parse_from(["brsr-search", "-q", "-v", "status"]).is_err()
        );
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
