use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rscan-dispatch")]
#[command(about = "Split scan requests into sub-tasks and queue them for the worker pool")]
#[command(long_about = r#"
Rscan dispatch accepts a scan request, splits its targets and ports into
bounded slices and queues one sub-task per slice for the workers.

WARNING: Only dispatch scans against networks and systems you own or have
explicit permission to test.

Usage Examples:
  rscan-dispatch dispatch portscan -r request.json --dry-run
  rscan-dispatch dispatch xkeyword-rules -r request.json --rules rules.json
  rscan-dispatch compile fofa --keyword "admin||login" --exclude "test"
  rscan-dispatch classify targets.txt
  rscan-dispatch show-target portscan config.json
  rscan-dispatch init-config rscan-dispatch.toml
"#)]
#[command(version)]
#[command(author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RSCAN_DISPATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress output)
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fan a request out into sub-tasks
    Dispatch {
        /// Request shape
        #[arg(value_enum)]
        request: RequestType,

        /// Request body as JSON
        #[arg(short, long, value_name = "FILE")]
        request_file: PathBuf,

        /// Main task the sub-tasks are grouped under (generated when omitted)
        #[arg(long)]
        main_task_id: Option<String>,

        /// Workspace the results belong to
        #[arg(short, long, default_value = "0")]
        workspace: u32,

        /// Keep submissions in memory and print them instead of queuing
        #[arg(long)]
        dry_run: bool,

        /// Keyword rules and organizations as JSON, used instead of PostgreSQL
        #[arg(long, value_name = "FILE")]
        rules: Option<PathBuf>,
    },

    /// Compile a keyword rule into an engine query
    Compile {
        /// Search engine: fofa, quake or hunter
        engine: String,

        /// Keywords, separated by ||
        #[arg(short, long)]
        keyword: String,

        /// Words to exclude, separated by ||
        #[arg(short, long, default_value = "")]
        exclude: String,

        /// Match mode: title, body or self
        #[arg(short, long, default_value = "title")]
        mode: String,
    },

    /// Classify every line of a target file
    Classify {
        /// Target file, one target per line
        file: PathBuf,
    },

    /// Show the display target of a stored sub-task config
    ShowTarget {
        /// Task kind
        kind: String,

        /// Task config as JSON
        file: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        /// Output file
        #[arg(default_value = "rscan-dispatch.toml")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RequestType {
    /// Port scan with optional location and online search
    Portscan,
    /// Probe followed by port scan
    Batchscan,
    /// Subdomain discovery and lookups
    Domainscan,
    /// Vulnerability verification
    Pocscan,
    /// Single engine keyword search
    Xkeyword,
    /// Stored keyword rules
    XkeywordRules,
    /// Per-domain x-scan
    Xdomain,
    /// Per-slice x-scan port scan
    Xport,
    /// Organization asset scan
    Xorg,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            RequestType::Portscan => "portscan",
            RequestType::Batchscan => "batchscan",
            RequestType::Domainscan => "domainscan",
            RequestType::Pocscan => "pocscan",
            RequestType::Xkeyword => "xkeyword",
            RequestType::XkeywordRules => "xkeyword-rules",
            RequestType::Xdomain => "xdomain",
            RequestType::Xport => "xport",
            RequestType::Xorg => "xorg",
        };
        write!(f, "{}", name)
    }
}
