use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cts",
    about = "Content-addressed version control with a shared remote",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a workspace
    Init(InitArgs),
    /// Create a workspace from a remote repository
    Clone(CloneArgs),
    /// Show staged, modified and untracked files
    Status(StatusArgs),
    /// Stage files for the next commit
    Add(AddArgs),
    /// Stage the removal of tracked files
    Rm(RmArgs),
    /// Drop staged changes for paths
    Unstage(UnstageArgs),
    /// Record the staged snapshot as a commit
    Commit(CommitArgs),
    /// Show commit history of the current branch
    Log(LogArgs),
    /// List branches
    Branch(BranchArgs),
    /// Change the current branch, creating it at HEAD if new
    Switch(SwitchArgs),
    /// Configure or create the remote repository
    Remote(RemoteArgs),
    /// Send the current branch to the remote
    Push(PushArgs),
    /// Fast-forward the current branch from the remote
    Pull(PullArgs),
    /// Get or set workspace configuration
    Config(ConfigArgs),
    /// Run a CTS server
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Directory to initialize (defaults to the current one)
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct CloneArgs {
    /// Server base URL
    pub url: String,
    /// Repository id on that server
    pub repository: String,
    /// Target directory (defaults to one named after the repository id)
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// One line per path
    #[arg(short, long)]
    pub short: bool,
}

#[derive(Args)]
pub struct AddArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Keep the files in the working directory
    #[arg(long)]
    pub cached: bool,
}

#[derive(Args)]
pub struct UnstageArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct CommitArgs {
    #[arg(short, long)]
    pub message: String,
    /// Commit even if the tree matches the parent
    #[arg(long)]
    pub allow_empty: bool,
}

#[derive(Args)]
pub struct LogArgs {
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args)]
pub struct BranchArgs {}

#[derive(Args)]
pub struct SwitchArgs {
    pub branch: String,
}

#[derive(Args)]
pub struct RemoteArgs {
    #[command(subcommand)]
    pub action: Option<RemoteAction>,
}

#[derive(Subcommand)]
pub enum RemoteAction {
    /// Use an existing repository on a server
    Set { url: String, repository: String },
    /// Create a repository on a server and use it
    Create {
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget the remote
    Remove,
}

#[derive(Args)]
pub struct PushArgs {}

#[derive(Args)]
pub struct PullArgs {}

#[derive(Args)]
pub struct ConfigArgs {
    /// e.g. user.name, commit.allow_empty, sync.max_attempts
    pub key: String,
    pub value: Option<String>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML file with server settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Directory holding hosted repositories
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Keep everything in memory
    #[arg(long, conflicts_with = "root")]
    pub memory: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["cts", "init"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.path, None);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_init_path() {
        let cli = Cli::try_parse_from(["cts", "init", "/tmp/work"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.path, Some(PathBuf::from("/tmp/work")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_add_requires_paths() {
        assert!(Cli::try_parse_from(["cts", "add"]).is_err());
        let cli = Cli::try_parse_from(["cts", "add", "a.txt", "src"]).unwrap();
        if let Command::Add(args) = cli.command {
            assert_eq!(args.paths, vec![PathBuf::from("a.txt"), PathBuf::from("src")]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_rm_cached() {
        let cli = Cli::try_parse_from(["cts", "rm", "--cached", "a.txt"]).unwrap();
        if let Command::Rm(args) = cli.command {
            assert!(args.cached);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_commit() {
        let cli = Cli::try_parse_from(["cts", "commit", "-m", "hello"]).unwrap();
        if let Command::Commit(args) = cli.command {
            assert_eq!(args.message, "hello");
            assert!(!args.allow_empty);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn commit_needs_message() {
        assert!(Cli::try_parse_from(["cts", "commit"]).is_err());
    }

    #[test]
    fn parse_log_limit() {
        let cli = Cli::try_parse_from(["cts", "log", "-n", "3", "--oneline"]).unwrap();
        if let Command::Log(args) = cli.command {
            assert_eq!(args.limit, Some(3));
            assert!(args.oneline);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_remote_set() {
        let cli = Cli::try_parse_from([
            "cts",
            "remote",
            "set",
            "http://localhost:7420",
            "0190b2a4-3c5e-7d41-9a2b-5f0e8c6d1a27",
        ])
        .unwrap();
        if let Command::Remote(RemoteArgs {
            action: Some(RemoteAction::Set { url, repository }),
        }) = cli.command
        {
            assert_eq!(url, "http://localhost:7420");
            assert_eq!(repository, "0190b2a4-3c5e-7d41-9a2b-5f0e8c6d1a27");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_remote_show() {
        let cli = Cli::try_parse_from(["cts", "remote"]).unwrap();
        assert!(matches!(cli.command, Command::Remote(RemoteArgs { action: None })));
    }

    #[test]
    fn parse_clone() {
        let cli = Cli::try_parse_from([
            "cts",
            "clone",
            "http://localhost:7420",
            "0190b2a4-3c5e-7d41-9a2b-5f0e8c6d1a27",
            "work",
        ])
        .unwrap();
        if let Command::Clone(args) = cli.command {
            assert_eq!(args.url, "http://localhost:7420");
            assert_eq!(args.repository, "0190b2a4-3c5e-7d41-9a2b-5f0e8c6d1a27");
            assert_eq!(args.path, Some(PathBuf::from("work")));
        } else {
            panic!("wrong command");
        }
        assert!(Cli::try_parse_from(["cts", "clone", "http://localhost:7420"]).is_err());
    }

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["cts", "serve", "--bind", "0.0.0.0:8080", "--memory"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.bind, Some("0.0.0.0:8080".parse().unwrap()));
            assert!(args.memory);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn serve_memory_conflicts_with_root() {
        assert!(Cli::try_parse_from(["cts", "serve", "--memory", "--root", "/srv"]).is_err());
    }

    #[test]
    fn global_verbose() {
        let cli = Cli::try_parse_from(["cts", "status", "-v"]).unwrap();
        assert!(cli.verbose);
    }
}
