use std::fs;
use std::io;

use anyhow::{bail, Context};
use colored::Colorize;
use tracing::debug;

use cts_client::{
    ClientConfig, ClientError, CommitPolicy, PullStatus, PushStatus, RepositoryId,
    Workspace, WorktreeUpdate,
};
use cts_server::{CtsServer, ServerConfig, StorageBackend};
use cts_sync::{HttpTransport, SyncError};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Init(args) => cmd_init(args),
        Command::Clone(args) => cmd_clone(args).await,
        Command::Status(args) => cmd_status(args),
        Command::Add(args) => cmd_add(args),
        Command::Rm(args) => cmd_rm(args),
        Command::Unstage(args) => cmd_unstage(args),
        Command::Commit(args) => cmd_commit(args),
        Command::Log(args) => cmd_log(args),
        Command::Branch(_) => cmd_branch(),
        Command::Switch(args) => cmd_switch(args),
        Command::Remote(args) => cmd_remote(args).await,
        Command::Push(_) => cmd_push().await,
        Command::Pull(_) => cmd_pull().await,
        Command::Config(args) => cmd_config(args),
        Command::Serve(args) => cmd_serve(args).await,
    }
}

fn open_workspace() -> anyhow::Result<Workspace> {
    let cwd = std::env::current_dir()?;
    let ws = Workspace::open(&cwd)?;
    debug!(root = %ws.root().display(), "opened workspace");
    Ok(ws)
}

fn cmd_init(args: InitArgs) -> anyhow::Result<()> {
    let path = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let ws = Workspace::init(&path)?;
    println!(
        "{} Initialized empty CTS workspace in {}",
        "✓".green().bold(),
        ws.root().display().to_string().bold()
    );
    println!("  Branch: {}", ws.current_branch()?.short_name().yellow());
    Ok(())
}

async fn cmd_clone(args: CloneArgs) -> anyhow::Result<()> {
    let repository = RepositoryId::parse(&args.repository)
        .with_context(|| format!("invalid repository id {:?}", args.repository))?;
    let path = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?.join(repository.to_string()),
    };
    let (ws, pulled) = Workspace::clone_from(&args.url, repository, &path).await?;
    println!(
        "{} Cloned {} into {}",
        "✓".green().bold(),
        repository.to_string().cyan(),
        ws.root().display().to_string().bold()
    );
    match pulled {
        Some((outcome, update)) => {
            println!(
                "  {} at {} ({} commits, {} files)",
                outcome.branch.short_name().yellow(),
                outcome.head.short_hex().bold(),
                outcome.commits,
                update.written.len()
            );
        }
        None => println!("  The remote repository is empty."),
    }
    Ok(())
}

fn cmd_status(args: StatusArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let status = ws.status()?;

    if args.short {
        for entry in &status.staged {
            println!("{}  {}", entry.status.code().to_string().green(), entry.path);
        }
        for entry in &status.modified {
            println!(" {} {}", entry.status.code().to_string().red(), entry.path);
        }
        for path in &status.untracked {
            println!("{} {}", "??".red(), path);
        }
        return Ok(());
    }

    let branch = ws.current_branch()?;
    println!("On branch {}", branch.short_name().yellow().bold());
    if ws.head()?.is_none() {
        println!("\nNo commits yet");
    }
    if !status.staged.is_empty() {
        println!("\nChanges to be committed:");
        for entry in &status.staged {
            println!("  {:<10} {}", format!("{}:", entry.status).green(), entry.path.green());
        }
    }
    if !status.modified.is_empty() {
        println!("\nChanges not staged for commit:");
        for entry in &status.modified {
            println!("  {:<10} {}", format!("{}:", entry.status).red(), entry.path.red());
        }
    }
    if !status.untracked.is_empty() {
        println!("\nUntracked files:");
        for path in &status.untracked {
            println!("  {}", path.red());
        }
    }
    if status.staged.is_empty() && status.modified.is_empty() && status.untracked.is_empty() {
        println!("\nNothing to commit, working directory clean.");
    }
    Ok(())
}

fn cmd_add(args: AddArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    for (path, digest) in ws.stage(&args.paths)? {
        println!("  {} {} {}", "staged:".green(), path, digest.short_hex().dimmed());
    }
    Ok(())
}

fn cmd_rm(args: RmArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    for path in ws.stage_removal(&args.paths)? {
        if !args.cached {
            let file = ws.root().join(&path);
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("removing {}", file.display()))
                }
            }
        }
        println!("  {} {}", "removed:".red(), path);
    }
    Ok(())
}

fn cmd_unstage(args: UnstageArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    for path in ws.unstage(&args.paths)? {
        println!("  {} {}", "unstaged:".yellow(), path);
    }
    Ok(())
}

fn cmd_commit(args: CommitArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let policy = CommitPolicy {
        allow_empty: args.allow_empty || ws.config().commit.allow_empty,
    };
    let digest = ws.commit_with(&args.message, policy)?;
    let branch = ws.current_branch()?;
    println!(
        "[{} {}] {}",
        branch.short_name().yellow(),
        digest.short_hex().bold(),
        args.message.lines().next().unwrap_or_default()
    );
    Ok(())
}

fn cmd_log(args: LogArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let entries = ws.log(args.limit)?;
    if entries.is_empty() {
        println!("No commits yet on {}.", ws.current_branch()?.short_name().yellow());
        return Ok(());
    }
    for entry in entries {
        if args.oneline {
            println!("{} {}", entry.digest.short_hex().yellow(), entry.commit.summary());
            continue;
        }
        let author = &entry.commit.author;
        println!("{} {}", "commit".yellow(), entry.digest.to_hex().yellow());
        println!("Author: {} <{}>", author.name, author.email);
        if let Some(date) = author.datetime() {
            println!("Date:   {}", date.format("%a %b %e %H:%M:%S %Y %z"));
        }
        println!();
        for line in entry.commit.message.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}

fn cmd_branch() -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let current = ws.current_branch()?;
    let branches = ws.branches()?;
    if !branches.iter().any(|(name, _)| *name == current) {
        println!("* {} {}", current.short_name().green(), "(no commits)".dimmed());
    }
    for (name, target) in branches {
        if !name.as_str().starts_with("refs/heads/") {
            continue;
        }
        if name == current {
            println!("* {} {}", name.short_name().green(), target.short_hex().dimmed());
        } else {
            println!("  {} {}", name.short_name(), target.short_hex().dimmed());
        }
    }
    Ok(())
}

fn cmd_switch(args: SwitchArgs) -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let switch = ws.switch_branch(&args.branch)?;
    if switch.created {
        println!("Switched to a new branch {}", args.branch.yellow());
    } else {
        println!("Switched to branch {}", args.branch.yellow());
    }
    print_update(&switch.update);
    Ok(())
}

async fn cmd_remote(args: RemoteArgs) -> anyhow::Result<()> {
    let mut ws = open_workspace()?;
    match args.action {
        None => match &ws.config().remote {
            Some(remote) => println!("{} {}", remote.url.bold(), remote.repository),
            None => println!("No remote configured."),
        },
        Some(RemoteAction::Set { url, repository }) => {
            let repository = RepositoryId::parse(&repository)
                .with_context(|| format!("invalid repository id {repository:?}"))?;
            ws.set_remote(&url, repository)?;
            println!("{} Remote set to {} {}", "✓".green().bold(), url.bold(), repository);
        }
        Some(RemoteAction::Create { url, name }) => {
            let info = HttpTransport::create_repository(&url, name).await?;
            ws.set_remote(&url, info.id)?;
            println!("{} Created repository {}", "✓".green().bold(), info.id.to_string().cyan());
            if let Some(name) = &info.name {
                println!("  Name: {name}");
            }
            println!("  Remote: {}", url.bold());
        }
        Some(RemoteAction::Remove) => {
            let mut config = ws.config().clone();
            config.remote = None;
            ws.set_config(config)?;
            println!("{} Remote removed", "✓".green().bold());
        }
    }
    Ok(())
}

async fn cmd_push() -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let outcome = match ws.push().await {
        Ok(outcome) => outcome,
        Err(ClientError::Sync(SyncError::NonFastForward { name, .. })) => {
            bail!("push of {name} rejected: the remote has commits you do not have; pull first")
        }
        Err(e) => return Err(e.into()),
    };
    let branch = outcome.branch.short_name();
    match outcome.status {
        PushStatus::UpToDate => println!("Everything up to date."),
        PushStatus::Created => println!(
            "{} [new branch] {} -> {} ({} commits, {} objects, {} bytes)",
            "✓".green().bold(),
            branch.yellow(),
            outcome.head.short_hex().bold(),
            outcome.commits,
            outcome.objects_sent,
            outcome.bytes_sent
        ),
        PushStatus::FastForward => println!(
            "{} {} -> {} ({} commits, {} objects, {} bytes)",
            "✓".green().bold(),
            branch.yellow(),
            outcome.head.short_hex().bold(),
            outcome.commits,
            outcome.objects_sent,
            outcome.bytes_sent
        ),
    }
    Ok(())
}

async fn cmd_pull() -> anyhow::Result<()> {
    let ws = open_workspace()?;
    let (outcome, update) = ws.pull().await?;
    let branch = outcome.branch.short_name();
    match outcome.status {
        PullStatus::UpToDate => println!("Already up to date."),
        PullStatus::AlreadyAhead => println!(
            "{} is ahead of the remote; nothing to pull.",
            branch.yellow()
        ),
        PullStatus::Created | PullStatus::FastForward => {
            println!(
                "{} {} -> {} ({} commits, {} objects, {} bytes)",
                "✓".green().bold(),
                branch.yellow(),
                outcome.head.short_hex().bold(),
                outcome.commits,
                outcome.objects_received,
                outcome.bytes_received
            );
            print_update(&update);
        }
    }
    Ok(())
}

fn print_update(update: &WorktreeUpdate) {
    for path in &update.written {
        println!("  {} {}", "updated:".green(), path);
    }
    for path in &update.removed {
        println!("  {} {}", "removed:".red(), path);
    }
    for path in &update.skipped {
        println!("  {} {} (local changes kept)", "skipped:".yellow(), path);
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let mut ws = open_workspace()?;
    match args.value {
        None => match config_get(ws.config(), &args.key)? {
            Some(value) => println!("{value}"),
            None => println!("{}", "(unset)".dimmed()),
        },
        Some(value) => {
            let mut config = ws.config().clone();
            config_set(&mut config, &args.key, &value)?;
            ws.set_config(config)?;
            println!("{} {} = {}", "✓".green().bold(), args.key.bold(), value);
        }
    }
    Ok(())
}

fn config_get(config: &ClientConfig, key: &str) -> anyhow::Result<Option<String>> {
    let value = match key {
        "user.name" => Some(config.user.name.clone()).filter(|s| !s.is_empty()),
        "user.email" => Some(config.user.email.clone()).filter(|s| !s.is_empty()),
        "commit.allow_empty" => Some(config.commit.allow_empty.to_string()),
        "sync.max_attempts" => Some(config.sync.max_attempts.to_string()),
        "sync.initial_backoff_ms" => Some(config.sync.initial_backoff_ms.to_string()),
        "remote.url" => config.remote.as_ref().map(|r| r.url.clone()),
        "remote.repository" => config.remote.as_ref().map(|r| r.repository.to_string()),
        _ => bail!("unknown config key {key:?}"),
    };
    Ok(value)
}

/// Remote settings go through `cts remote` so url and repository stay paired.
fn config_set(config: &mut ClientConfig, key: &str, value: &str) -> anyhow::Result<()> {
    match key {
        "user.name" => config.user.name = value.to_string(),
        "user.email" => config.user.email = value.to_string(),
        "commit.allow_empty" => {
            config.commit.allow_empty = value
                .parse()
                .with_context(|| format!("{key} must be true or false"))?
        }
        "sync.max_attempts" => {
            config.sync.max_attempts = value
                .parse()
                .with_context(|| format!("{key} must be a number"))?
        }
        "sync.initial_backoff_ms" => {
            config.sync.initial_backoff_ms = value
                .parse()
                .with_context(|| format!("{key} must be a number"))?
        }
        "remote.url" | "remote.repository" => bail!("use `cts remote set <url> <repository>`"),
        _ => bail!("unknown config key {key:?}"),
    }
    Ok(())
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = serve_config(args)?;
    let server = CtsServer::new(config)?;
    let storage = match server.config().storage {
        StorageBackend::Memory => "memory".to_string(),
        StorageBackend::Filesystem => server.config().repos_root.display().to_string(),
    };
    println!(
        "CTS server on {} (storage: {})",
        server.config().bind_addr.to_string().bold(),
        storage
    );
    server.serve().await?;
    Ok(())
}

fn serve_config(args: ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading server config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = args.root {
        config.storage = StorageBackend::Filesystem;
        config.repos_root = root;
    }
    if args.memory {
        config.storage = StorageBackend::Memory;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn config_keys_round_trip() {
        let mut config = ClientConfig::default();
        config_set(&mut config, "user.name", "Ada").unwrap();
        config_set(&mut config, "commit.allow_empty", "true").unwrap();
        config_set(&mut config, "sync.max_attempts", "9").unwrap();
        assert_eq!(config_get(&config, "user.name").unwrap().as_deref(), Some("Ada"));
        assert_eq!(config_get(&config, "user.email").unwrap(), None);
        assert!(config.commit.allow_empty);
        assert_eq!(config.sync.max_attempts, 9);
        assert_eq!(config_get(&config, "remote.url").unwrap(), None);
    }

    #[test]
    fn config_rejects_bad_values() {
        let mut config = ClientConfig::default();
        assert!(config_set(&mut config, "commit.allow_empty", "maybe").is_err());
        assert!(config_set(&mut config, "sync.max_attempts", "-1").is_err());
        assert!(config_set(&mut config, "remote.url", "http://x").is_err());
        assert!(config_set(&mut config, "nope", "x").is_err());
        assert!(config_get(&config, "nope").is_err());
    }

    #[test]
    fn serve_flags_override_defaults() {
        let args = ServeArgs {
            config: None,
            bind: Some("0.0.0.0:9000".parse().unwrap()),
            root: Some(PathBuf::from("/srv/cts")),
            memory: false,
        };
        let config = serve_config(args).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.storage, StorageBackend::Filesystem);
        assert_eq!(config.repos_root, PathBuf::from("/srv/cts"));
    }

    #[test]
    fn serve_memory_flag() {
        let args = ServeArgs {
            config: None,
            bind: None,
            root: None,
            memory: true,
        };
        assert_eq!(serve_config(args).unwrap().storage, StorageBackend::Memory);
    }

    #[test]
    fn serve_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "bind_addr = \"127.0.0.1:7500\"\nstorage = \"memory\"\n").unwrap();
        let args = ServeArgs {
            config: Some(path),
            bind: None,
            root: None,
            memory: false,
        };
        let config = serve_config(args).unwrap();
        assert_eq!(config.bind_addr.port(), 7500);
        assert_eq!(config.storage, StorageBackend::Memory);
    }
}
