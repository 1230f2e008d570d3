//! cloudstore - inspect local and B2 directories from the command line

use anyhow::{anyhow, Context, Result};
use std::env;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cloudstore::storage::{B2Backend, Backend, LocalBackend};
use cloudstore::{ClientOptions, Directory, StorageClient, StorageUri};

/// CLI command
#[derive(Debug)]
enum Command {
    /// List a directory's contents
    Ls {
        uri: StorageUri,
        recursively: bool,
        show_abs_path: bool,
    },
    /// Total size of a directory's files
    Size { uri: StorageUri, recursively: bool },
    /// Number of entries in a directory
    Count { uri: StorageUri, recursively: bool },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"cloudstore - Browse local and Backblaze B2 directories

USAGE:
    cloudstore ls <uri> [-r] [--abs]
    cloudstore size <uri> [-r]
    cloudstore count <uri> [-r]
    cloudstore help

COMMANDS:
    ls      List the directory's contents (files only with -r)
    size    Print the total size in bytes of the directory's files
    count   Print the number of entries in the directory
    help    Show this help message

OPTIONS:
    -r, --recursive   Walk subdirectories
    --abs             Print absolute paths

URIS:
    /some/dir, ~/dir, file:///some/dir     Local directory
    b2://bucket/some/prefix                B2 bucket prefix

ENVIRONMENT:
    B2_KEY_ID            B2 application key ID (required for b2:// URIs)
    B2_KEY               B2 application key (required for b2:// URIs)
    CLOUDSTORE_NO_CACHE  Set to 1 to bypass the path cache
    RUST_LOG             Log filter, e.g. debug or cloudstore=trace
"#
    );
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(name) = args.get(1) else {
        return Ok(Command::Help);
    };

    if matches!(name.as_str(), "help" | "--help" | "-h") {
        return Ok(Command::Help);
    }

    let mut uri = None;
    let mut recursively = false;
    let mut show_abs_path = false;
    for arg in &args[2..] {
        match arg.as_str() {
            "-r" | "--recursive" => recursively = true,
            "--abs" => show_abs_path = true,
            flag if flag.starts_with('-') => return Err(anyhow!("Unknown option: {}", flag)),
            value if uri.is_none() => uri = Some(value.parse::<StorageUri>()?),
            value => return Err(anyhow!("Unexpected argument: {}", value)),
        }
    }
    let uri = uri.ok_or_else(|| anyhow!("Usage: cloudstore {} <uri> [-r]", name))?;

    match name.as_str() {
        "ls" => Ok(Command::Ls {
            uri,
            recursively,
            show_abs_path,
        }),
        "size" => Ok(Command::Size { uri, recursively }),
        "count" => Ok(Command::Count { uri, recursively }),
        _ => Err(anyhow!("Unknown command: {}", name)),
    }
}

fn client_options() -> ClientOptions {
    match env::var("CLOUDSTORE_NO_CACHE").as_deref() {
        Ok("1") | Ok("true") => ClientOptions::uncached(),
        _ => ClientOptions::default(),
    }
}

async fn run<B: Backend>(backend: B, command: Command) -> Result<()> {
    let (uri, recursively) = match &command {
        Command::Ls {
            uri, recursively, ..
        }
        | Command::Size { uri, recursively }
        | Command::Count { uri, recursively } => (uri.clone(), *recursively),
        Command::Help => return Ok(()),
    };

    let client = StorageClient::new(backend, client_options());
    let mut dir = Directory::open(client, uri.path())
        .await
        .with_context(|| format!("Failed to open {}", uri))?;
    info!(uri = %dir.uri(), cached = dir.is_cacheable(), "Opened directory");

    let outcome = match command {
        Command::Ls { show_abs_path, .. } => dir
            .traverse(recursively, show_abs_path)
            .await
            .map(|paths| paths.for_each(|path| println!("{}", path))),
        Command::Size { .. } => dir.size(recursively).await.map(|size| println!("{}", size)),
        Command::Count { .. } => dir.count(recursively).await.map(|n| println!("{}", n)),
        Command::Help => Ok(()),
    };

    dir.close().await?;
    outcome.with_context(|| format!("Failed to read {}", uri))
}

/// Log filter from `RUST_LOG` directives, `info` when unset or invalid
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let uri = match &command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Ls { uri, .. } | Command::Size { uri, .. } | Command::Count { uri, .. } => {
            uri.clone()
        }
    };

    let result = match &uri {
        StorageUri::Local { .. } => run(LocalBackend::new(), command).await,
        StorageUri::B2 { bucket, .. } => {
            let key_id = env::var("B2_KEY_ID").context("B2_KEY_ID is not set")?;
            let key = env::var("B2_KEY").context("B2_KEY is not set")?;
            run(B2Backend::new(&key_id, &key, bucket), command).await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}
