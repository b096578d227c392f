//! Octopus: an AI-narrated text adventure in the terminal.
//!
//! Reads player commands from stdin, one per line, and prints the
//! narrator's replies to stdout. Logs go to stderr.
//!
//! ```bash
//! cargo run -p octopus -- --session 1f3a9c0d5e7b2468
//! ```

mod headless;

use octopus_core::{ClaudeGenerator, FileStore, Narrator, NarratorConfig, SessionId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line options.
#[derive(Debug, Default)]
struct Options {
    session: Option<SessionId>,
    save_dir: Option<PathBuf>,
    help: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "octopus=info,octopus_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;
    if options.help {
        print_help();
        return Ok(());
    }

    let generator = ClaudeGenerator::from_env().map_err(|e| {
        anyhow::anyhow!("{e}. Set ANTHROPIC_API_KEY in .env or the environment.")
    })?;
    tracing::info!(model = generator.model(), "using Claude");

    let save_dir = options.save_dir.unwrap_or_else(|| {
        std::env::var("OCTOPUS_SAVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("saves"))
    });
    tracing::info!(save_dir = %save_dir.display(), "saving games to disk");

    let narrator = Narrator::with_config(
        Arc::new(generator),
        Arc::new(FileStore::new(save_dir)),
        NarratorConfig::from_env(),
    );

    headless::run(&narrator, options.session).await
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut args = args.iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => options.help = true,
            "--session" => {
                let id = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--session needs a session id"))?;
                options.session = Some(SessionId::new(id.as_str()));
            }
            "--save-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--save-dir needs a directory"))?;
                options.save_dir = Some(PathBuf::from(dir));
            }
            other => anyhow::bail!("unknown argument: {other} (try --help)"),
        }
    }

    Ok(options)
}

fn print_help() {
    println!("Octopus - an AI-narrated text adventure");
    println!();
    println!("USAGE:");
    println!("  octopus [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help          Show this help message");
    println!("  --session <ID>      Resume a saved game (starts a new one if unknown)");
    println!("  --save-dir <DIR>    Where games are saved (default: $OCTOPUS_SAVE_DIR or ./saves)");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY              Required");
    println!("  OCTOPUS_MODEL                  Claude model to use");
    println!("  OCTOPUS_MAX_TOKENS             Maximum tokens per reply");
    println!("  OCTOPUS_TEMPERATURE            Sampling temperature (0.0 - 1.0)");
    println!("  OCTOPUS_HISTORY_WINDOW         History entries shown to the narrator");
    println!("  OCTOPUS_RECONCILE_WINDOW       History entries shown to reconciliation");
    println!("  OCTOPUS_STORY_THRESHOLD        Story threads kept before compaction");
    println!("  OCTOPUS_REQUEST_TIMEOUT_SECS   Timeout for each model call");
    println!("  RUST_LOG                       Log filter (default: octopus=info,octopus_core=info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(&args(&["--session", "abc123", "--save-dir", "/tmp/x"])).unwrap();
        assert_eq!(options.session, Some(SessionId::new("abc123")));
        assert_eq!(options.save_dir, Some(PathBuf::from("/tmp/x")));
        assert!(!options.help);
    }

    #[test]
    fn test_parse_args_rejects_unknown() {
        assert!(parse_args(&args(&["--headless"])).is_err());
        assert!(parse_args(&args(&["--session"])).is_err());
    }
}
