use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use learn_core::gate::GateDecision;
use learn_core::model::{Identity, ModuleId, ProgressDelta, ProgressRecord, QuizId, UserId};
use learn_core::Clock;
use server::ServerConfig;
use services::{AppServices, PushOutcome, StaticCatalog, SyncConfig, ViewLifetime};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidUrl { raw } => write!(f, "invalid --api value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn require_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let raw = require_value(args, flag)?;
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- serve [--db <sqlite_url>] [--bind <addr>]");
    eprintln!("  cargo run -p app -- pull        --module <id> [client flags]");
    eprintln!("  cargo run -p app -- push        --module <id> [--complete <n>] [--unlock <n>]");
    eprintln!("  cargo run -p app -- reset       --module <id> [client flags]");
    eprintln!("  cargo run -p app -- gates       --module <id> [client flags]");
    eprintln!("  cargo run -p app -- quiz-status --quiz <id>   [client flags]");
    eprintln!();
    eprintln!("Client flags:");
    eprintln!("  --api <url>  --user <id> | --anonymous  --mirror <dir>");
    eprintln!("  --sections <n>  --force-unlock <n>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_DB_URL, PROGRESS_BIND, PROGRESS_API_BASE_URL, PROGRESS_USER_ID,");
    eprintln!("  PROGRESS_MIRROR_DIR, PROGRESS_SECTIONS_PER_MODULE, PROGRESS_START_SECTION,");
    eprintln!("  PROGRESS_FORCE_UNLOCK, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Client(ClientCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientCommand {
    Pull,
    Push,
    Reset,
    Gates,
    QuizStatus,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        let client = match arg {
            "serve" => return Some(Self::Serve),
            "pull" => ClientCommand::Pull,
            "push" => ClientCommand::Push,
            "reset" => ClientCommand::Reset,
            "gates" => ClientCommand::Gates,
            "quiz-status" => ClientCommand::QuizStatus,
            _ => return None,
        };
        Some(Self::Client(client))
    }
}

/// Flags shared by the client subcommands, layered over `SyncConfig::from_env`.
struct ClientArgs {
    config: SyncConfig,
    module: Option<ModuleId>,
    quiz: Option<QuizId>,
    complete: Option<u32>,
    unlock: Option<u32>,
}

impl ClientArgs {
    fn parse(
        args: &mut impl Iterator<Item = String>,
        mut config: SyncConfig,
    ) -> Result<Self, ArgsError> {
        let mut module = None;
        let mut quiz = None;
        let mut complete = None;
        let mut unlock = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--module" => module = Some(ModuleId::new(require_number(args, "--module")?)),
                "--quiz" => quiz = Some(QuizId::new(require_number(args, "--quiz")?)),
                "--complete" => complete = Some(require_number(args, "--complete")?),
                "--unlock" => unlock = Some(require_number(args, "--unlock")?),
                "--api" => {
                    let raw = require_value(args, "--api")?;
                    let url = Url::parse(raw.trim()).map_err(|_| ArgsError::InvalidUrl {
                        raw: raw.clone(),
                    })?;
                    config.api_base_url = Some(url);
                }
                "--user" => {
                    let id: u64 = require_number(args, "--user")?;
                    config.identity = Identity::User(UserId::new(id));
                }
                "--anonymous" => config.identity = Identity::Anonymous,
                "--mirror" => {
                    config.mirror_dir = Some(PathBuf::from(require_value(args, "--mirror")?));
                }
                "--sections" => config.sections_per_module = require_number(args, "--sections")?,
                "--force-unlock" => {
                    config.forced_unlock = Some(require_number(args, "--force-unlock")?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            config,
            module,
            quiz,
            complete,
            unlock,
        })
    }

    fn module(&self) -> Result<ModuleId, ArgsError> {
        self.module.ok_or(ArgsError::MissingFlag { flag: "--module" })
    }

    fn quiz(&self) -> Result<QuizId, ArgsError> {
        self.quiz.ok_or(ArgsError::MissingFlag { flag: "--quiz" })
    }

    fn delta(&self, sections_per_module: u32) -> ProgressDelta {
        let mut delta = self.complete.map_or_else(ProgressDelta::default, |section| {
            ProgressDelta::complete_section(section, sections_per_module)
        });
        if let Some(unlock) = self.unlock {
            delta.section_max = Some(delta.section_max.unwrap_or(unlock).max(unlock));
        }
        delta
    }
}

fn parse_server(
    args: &mut impl Iterator<Item = String>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env()?;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => config.database_url = normalize_sqlite_url(&require_value(args, "--db")?),
            "--bind" => {
                let raw = require_value(args, "--bind")?;
                config = ServerConfig::new(config.database_url, &raw)?;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }
    Ok(config)
}

/// Append `mode=rwc` so SQLite creates the file on first start.
fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(":memory:") || trimmed.contains("mode=") {
        return trimmed.to_string();
    }
    let separator = if trimmed.contains('?') { '&' } else { '?' };
    format!("{trimmed}{separator}mode=rwc")
}

fn prepare_sqlite_parent(db_url: &str) -> std::io::Result<()> {
    let Some(rest) = db_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn print_record(module: ModuleId, record: &ProgressRecord) {
    let completed: Vec<String> = record
        .completed_sections()
        .iter()
        .map(u32::to_string)
        .collect();
    println!(
        "module {module}: sectionMax={} completed=[{}]",
        record.section_max(),
        completed.join(",")
    );
}

fn print_gate(decision: &GateDecision) {
    let label = if decision.locked {
        "locked"
    } else if decision.is_next {
        "next"
    } else if decision.is_completed {
        "completed"
    } else {
        "open"
    };
    println!("  section {:>2}: {label}", decision.section);
}

async fn run_client(
    cmd: ClientCommand,
    args: ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Arc::new(StaticCatalog::uniform(args.config.sections_per_module));
    let services = AppServices::from_config(&args.config, catalog, Clock::default())?;
    let reconciler = services.reconciler();
    let view = ViewLifetime::new();

    match cmd {
        ClientCommand::Pull => {
            let module = args.module()?;
            let record = reconciler.pull(module, &view).await;
            print_record(module, &record);
            println!("state: {}", reconciler.state(module));
        }
        ClientCommand::Push => {
            let module = args.module()?;
            let delta = args.delta(services.gates().sections_per_module(module));
            let outcome = reconciler.push(module, delta, &view).await;
            print_record(module, outcome.record());
            match outcome {
                PushOutcome::Persisted(_) => println!("persisted"),
                PushOutcome::LocalOnly(_) => println!("local only"),
                PushOutcome::Discarded(_) => println!("discarded"),
                PushOutcome::Pending { reason, .. } => println!("pending: {reason}"),
            }
        }
        ClientCommand::Reset => {
            let module = args.module()?;
            let record = reconciler.reset(module).await;
            print_record(module, &record);
            println!("state: {}", reconciler.state(module));
        }
        ClientCommand::Gates => {
            let module = args.module()?;
            let record = reconciler.pull(module, &view).await;
            print_record(module, &record);
            for decision in services.gates().module(module, &record)? {
                print_gate(&decision);
            }
        }
        ClientCommand::QuizStatus => {
            let quiz = args.quiz()?;
            let tracker = services.tracker();
            match tracker.completion_summary(quiz).await {
                Some(summary) => println!("quiz {quiz}: completed {summary}"),
                None => match tracker.snapshot(quiz) {
                    Some(entry) => println!(
                        "quiz {quiz}: in progress, next question {}",
                        entry.current_question_index
                    ),
                    None => println!("quiz {quiz}: not started"),
                },
            }
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let client = match cmd {
        Command::Serve => {
            let config = parse_server(&mut argv)?;
            prepare_sqlite_parent(&config.database_url)?;
            server::serve(&config).await?;
            return Ok(());
        }
        Command::Client(client) => client,
    };

    let parsed = ClientArgs::parse(&mut argv, SyncConfig::from_env()?).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    run_client(client, parsed).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| (*s).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn client_flags_override_config() {
        let parsed = ClientArgs::parse(
            &mut args(&["--module", "3", "--user", "7", "--api", "http://localhost:8787"]),
            SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(parsed.module().unwrap(), ModuleId::new(3));
        assert_eq!(parsed.config.identity, Identity::User(UserId::new(7)));
        assert!(parsed.config.is_online());
    }

    #[test]
    fn missing_module_is_reported() {
        let parsed = ClientArgs::parse(&mut args(&[]), SyncConfig::default()).unwrap();
        assert!(matches!(
            parsed.module(),
            Err(ArgsError::MissingFlag { flag: "--module" })
        ));
        assert!(matches!(
            ClientArgs::parse(&mut args(&["--module"]), SyncConfig::default()),
            Err(ArgsError::MissingValue { .. })
        ));
    }

    #[test]
    fn push_delta_combines_complete_and_unlock() {
        let parsed = ClientArgs::parse(
            &mut args(&["--complete", "2", "--unlock", "5"]),
            SyncConfig::default(),
        )
        .unwrap();
        let delta = parsed.delta(10);
        assert_eq!(delta.section_max, Some(5));
        assert!(delta.completed_sections.contains(&2));
    }

    #[test]
    fn sqlite_urls_gain_create_mode() {
        assert_eq!(normalize_sqlite_url("sqlite:data/p.db"), "sqlite:data/p.db?mode=rwc");
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:p.db?mode=ro"),
            "sqlite:p.db?mode=ro"
        );
    }
}
