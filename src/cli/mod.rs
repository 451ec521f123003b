use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::aggregate::aggregate;
use crate::api::{AppSelection, ComplianceSource, FileSource, HttpSource};
use crate::config::EffectiveConfig;
use crate::core::{Aggregates, Row, RowField};
use crate::refresh::{RefreshController, RefreshOptions, sort_app_names};
use crate::rows::flatten;
use crate::select::{Choice, FilterOptions, FilterState, SortDirection, SortState, StatusFilter};
use crate::session::Session;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "compliance-dash",
    version,
    about = "Server image compliance dashboard: weekly golden-image status per app and region"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Read a saved compliance payload instead of calling the API"
    )]
    pub payload: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Summary(FetchArgs),
    Table(TableArgs),
    Apps,
    Health,
    Ui(UiArgs),
    Login(LoginArgs),
    Logout,
    Whoami,
    Logs,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[arg(long)]
    pub app: Option<AppSelection>,
}

#[derive(Debug, Args)]
pub struct TableArgs {
    #[command(flatten)]
    pub fetch: FetchArgs,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub status: Option<StatusFilter>,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub filter_app: Option<String>,
    #[arg(long)]
    pub sort: Option<RowField>,
    #[arg(long, requires = "sort")]
    pub desc: bool,
}

#[derive(Debug, Args)]
pub struct UiArgs {
    #[arg(long)]
    pub app: Option<AppSelection>,
    #[arg(long)]
    pub auto: bool,
    #[arg(long, help = "Auto-refresh interval in minutes (1, 5, 10 or 30)")]
    pub interval: Option<u64>,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    #[arg(long)]
    pub user: String,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::config::home_dir()?;

    let env_config_path = std::env::var_os("COMPLIANCE_DASH_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    if let Some(base_url) = &cli.base_url {
        crate::config::validate_base_url(base_url).map_err(crate::exit::invalid_args_err)?;
        cfg.api.base_url = base_url.trim().to_string();
    }

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;

    match &cli.command {
        Commands::Summary(args) => {
            let session = require_session(&home_dir)?;
            let source = open_source(&cli, &cfg)?;
            let ctl = fetch_once(source, session, &cfg, args.app.clone(), show_progress)?;
            let Some(payload) = ctl.payload() else {
                return Err(crate::exit::fetch_failed_err(anyhow!(
                    crate::api::FALLBACK_MESSAGE
                )));
            };
            let agg = aggregate(payload);
            if cli.json {
                write_json(&SummaryJson {
                    app: ctl.selected(),
                    reference_week: payload.reference_week_label(),
                    generated_at: payload.generated_at.as_deref(),
                    aggregates: &agg,
                })?;
            } else {
                crate::ui::print_summary(payload, &agg, &ui_cfg);
            }
        }
        Commands::Table(args) => {
            let session = require_session(&home_dir)?;
            let filter = FilterState {
                search_term: args.search.clone().unwrap_or_default(),
                status: args.status.clone().unwrap_or_default(),
                region: parse_choice(args.region.as_deref()),
                app: parse_choice(args.filter_app.as_deref()),
            };
            let sort = match args.sort {
                Some(key) if args.desc => SortState::by(key, SortDirection::Desc),
                Some(key) => SortState::by(key, SortDirection::Asc),
                None => SortState::default(),
            };

            let source = open_source(&cli, &cfg)?;
            let ctl = fetch_once(source, session, &cfg, args.fetch.app.clone(), show_progress)?;
            let Some(payload) = ctl.payload() else {
                return Err(crate::exit::fetch_failed_err(anyhow!(
                    crate::api::FALLBACK_MESSAGE
                )));
            };
            let all_rows = flatten(payload);
            let options = FilterOptions::from_rows(&all_rows);
            let rows = crate::select::select(&all_rows, &filter, &sort);

            if cli.json {
                write_json(&TableJson {
                    app: ctl.selected(),
                    filter: &filter,
                    sort: SortJson::from(&sort),
                    total: all_rows.len(),
                    shown: rows.len(),
                    rows: &rows,
                })?;
            } else {
                crate::ui::print_table(&rows, all_rows.len(), options.show_app_column(), &ui_cfg);
            }
        }
        Commands::Apps => {
            require_session(&home_dir)?;
            let source = open_source(&cli, &cfg)?;
            let pb = spinner(show_progress, "Loading apps...");
            let res = source.fetch_apps();
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            let apps = sort_app_names(res.map_err(crate::exit::fetch_failed_err)?);
            if cli.json {
                write_json(&AppsJson { apps: &apps })?;
            } else {
                crate::ui::print_apps(&apps, cfg.refresh.default_app.as_deref(), &ui_cfg);
            }
        }
        Commands::Health => {
            if cli.payload.is_some() {
                return Err(crate::exit::invalid_args(
                    "health talks to the API and cannot be used with --payload",
                ));
            }
            let source = HttpSource::new(&cfg.api.base_url)?;
            let pb = spinner(show_progress, "Checking API health...");
            let res = source.health();
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            let health = res.map_err(crate::exit::fetch_failed_err)?;
            if cli.json {
                write_json(&health)?;
            } else {
                crate::ui::print_health(source.base_url(), &health, &ui_cfg);
            }
            if !health.is_healthy() {
                return Err(crate::exit::fetch_failed_err(anyhow!(
                    "API reports status: {}",
                    if health.status.is_empty() { "unknown" } else { health.status.as_str() }
                )));
            }
        }
        Commands::Ui(args) => {
            if cli.json {
                return Err(crate::exit::invalid_args("ui cannot be combined with --json"));
            }
            if !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
                return Err(crate::exit::invalid_args(
                    "ui needs a terminal (stdin and stdout)",
                ));
            }
            let session = require_session(&home_dir)?;
            let interval = match args.interval {
                Some(mins) => crate::config::parse_interval_secs(mins.saturating_mul(60))
                    .map_err(crate::exit::invalid_args_err)?,
                None => cfg.refresh.interval(),
            };
            let options = RefreshOptions {
                auto_refresh: args.auto || cfg.refresh.auto,
                interval,
                default_app: args.app.clone().or_else(|| configured_app(&cfg)),
            };
            let source = open_source(&cli, &cfg)?;
            let mut ctl = RefreshController::new(source, session, options);
            if cfg.logs.enabled {
                ctl = ctl.with_log(crate::logs::RefreshLog::new(
                    &home_dir,
                    time::OffsetDateTime::now_utc(),
                ));
            }
            crate::tui::run(ctl, ui_cfg.color)?;
        }
        Commands::Login(args) => {
            let session = Session::login(&args.user).map_err(crate::exit::invalid_args_err)?;
            let path = crate::session::save(&home_dir, &session)?;
            if cli.json {
                write_json(&session)?;
            } else if !ui_cfg.quiet {
                println!("signed in as {}", args.user.trim());
                if ui_cfg.verbose {
                    println!("session: {}", path.display());
                }
            }
        }
        Commands::Logout => {
            let session = crate::session::load(&home_dir).logout();
            crate::session::save(&home_dir, &session)?;
            if cli.json {
                write_json(&session)?;
            } else if !ui_cfg.quiet {
                println!("signed out");
            }
        }
        Commands::Whoami => {
            let session = crate::session::load(&home_dir);
            if cli.json {
                write_json(&session)?;
            } else if !ui_cfg.quiet {
                match session.user() {
                    Some(user) => println!("{user}"),
                    None => println!("not signed in"),
                }
            }
        }
        Commands::Logs => {
            let logs = crate::logs::list_logs(&home_dir)?;
            if cli.json {
                write_json(&logs)?;
            } else {
                crate::ui::print_logs(&logs, &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "compliance-dash", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `compliance-dash config --show`");
            }
        }
    }

    Ok(())
}

fn require_session(home_dir: &Path) -> Result<Session> {
    let session = crate::session::load(home_dir);
    if !session.is_authenticated() {
        return Err(crate::exit::session_required());
    }
    Ok(session)
}

fn open_source(cli: &Cli, cfg: &EffectiveConfig) -> Result<Arc<dyn ComplianceSource>> {
    if let Some(path) = &cli.payload {
        if !path.exists() {
            return Err(crate::exit::invalid_args(format!(
                "payload file not found: {}",
                path.display()
            )));
        }
        return Ok(Arc::new(FileSource::new(path.clone())));
    }
    Ok(Arc::new(HttpSource::new(&cfg.api.base_url)?))
}

fn configured_app(cfg: &EffectiveConfig) -> Option<AppSelection> {
    cfg.refresh
        .default_app
        .as_deref()
        .and_then(|name| name.parse::<AppSelection>().ok())
}

fn parse_choice(value: Option<&str>) -> Choice<String> {
    value
        .and_then(|v| v.parse::<Choice<String>>().ok())
        .unwrap_or_default()
}

fn fetch_once(
    source: Arc<dyn ComplianceSource>,
    session: Session,
    cfg: &EffectiveConfig,
    app: Option<AppSelection>,
    show_progress: bool,
) -> Result<RefreshController> {
    let requested = app.clone();
    let options = RefreshOptions {
        auto_refresh: false,
        interval: cfg.refresh.interval(),
        default_app: app.or_else(|| configured_app(cfg)),
    };
    let mut ctl = RefreshController::new(Arc::clone(&source), session, options);

    let pb = spinner(show_progress, "Fetching compliance data...");
    let mounted = mount(&mut ctl, source.as_ref(), requested.as_ref());
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    mounted?;

    if let Some(message) = ctl.error() {
        return Err(crate::exit::fetch_failed_err(anyhow!("{message}")));
    }
    Ok(ctl)
}

// An explicit app is checked against the list before any payload is requested.
fn mount(
    ctl: &mut RefreshController,
    source: &dyn ComplianceSource,
    requested: Option<&AppSelection>,
) -> Result<()> {
    let Some(AppSelection::App(name)) = requested else {
        ctl.start(Instant::now());
        ctl.settle();
        return Ok(());
    };
    let listed = source.fetch_apps();
    if let Ok(apps) = &listed {
        check_requested_app(apps, name)?;
    }
    ctl.start_with_apps(listed, Instant::now());
    ctl.settle();
    Ok(())
}

fn check_requested_app(apps: &[String], name: &str) -> Result<()> {
    if apps.is_empty() || apps.iter().any(|a| a == name) {
        return Ok(());
    }
    let available = sort_app_names(apps.to_vec());
    Err(crate::exit::invalid_args(format!(
        "unknown app: {name} (available: {})",
        available.join(", ")
    )))
}

fn spinner(enabled: bool, message: &'static str) -> Option<indicatif::ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryJson<'a> {
    app: &'a AppSelection,
    reference_week: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_at: Option<&'a str>,
    #[serde(flatten)]
    aggregates: &'a Aggregates,
}

#[derive(Serialize)]
struct SortJson {
    key: Option<&'static str>,
    direction: SortDirection,
}

impl From<&SortState> for SortJson {
    fn from(sort: &SortState) -> Self {
        Self {
            key: sort.key.map(RowField::as_str),
            direction: sort.direction,
        }
    }
}

#[derive(Serialize)]
struct TableJson<'a> {
    app: &'a AppSelection,
    filter: &'a FilterState,
    sort: SortJson,
    total: usize,
    shown: usize,
    rows: &'a [Row],
}

#[derive(Serialize)]
struct AppsJson<'a> {
    apps: &'a [String],
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompliancePayload, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        compliance_calls: AtomicUsize,
    }

    impl ComplianceSource for Counting {
        fn fetch_apps(&self) -> Result<Vec<String>> {
            Ok(vec!["search".to_string(), "billing".to_string()])
        }

        fn fetch_compliance(&self, app: &AppSelection) -> Result<CompliancePayload> {
            self.compliance_calls.fetch_add(1, Ordering::SeqCst);
            CompliancePayload::from_json(
                format!(r#"{{"app_name": "{app}", "current_week": 10, "current_year": 2024}}"#)
                    .as_bytes(),
            )
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            compliance_calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn table_flags_parse_into_typed_values() {
        let cli = Cli::try_parse_from([
            "compliance-dash",
            "table",
            "--app",
            "billing",
            "--status",
            "non-compliant",
            "--sort",
            "server",
            "--desc",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Table(args) = cli.command else {
            panic!("expected table");
        };
        assert_eq!(args.fetch.app, Some(AppSelection::App("billing".into())));
        assert_eq!(args.status, Some(Choice::Only(Status::NonCompliant)));
        assert_eq!(args.sort, Some(RowField::ServerName));
        assert!(args.desc);
    }

    #[test]
    fn bad_values_are_usage_errors() {
        let err = Cli::try_parse_from(["compliance-dash", "table", "--status", "meh"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let err = Cli::try_parse_from(["compliance-dash", "table", "--desc"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn choices_default_to_all() {
        assert_eq!(parse_choice(None), Choice::All);
        assert_eq!(parse_choice(Some("ALL")), Choice::All);
        assert_eq!(parse_choice(Some(" eu ")), Choice::Only("eu".to_string()));
    }

    #[test]
    fn shells() {
        assert_eq!(parse_shell("ZSH").unwrap(), clap_complete::Shell::Zsh);
        assert!(parse_shell("tcsh").is_err());
    }

    #[test]
    fn unknown_app_fails_before_any_payload_request() {
        let source = counting();
        let err = fetch_once(
            Arc::clone(&source) as Arc<dyn ComplianceSource>,
            Session::login("ops").unwrap(),
            &EffectiveConfig::default(),
            Some(AppSelection::App("nope".into())),
            false,
        )
        .err()
        .expect("unknown app");
        assert_eq!(crate::exit::exit_code(&err), 2);
        assert_eq!(
            err.to_string(),
            "unknown app: nope (available: billing, search)"
        );
        assert_eq!(source.compliance_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn known_app_is_fetched_once() {
        let source = counting();
        let ctl = fetch_once(
            Arc::clone(&source) as Arc<dyn ComplianceSource>,
            Session::login("ops").unwrap(),
            &EffectiveConfig::default(),
            Some(AppSelection::App("search".into())),
            false,
        )
        .unwrap();
        assert_eq!(ctl.selected(), &AppSelection::App("search".into()));
        assert_eq!(ctl.payload().unwrap().app_names(), vec!["search".to_string()]);
        assert_eq!(source.compliance_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn requested_app_check_allows_empty_lists() {
        assert!(check_requested_app(&[], "anything").is_ok());
        assert!(check_requested_app(&["billing".to_string()], "billing").is_ok());
        assert!(check_requested_app(&["billing".to_string()], "Billing").is_err());
    }
}
