//! The `relish` binary.
//!
//! Runs a Relish artifact: loads its type manifest into a runtime backed by
//! `<root>/data/<artifact>/<db>.db`, calls the package's `main` if it has
//! one, and serves the web package when `-web` is given.
//!
//! Flags take a single dash (`-web 8080`) or two (`--web 8080`).
//! `RELISH_ROOT` overrides root discovery and `RELISH_DB` the database name.

mod project;

use std::ffi::OsString;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use relish_runtime::{Manifest, Runtime, RuntimeConfig, RuntimeError};
use relish_web::{WebConfig, WebError};
use tracing_subscriber::EnvFilter;

use project::Layout;

/// Run a Relish program.
#[derive(Parser, Debug)]
#[command(name = "relish", about = "Relish runtime", version)]
struct Cli {
    /// Artifact identifier, e.g. `example.com/shop`.
    artifact: Option<String>,

    /// Artifact version. A lone value not starting with a digit is taken
    /// as the package instead.
    #[arg(value_name = "VERSION")]
    artifact_version: Option<String>,

    /// Package whose `main` runs and whose `web` sub-package is served.
    /// Defaults to the artifact identifier.
    package: Option<String>,

    /// Application port.
    #[arg(long, value_name = "PORT")]
    web: Option<u16>,

    /// Port serving the shared directory.
    #[arg(long, value_name = "PORT")]
    share: Option<u16>,

    /// Port for the JSON introspection API.
    #[arg(long, value_name = "PORT")]
    explore: Option<u16>,

    /// Database name.
    #[arg(long, env = "RELISH_DB", default_value = "db1")]
    db: String,

    /// Log verbosity: 0 warnings, 1 info, 2 debug. `RUST_LOG` wins when set.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    log: u8,

    /// Runtime root directory.
    #[arg(long, env = "RELISH_ROOT")]
    root: Option<PathBuf>,

    /// Create a new artifact: `-init <artifact> [webapp]`.
    #[arg(long, num_args = 1..=2, value_names = ["ARTIFACT", "KIND"])]
    init: Option<Vec<String>>,

    /// Publish an artifact version (not available in this build).
    #[arg(long, num_args = 2, value_names = ["ARTIFACT", "VERSION"])]
    publish: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("no '{}' directory above {}; set RELISH_ROOT", project::ROOT_DIR_NAME, .0.display())]
    NoRoot(PathBuf),

    #[error("{} already exists", .0.display())]
    Exists(PathBuf),

    #[error("{0}")]
    Unsupported(String),

    #[error("failed to load {}: {source}", .path.display())]
    Load { path: PathBuf, source: RuntimeError },

    /// The program's `main` failed.
    #[error("{0}")]
    Program(RuntimeError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Web(#[from] WebError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// 1 startup failure, 2 unsupported command, 3 program failure.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Unsupported(_) => 2,
            CliError::Program(_) => 3,
            _ => 1,
        }
    }
}

fn main() {
    let cli = Cli::parse_from(normalize_flags(std::env::args_os()));
    init_logging(cli.log);

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };
    process::exit(code);
}

/// Turns `-web` into `--web`. Single-letter flags and negative numbers are
/// left alone.
fn normalize_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| match arg.to_str() {
            Some(s)
                if i > 0
                    && s.len() > 2
                    && s.starts_with('-')
                    && !s.starts_with("--")
                    && s[1..].chars().all(|c| c.is_ascii_alphabetic()) =>
            {
                OsString::from(format!("-{s}"))
            }
            _ => arg,
        })
        .collect()
}

fn init_logging(level: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match level {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn layout(cli: &Cli) -> Result<Layout, CliError> {
    match &cli.root {
        Some(root) => Ok(Layout::at(root)),
        None => Layout::discover(&std::env::current_dir()?),
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Some(publish) = &cli.publish {
        return Err(CliError::Unsupported(format!(
            "cannot publish {} {}: artifact publication is not available in this build",
            publish[0], publish[1]
        )));
    }
    if let Some(init) = &cli.init {
        let webapp = match init.get(1).map(String::as_str) {
            None => false,
            Some("webapp") => true,
            Some(other) => return Err(CliError::Usage(format!("unknown project kind '{other}'"))),
        };
        let dir = layout(&cli)?.init(&init[0], webapp)?;
        println!("{}", dir.display());
        return Ok(());
    }

    let artifact = cli
        .artifact
        .clone()
        .ok_or_else(|| CliError::Usage("no artifact given; see --help".into()))?;
    let (version, package) = split_rest(cli.artifact_version.clone(), cli.package.clone());
    let package = package.unwrap_or_else(|| artifact.clone());
    let layout = layout(&cli)?;
    let artifact_dir = layout.artifact_dir(&artifact, version.as_deref())?;

    let data_dir = layout.data_dir(&artifact)?;
    std::fs::create_dir_all(&data_dir)?;
    let config = RuntimeConfig::with_db(data_dir.join(format!("{}.db", cli.db)));

    let manifest_path = artifact_dir.join("types.json");
    let manifest = Manifest::load(&manifest_path).map_err(|source| CliError::Load {
        path: manifest_path.clone(),
        source,
    })?;
    let mut builder = Runtime::builder(config);
    manifest.install(&mut builder).map_err(|source| CliError::Load {
        path: manifest_path.clone(),
        source,
    })?;
    let runtime = builder.build()?;
    tracing::info!(artifact = %artifact, package = %package, "runtime ready");

    if runtime.lookup_multi(&package, "main").is_some() {
        let results = runtime.call(&package, "main", vec![]).map_err(CliError::Program)?;
        tracing::debug!(?results, "main returned");
    }

    let Some(app_port) = cli.web else {
        return Ok(());
    };
    let mut web = WebConfig::new(format!("{package}/web"), artifact_dir.join("web"));
    web.app_port = app_port;
    web.share_port = cli.share;
    web.explore_port = cli.explore;
    web.shared_dir = cli.share.map(|_| layout.shared_dir());
    serve(runtime, web)
}

fn serve(runtime: Arc<Runtime>, web: WebConfig) -> Result<(), CliError> {
    let tokio = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    tokio.block_on(relish_web::serve(runtime, web))?;
    Ok(())
}

/// Sorts out `[version] [package]`.
fn split_rest(version: Option<String>, package: Option<String>) -> (Option<String>, Option<String>) {
    match (version, package) {
        (Some(one), None) if !one.starts_with(|c: char| c.is_ascii_digit()) => (None, Some(one)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn single_dash_long_flags() {
        let args = normalize_flags(os(&["relish", "-web", "8080", "-db", "x", "shop", "--share", "9000", "-h"]));
        assert_eq!(args, os(&["relish", "--web", "8080", "--db", "x", "shop", "--share", "9000", "-h"]));
    }

    #[test]
    fn parses_run_invocation() {
        let cli = Cli::parse_from(normalize_flags(os(&["relish", "-web", "8080", "-log", "2", "shop", "1.0", "shop/app"])));
        assert_eq!(cli.web, Some(8080));
        assert_eq!(cli.log, 2);
        assert_eq!(cli.artifact.as_deref(), Some("shop"));
        assert_eq!(
            split_rest(cli.artifact_version, cli.package),
            (Some("1.0".into()), Some("shop/app".into()))
        );
    }

    #[test]
    fn version_or_package() {
        assert_eq!(split_rest(Some("2".into()), None), (Some("2".into()), None));
        assert_eq!(split_rest(Some("shop/app".into()), None), (None, Some("shop/app".into())));
    }

    #[test]
    fn log_level_is_bounded() {
        assert!(Cli::try_parse_from(os(&["relish", "--log", "3", "shop"])).is_err());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::Unsupported("x".into()).exit_code(), 2);
        assert_eq!(CliError::Program(RuntimeError::ChannelClosed).exit_code(), 3);
        assert_eq!(CliError::Usage("x".into()).exit_code(), 1);
    }

    fn install(manifest: &str) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Layout::at(tmp.path()).init("shop", false).unwrap();
        std::fs::write(dir.join("types.json"), manifest).unwrap();
        tmp
    }

    fn run_in(tmp: &tempfile::TempDir) -> Result<(), CliError> {
        run(Cli::parse_from(os(&["relish", "--root", tmp.path().to_str().unwrap(), "shop"])))
    }

    #[test]
    fn runs_main_and_creates_database() {
        let tmp = install(
            r#"{ "methods": [ { "package": "shop", "name": "main", "body": { "lit": "ok" } } ] }"#,
        );
        run_in(&tmp).unwrap();
        assert!(tmp.path().join("data/shop/db1.db").is_file());
    }

    #[test]
    fn failing_main_exits_with_program_code() {
        let tmp = install(
            r#"{ "methods": [ { "package": "shop", "name": "main",
                 "body": { "call": { "name": "nosuch", "args": [] } } } ] }"#,
        );
        assert_eq!(run_in(&tmp).unwrap_err().exit_code(), 3);
    }

    #[test]
    fn bad_manifest_is_a_startup_failure() {
        let tmp = install("{ not json");
        assert!(matches!(run_in(&tmp), Err(CliError::Load { .. })));
    }

    #[test]
    fn publish_is_unsupported() {
        let cli = Cli::parse_from(normalize_flags(os(&["relish", "-publish", "shop", "1.0"])));
        assert_eq!(run(cli).unwrap_err().exit_code(), 2);
    }
}
