mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Settings, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_LOCK_ERROR};
use prereq_core::{install_interrupt_handler, BuildDeps, ResolveOptions};
use prereq_store::PrereqLayout;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "prereq",
    version,
    about = "Resolve, build and verify external prerequisite libraries"
)]
struct Cli {
    /// Component definitions file.
    #[arg(long, default_value = "prereq.toml", global = true)]
    config: PathBuf,

    /// Pin configuration (branches, commit_versions, patch_versions, configs).
    #[arg(long, default_value = "build.config", global = true)]
    pins: PathBuf,

    /// Project root holding the build tree.
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Install prefix [default: <root>/install].
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,

    /// Build type, used to separate build and install trees.
    #[arg(long, default_value = prereq_store::DEFAULT_TARGET_TYPE, global = true)]
    build_type: String,

    /// Whether missing components may be downloaded and built: yes, no, build-only.
    #[arg(long, default_value = "yes", global = true)]
    build_deps: BuildDeps,

    /// Only print retrieval and build commands.
    #[arg(long, default_value_t = false, global = true)]
    dry_run: bool,

    /// Like --dry-run, but still probe for installed targets.
    #[arg(long, default_value_t = false, global = true)]
    check_only: bool,

    /// Components to take from the system when they verify ("all" for every one).
    #[arg(long, value_delimiter = ',', global = true)]
    use_installed: Vec<String>,

    /// Optional components to enable ("all" for every one).
    #[arg(long, value_delimiter = ',', global = true)]
    include: Vec<String>,

    /// Additional prefix searched for prebuilt copies of components.
    #[arg(long, global = true)]
    alt_prefix: Vec<PathBuf>,

    /// Prefix OS packages install into.
    #[arg(long, default_value = "/usr", global = true)]
    system_prefix: PathBuf,

    /// Accept already unpacked archive sources without re-checking them.
    #[arg(long, default_value_t = false, global = true)]
    trust_sources: bool,

    /// Parallel jobs passed to build commands.
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Extra placeholder for build commands, as KEY=VALUE.
    #[arg(long = "var", value_name = "KEY=VALUE", global = true)]
    vars: Vec<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Make components usable, retrieving and building what is missing.
    Require {
        /// Components to require [default: the prebuild list].
        names: Vec<String>,
        /// Project headers and flags only, no libraries.
        #[arg(long, default_value_t = false)]
        headers_only: bool,
    },
    /// Report which components are usable without building anything.
    Check {
        /// Components to check [default: all defined].
        names: Vec<String>,
        /// Fail on the first unusable component.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// List defined components.
    List,
    /// Show a component's definition and resolved state.
    Show {
        /// Component name.
        name: String,
    },
    /// Check host tools, definitions and the build root.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_vars(raw: &[String]) -> Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .ok_or_else(|| format!("invalid --var '{entry}': expected KEY=VALUE"))
        })
        .collect()
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn settings(cli: &Cli, strict: bool) -> Result<Settings, String> {
    let mut layout =
        PrereqLayout::new(absolute(cli.root.clone())).with_target_type(&cli.build_type);
    if let Some(prefix) = &cli.prefix {
        layout = layout.with_prefix(absolute(prefix.clone()));
    }

    let mut options = ResolveOptions {
        build_deps: cli.build_deps,
        dry_run: cli.dry_run,
        check_only: cli.check_only,
        require_optional: strict,
        installed: cli.use_installed.iter().cloned().collect(),
        include: cli.include.iter().cloned().collect(),
        alt_prefixes: cli.alt_prefix.iter().cloned().map(absolute).collect(),
        system_prefix: cli.system_prefix.clone(),
        trust_existing_sources: cli.trust_sources,
        ..ResolveOptions::default()
    };
    if let Some(jobs) = cli.jobs {
        options.jobs = jobs.max(1);
    }
    options.vars.extend(parse_vars(&cli.vars)?);

    Ok(Settings {
        config: cli.config.clone(),
        pins: cli.pins.clone(),
        layout,
        options,
    })
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PREREQ_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_interrupt_handler();

    let json_output = cli.json;
    let strict = matches!(cli.command, Commands::Check { strict: true, .. });
    let result = settings(&cli, strict).and_then(|settings| match &cli.command {
        Commands::Require {
            names,
            headers_only,
        } => commands::require::run(&settings, names, *headers_only, json_output),
        Commands::Check { names, .. } => commands::check::run(&settings, names, json_output),
        Commands::List => commands::list::run(&settings, json_output),
        Commands::Show { name } => commands::show::run(&settings, name, json_output),
        Commands::Doctor => commands::doctor::run(&settings, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("definition error:")
                || msg.starts_with("pin configuration error:")
                || msg.starts_with("invalid --var")
            {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("build root lock:") {
                EXIT_LOCK_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
