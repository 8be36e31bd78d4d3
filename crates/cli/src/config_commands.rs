use std::path::{Path, PathBuf};

use {anyhow::Result, clap::Subcommand};

use commbridge_config::{
    BridgeConfig,
    validate::{self, Severity, ValidationResult},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML (secrets redacted).
    Show,
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Write a documented default config file.
    Init {
        /// Where to write it (defaults to the user config directory).
        path: Option<PathBuf>,
    },
}

pub fn handle_config(
    action: ConfigAction,
    config_path: Option<&Path>,
    effective: Result<BridgeConfig>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", render(&effective?)?);
            Ok(())
        },
        ConfigAction::Check { verbose } => check(config_path, verbose),
        ConfigAction::Init { path } => init(path),
    }
}

fn render(config: &BridgeConfig) -> Result<String> {
    Ok(toml::to_string_pretty(&config.redacted())?)
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(config_path);

    match (&result.config_path, config_path) {
        (Some(path), _) => eprintln!("Checking {}\n", path.display()),
        (None, Some(path)) => eprintln!("Checking {}\n", path.display()),
        (None, None) => eprintln!("No config file found; checking defaults.\n"),
    }

    let shown = print_diagnostics(&result, verbose);
    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn print_diagnostics(result: &ValidationResult, verbose: bool) -> usize {
    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }
    shown
}

fn init(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(commbridge_config::find_or_default_config_path);
    if commbridge_config::write_default_config(&path)? {
        eprintln!("Wrote {}", path.display());
    } else {
        eprintln!("{} already exists; leaving it untouched.", path.display());
    }
    Ok(())
}
