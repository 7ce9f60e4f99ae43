use std::path::Path;

use {
    anyhow::Result,
    catmandu_config::validate::{self, Diagnostic, Severity, ValidationResult},
};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Field-level diagnostics cover TOML. Other formats are checked by loading them.
fn diagnose(path: Option<&Path>) -> ValidationResult {
    let is_toml = path.is_none_or(|p| p.extension().is_none_or(|ext| ext == "toml"));
    if is_toml {
        return validate::validate(path);
    }

    let diagnostics = match path.map(catmandu_config::load_config) {
        Some(Err(e)) => vec![Diagnostic {
            severity: Severity::Error,
            category: "syntax",
            path: String::new(),
            message: format!("{e:#}"),
        }],
        _ => Vec::new(),
    };
    ValidationResult {
        diagnostics,
        config_path: path.map(Path::to_path_buf),
    }
}

pub fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = diagnose(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }

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
