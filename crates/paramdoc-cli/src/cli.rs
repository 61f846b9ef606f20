//! paramdoc CLI - resolve interpolated parameter documents from the shell
//!
//! Usage:
//!   paramdoc dump train.yaml --set train.lr=1e-3
//!   paramdoc get train.yaml task.name --set task.side=left
//!   paramdoc check train.yaml --parallel

use clap::{Parser, Subcommand};
use colored::Colorize;
use paramdoc_core::{Config, ConfigOptions, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// paramdoc - Resolve interpolated parameter documents
#[derive(Parser, Debug)]
#[command(name = "paramdoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the document, resolved unless --raw is given
    Dump {
        /// Parameter document (YAML or JSON)
        file: PathBuf,

        /// Override a value before resolving (repeatable), e.g. train.lr=1e-3
        #[arg(short, long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Print placeholders instead of resolved values
        #[arg(long)]
        raw: bool,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Get a specific resolved value
    Get {
        /// Parameter document (YAML or JSON)
        file: PathBuf,

        /// Path to the value (e.g., train.stages[0].lr)
        path: String,

        /// Override a value before resolving (repeatable)
        #[arg(short, long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,

        /// Output format: text, json, yaml
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Print the raw value without resolving
        #[arg(long)]
        raw: bool,
    },

    /// Resolve every value and report all failures
    Check {
        /// Parameter document (YAML or JSON)
        file: PathBuf,

        /// Override a value before resolving (repeatable)
        #[arg(short, long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,

        /// Resolve on all cores
        #[arg(short, long)]
        parallel: bool,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Dump {
            file,
            set,
            format,
            raw,
            output,
        } => cmd_dump(&file, set, &format, raw, output),

        Commands::Get {
            file,
            path,
            set,
            format,
            raw,
        } => cmd_get(&file, &path, set, &format, raw),

        Commands::Check {
            file,
            set,
            parallel,
            format,
        } => cmd_check(&file, set, parallel, &format),
    }
}

fn load_config(file: &Path, overrides: Vec<String>, parallel: bool) -> Result<Config, String> {
    let options = ConfigOptions {
        overrides,
        parallel,
    };
    Config::load_with_options(file, options)
        .map_err(|e| format!("Failed to load {}: {}", file.display(), e))
}

/// Render a value for `get`
fn render_value(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| format!("{}\n", s))
            .map_err(|e| e.to_string()),
        "yaml" => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        _ => match value {
            Value::Sequence(_) | Value::Mapping(_) => {
                serde_yaml::to_string(value).map_err(|e| e.to_string())
            }
            scalar => Ok(format!("{}\n", scalar)),
        },
    }
}

fn cmd_dump(
    file: &Path,
    overrides: Vec<String>,
    format: &str,
    raw: bool,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(file, overrides, false) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let result = match format {
        "json" => config.to_json(!raw).map(|s| format!("{}\n", s)),
        _ => config.to_yaml(!raw),
    };

    match result {
        Ok(content) => {
            if let Some(output_path) = output {
                if let Err(e) = std::fs::write(&output_path, &content) {
                    eprintln!("{}: {}", "Error writing file".red(), e);
                    return ExitCode::from(2);
                }
                eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
            } else {
                print!("{}", content);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            eprintln!("Run `paramdoc check` to list every failing value");
            ExitCode::from(1)
        }
    }
}

fn cmd_get(file: &Path, path: &str, overrides: Vec<String>, format: &str, raw: bool) -> ExitCode {
    let config = match load_config(file, overrides, false) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let result = if raw {
        config.get_raw(path).cloned()
    } else {
        config.get(path)
    };

    let value = match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::from(1);
        }
    };

    match render_value(&value, format) {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn cmd_check(file: &Path, overrides: Vec<String>, parallel: bool, format: &str) -> ExitCode {
    let config = match load_config(file, overrides, parallel) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return ExitCode::from(2);
        }
    };

    let resolution = config.resolve();
    let report = &resolution.report;

    if format == "json" {
        let errors: Vec<_> = report
            .iter()
            .map(|e| {
                serde_json::json!({
                    "path": e.path,
                    "error": e.headline(),
                    "help": e.help,
                })
            })
            .collect();
        let json = serde_json::json!({
            "valid": report.is_empty(),
            "errors": errors,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                return ExitCode::from(2);
            }
        }
    } else if report.is_empty() {
        println!("{} {}: all values resolved", "✓".green(), file.display());
    } else {
        eprintln!(
            "{} {}: {} node(s) failed to resolve\n",
            "✗".red(),
            file.display(),
            report.len()
        );
        for err in report {
            eprintln!("{}\n", err);
        }
    }

    if report.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repeated_overrides() {
        let cli = Cli::try_parse_from([
            "paramdoc",
            "dump",
            "train.yaml",
            "--set",
            "train.lr=1e-3",
            "-s",
            "task.side=left",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Dump {
                file,
                set,
                format,
                raw,
                output,
            } => {
                assert_eq!(file, PathBuf::from("train.yaml"));
                assert_eq!(set, vec!["train.lr=1e-3", "task.side=left"]);
                assert_eq!(format, "json");
                assert!(!raw);
                assert!(output.is_none());
            }
            other => panic!("Expected Dump, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_parallel() {
        let cli = Cli::try_parse_from(["paramdoc", "check", "train.yaml", "--parallel"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { parallel: true, .. }));
    }

    #[test]
    fn test_get_requires_path() {
        assert!(Cli::try_parse_from(["paramdoc", "get", "train.yaml"]).is_err());
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&Value::Integer(20), "text").unwrap(), "20\n");
        assert_eq!(
            render_value(&Value::from("ResDexHandLH"), "text").unwrap(),
            "ResDexHandLH\n"
        );
        assert_eq!(render_value(&Value::Bool(true), "json").unwrap(), "true\n");

        let mapping: Value = serde_yaml::from_str("{lr: 0.001}").unwrap();
        assert_eq!(render_value(&mapping, "text").unwrap(), "lr: 0.001\n");
    }
}
