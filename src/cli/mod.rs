//! CLI front-end: argument parsing and dispatch for the `offloading` binary.

mod help;

pub mod dispatch;

use std::env;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use crate::entry::OffloadKind;
use crate::logging::{LogFormat, LogLevel, LogOptions, LogSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help {
        topic: Option<String>,
    },
    Version,
    /// Print the kernel metadata of an AMDGPU code object.
    Inspect {
        image: PathBuf,
        arch: Option<String>,
        env_target_id: Option<String>,
    },
    /// Wrap a SPIR-V image in an OpenMP offload container.
    Wrap {
        image: PathBuf,
        output: PathBuf,
    },
    /// Write a host object holding an entry table for the given symbols.
    EmitEntries {
        target: String,
        section: Option<String>,
        kind: OffloadKind,
        output: PathBuf,
        symbols: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Cli {
    pub command: Command,
    pub log_options: LogOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliError {
    message: String,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn with_usage(message: impl Into<String>) -> Self {
        let mut owned = message.into();
        owned.push_str("\n\n");
        owned.push_str(&Cli::usage());
        Self::new(owned)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for CliError {}

type CommandParser = fn(&[String], &mut LogSettings) -> Result<Command, CliError>;

fn is_help_flag(value: &str) -> bool {
    matches!(value, "-h" | "--help")
}

impl Cli {
    /// Parse arguments from the environment.
    ///
    /// # Errors
    /// Returns a [`CliError`] when the arguments do not describe a supported command.
    pub fn parse() -> Result<Self, CliError> {
        Self::parse_from(env::args().skip(1))
    }

    /// Parse arguments from an iterator.
    ///
    /// # Errors
    /// Returns a [`CliError`] when the provided iterator does not describe a valid invocation.
    pub fn parse_from<I, T>(args: I) -> Result<Self, CliError>
    where
        I: Iterator<Item = T>,
        T: Into<String>,
    {
        let args: Vec<String> = args.map(Into::into).collect();
        let mut log_settings = LogSettings::default();
        let mut index = 0;
        while let Some(flag) = args.get(index) {
            if !flag.starts_with('-')
                || is_help_flag(flag)
                || matches!(flag.as_str(), "--version" | "-V")
            {
                break;
            }
            if !consume_log_flag(&args, &mut index, &mut log_settings)? {
                return Err(CliError::with_usage(format!(
                    "unsupported global option '{flag}'"
                )));
            }
        }

        let Some(raw_command) = args.get(index) else {
            return Err(CliError::with_usage("missing command"));
        };
        let rest = &args[index + 1..];

        let command = match raw_command.as_str() {
            "help" | "--help" | "-h" => Command::Help {
                topic: rest
                    .first()
                    .filter(|value| !is_help_flag(value))
                    .map(|value| value.to_ascii_lowercase()),
            },
            "version" | "--version" | "-V" => {
                if rest.iter().any(|value| is_help_flag(value)) {
                    Command::Help {
                        topic: Some("version".into()),
                    }
                } else if rest.is_empty() {
                    Command::Version
                } else {
                    return Err(CliError::with_usage(
                        "offloading version does not accept additional arguments",
                    ));
                }
            }
            name @ ("inspect" | "wrap" | "emit-entries") => {
                if rest.iter().any(|value| is_help_flag(value)) {
                    Command::Help {
                        topic: Some(name.to_string()),
                    }
                } else {
                    let parser: CommandParser = match name {
                        "inspect" => parse_inspect,
                        "wrap" => parse_wrap,
                        _ => parse_emit_entries,
                    };
                    parser(rest, &mut log_settings)?
                }
            }
            other => {
                return Err(CliError::with_usage(format!("unknown command '{other}'")));
            }
        };

        Ok(Cli {
            command,
            log_options: log_settings.merged_with_env(),
        })
    }

    #[must_use]
    pub fn usage() -> String {
        help::usage()
    }
}

/// Consume `--log-format`/`--log-level` at `args[*index]`. Returns `false` for other flags.
fn consume_log_flag(
    args: &[String],
    index: &mut usize,
    settings: &mut LogSettings,
) -> Result<bool, CliError> {
    let flag = args[*index].as_str();
    match flag {
        "--log-format" => {
            let value = flag_value(args, *index, flag)?;
            let Some(format) = LogFormat::parse(value) else {
                return Err(CliError::with_usage(format!(
                    "invalid log format '{value}'; supported values: auto, text, json"
                )));
            };
            settings.format = Some(format);
        }
        "--log-level" => {
            let value = flag_value(args, *index, flag)?;
            let Some(level) = LogLevel::parse(value) else {
                return Err(CliError::with_usage(format!(
                    "invalid log level '{value}'; supported values: error, warn, info, debug, trace"
                )));
            };
            settings.level = Some(level);
        }
        _ => return Ok(false),
    }
    *index += 2;
    Ok(true)
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| CliError::with_usage(format!("expected value after {flag}")))
}

/// Split command arguments into positionals and `--flag value` pairs.
fn split_args(
    args: &[String],
    value_flags: &[&str],
    settings: &mut LogSettings,
) -> Result<(Vec<String>, Vec<(String, String)>), CliError> {
    let mut positionals = Vec::new();
    let mut flags = Vec::new();
    let mut index = 0;
    while let Some(arg) = args.get(index) {
        if arg == "--" {
            positionals.extend(args[index + 1..].iter().cloned());
            break;
        }
        if !arg.starts_with('-') {
            if arg.trim().is_empty() {
                return Err(CliError::with_usage("arguments must not be empty"));
            }
            positionals.push(arg.clone());
            index += 1;
            continue;
        }
        if consume_log_flag(args, &mut index, settings)? {
            continue;
        }
        let flag = if arg == "-o" { "--output" } else { arg.as_str() };
        if !value_flags.contains(&flag) {
            return Err(CliError::with_usage(format!("unsupported option '{arg}'")));
        }
        let value = flag_value(args, index, arg)?;
        flags.push((flag.to_string(), value.to_string()));
        index += 2;
    }
    Ok((positionals, flags))
}

fn take_flag(flags: &[(String, String)], name: &str) -> Option<String> {
    flags
        .iter()
        .rev()
        .find(|(flag, _)| flag == name)
        .map(|(_, value)| value.clone())
}

fn single_input(positionals: Vec<String>, command: &str) -> Result<PathBuf, CliError> {
    let mut positionals = positionals.into_iter();
    let Some(image) = positionals.next() else {
        return Err(CliError::with_usage(format!("{command} requires an input image")));
    };
    if let Some(extra) = positionals.next() {
        return Err(CliError::with_usage(format!(
            "{command} accepts a single input image; found extra argument '{extra}'"
        )));
    }
    Ok(PathBuf::from(image))
}

fn parse_inspect(args: &[String], settings: &mut LogSettings) -> Result<Command, CliError> {
    let (positionals, flags) = split_args(args, &["--arch", "--env"], settings)?;
    let image = single_input(positionals, "inspect")?;
    Ok(Command::Inspect {
        image,
        arch: take_flag(&flags, "--arch"),
        env_target_id: take_flag(&flags, "--env"),
    })
}

fn parse_wrap(args: &[String], settings: &mut LogSettings) -> Result<Command, CliError> {
    let (positionals, flags) = split_args(args, &["--output"], settings)?;
    let image = single_input(positionals, "wrap")?;
    let Some(output) = take_flag(&flags, "--output") else {
        return Err(CliError::with_usage("wrap requires -o <output>"));
    };
    Ok(Command::Wrap {
        image,
        output: PathBuf::from(output),
    })
}

fn parse_emit_entries(args: &[String], settings: &mut LogSettings) -> Result<Command, CliError> {
    let (symbols, flags) = split_args(
        args,
        &["--target", "--section", "--kind", "--output"],
        settings,
    )?;
    let Some(target) = take_flag(&flags, "--target") else {
        return Err(CliError::with_usage("emit-entries requires --target <triple>"));
    };
    let Some(output) = take_flag(&flags, "--output") else {
        return Err(CliError::with_usage("emit-entries requires -o <output>"));
    };
    let kind = match take_flag(&flags, "--kind") {
        None => OffloadKind::OpenMP,
        Some(value) => OffloadKind::parse(&value).ok_or_else(|| {
            CliError::with_usage(format!(
                "invalid offload kind '{value}'; supported values: none, openmp, cuda, hip, sycl"
            ))
        })?,
    };
    if symbols.is_empty() {
        return Err(CliError::with_usage("emit-entries requires at least one symbol"));
    }
    Ok(Command::EmitEntries {
        target,
        section: take_flag(&flags, "--section"),
        kind,
        output: PathBuf::from(output),
        symbols,
    })
}
