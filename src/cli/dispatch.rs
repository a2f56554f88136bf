//! Command execution for a parsed [`Cli`].

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::amdgpu::{KernelMetadataMap, TargetId, read_kernel_metadata};
use crate::config;
use crate::container::containerize_openmp_spirv_image;
use crate::entry::{
    EntrySpec, ObjectModule, OffloadKind, SymbolRef, declare_entry_range, emit_offloading_entry,
};
use crate::error::{Error, Result};
use crate::logging::init_logging;
use crate::target::TargetDescriptor;

use super::{Cli, CliError, Command, help};

#[derive(Debug, Serialize)]
struct InspectReport<'a> {
    abi_version: u16,
    flags: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env_target_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compatible: Option<bool>,
    kernels: &'a KernelMetadataMap,
}

/// Execute `cli`, writing command output to stdout.
///
/// # Errors
/// Propagates I/O, parsing, extraction, and emission failures.
pub fn run(cli: Cli) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_to(cli, &mut out)
}

/// Execute `cli`, writing command output to `out`.
///
/// # Errors
/// See [`run`].
pub fn run_to(cli: Cli, out: &mut dyn Write) -> Result<()> {
    init_logging(&cli.log_options);
    match cli.command {
        Command::Help { topic } => {
            writeln!(out, "{}", help::topic(topic.as_deref()))?;
            Ok(())
        }
        Command::Version => {
            writeln!(out, "offloading {}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        Command::Inspect {
            image,
            arch,
            env_target_id,
        } => inspect(&image, arch.as_deref(), env_target_id, out),
        Command::Wrap { image, output } => wrap(&image, &output),
        Command::EmitEntries {
            target,
            section,
            kind,
            output,
            symbols,
        } => emit_entries(&target, section, kind, &output, &symbols),
    }
}

fn inspect(
    image: &Path,
    arch: Option<&str>,
    env_target_id: Option<String>,
    out: &mut dyn Write,
) -> Result<()> {
    let config = config::resolve(None, env_target_id);
    let env_target_id = config.env_target_id.as_deref();
    if let Some(env) = env_target_id {
        env.parse::<TargetId>().map_err(|err| {
            CliError::new(format!("invalid environment target ID '{env}': {err}"))
        })?;
    }

    let bytes = fs::read(image)?;
    let metadata = read_kernel_metadata(&bytes)?;
    let compatible = match (arch, env_target_id) {
        (Some(arch), Some(env)) => Some(metadata.is_compatible_with_env(arch, env)),
        _ => None,
    };
    let report = InspectReport {
        abi_version: metadata.abi_version,
        flags: metadata.flags,
        target_id: arch.map(|arch| TargetId::from_image(arch, metadata.flags).to_string()),
        env_target_id: compatible.and(env_target_id),
        compatible,
        kernels: &metadata.kernels,
    };
    let rendered = serde_json::to_string_pretty(&report).map_err(io::Error::from)?;
    writeln!(out, "{rendered}")?;
    Ok(())
}

fn wrap(image: &Path, output: &Path) -> Result<()> {
    let bytes = fs::read(image)?;
    let container = containerize_openmp_spirv_image(&bytes)?;
    fs::write(output, &container)?;
    info!(
        target: "offload.cli",
        input = %image.display(),
        output = %output.display(),
        bytes = container.len(),
        "wrote SPIR-V container"
    );
    Ok(())
}

fn emit_entries(
    target: &str,
    section: Option<String>,
    kind: OffloadKind,
    output: &Path,
    symbols: &[String],
) -> Result<()> {
    let config = config::resolve(section, None);
    let target = TargetDescriptor::parse(target)?;
    let mut module = ObjectModule::new(target)?;
    declare_entry_range(&mut module, &config.entry_section);
    for symbol in symbols {
        let spec = EntrySpec::new(kind, SymbolRef::External(symbol.clone()), symbol.as_str());
        emit_offloading_entry(&mut module, spec, &config.entry_section);
    }
    let object = module.finish()?;
    fs::write(output, &object)?;
    info!(
        target: "offload.cli",
        output = %output.display(),
        section = %config.entry_section,
        entries = symbols.len(),
        "wrote offload entry table"
    );
    Ok(())
}

/// Print `err` to stderr.
pub fn report_error(err: &Error) {
    let mut stderr = io::stderr();
    if let Err(io_err) = report_error_to(err, &mut stderr) {
        let _ = writeln!(io::stderr(), "failed to report error: {io_err}");
    }
}

fn report_error_to(err: &Error, out: &mut dyn Write) -> io::Result<()> {
    match err {
        Error::Cli(cli) => writeln!(out, "{cli}"),
        other => writeln!(out, "error: {other}"),
    }
}

#[cfg(test)]
pub(super) fn render_error(err: &Error) -> String {
    let mut buffer = Vec::new();
    let _ = report_error_to(err, &mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}
