const USAGE: &str = "\
Usage: offloading [--log-format <auto|text|json>] [--log-level <level>] <command> [options]

Commands:
  inspect <image> [--arch <gfxNNN>] [--env <target-id>]
                        Print AMDGPU kernel metadata as JSON
  wrap <image> -o <output>
                        Wrap a SPIR-V image in an OpenMP offload container
  emit-entries --target <triple> [--section <name>] [--kind <kind>] -o <output> <symbol>...
                        Write a host object with an offload entry table
  help [command]        Show this message or help for a command
  version               Show the version";

const INSPECT: &str = "\
Usage: offloading inspect <image> [--arch <gfxNNN>] [--env <target-id>]

Reads the NT_AMDGPU_METADATA notes of an AMDGPU code object and prints the
per-kernel resource usage as JSON. With --arch, the report includes the image
target ID; with --env (or amdgpu.env_target in offload.cfg) it also reports
whether the image may run in that environment.";

const WRAP: &str = "\
Usage: offloading wrap <image> -o <output>

Writes an ELF container holding the SPIR-V image in __openmp_offload_spirv_0
plus the INTELONEOMPOFFLOAD version, aux-info, and image-count notes.";

const EMIT_ENTRIES: &str = "\
Usage: offloading emit-entries --target <triple> [--section <name>] [--kind <kind>] -o <output> <symbol>...

Writes a relocatable object with one offload entry per symbol, bounded by
__start_<section> and __stop_<section>. The section defaults to
entries.section in offload.cfg, then llvm_offload_entries. Kinds: none,
openmp (default), cuda, hip, sycl.";

pub(super) fn usage() -> String {
    USAGE.to_string()
}

pub(super) fn topic(name: Option<&str>) -> String {
    match name {
        Some("inspect") => INSPECT.to_string(),
        Some("wrap") => WRAP.to_string(),
        Some("emit-entries") => EMIT_ENTRIES.to_string(),
        Some("version") => "Usage: offloading version".to_string(),
        _ => usage(),
    }
}
