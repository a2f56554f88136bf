use std::fs;
use std::path::Path;

use object::elf::{EM_AMDGPU, ET_DYN};
use offloading::amdgpu::{AMDGPU_NOTE_OWNER, NT_AMDGPU_METADATA};
use offloading::container::{ContainerLayout, ContainerSection, ElfNote};
use rmpv::Value;

pub const GFX90A_XNACK_OFF: u32 = 0x03f | 0x200;

fn entry(key: &str, value: Value) -> (Value, Value) {
    (Value::from(key), value)
}

fn ints(values: &[u64]) -> Value {
    Value::Array(values.iter().map(|value| Value::from(*value)).collect())
}

/// HSA metadata for a single `vec_add` kernel.
pub fn vec_add_metadata() -> Value {
    let kernel = Value::Map(vec![
        entry(".name", Value::from("vec_add")),
        entry(".symbol", Value::from("vec_add.kd")),
        entry(".kernarg_segment_size", Value::from(24u64)),
        entry(".kernarg_segment_align", Value::from(8u64)),
        entry(".group_segment_fixed_size", Value::from(256u64)),
        entry(".private_segment_fixed_size", Value::from(16u64)),
        entry(".wavefront_size", Value::from(64u64)),
        entry(".sgpr_count", Value::from(24u64)),
        entry(".vgpr_count", Value::from(32u64)),
        entry(".agpr_count", Value::from(4u64)),
        entry(".max_flat_workgroup_size", Value::from(256u64)),
        entry(".reqd_workgroup_size", ints(&[256, 1, 1])),
        entry(".language", Value::from("OpenMP")),
    ]);
    Value::Map(vec![
        entry("amdhsa.version", ints(&[1, 2])),
        entry("amdhsa.kernels", Value::Array(vec![kernel])),
    ])
}

/// Write an AMDGPU code object carrying `document` in an `NT_AMDGPU_METADATA` note.
pub fn write_code_object(path: &Path, document: &Value, e_flags: u32) {
    let mut desc = Vec::new();
    rmpv::encode::write_value(&mut desc, document)
        .unwrap_or_else(|err| panic!("encode metadata: {err}"));
    let layout = ContainerLayout {
        e_type: ET_DYN,
        e_machine: EM_AMDGPU,
        e_flags,
        abi_version: 2,
        sections: vec![ContainerSection::notes(
            ".note",
            &[ElfNote::new(AMDGPU_NOTE_OWNER, NT_AMDGPU_METADATA, desc)],
        )],
    };
    let bytes = layout
        .assemble()
        .unwrap_or_else(|err| panic!("assemble code object: {err}"));
    fs::write(path, bytes).unwrap_or_else(|err| panic!("write {}: {err}", path.display()));
}
