//! Per-kernel resource usage read from `NT_AMDGPU_METADATA` notes.

use std::collections::BTreeMap;

use object::LittleEndian;
use object::elf::{FileHeader64, SHT_NOTE};
use object::read::elf::{FileHeader, SectionHeader};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

use super::document::{DocNode, decode_document};
use super::target_id::is_image_compatible_with_env;
use super::verifier::{HsaMetadataVerifier, MetadataVerifier};

/// Note type carrying the MessagePack metadata document.
pub const NT_AMDGPU_METADATA: u32 = 32;

/// Owner name of AMDGPU vendor notes.
pub const AMDGPU_NOTE_OWNER: &[u8] = b"AMDGPU";

const KERNELS_KEY: &str = "amdhsa.kernels";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AmdgpuKernelMetaData {
    pub sgpr_count: u32,
    pub sgpr_spill_count: u32,
    pub vgpr_count: u32,
    pub vgpr_spill_count: u32,
    pub agpr_count: u32,
    pub private_segment_size: u32,
    pub group_segment_size: u32,
    pub requested_workgroup_size: [u32; 3],
    pub workgroup_size_hint: [u32; 3],
    pub wavefront_size: u32,
    pub max_flat_workgroup_size: u32,
}

/// Kernel metadata keyed by kernel name.
pub type KernelMetadataMap = BTreeMap<String, AmdgpuKernelMetaData>;

/// Everything the loader needs from one device image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ImageMetadata {
    pub kernels: KernelMetadataMap,
    /// `e_ident[EI_ABIVERSION]`.
    pub abi_version: u16,
    /// ELF header `e_flags`.
    pub flags: u32,
}

impl ImageMetadata {
    #[must_use]
    pub fn is_compatible_with_env(&self, image_arch: &str, env_target_id: &str) -> bool {
        is_image_compatible_with_env(image_arch, self.flags, env_target_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KernelField {
    Name,
    SgprCount,
    VgprCount,
    SgprSpillCount,
    VgprSpillCount,
    AgprCount,
    PrivateSegmentSize,
    GroupSegmentSize,
    RequestedWorkgroupSize,
    WorkgroupSizeHint,
    WavefrontSize,
    MaxFlatWorkgroupSize,
}

const KERNEL_FIELDS: &[(&str, KernelField)] = &[
    (".name", KernelField::Name),
    (".sgpr_count", KernelField::SgprCount),
    (".vgpr_count", KernelField::VgprCount),
    (".sgpr_spill_count", KernelField::SgprSpillCount),
    (".vgpr_spill_count", KernelField::VgprSpillCount),
    (".agpr_count", KernelField::AgprCount),
    (".private_segment_fixed_size", KernelField::PrivateSegmentSize),
    (".group_segment_fixed_size", KernelField::GroupSegmentSize),
    (".reqd_workgroup_size", KernelField::RequestedWorkgroupSize),
    (".workgroup_size_hint", KernelField::WorkgroupSizeHint),
    (".wavefront_size", KernelField::WavefrontSize),
    (".max_flat_workgroup_size", KernelField::MaxFlatWorkgroupSize),
];

fn lookup_field(key: &str) -> Option<KernelField> {
    KERNEL_FIELDS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, field)| *field)
}

/// Read kernel metadata from an AMDGPU code object, checking documents against the HSA schema.
///
/// # Errors
///
/// Returns [`Error::MalformedObject`] when the image is not a little-endian ELF64 object or a
/// note section cannot be walked, and [`Error::MissingKernelsArray`] when a verified document
/// has no kernels array.
pub fn read_kernel_metadata(image: &[u8]) -> Result<ImageMetadata> {
    read_kernel_metadata_with(image, &HsaMetadataVerifier)
}

/// [`read_kernel_metadata`] with a caller-chosen schema verifier.
///
/// # Errors
///
/// See [`read_kernel_metadata`].
pub fn read_kernel_metadata_with<V>(image: &[u8], verifier: &V) -> Result<ImageMetadata>
where
    V: MetadataVerifier + ?Sized,
{
    let header = FileHeader64::<LittleEndian>::parse(image)
        .map_err(|err| Error::malformed(format!("invalid ELF header: {err}")))?;
    let endian = header
        .endian()
        .map_err(|err| Error::malformed(format!("invalid ELF header: {err}")))?;
    let sections = header
        .sections(endian, image)
        .map_err(|err| Error::malformed(format!("invalid section table: {err}")))?;

    let mut metadata = ImageMetadata {
        kernels: KernelMetadataMap::new(),
        abi_version: u16::from(header.e_ident().abi_version),
        flags: header.e_flags(endian),
    };

    for (index, section) in sections.iter().enumerate() {
        if section.sh_type(endian) != SHT_NOTE {
            continue;
        }
        let Some(mut notes) = section
            .notes(endian, image)
            .map_err(|err| Error::malformed(format!("note section {index}: {err}")))?
        else {
            continue;
        };
        while let Some(note) = notes
            .next()
            .map_err(|err| Error::malformed(format!("note section {index}: {err}")))?
        {
            if note.name() != AMDGPU_NOTE_OWNER {
                debug!(
                    target: "offload.metadata",
                    owner = %String::from_utf8_lossy(note.name()),
                    "skipping note from another owner"
                );
                continue;
            }
            let note_type = note.n_type(endian);
            if note_type != NT_AMDGPU_METADATA {
                debug!(target: "offload.metadata", note_type, "skipping AMDGPU note");
                continue;
            }
            let root = match decode_document(note.desc()) {
                Ok(root) => root,
                Err(err) => {
                    debug!(target: "offload.metadata", error = %err, "skipping undecodable metadata");
                    continue;
                }
            };
            if let Err(violation) = verifier.verify(&root) {
                debug!(target: "offload.metadata", %violation, "skipping unverified metadata");
                continue;
            }
            metadata.kernels.extend(kernel_metadata_from_document(&root)?);
        }
    }

    debug!(
        target: "offload.metadata",
        kernels = metadata.kernels.len(),
        abi_version = metadata.abi_version,
        flags = metadata.flags,
        "read kernel metadata"
    );
    Ok(metadata)
}

/// Extract every kernel described under `amdhsa.kernels` in a decoded document.
///
/// # Errors
///
/// Returns [`Error::MissingKernelsArray`] when the key is absent or not an array.
pub fn kernel_metadata_from_document(root: &DocNode) -> Result<KernelMetadataMap> {
    let kernels = root
        .get(KERNELS_KEY)
        .and_then(DocNode::as_array)
        .ok_or(Error::MissingKernelsArray)?;

    let mut map = KernelMetadataMap::new();
    for kernel in kernels {
        let Some(entries) = kernel.as_map() else {
            debug!(target: "offload.metadata", kind = kernel.kind(), "skipping non-map kernel");
            continue;
        };
        let mut name = String::new();
        let mut data = AmdgpuKernelMetaData::default();
        for (key, value) in entries {
            let Some(field) = key.as_str().and_then(lookup_field) else {
                continue;
            };
            apply_field(field, value, &mut name, &mut data);
        }
        map.insert(name, data);
    }
    Ok(map)
}

fn apply_field(
    field: KernelField,
    value: &DocNode,
    name: &mut String,
    data: &mut AmdgpuKernelMetaData,
) {
    let scalar = || value.as_u32().unwrap_or_default();
    match field {
        KernelField::Name => *name = value.to_scalar_string().unwrap_or_default(),
        KernelField::SgprCount => data.sgpr_count = scalar(),
        KernelField::VgprCount => data.vgpr_count = scalar(),
        KernelField::SgprSpillCount => data.sgpr_spill_count = scalar(),
        KernelField::VgprSpillCount => data.vgpr_spill_count = scalar(),
        KernelField::AgprCount => data.agpr_count = scalar(),
        KernelField::PrivateSegmentSize => data.private_segment_size = scalar(),
        KernelField::GroupSegmentSize => data.group_segment_size = scalar(),
        KernelField::RequestedWorkgroupSize => data.requested_workgroup_size = triple(value),
        KernelField::WorkgroupSizeHint => data.workgroup_size_hint = triple(value),
        KernelField::WavefrontSize => data.wavefront_size = scalar(),
        KernelField::MaxFlatWorkgroupSize => data.max_flat_workgroup_size = scalar(),
    }
}

fn triple(value: &DocNode) -> [u32; 3] {
    let Some([x, y, z]) = value.as_array() else {
        return [0; 3];
    };
    match (x.as_u32(), y.as_u32(), z.as_u32()) {
        (Some(x), Some(y), Some(z)) => [x, y, z],
        _ => [0; 3],
    }
}
