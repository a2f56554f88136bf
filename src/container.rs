//! Minimal ELF containers around opaque device images.
//!
//! The OpenMP SPIR-V container is an ELF64 little-endian object with one note section
//! describing the payload and one section per image.

use std::fmt::Display;

use object::Endianness;
use object::elf::{EM_IA_64, ET_DYN, SHT_NOTE, SHT_PROGBITS};
use object::write::elf::{FileHeader, SectionHeader, Writer};
use tracing::debug;

use crate::error::{Error, Result};

pub const INTEL_NOTE_OWNER: &[u8] = b"INTELONEOMPOFFLOAD";
pub const NT_INTEL_ONEOMP_OFFLOAD_VERSION: u32 = 1;
pub const NT_INTEL_ONEOMP_OFFLOAD_IMAGE_COUNT: u32 = 2;
pub const NT_INTEL_ONEOMP_OFFLOAD_IMAGE_AUX: u32 = 3;

pub const OFFLOAD_NOTE_SECTION: &str = ".note.inteloneompoffload";
pub const SPIRV_IMAGE_SECTION: &str = "__openmp_offload_spirv_0";

const CONTAINER_VERSION: &str = "1.0";
const SPIRV_IMAGE_FORMAT: u32 = 1;

/// One ELF note record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfNote {
    pub owner: Vec<u8>,
    pub n_type: u32,
    pub desc: Vec<u8>,
}

impl ElfNote {
    #[must_use]
    pub fn new(owner: &[u8], n_type: u32, desc: impl Into<Vec<u8>>) -> Self {
        Self {
            owner: owner.to_vec(),
            n_type,
            desc: desc.into(),
        }
    }

    /// Append the record to `out`: sizes, type, NUL-terminated owner, then the descriptor,
    /// each padded to four bytes.
    pub fn encode_into(&self, out: &mut Vec<u8>, endian: Endianness) {
        use object::Endian as _;

        let namesz = self.owner.len() + 1;
        out.extend_from_slice(&endian.write_u32_bytes(len_u32(namesz)));
        out.extend_from_slice(&endian.write_u32_bytes(len_u32(self.desc.len())));
        out.extend_from_slice(&endian.write_u32_bytes(self.n_type));
        out.extend_from_slice(&self.owner);
        out.push(0);
        pad4(out);
        out.extend_from_slice(&self.desc);
        pad4(out);
    }

    #[must_use]
    pub fn encode_all(notes: &[ElfNote], endian: Endianness) -> Vec<u8> {
        let mut out = Vec::new();
        for note in notes {
            note.encode_into(&mut out, endian);
        }
        out
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSection {
    pub name: String,
    pub sh_type: u32,
    pub align: u64,
    pub data: Vec<u8>,
}

impl ContainerSection {
    /// A `SHT_NOTE` section with no declared alignment.
    #[must_use]
    pub fn notes(name: impl Into<String>, notes: &[ElfNote]) -> Self {
        Self {
            name: name.into(),
            sh_type: SHT_NOTE,
            align: 0,
            data: ElfNote::encode_all(notes, Endianness::Little),
        }
    }

    /// A `SHT_PROGBITS` section with no declared alignment.
    #[must_use]
    pub fn progbits(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            sh_type: SHT_PROGBITS,
            align: 0,
            data: data.into(),
        }
    }
}

/// Declared shape of an ELF64 little-endian container: header fields plus sections in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_flags: u32,
    pub abi_version: u8,
    pub sections: Vec<ContainerSection>,
}

impl ContainerLayout {
    /// Layout of the OpenMP offload container for a single SPIR-V image.
    #[must_use]
    pub fn openmp_spirv(image: &[u8]) -> Self {
        // "<image index>\0<image format>\0<compile options>\0<link options>"
        let aux = format!("0\0{SPIRV_IMAGE_FORMAT}\0\0");
        let notes = [
            ElfNote::new(
                INTEL_NOTE_OWNER,
                NT_INTEL_ONEOMP_OFFLOAD_VERSION,
                CONTAINER_VERSION,
            ),
            ElfNote::new(INTEL_NOTE_OWNER, NT_INTEL_ONEOMP_OFFLOAD_IMAGE_AUX, aux),
            ElfNote::new(INTEL_NOTE_OWNER, NT_INTEL_ONEOMP_OFFLOAD_IMAGE_COUNT, "1"),
        ];
        Self {
            e_type: ET_DYN,
            // Placeholder machine; the runtime dispatches on the notes.
            e_machine: EM_IA_64,
            e_flags: 0,
            abi_version: 0,
            sections: vec![
                ContainerSection::notes(OFFLOAD_NOTE_SECTION, &notes),
                ContainerSection::progbits(SPIRV_IMAGE_SECTION, image),
            ],
        }
    }

    /// Write the layout with `object`'s ELF writer.
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn assemble(&self) -> object::write::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut writer = Writer::new(Endianness::Little, true, &mut buffer);

        writer.reserve_file_header();
        writer.reserve_null_section_index();
        let names: Vec<_> = self
            .sections
            .iter()
            .map(|section| {
                let name = writer.add_section_name(section.name.as_bytes());
                writer.reserve_section_index();
                name
            })
            .collect();
        writer.reserve_shstrtab_section_index();

        let offsets: Vec<usize> = self
            .sections
            .iter()
            .map(|section| writer.reserve(section.data.len(), data_align(section)))
            .collect();
        writer.reserve_shstrtab();
        writer.reserve_section_headers();

        writer.write_file_header(&FileHeader {
            os_abi: 0,
            abi_version: self.abi_version,
            e_type: self.e_type,
            e_machine: self.e_machine,
            e_entry: 0,
            e_flags: self.e_flags,
        })?;
        for section in &self.sections {
            if !section.data.is_empty() {
                writer.write_align(data_align(section));
                writer.write(&section.data);
            }
        }
        writer.write_shstrtab();

        writer.write_null_section_header();
        for ((section, name), offset) in self.sections.iter().zip(names).zip(offsets) {
            writer.write_section_header(&SectionHeader {
                name: Some(name),
                sh_type: section.sh_type,
                sh_flags: 0,
                sh_addr: 0,
                sh_offset: offset as u64,
                sh_size: section.data.len() as u64,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: section.align,
                sh_entsize: 0,
            });
        }
        writer.write_shstrtab_section_header();
        Ok(buffer)
    }
}

fn data_align(section: &ContainerSection) -> usize {
    if section.sh_type == SHT_NOTE {
        4
    } else {
        usize::try_from(section.align.max(1)).unwrap_or(1)
    }
}

/// Wrap a SPIR-V image in the OpenMP offload container.
///
/// # Errors
///
/// Returns [`Error::Codegen`] when the ELF writer fails.
pub fn containerize_openmp_spirv_image(image: &[u8]) -> Result<Vec<u8>> {
    containerize_with_assembler(image, ContainerLayout::assemble)
}

/// [`containerize_openmp_spirv_image`] with an injected assembler.
///
/// # Errors
///
/// Returns [`Error::Codegen`] when `assembler` fails; no partial output is returned.
pub fn containerize_with_assembler<F, E>(image: &[u8], assembler: F) -> Result<Vec<u8>>
where
    F: FnOnce(&ContainerLayout) -> std::result::Result<Vec<u8>, E>,
    E: Display,
{
    let layout = ContainerLayout::openmp_spirv(image);
    let bytes = assembler(&layout)
        .map_err(|err| Error::codegen(format!("failed to assemble SPIR-V container: {err}")))?;
    debug!(
        target: "offload.container",
        image_bytes = image.len(),
        container_bytes = bytes.len(),
        "wrapped SPIR-V image"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::read::elf::{FileHeader as _, SectionHeader as _};
    use object::{LittleEndian, Object as _, ObjectSection as _, elf};

    fn notes_of(container: &[u8]) -> Vec<(Vec<u8>, u32, Vec<u8>)> {
        let header = elf::FileHeader64::<LittleEndian>::parse(container).expect("ELF header");
        let endian = header.endian().expect("endian");
        let sections = header.sections(endian, container).expect("sections");
        let mut found = Vec::new();
        for section in sections.iter() {
            let Some(mut notes) = section.notes(endian, container).expect("notes") else {
                continue;
            };
            while let Some(note) = notes.next().expect("note") {
                found.push((note.name().to_vec(), note.n_type(endian), note.desc().to_vec()));
            }
        }
        found
    }

    #[test]
    fn wrapped_image_round_trips() {
        let image = b"\x03\x02\x23\x07spirv-module".to_vec();
        let container = containerize_openmp_spirv_image(&image).expect("container");

        let file = object::File::parse(&*container).expect("parse container");
        assert_eq!(file.format(), object::BinaryFormat::Elf);
        assert!(file.is_little_endian());
        assert!(file.is_64());
        let section = file
            .section_by_name(SPIRV_IMAGE_SECTION)
            .expect("image section");
        assert_eq!(section.data().expect("image data"), image.as_slice());
        assert_eq!(section.align(), 0);
        let notes = file
            .section_by_name(OFFLOAD_NOTE_SECTION)
            .expect("note section");
        assert_eq!(notes.align(), 0);

        let header = elf::FileHeader64::<LittleEndian>::parse(&*container).expect("header");
        assert_eq!(header.e_type(LittleEndian), ET_DYN);
        assert_eq!(header.e_machine(LittleEndian), EM_IA_64);
    }

    #[test]
    fn notes_appear_in_fixed_order() {
        let container = containerize_openmp_spirv_image(b"spirv").expect("container");
        let notes = notes_of(&container);
        assert_eq!(
            notes,
            vec![
                (INTEL_NOTE_OWNER.to_vec(), 1, b"1.0".to_vec()),
                (INTEL_NOTE_OWNER.to_vec(), 3, b"0\x001\x00\x00".to_vec()),
                (INTEL_NOTE_OWNER.to_vec(), 2, b"1".to_vec()),
            ]
        );
        let counts = notes
            .iter()
            .filter(|(_, n_type, _)| *n_type == NT_INTEL_ONEOMP_OFFLOAD_IMAGE_COUNT)
            .count();
        assert_eq!(counts, 1);
    }

    #[test]
    fn empty_image_still_produces_container() {
        let container = containerize_openmp_spirv_image(&[]).expect("container");
        let file = object::File::parse(&*container).expect("parse container");
        let section = file
            .section_by_name(SPIRV_IMAGE_SECTION)
            .expect("image section");
        assert!(section.data().expect("data").is_empty());
    }

    #[test]
    fn assembler_failure_is_codegen_error() {
        let err = containerize_with_assembler(b"spirv", |_layout| -> std::result::Result<Vec<u8>, &str> {
            Err("out of space")
        })
        .expect_err("assembler failure");
        match err {
            Error::Codegen { message, .. } => {
                assert!(message.contains("out of space"), "{message}");
            }
            other => panic!("expected codegen error, found {other:?}"),
        }
    }

    #[test]
    fn note_encoding_pads_owner_and_descriptor() {
        let note = ElfNote::new(b"AB", 7, b"xyz".to_vec());
        let bytes = ElfNote::encode_all(&[note], Endianness::Little);
        assert_eq!(
            bytes,
            [
                3, 0, 0, 0, // namesz
                3, 0, 0, 0, // descsz
                7, 0, 0, 0, // type
                b'A', b'B', 0, 0, b'x', b'y', b'z', 0,
            ]
        );
    }

    #[test]
    fn layout_sections_are_declared_in_order() {
        let layout = ContainerLayout::openmp_spirv(b"img");
        let names: Vec<&str> = layout.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [OFFLOAD_NOTE_SECTION, SPIRV_IMAGE_SECTION]);
        assert_eq!(layout.sections[0].sh_type, SHT_NOTE);
        assert_eq!(layout.sections[0].align, 0);
        assert_eq!(layout.sections[1].sh_type, SHT_PROGBITS);
        assert_eq!(layout.sections[1].align, 0);
    }
}
