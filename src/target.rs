//! Target descriptions for offload entry emission.

use std::fmt;
use std::str::FromStr;

use object::Endianness;
use target_lexicon::{
    Architecture as TripleArch, BinaryFormat as TripleFormat, Endianness as TripleEndianness,
    Triple,
};

/// Architecture families that influence offload symbol naming or object emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchFamily {
    X86_64,
    Aarch64,
    Amdgpu,
    Nvptx,
    Other,
}

impl ArchFamily {
    fn from_triple(arch: TripleArch) -> Self {
        match arch {
            TripleArch::X86_64 => ArchFamily::X86_64,
            TripleArch::Aarch64(_) => ArchFamily::Aarch64,
            TripleArch::AmdGcn => ArchFamily::Amdgpu,
            TripleArch::Nvptx64 => ArchFamily::Nvptx,
            _ => ArchFamily::Other,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArchFamily::X86_64 => "x86_64",
            ArchFamily::Aarch64 => "aarch64",
            ArchFamily::Amdgpu => "amdgpu",
            ArchFamily::Nvptx => "nvptx",
            ArchFamily::Other => "other",
        }
    }
}

/// Object container conventions that decide how an entry table is bounded.
///
/// ELF linkers synthesise `__start_`/`__stop_` symbols for any section whose name is a valid
/// C identifier. COFF linkers instead merge `name$suffix` sections in lexical suffix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Elf,
    Coff,
}

impl ContainerFormat {
    /// Section that receives entry descriptors.
    #[must_use]
    pub fn entry_section(self, section: &str) -> String {
        match self {
            ContainerFormat::Elf => section.to_string(),
            ContainerFormat::Coff => format!("{section}$OE"),
        }
    }

    /// Sections for the begin/end markers, or `None` when the linker resolves them itself.
    #[must_use]
    pub fn range_sections(self, section: &str) -> Option<(String, String)> {
        match self {
            ContainerFormat::Elf => None,
            ContainerFormat::Coff => Some((format!("{section}$OA"), format!("{section}$OZ"))),
        }
    }

    /// Whether an always-kept placeholder must live in the entry section.
    #[must_use]
    pub fn needs_section_anchor(self) -> bool {
        matches!(self, ContainerFormat::Elf)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerFormat::Elf => "elf",
            ContainerFormat::Coff => "coff",
        }
    }
}

/// Resolved description of the module being emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    triple: String,
    arch: ArchFamily,
    format: ContainerFormat,
    pointer_width: u8,
    endianness: Endianness,
}

impl TargetDescriptor {
    /// Parse a target triple.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Empty`] for blank input, [`TargetError::Invalid`] when the triple
    /// cannot be parsed, and [`TargetError::UnsupportedFormat`] when the triple's object format
    /// is neither ELF nor COFF.
    pub fn parse(spec: &str) -> Result<Self, TargetError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(TargetError::Empty);
        }
        let triple = Triple::from_str(trimmed)
            .map_err(|err| TargetError::Invalid(trimmed.to_string(), err.to_string()))?;
        Self::from_triple(&triple)
    }

    /// Build a descriptor from an already parsed triple.
    ///
    /// # Errors
    ///
    /// See [`TargetDescriptor::parse`].
    pub fn from_triple(triple: &Triple) -> Result<Self, TargetError> {
        let format = match triple.binary_format {
            TripleFormat::Elf => ContainerFormat::Elf,
            TripleFormat::Coff => ContainerFormat::Coff,
            other => {
                return Err(TargetError::UnsupportedFormat(
                    triple.to_string(),
                    other.to_string(),
                ));
            }
        };
        let pointer_width = triple
            .pointer_width()
            .map_err(|()| TargetError::UnsupportedArch(triple.architecture.to_string()))?
            .bytes();
        let endianness = match triple.endianness() {
            Ok(TripleEndianness::Big) => Endianness::Big,
            Ok(TripleEndianness::Little) => Endianness::Little,
            Err(()) => return Err(TargetError::UnsupportedArch(triple.architecture.to_string())),
        };
        Ok(Self {
            triple: triple.to_string(),
            arch: ArchFamily::from_triple(triple.architecture),
            format,
            pointer_width,
            endianness,
        })
    }

    /// Return the canonical triple for this target.
    #[must_use]
    pub fn triple(&self) -> &str {
        &self.triple
    }

    #[must_use]
    pub fn arch(&self) -> ArchFamily {
        self.arch
    }

    #[must_use]
    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    /// Pointer width in bytes.
    #[must_use]
    pub fn pointer_width(&self) -> u8 {
        self.pointer_width
    }

    #[must_use]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// PTX identifiers cannot contain `.`, so NVPTX devices and segment-group containers share
    /// the `$`-separated spelling.
    #[must_use]
    pub fn uses_dollar_symbols(&self) -> bool {
        self.arch == ArchFamily::Nvptx || self.format == ContainerFormat::Coff
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

/// Errors encountered while parsing a target specification.
#[derive(Debug, Clone)]
pub enum TargetError {
    Empty,
    Invalid(String, String),
    UnsupportedArch(String),
    UnsupportedFormat(String, String),
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::Empty => write!(f, "target triple is empty"),
            TargetError::Invalid(triple, reason) => {
                write!(f, "failed to parse target triple '{triple}': {reason}")
            }
            TargetError::UnsupportedArch(arch) => {
                write!(f, "unsupported architecture '{arch}' for offload emission")
            }
            TargetError::UnsupportedFormat(triple, format) => write!(
                f,
                "unsupported object format '{format}' for target '{triple}'; expected elf or coff"
            ),
        }
    }
}

impl std::error::Error for TargetError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(spec: &str) -> TargetDescriptor {
        match TargetDescriptor::parse(spec) {
            Ok(value) => value,
            Err(err) => panic!("expected Ok target for {spec}, found Err: {err}"),
        }
    }

    #[test]
    fn linux_targets_use_elf() {
        let target = parse("x86_64-unknown-linux-gnu");
        assert_eq!(target.format(), ContainerFormat::Elf);
        assert_eq!(target.arch(), ArchFamily::X86_64);
        assert_eq!(target.pointer_width(), 8);
        assert_eq!(target.endianness(), Endianness::Little);
        assert!(!target.uses_dollar_symbols());
    }

    #[test]
    fn windows_targets_use_coff() {
        let target = parse("x86_64-pc-windows-msvc");
        assert_eq!(target.format(), ContainerFormat::Coff);
        assert!(target.uses_dollar_symbols());
    }

    #[test]
    fn device_triples_map_to_families() {
        assert_eq!(parse("amdgcn-amd-amdhsa").arch(), ArchFamily::Amdgpu);
        let nvptx = parse("nvptx64-nvidia-cuda");
        assert_eq!(nvptx.arch(), ArchFamily::Nvptx);
        assert_eq!(nvptx.format(), ContainerFormat::Elf);
        assert!(nvptx.uses_dollar_symbols());
    }

    #[test]
    fn rejects_blank_and_macho() {
        assert!(matches!(
            TargetDescriptor::parse("  "),
            Err(TargetError::Empty)
        ));
        assert!(matches!(
            TargetDescriptor::parse("x86_64-apple-darwin"),
            Err(TargetError::UnsupportedFormat(..))
        ));
        assert!(matches!(
            TargetDescriptor::parse("not a triple"),
            Err(TargetError::Invalid(..))
        ));
    }

    #[test]
    fn section_names_follow_container_rules() {
        let elf = ContainerFormat::Elf;
        assert_eq!(elf.entry_section("llvm_offload_entries"), "llvm_offload_entries");
        assert_eq!(elf.range_sections("llvm_offload_entries"), None);
        assert!(elf.needs_section_anchor());

        let coff = ContainerFormat::Coff;
        assert_eq!(coff.entry_section("llvm_offload_entries"), "llvm_offload_entries$OE");
        assert_eq!(
            coff.range_sections("llvm_offload_entries"),
            Some((
                "llvm_offload_entries$OA".to_string(),
                "llvm_offload_entries$OZ".to_string()
            ))
        );
        assert!(!coff.needs_section_anchor());
    }
}
