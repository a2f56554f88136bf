//! [`ModuleBuilder`] backed by a relocatable `object::write::Object`.

use std::collections::HashMap;

use object::write::{
    Comdat, Object, Relocation, SectionId, StandardSection, StandardSegment, Symbol, SymbolId,
    SymbolSection,
};
use object::{
    Architecture, BinaryFormat, ComdatKind, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionFlags, SectionKind, SymbolFlags, SymbolKind, SymbolScope, elf,
};

use crate::error::{Error, Result};
use crate::target::{ArchFamily, ContainerFormat, TargetDescriptor, TargetError};

use super::descriptor::{EntryLayout, OffloadEntry};
use super::module::{
    GlobalId, GlobalVariable, Initializer, Linkage, ModuleBuilder, SymbolRef, Visibility,
};

const SHF_GNU_RETAIN: u64 = 0x0020_0000;

#[derive(Debug)]
struct PendingRelocation {
    section: SectionId,
    offset: u64,
    target: SymbolRef,
}

#[derive(Debug, Clone, Copy)]
struct PlacedSection {
    id: SectionId,
    relocatable: bool,
    retained: bool,
}

/// Lowers globals straight into sections and symbols of an ELF or COFF relocatable object.
pub struct ObjectModule {
    target: TargetDescriptor,
    layout: EntryLayout,
    object: Object<'static>,
    symbols: Vec<(SymbolId, Option<SectionId>)>,
    sections: HashMap<String, PlacedSection>,
    pending: Vec<PendingRelocation>,
    /// First global that could not be lowered; reported by `finish`.
    deferred: Option<Error>,
}

impl ObjectModule {
    /// Create an empty object for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Target`] for architectures the object writer is not configured for.
    pub fn new(target: TargetDescriptor) -> Result<Self> {
        let architecture = match target.arch() {
            ArchFamily::X86_64 => Architecture::X86_64,
            ArchFamily::Aarch64 => Architecture::Aarch64,
            other => {
                return Err(Error::Target(TargetError::UnsupportedArch(format!(
                    "{} ({})",
                    target.triple(),
                    other.as_str()
                ))));
            }
        };
        let format = match target.format() {
            ContainerFormat::Elf => BinaryFormat::Elf,
            ContainerFormat::Coff => BinaryFormat::Coff,
        };
        let layout = EntryLayout::for_target(&target)?;
        let object = Object::new(format, architecture, target.endianness());
        Ok(Self {
            target,
            layout,
            object,
            symbols: Vec::new(),
            sections: HashMap::new(),
            pending: Vec::new(),
            deferred: None,
        })
    }

    #[must_use]
    pub fn layout(&self) -> EntryLayout {
        self.layout
    }

    /// Resolve pointer relocations and serialise the object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codegen`] when a global could not be lowered, a relocation cannot be
    /// represented, or the writer fails.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.finish_with_writer(|object| object.write())
    }

    /// Like [`ObjectModule::finish`] with an injected serialiser.
    ///
    /// # Errors
    ///
    /// See [`ObjectModule::finish`].
    pub fn finish_with_writer<F, E>(mut self, writer: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&Object<'_>) -> std::result::Result<Vec<u8>, E>,
        E: std::fmt::Display,
    {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let pending = std::mem::take(&mut self.pending);
        let size = self.layout.pointer_width() * 8;
        for relocation in pending {
            let symbol = self.resolve(&relocation.target)?;
            self.object
                .add_relocation(
                    relocation.section,
                    Relocation {
                        offset: relocation.offset,
                        symbol,
                        addend: 0,
                        flags: RelocationFlags::Generic {
                            kind: RelocationKind::Absolute,
                            encoding: RelocationEncoding::Generic,
                            size,
                        },
                    },
                )
                .map_err(|err| {
                    Error::codegen(format!(
                        "failed to relocate offload entry for '{}': {err}",
                        self.target.triple()
                    ))
                })?;
        }

        if self.target.format() == ContainerFormat::Elf {
            for placed in self.sections.values().filter(|placed| placed.retained) {
                let mut sh_flags = u64::from(elf::SHF_ALLOC) | SHF_GNU_RETAIN;
                if placed.relocatable {
                    sh_flags |= u64::from(elf::SHF_WRITE);
                }
                self.object.section_mut(placed.id).flags = SectionFlags::Elf { sh_flags };
            }
        }

        writer(&self.object).map_err(|err| {
            Error::codegen(format!(
                "failed to serialise offload object for '{}': {err}",
                self.target.triple()
            ))
        })
    }

    fn resolve(&mut self, target: &SymbolRef) -> Result<SymbolId> {
        match target {
            SymbolRef::Global(id) => self
                .symbols
                .get(id.index())
                .map(|(symbol, _)| *symbol)
                .ok_or_else(|| Error::codegen(format!("unknown global #{}", id.index()))),
            SymbolRef::External(name) => Ok(self
                .object
                .symbol_id(name.as_bytes())
                .unwrap_or_else(|| {
                    self.object.add_symbol(Symbol {
                        name: name.as_bytes().to_vec(),
                        value: 0,
                        size: 0,
                        kind: SymbolKind::Data,
                        scope: SymbolScope::Dynamic,
                        weak: false,
                        section: SymbolSection::Undefined,
                        flags: SymbolFlags::None,
                    })
                })),
        }
    }

    fn section_for(&mut self, global: &GlobalVariable, kind: SectionKind) -> SectionId {
        let isolate = self.target.format() == ContainerFormat::Coff && global.linkage.is_weak();
        let Some(name) = global.section.as_deref() else {
            return self.object.section_id(match kind {
                SectionKind::Data => StandardSection::Data,
                SectionKind::ReadOnlyDataWithRel => StandardSection::ReadOnlyDataWithRel,
                _ => StandardSection::ReadOnlyData,
            });
        };
        let segment = self.object.segment_name(StandardSegment::Data).to_vec();
        if isolate {
            // Each COFF weak definition needs a section of its own for its COMDAT.
            return self
                .object
                .add_section(segment, name.as_bytes().to_vec(), kind);
        }
        if let Some(placed) = self.sections.get(name) {
            return placed.id;
        }
        let id = self
            .object
            .add_section(segment, name.as_bytes().to_vec(), kind);
        self.sections.insert(
            name.to_string(),
            PlacedSection {
                id,
                relocatable: false,
                retained: false,
            },
        );
        id
    }

    fn lower(&self, initializer: Initializer) -> Result<(Vec<u8>, Vec<(u64, SymbolRef)>)> {
        Ok(match initializer {
            Initializer::Bytes(bytes) => (bytes, Vec::new()),
            Initializer::Zeroed(size) => {
                // Section data is held in memory, so the size must fit an allocation.
                let len = isize::try_from(size)
                    .ok()
                    .and_then(|len| usize::try_from(len).ok())
                    .ok_or_else(|| {
                        Error::codegen(format!("zero initializer of {size} bytes is too large"))
                    })?;
                (vec![0; len], Vec::new())
            }
            Initializer::Entry(entry) => {
                let layout = self.layout;
                let mut relocations = vec![(layout.address(), entry.address.clone())];
                relocations.push((layout.name(), entry.name.clone()));
                if let Some(aux) = entry.aux_address.clone() {
                    relocations.push((layout.aux_address(), aux));
                }
                // Pointer slots stay zero; the relocations fill them in.
                let placeholder: OffloadEntry<u64> = entry.map_pointers(|_| 0);
                (
                    placeholder.encode(layout, self.target.endianness()),
                    relocations,
                )
            }
        })
    }
}

impl ModuleBuilder for ObjectModule {
    fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    fn add_global(&mut self, global: GlobalVariable) -> GlobalId {
        let id = GlobalId::new(self.symbols.len());
        let scope = match (global.linkage, global.visibility) {
            (Linkage::Internal, _) => SymbolScope::Compilation,
            (_, Visibility::Hidden) => SymbolScope::Linkage,
            (_, Visibility::Default) => SymbolScope::Dynamic,
        };
        let coff_comdat =
            self.target.format() == ContainerFormat::Coff && global.linkage.is_weak();

        let Some(initializer) = global.initializer.clone() else {
            let symbol = self.object.add_symbol(Symbol {
                name: global.name.into_bytes(),
                value: 0,
                size: 0,
                kind: SymbolKind::Data,
                scope,
                weak: global.linkage.is_weak(),
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
            self.symbols.push((symbol, None));
            return id;
        };

        let kind = match (&initializer, global.constant) {
            (Initializer::Entry(_), _) => SectionKind::ReadOnlyDataWithRel,
            (_, true) => SectionKind::ReadOnlyData,
            (_, false) => SectionKind::Data,
        };
        let (bytes, relocations) = match self.lower(initializer) {
            Ok(lowered) => lowered,
            Err(err) => {
                if self.deferred.is_none() {
                    self.deferred = Some(err);
                }
                (Vec::new(), Vec::new())
            }
        };
        let section = self.section_for(&global, kind);
        let offset = self
            .object
            .append_section_data(section, &bytes, global.align.max(1));
        let symbol = self.object.add_symbol(Symbol {
            name: global.name.into_bytes(),
            value: offset,
            size: bytes.len() as u64,
            kind: SymbolKind::Data,
            scope,
            weak: global.linkage.is_weak() && !coff_comdat,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
        if coff_comdat {
            // The COFF writer needs the section symbol of every COMDAT section.
            self.object.section_symbol(section);
            self.object.add_comdat(Comdat {
                kind: ComdatKind::Any,
                symbol,
                sections: vec![section],
            });
        }

        if !relocations.is_empty() {
            if let Some(name) = global.section.as_deref() {
                if let Some(placed) = self.sections.get_mut(name) {
                    placed.relocatable = true;
                }
            }
        }
        self.pending
            .extend(relocations.into_iter().map(|(field, target)| PendingRelocation {
                section,
                offset: offset + field,
                target,
            }));
        self.symbols.push((symbol, Some(section)));
        id
    }

    fn append_to_compiler_used(&mut self, global: GlobalId) {
        let Some((_, Some(section))) = self.symbols.get(global.index()).copied() else {
            return;
        };
        if let Some(placed) = self.sections.values_mut().find(|placed| placed.id == section) {
            placed.retained = true;
        }
    }
}
