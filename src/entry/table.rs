//! Offload entry construction and the linker-bounded entry table.

use tracing::debug;

use super::descriptor::{OFFLOAD_ENTRY_ALIGN, OFFLOAD_ENTRY_VERSION, OffloadEntry};
use super::module::{
    GlobalId, GlobalVariable, Initializer, Linkage, ModuleBuilder, SymbolRef, Visibility,
};

/// Section that collects offload entries unless the caller names another one.
pub const DEFAULT_ENTRY_SECTION: &str = "llvm_offload_entries";

/// Section holding the NUL-terminated entry names.
pub const ENTRY_NAME_SECTION: &str = ".llvm.rodata.offloading";

/// Caller-supplied contents of one entry. `size`, `flags`, and `data` are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySpec {
    pub kind: u16,
    pub address: SymbolRef,
    pub name: String,
    pub size: u64,
    pub flags: u32,
    pub data: u64,
    pub aux_address: Option<SymbolRef>,
}

impl EntrySpec {
    #[must_use]
    pub fn new(kind: impl Into<u16>, address: SymbolRef, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address,
            name: name.into(),
            size: 0,
            flags: 0,
            data: 0,
            aux_address: None,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: u64) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_aux_address(mut self, aux_address: SymbolRef) -> Self {
        self.aux_address = Some(aux_address);
        self
    }
}

/// A descriptor ready to be placed, plus the name blob it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInitializer {
    pub name: String,
    pub entry: OffloadEntry<SymbolRef>,
    pub name_blob: GlobalId,
}

/// Begin/end markers of an entry table, plus the ELF section anchor when one was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRange {
    pub begin: GlobalId,
    pub end: GlobalId,
    pub dummy: Option<GlobalId>,
}

/// Create the name blob for `spec` and return the descriptor that references it.
pub fn make_entry_descriptor<M>(module: &mut M, spec: EntrySpec) -> EntryInitializer
where
    M: ModuleBuilder + ?Sized,
{
    let blob_name = if module.target().uses_dollar_symbols() {
        "$offloading$entry_name"
    } else {
        ".offloading.entry_name"
    };
    let mut bytes = Vec::with_capacity(spec.name.len() + 1);
    bytes.extend_from_slice(spec.name.as_bytes());
    bytes.push(0);

    let name_blob = module.add_global(
        GlobalVariable::new(blob_name, Linkage::Internal)
            .with_initializer(Initializer::Bytes(bytes))
            .with_section(ENTRY_NAME_SECTION)
            .with_align(1)
            .with_unnamed_addr(),
    );

    let entry = OffloadEntry {
        reserved: 0,
        version: OFFLOAD_ENTRY_VERSION,
        kind: spec.kind,
        flags: spec.flags,
        address: spec.address,
        name: SymbolRef::Global(name_blob),
        size: spec.size,
        data: spec.data,
        aux_address: spec.aux_address,
    };
    EntryInitializer {
        name: spec.name,
        entry,
        name_blob,
    }
}

/// Place a descriptor in `section` as a weak, read-only global.
pub fn emit_entry<M>(module: &mut M, initializer: EntryInitializer, section: &str) -> GlobalId
where
    M: ModuleBuilder + ?Sized,
{
    let target = module.target();
    let prefix = if target.uses_dollar_symbols() {
        "$offloading$entry$"
    } else {
        ".offloading.entry."
    };
    let placed_in = target.format().entry_section(section);
    let symbol = format!("{prefix}{}", initializer.name);
    debug!(
        target: "offload.entries",
        symbol = %symbol,
        section = %placed_in,
        kind = initializer.entry.kind,
        "emitting offload entry"
    );

    module.add_global(
        GlobalVariable::new(symbol, Linkage::Weak)
            .with_initializer(Initializer::Entry(initializer.entry))
            .with_section(placed_in)
            .with_align(OFFLOAD_ENTRY_ALIGN),
    )
}

/// [`make_entry_descriptor`] followed by [`emit_entry`].
pub fn emit_offloading_entry<M>(module: &mut M, spec: EntrySpec, section: &str) -> GlobalId
where
    M: ModuleBuilder + ?Sized,
{
    let initializer = make_entry_descriptor(module, spec);
    emit_entry(module, initializer, section)
}

/// Declare the `__start_<section>` / `__stop_<section>` markers bounding the entry table.
pub fn declare_entry_range<M>(module: &mut M, section: &str) -> EntryRange
where
    M: ModuleBuilder + ?Sized,
{
    let format = module.target().format();
    let begin_name = format!("__start_{section}");
    let end_name = format!("__stop_{section}");

    let (begin, end) = match format.range_sections(section) {
        // The linker defines the markers from the section bounds.
        None => (
            GlobalVariable::new(begin_name, Linkage::External),
            GlobalVariable::new(end_name, Linkage::External),
        ),
        Some((begin_section, end_section)) => (
            GlobalVariable::new(begin_name, Linkage::WeakOdr)
                .with_initializer(Initializer::Zeroed(0))
                .with_section(begin_section),
            GlobalVariable::new(end_name, Linkage::WeakOdr)
                .with_initializer(Initializer::Zeroed(0))
                .with_section(end_section),
        ),
    };
    let begin = module.add_global(
        begin
            .with_visibility(Visibility::Hidden)
            .with_align(OFFLOAD_ENTRY_ALIGN),
    );
    let end = module.add_global(
        end.with_visibility(Visibility::Hidden)
            .with_align(OFFLOAD_ENTRY_ALIGN),
    );

    // Start/stop symbols are only synthesised for sections that exist, so an empty table still
    // needs one kept object in the section.
    let dummy = format.needs_section_anchor().then(|| {
        let dummy = module.add_global(
            GlobalVariable::new(format!("__dummy.{section}"), Linkage::Internal)
                .with_initializer(Initializer::Zeroed(0))
                .with_section(section)
                .with_align(OFFLOAD_ENTRY_ALIGN),
        );
        module.append_to_compiler_used(dummy);
        dummy
    });

    debug!(
        target: "offload.entries",
        section = %section,
        format = format.as_str(),
        anchored = dummy.is_some(),
        "declared entry table range"
    );
    EntryRange { begin, end, dummy }
}
