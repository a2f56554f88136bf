//! Offload entry tables: fixed-layout descriptors collected into a linker-bounded section.

mod descriptor;
mod module;
mod object_module;
mod table;

pub use descriptor::{
    EntryLayout, OFFLOAD_ENTRY_ALIGN, OFFLOAD_ENTRY_VERSION, OffloadEntry, OffloadKind,
    decode_entry_table,
};
pub use module::{
    GlobalId, GlobalVariable, Initializer, Linkage, ModuleBuilder, SymbolRef, Visibility,
};
pub use object_module::ObjectModule;
pub use table::{
    DEFAULT_ENTRY_SECTION, ENTRY_NAME_SECTION, EntryInitializer, EntryRange, EntrySpec,
    declare_entry_range, emit_entry, emit_offloading_entry, make_entry_descriptor,
};
