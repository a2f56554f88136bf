//! The module-builder capability the entry table is emitted through.
//!
//! A builder owns the module-wide symbol table: it creates global data items with a linkage,
//! visibility, section, alignment, and optional initializer. Entry-table construction only
//! describes globals; how they become bytes is the builder's concern.

use crate::target::TargetDescriptor;

use super::descriptor::OffloadEntry;

/// Handle to a global created by a [`ModuleBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(usize);

impl GlobalId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Visible to the linker; definition optional.
    External,
    /// Local to the object.
    Internal,
    /// Duplicate definitions collapse to one copy.
    Weak,
    /// Like `Weak`, with the promise that all copies are identical.
    WeakOdr,
}

impl Linkage {
    #[must_use]
    pub fn is_weak(self) -> bool {
        matches!(self, Linkage::Weak | Linkage::WeakOdr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Default,
    /// Never exported from the linked artifact.
    Hidden,
}

/// Target of a pointer-valued field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolRef {
    Global(GlobalId),
    /// A symbol defined elsewhere, referenced by name.
    External(String),
}

impl From<GlobalId> for SymbolRef {
    fn from(id: GlobalId) -> Self {
        SymbolRef::Global(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initializer {
    Bytes(Vec<u8>),
    /// `size` zero bytes; zero-length arrays use `Zeroed(0)`.
    Zeroed(u64),
    Entry(OffloadEntry<SymbolRef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: String,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub constant: bool,
    pub unnamed_addr: bool,
    pub section: Option<String>,
    pub align: u64,
    /// `None` declares the global without defining it.
    pub initializer: Option<Initializer>,
}

impl GlobalVariable {
    #[must_use]
    pub fn new(name: impl Into<String>, linkage: Linkage) -> Self {
        Self {
            name: name.into(),
            linkage,
            visibility: Visibility::Default,
            constant: true,
            unnamed_addr: false,
            section: None,
            align: 1,
            initializer: None,
        }
    }

    #[must_use]
    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    #[must_use]
    pub fn with_align(mut self, align: u64) -> Self {
        self.align = align;
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    #[must_use]
    pub fn with_unnamed_addr(mut self) -> Self {
        self.unnamed_addr = true;
        self
    }
}

/// Module-wide global-variable factory.
pub trait ModuleBuilder {
    fn target(&self) -> &TargetDescriptor;

    fn add_global(&mut self, global: GlobalVariable) -> GlobalId;

    /// Keep `global` alive through compiler and linker dead-stripping.
    fn append_to_compiler_used(&mut self, global: GlobalId);
}
