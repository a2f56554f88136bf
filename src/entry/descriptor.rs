//! The `__tgt_offload_entry` record consumed by offload runtime loaders.

use object::{Endian, Endianness};

use crate::error::{Error, Result};
use crate::target::{TargetDescriptor, TargetError};

/// Descriptor format revision written into every entry.
pub const OFFLOAD_ENTRY_VERSION: u16 = 1;

/// Alignment of entries inside their section; matches the offload binary container alignment.
pub const OFFLOAD_ENTRY_ALIGN: u64 = 8;

/// Offloading programming models recorded in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OffloadKind {
    None = 0,
    OpenMP = 1,
    Cuda = 2,
    Hip = 3,
    Sycl = 4,
}

impl OffloadKind {
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::OpenMP),
            2 => Some(Self::Cuda),
            3 => Some(Self::Hip),
            4 => Some(Self::Sycl),
            _ => None,
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "openmp" | "omp" => Some(Self::OpenMP),
            "cuda" => Some(Self::Cuda),
            "hip" => Some(Self::Hip),
            "sycl" => Some(Self::Sycl),
            _ => None,
        }
    }
}

impl From<OffloadKind> for u16 {
    fn from(kind: OffloadKind) -> Self {
        kind.as_u16()
    }
}

/// One offload entry. `P` is the pointer representation: a symbol reference while a module is
/// being built, or a raw address once the record has been read back from bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadEntry<P> {
    pub reserved: u64,
    pub version: u16,
    pub kind: u16,
    pub flags: u32,
    pub address: P,
    pub name: P,
    pub size: u64,
    pub data: u64,
    pub aux_address: Option<P>,
}

impl<P> OffloadEntry<P> {
    #[must_use]
    pub fn map_pointers<Q>(self, mut map: impl FnMut(P) -> Q) -> OffloadEntry<Q> {
        OffloadEntry {
            reserved: self.reserved,
            version: self.version,
            kind: self.kind,
            flags: self.flags,
            address: map(self.address),
            name: map(self.name),
            size: self.size,
            data: self.data,
            aux_address: self.aux_address.map(map),
        }
    }
}

/// Field offsets of an entry for a given pointer width, with natural alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLayout {
    pointer_width: u8,
}

impl EntryLayout {
    pub const RESERVED: u64 = 0;
    pub const VERSION: u64 = 8;
    pub const KIND: u64 = 10;
    pub const FLAGS: u64 = 12;

    /// Layout for 4- or 8-byte pointers.
    #[must_use]
    pub fn new(pointer_width: u8) -> Option<Self> {
        matches!(pointer_width, 4 | 8).then_some(Self { pointer_width })
    }

    /// Layout for the pointer width of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::UnsupportedArch`] for pointer widths other than 4 or 8 bytes.
    pub fn for_target(target: &TargetDescriptor) -> Result<Self> {
        Self::new(target.pointer_width()).ok_or_else(|| {
            Error::Target(TargetError::UnsupportedArch(format!(
                "{} ({}-byte pointers)",
                target.triple(),
                target.pointer_width()
            )))
        })
    }

    #[must_use]
    pub fn pointer_width(self) -> u8 {
        self.pointer_width
    }

    fn pointer_bytes(self) -> u64 {
        u64::from(self.pointer_width)
    }

    #[must_use]
    pub fn address(self) -> u64 {
        16
    }

    #[must_use]
    pub fn name(self) -> u64 {
        self.address() + self.pointer_bytes()
    }

    #[must_use]
    pub fn size_field(self) -> u64 {
        align_to(self.name() + self.pointer_bytes(), 8)
    }

    #[must_use]
    pub fn data(self) -> u64 {
        self.size_field() + 8
    }

    #[must_use]
    pub fn aux_address(self) -> u64 {
        self.data() + 8
    }

    /// Total record size, padded to the 8-byte struct alignment.
    #[must_use]
    pub fn size(self) -> u64 {
        align_to(self.aux_address() + self.pointer_bytes(), 8)
    }
}

fn align_to(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

impl OffloadEntry<u64> {
    /// Encode the record with resolved addresses. A missing aux pointer is written as zero.
    #[must_use]
    pub fn encode(&self, layout: EntryLayout, endian: Endianness) -> Vec<u8> {
        let mut bytes = vec![0u8; to_usize(layout.size())];
        put(&mut bytes, EntryLayout::RESERVED, &endian.write_u64_bytes(self.reserved));
        put(&mut bytes, EntryLayout::VERSION, &endian.write_u16_bytes(self.version));
        put(&mut bytes, EntryLayout::KIND, &endian.write_u16_bytes(self.kind));
        put(&mut bytes, EntryLayout::FLAGS, &endian.write_u32_bytes(self.flags));
        put_pointer(&mut bytes, layout, layout.address(), self.address, endian);
        put_pointer(&mut bytes, layout, layout.name(), self.name, endian);
        put(&mut bytes, layout.size_field(), &endian.write_u64_bytes(self.size));
        put(&mut bytes, layout.data(), &endian.write_u64_bytes(self.data));
        put_pointer(
            &mut bytes,
            layout,
            layout.aux_address(),
            self.aux_address.unwrap_or(0),
            endian,
        );
        bytes
    }

    /// Decode a single record from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedObject`] when `bytes` is shorter than one record.
    pub fn decode(bytes: &[u8], layout: EntryLayout, endian: Endianness) -> Result<Self> {
        if (bytes.len() as u64) < layout.size() {
            return Err(Error::malformed(format!(
                "offload entry needs {} bytes, found {}",
                layout.size(),
                bytes.len()
            )));
        }
        let aux_address = read_pointer(bytes, layout, layout.aux_address(), endian);
        Ok(Self {
            reserved: endian.read_u64_bytes(array(bytes, EntryLayout::RESERVED)),
            version: endian.read_u16_bytes(array(bytes, EntryLayout::VERSION)),
            kind: endian.read_u16_bytes(array(bytes, EntryLayout::KIND)),
            flags: endian.read_u32_bytes(array(bytes, EntryLayout::FLAGS)),
            address: read_pointer(bytes, layout, layout.address(), endian),
            name: read_pointer(bytes, layout, layout.name(), endian),
            size: endian.read_u64_bytes(array(bytes, layout.size_field())),
            data: endian.read_u64_bytes(array(bytes, layout.data())),
            aux_address: (aux_address != 0).then_some(aux_address),
        })
    }
}

/// Split a section's contents into consecutive entries.
///
/// # Errors
///
/// Returns [`Error::MalformedObject`] when the data is not a whole number of records.
pub fn decode_entry_table(
    bytes: &[u8],
    layout: EntryLayout,
    endian: Endianness,
) -> Result<Vec<OffloadEntry<u64>>> {
    let stride = to_usize(layout.size());
    if bytes.len() % stride != 0 {
        return Err(Error::malformed(format!(
            "entry table of {} bytes is not a multiple of the {stride}-byte entry size",
            bytes.len()
        )));
    }
    bytes
        .chunks_exact(stride)
        .map(|chunk| OffloadEntry::decode(chunk, layout, endian))
        .collect()
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn put(bytes: &mut [u8], offset: u64, value: &[u8]) {
    let start = to_usize(offset);
    bytes[start..start + value.len()].copy_from_slice(value);
}

fn put_pointer(bytes: &mut [u8], layout: EntryLayout, offset: u64, value: u64, endian: Endianness) {
    if layout.pointer_width == 8 {
        put(bytes, offset, &endian.write_u64_bytes(value));
    } else {
        // 32-bit targets keep the low half.
        let low = u32::try_from(value & 0xffff_ffff).unwrap_or(u32::MAX);
        put(bytes, offset, &endian.write_u32_bytes(low));
    }
}

fn array<const N: usize>(bytes: &[u8], offset: u64) -> [u8; N] {
    let start = to_usize(offset);
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[start..start + N]);
    out
}

fn read_pointer(bytes: &[u8], layout: EntryLayout, offset: u64, endian: Endianness) -> u64 {
    if layout.pointer_width == 8 {
        endian.read_u64_bytes(array(bytes, offset))
    } else {
        u64::from(endian.read_u32_bytes(array(bytes, offset)))
    }
}
