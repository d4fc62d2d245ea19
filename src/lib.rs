//! An in-memory model of a compiled program's debug and symbol
//! information.
//!
//! Three structures are built once from itemized text records and then
//! queried:
//!
//! - [`DebugInfoForest`]: the tree of compile units, declarations and
//!   types reconstructed from the flat, depth-tagged debug-info stream,
//!   with cross-references resolved per scope. Type-chain predicates
//!   answer what a declaration ultimately is (pointer, struct/union,
//!   enum, array).
//! - [`SymbolTable`]: the flat symbol list with name, exact-address and
//!   nearest-address lookups.
//! - [`SectionStore`]: byte-addressable section contents, materialized
//!   lazily, decoding fixed-width integers and NUL-terminated strings in
//!   the image's endianness.
//!
//! The crate never parses raw object-file bytes; the [`record`] module
//! defines the text shapes it consumes and who may produce them.

pub mod classify;
pub mod record;
pub mod section;
pub mod symtab;
pub mod tree;

pub use classify::ArrayElements;
pub use record::{
    info_records, parse_image_info, section_records, symbol_records,
    DebugRecord, ImageInfo, SectionRecord, SymbolRecord,
};
pub use section::{convert_to_signed, Section, SectionDataSource, SectionStore};
pub use symtab::{ArrayRef, BestMatch, Symbol, SymbolTable};
pub use tree::{
    AttrKind, AttrValue, DebugInfoForest, DebugObject, ObjectId, ObjectValue,
    Tag,
};

/// Everything that can go fatally wrong.
///
/// Lookup misses are not errors anywhere in this crate; they come back as
/// absent values and are normal control flow for callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The debug-info stream does not honor the record contract. Aborts
    /// forest construction.
    #[error("debug-info stream is malformed: {0}")]
    MalformedStream(String),

    /// A section's content records are discontiguous. Fatal to that
    /// section's materialization.
    #[error("gap in the contents of section {section} at {address:#x}")]
    SectionGap { section: String, address: u64 },

    /// A value does not fit the width it claims. Fatal to the single
    /// conversion, nothing else.
    #[error("{value} is out of range for a {size}-byte variable")]
    Range { value: u64, size: usize },

    /// A load or conversion width no single value can carry.
    #[error("cannot decode {0} bytes as a single value")]
    UnsupportedWidth(usize),

    /// The section-content source failed to produce text.
    #[error("reading section contents: {0}")]
    Source(#[from] std::io::Error),
}
