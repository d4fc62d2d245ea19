//! The symbol table and its address indices.
//!
//! Symbols arrive as a flat list of rows. Queries want three views of it:
//! by name, by exact address, and by nearest-lower address when a raw
//! pointer lands inside an object rather than on its first byte. All
//! three indices are built once and never change.

use std::collections::BTreeMap;

use crate::record::SymbolRecord;
use crate::section::SectionStore;
use crate::Error;

/// One symbol. Unnamed symbols are valid; they stay in the table but are
/// not reachable through the name or address indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: Option<String>,
    pub address: u64,
    pub size: u64,
    pub kind: String,
    pub binding: String,
    pub visibility: String,
    pub section_index: String,
}

/// Result of an address-to-symbol resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BestMatch<'a> {
    /// Address 0 never resolves; it is the null sentinel.
    Null,
    /// The address is below every symbol in the table.
    NotFound,
    Symbol(&'a Symbol),
}

/// A symbolic reference to an element of an array-shaped symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayRef {
    pub name: String,
    pub index: u64,
    /// Whether the address landed exactly on an element boundary. The
    /// index is best-effort when it did not.
    pub exact: bool,
}

/// The flat symbol list plus its indices. Built once, read-only.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    /// Name -> index. Names should be unique; on a duplicate the last row
    /// wins.
    by_name: BTreeMap<String, usize>,
    /// Address -> indices of the named symbols there, in insertion order.
    /// Key order doubles as the sorted address list for nearest-lower
    /// lookups.
    by_address: BTreeMap<u64, Vec<usize>>,
}

impl SymbolTable {
    pub fn from_records(
        records: impl IntoIterator<Item = SymbolRecord>,
    ) -> Self {
        let mut table = Self::default();
        for rec in records {
            let idx = table.symbols.len();
            if let Some(name) = &rec.name {
                table.by_name.insert(name.clone(), idx);
                table.by_address.entry(rec.address).or_default().push(idx);
            }
            table.symbols.push(Symbol {
                name: rec.name,
                address: rec.address,
                size: rec.size,
                kind: rec.kind,
                binding: rec.binding,
                visibility: rec.visibility,
                section_index: rec.section_index,
            });
        }
        table
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn symbol_by_name(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// All named symbols at exactly this address, in insertion order.
    pub fn symbols_at(&self, addr: u64) -> impl Iterator<Item = &Symbol> + '_ {
        self.by_address
            .get(&addr)
            .into_iter()
            .flat_map(move |v| v.iter().map(move |&i| &self.symbols[i]))
    }

    /// Resolves an address to a symbol, preferring names with the given
    /// prefix.
    ///
    /// Address 0 is the null sentinel and never consults the table. An
    /// address with no symbol of its own falls back to the nearest lower
    /// address that has one; among the symbols there, the first whose
    /// name starts with `prefix` wins, else the first symbol.
    pub fn best_match(&self, addr: u64, prefix: &str) -> BestMatch<'_> {
        if addr == 0 {
            return BestMatch::Null;
        }
        let indices = match self.by_address.get(&addr) {
            Some(v) => v,
            None => match self.by_address.range(..=addr).next_back() {
                Some((_, v)) => v,
                None => return BestMatch::NotFound,
            },
        };
        for &i in indices {
            let s = &self.symbols[i];
            if s.name.as_deref().is_some_and(|n| n.starts_with(prefix)) {
                return BestMatch::Symbol(s);
            }
        }
        BestMatch::Symbol(&self.symbols[indices[0]])
    }

    /// Resolves an address inside an array-shaped symbol to a name and
    /// element index.
    ///
    /// Address 0 reports the null sentinel by name. An address that does
    /// not land on an element boundary is reported on stderr but still
    /// answered, with `exact` false.
    pub fn array_reference(
        &self,
        addr: u64,
        prefix: &str,
        element_size: u64,
    ) -> Option<ArrayRef> {
        if addr == 0 {
            return Some(ArrayRef {
                name: "NULL".to_string(),
                index: 0,
                exact: false,
            });
        }
        if element_size == 0 {
            return None;
        }
        let sym = match self.best_match(addr, prefix) {
            BestMatch::Symbol(s) => s,
            _ => return None,
        };
        let name = sym.name.clone().unwrap_or_default();
        let delta = addr - sym.address;
        let index = delta / element_size;
        let exact = delta % element_size == 0;
        if !exact {
            eprintln!(
                "WARN: address {:#x} is not on an element boundary of {}",
                addr, name
            );
        }
        Some(ArrayRef { name, index, exact })
    }

    /// Reads the value stored for a named symbol: `size` bytes at its
    /// address, decoded by the section store.
    pub fn read_variable_value(
        &self,
        name: &str,
        sections: &SectionStore,
    ) -> Result<Option<u64>, Error> {
        let Some(sym) = self.symbol_by_name(name) else {
            return Ok(None);
        };
        sections.load(sym.address, sym.size as usize)
    }

    /// `read_variable_value`, reinterpreted as signed.
    pub fn read_signed_variable_value(
        &self,
        name: &str,
        sections: &SectionStore,
    ) -> Result<Option<i64>, Error> {
        let Some(sym) = self.symbol_by_name(name) else {
            return Ok(None);
        };
        sections.load_signed(sym.address, sym.size as usize)
    }
}
