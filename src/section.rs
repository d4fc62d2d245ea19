//! Section contents: byte-range-addressable, lazily materialized.
//!
//! A section's bytes are not read until something asks for them; after
//! that the buffer is immutable. The store dispatches an address to the
//! owning section through a span index, so a load either lands in exactly
//! one section or answers "not found".

use once_cell::unsync::OnceCell;
use rangemap::RangeMap;

use crate::record::{parse_dump_line, SectionRecord};
use crate::Error;

/// Where section content comes from.
///
/// The store pulls the hex-dump text for a section through this interface
/// exactly once, on first access. The bundled `symsh` binary implements it
/// by shelling out to `readelf -x`; tests implement it with a map.
pub trait SectionDataSource {
    fn section_dump(&self, name: &str) -> std::io::Result<String>;
}

/// Materialized state of a section's bytes. The enclosing `OnceCell`
/// supplies the third state, "not loaded yet".
#[derive(Clone, Debug)]
enum SectionData {
    /// The dump produced no bytes; the section has no loadable content.
    Empty,
    Bytes(Vec<u8>),
}

/// One section of the program image.
#[derive(Debug)]
pub struct Section {
    pub name: String,
    pub base_address: u64,
    pub size: u64,
    data: OnceCell<SectionData>,
}

impl Section {
    fn new(rec: &SectionRecord) -> Self {
        Self {
            name: rec.name.clone(),
            base_address: rec.base_address,
            size: rec.size,
            data: OnceCell::new(),
        }
    }

    /// The section's bytes, materializing them on first access.
    /// `Ok(None)` means the section has no content.
    fn bytes(
        &self,
        source: &dyn SectionDataSource,
    ) -> Result<Option<&[u8]>, Error> {
        let data = self.data.get_or_try_init(|| self.materialize(source))?;
        match data {
            SectionData::Empty => Ok(None),
            SectionData::Bytes(b) => Ok(Some(b)),
        }
    }

    /// Reads the hex dump into a byte buffer. The dump must be contiguous
    /// from the section base; a discontinuity is fatal.
    fn materialize(
        &self,
        source: &dyn SectionDataSource,
    ) -> Result<SectionData, Error> {
        let text = source.section_dump(&self.name)?;
        let mut bytes: Vec<u8> = Vec::new();
        for line in text.lines() {
            let Some((addr, chunk)) = parse_dump_line(line) else {
                continue;
            };
            if addr.checked_sub(self.base_address) != Some(bytes.len() as u64) {
                return Err(Error::SectionGap {
                    section: self.name.clone(),
                    address: self.base_address + bytes.len() as u64,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Ok(SectionData::Empty);
        }
        if bytes.len() as u64 != self.size {
            eprintln!(
                "WARN: section {}: dump length {:#x} differs from declared size {:#x}",
                self.name,
                bytes.len(),
                self.size
            );
        }
        Ok(SectionData::Bytes(bytes))
    }
}

/// All sections of the image, plus the endianness they share.
///
/// Sections without a load address cannot be reached by address queries.
pub struct SectionStore {
    sections: Vec<Section>,
    /// Address span -> index into `sections`. Where declared spans
    /// overlap, the earlier section wins.
    spans: RangeMap<u64, usize>,
    little_endian: bool,
    source: Box<dyn SectionDataSource>,
}

impl SectionStore {
    pub fn new(
        records: impl IntoIterator<Item = SectionRecord>,
        little_endian: bool,
        source: Box<dyn SectionDataSource>,
    ) -> Self {
        let sections: Vec<Section> =
            records.into_iter().map(|r| Section::new(&r)).collect();
        let mut spans = RangeMap::new();
        for (i, s) in sections.iter().enumerate().rev() {
            if s.base_address > 0 && s.size > 0 {
                spans.insert(s.base_address..s.base_address + s.size, i);
            }
        }
        Self {
            sections,
            spans,
            little_endian,
            source,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The section owning `[addr, addr + n)`, or `None` if no section
    /// contains the whole range.
    fn owner(&self, addr: u64, n: u64) -> Option<&Section> {
        let &i = self.spans.get(&addr)?;
        let s = &self.sections[i];
        if addr + n > s.base_address + s.size {
            return None;
        }
        Some(s)
    }

    /// Loads `n` bytes at `addr` and decodes them as an unsigned integer
    /// in the store's endianness. `Ok(None)` if no section holds the
    /// range or the owning section has no content there.
    pub fn load(&self, addr: u64, n: usize) -> Result<Option<u64>, Error> {
        if n == 0 || n > 8 {
            return Err(Error::UnsupportedWidth(n));
        }
        let Some(section) = self.owner(addr, n as u64) else {
            return Ok(None);
        };
        let Some(bytes) = section.bytes(&*self.source)? else {
            return Ok(None);
        };
        let offset = (addr - section.base_address) as usize;
        let Some(chunk) = bytes.get(offset..offset + n) else {
            return Ok(None);
        };
        let mut value = 0u64;
        if self.little_endian {
            for &b in chunk.iter().rev() {
                value = (value << 8) | u64::from(b);
            }
        } else {
            for &b in chunk {
                value = (value << 8) | u64::from(b);
            }
        }
        Ok(Some(value))
    }

    /// `load`, reinterpreted as a signed integer of the same width.
    pub fn load_signed(&self, addr: u64, n: usize) -> Result<Option<i64>, Error> {
        match self.load(addr, n)? {
            Some(v) => Ok(Some(convert_to_signed(v, n)?)),
            None => Ok(None),
        }
    }

    /// Loads a NUL-terminated string starting at `addr`, reading at most
    /// `max_len` bytes and never past the end of the owning section.
    pub fn load_string(
        &self,
        addr: u64,
        max_len: usize,
    ) -> Result<Option<String>, Error> {
        let Some(&i) = self.spans.get(&addr) else {
            return Ok(None);
        };
        let section = &self.sections[i];
        let Some(bytes) = section.bytes(&*self.source)? else {
            return Ok(None);
        };
        let offset = (addr - section.base_address) as usize;
        if offset >= bytes.len() {
            return Ok(None);
        }
        let limit = max_len.min(bytes.len() - offset);
        let text: Vec<u8> = bytes[offset..offset + limit]
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .collect();
        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }
}

/// Reinterprets an unsigned value as a two's-complement signed integer of
/// exactly `size` bytes.
///
/// A value that does not fit in `size` bytes is an error rather than
/// silently aliasing into range.
pub fn convert_to_signed(value: u64, size: usize) -> Result<i64, Error> {
    if size == 0 || size > 8 {
        return Err(Error::UnsupportedWidth(size));
    }
    if size == 8 {
        return Ok(value as i64);
    }
    let limit = 1u64 << (size * 8);
    if value >= limit {
        return Err(Error::Range { value, size });
    }
    if value < limit / 2 {
        Ok(value as i64)
    } else {
        Ok(value as i64 - limit as i64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    /// Dump text per section name; anything absent dumps empty.
    struct MapSource(HashMap<String, String>);

    impl SectionDataSource for MapSource {
        fn section_dump(&self, name: &str) -> std::io::Result<String> {
            Ok(self.0.get(name).cloned().unwrap_or_default())
        }
    }

    fn section(name: &str, base: u64, size: u64) -> SectionRecord {
        SectionRecord {
            index: 0,
            name: name.to_string(),
            kind: "PROGBITS".to_string(),
            base_address: base,
            offset: 0,
            size,
            entry_size: 0,
            flags: "WA".to_string(),
            link: "0".to_string(),
            info: "0".to_string(),
            alignment: "8".to_string(),
        }
    }

    fn store(little_endian: bool) -> SectionStore {
        let mut dumps = HashMap::new();
        dumps.insert(
            ".data".to_string(),
            "Hex dump of section '.data':\n  0x00601000 34120000 68656c6c 6f000000 ffffffff  4...hello.......\n".to_string(),
        );
        SectionStore::new(
            vec![section(".data", 0x601000, 16), section(".bss", 0x602000, 8)],
            little_endian,
            Box::new(MapSource(dumps)),
        )
    }

    #[test]
    fn endianness() {
        let s = store(true);
        assert_eq!(s.load(0x601000, 2).unwrap(), Some(0x1234));
        let s = store(false);
        assert_eq!(s.load(0x601000, 2).unwrap(), Some(0x3412));
    }

    #[test]
    fn out_of_range_loads() {
        let s = store(true);
        // Below, above, and straddling the end of the section.
        assert_eq!(s.load(0x5fffff, 1).unwrap(), None);
        assert_eq!(s.load(0x700000, 4).unwrap(), None);
        assert_eq!(s.load(0x60100e, 4).unwrap(), None);
        // A section that dumps no bytes has no content.
        assert_eq!(s.load(0x602000, 4).unwrap(), None);
        // Widths a u64 cannot hold are refused outright.
        assert!(matches!(
            s.load(0x601000, 9),
            Err(Error::UnsupportedWidth(9))
        ));
    }

    #[test]
    fn signed_loads() {
        let s = store(true);
        assert_eq!(s.load_signed(0x60100c, 4).unwrap(), Some(-1));
        assert_eq!(s.load_signed(0x601000, 2).unwrap(), Some(0x1234));
    }

    #[test]
    fn strings_stop_at_nul_and_section_end() {
        let s = store(true);
        assert_eq!(
            s.load_string(0x601004, 100).unwrap(),
            Some("hello".to_string())
        );
        // max_len cuts the scan short.
        assert_eq!(
            s.load_string(0x601004, 3).unwrap(),
            Some("hel".to_string())
        );
        // The scan never leaves the section: the trailing 0xff run has no
        // NUL before the boundary.
        assert_eq!(
            s.load_string(0x60100c, 100).unwrap(),
            Some("\u{fffd}\u{fffd}\u{fffd}\u{fffd}".to_string())
        );
        assert_eq!(s.load_string(0x700000, 8).unwrap(), None);
    }

    #[test]
    fn gap_in_dump_is_fatal() {
        let mut dumps = HashMap::new();
        dumps.insert(
            ".data".to_string(),
            "  0x00601000 34120000                             4...\n  0x00601010 ffffffff                             ....\n"
                .to_string(),
        );
        let s = SectionStore::new(
            vec![section(".data", 0x601000, 32)],
            true,
            Box::new(MapSource(dumps)),
        );
        assert!(matches!(
            s.load(0x601000, 2),
            Err(Error::SectionGap { .. })
        ));
    }

    #[test]
    fn signed_conversion_round_trips() {
        for (value, size, expected) in [
            (0, 1, 0),
            (127, 1, 127),
            (128, 1, -128),
            (255, 1, -1),
            (32767, 2, 32767),
            (32768, 2, -32768),
            (65535, 2, -1),
            (2147483647, 4, 2147483647),
            (2147483648, 4, -2147483648),
            (4294967295, 4, -1),
            (9223372036854775807, 8, i64::MAX),
            (9223372036854775808, 8, i64::MIN),
            (18446744073709551615, 8, -1),
        ] {
            assert_eq!(convert_to_signed(value, size).unwrap(), expected);
            // Round trip: reinterpreting the signed result unsigned at the
            // same width gives the original value.
            let back = (expected as u64) & (u64::MAX >> (64 - 8 * size));
            assert_eq!(back, value);
        }
    }

    #[test]
    fn signed_conversion_range_checks() {
        assert!(matches!(
            convert_to_signed(256, 1),
            Err(Error::Range { value: 256, size: 1 })
        ));
        assert!(matches!(
            convert_to_signed(65536, 2),
            Err(Error::Range { .. })
        ));
        assert!(matches!(
            convert_to_signed(4294967296, 4),
            Err(Error::Range { .. })
        ));
        assert!(matches!(
            convert_to_signed(1, 0),
            Err(Error::UnsupportedWidth(0))
        ));
    }
}
