//! Record source: line-oriented readers for the text streams this crate
//! consumes.
//!
//! The library never touches raw object-file bytes. Instead it is fed the
//! itemized text that `readelf` produces: debug-info tag/attribute lines,
//! symbol-table rows, section-table rows, section hex dumps, and the file
//! header summary. This module turns each of those line shapes into a typed
//! record; everything downstream works on records only.
//!
//! Lines that don't match any known shape are reported on stderr and
//! skipped. That is a property of the source, not of the tree builder: a
//! noisy stream still yields a well-formed record sequence.

use once_cell::sync::Lazy;
use regex::Regex;

/// One record of the debug-info stream.
///
/// A tag-start record opens a node; the attribute records that immediately
/// follow it belong to that node. The end of the stream is simply the end
/// of the record iterator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugRecord {
    /// Start of a node: nesting depth, stream-local reference id, and the
    /// `DW_TAG_*` label. An `ident` of 0 means the node cannot be
    /// referenced.
    TagStart {
        level: u32,
        ident: u64,
        tag: String,
    },
    /// One attribute of the most recently started node: the `DW_AT_*` name
    /// and the raw value text.
    Attribute { name: String, value: String },
}

/// One row of the symbol table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolRecord {
    pub num: u64,
    pub address: u64,
    pub size: u64,
    pub kind: String,
    pub binding: String,
    pub visibility: String,
    pub section_index: String,
    pub name: Option<String>,
}

/// One row of the section table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionRecord {
    pub index: u64,
    pub name: String,
    pub kind: String,
    pub base_address: u64,
    pub offset: u64,
    pub size: u64,
    pub entry_size: u64,
    pub flags: String,
    pub link: String,
    pub info: String,
    pub alignment: String,
}

/// Word size, endianness and machine of the program image, taken from the
/// header summary. The endianness seeds the section store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub bits: u32,
    pub little_endian: bool,
    pub machine: String,
}

// Tag-start lines look like ` <1><2d>: Abbrev Number: 2 (DW_TAG_variable)`.
// Level and ident are hex.
static TAG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<([0-9A-Fa-f]+)><([0-9A-Fa-f]+)>.*\((DW_TAG_\w+)\)\s*$")
        .unwrap()
});

// Attribute lines look like `    <2e>   DW_AT_name        : x`. Some
// readelf versions print the attribute name with no space before the colon.
static ATTR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<[0-9A-Fa-f]+>\s+(DW_AT_\w+)\s*:\s*(.*?)\s*$").unwrap()
});

// Indirect strings carry a prefix that has to be peeled off the value:
// `(indirect string, offset: 0x1234): actual text`.
static INDIRECT_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(indirect string, offset: 0x[0-9A-Fa-f]+\):\s*").unwrap()
});

/// Parses one line of the debug-info stream.
///
/// Returns `None` for lines that are neither a tag start nor an attribute;
/// the caller decides whether that is noise to skip or a reason to stop.
pub fn parse_info_line(line: &str) -> Option<DebugRecord> {
    if let Some(c) = ATTR_LINE.captures(line) {
        let name = c[1].to_string();
        let value = INDIRECT_STRING.replace(&c[2], "").into_owned();
        return Some(DebugRecord::Attribute { name, value });
    }
    if let Some(c) = TAG_LINE.captures(line) {
        let level = u32::from_str_radix(&c[1], 16).ok()?;
        let ident = u64::from_str_radix(&c[2], 16).ok()?;
        return Some(DebugRecord::TagStart {
            level,
            ident,
            tag: c[3].to_string(),
        });
    }
    None
}

/// Adapts an iterator of text lines into an iterator of debug-info
/// records, reporting and skipping anything unrecognized.
pub fn info_records<'a, I>(lines: I) -> impl Iterator<Item = DebugRecord> + 'a
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: 'a,
{
    lines.into_iter().filter_map(|line| {
        if line.trim().is_empty() {
            return None;
        }
        let rec = parse_info_line(line);
        if rec.is_none() {
            eprintln!("WARN: unrecognized debug-info line: {}", line);
        }
        rec
    })
}

/// Parses one row of the symbol table.
///
/// Header lines (`Symbol table …`, `Num: …`) and blank lines yield `None`
/// silently; they are part of the format, not noise.
pub fn parse_symbol_line(line: &str) -> Option<SymbolRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() || fields[0] == "Symbol" || fields[0] == "Num:" {
        return None;
    }
    if fields.len() < 7 {
        return None;
    }
    let num = fields[0].trim_end_matches(':').parse().ok()?;
    let address = u64::from_str_radix(fields[1], 16).ok()?;
    let size = parse_symbol_size(fields[2])?;
    Some(SymbolRecord {
        num,
        address,
        size,
        kind: fields[3].to_string(),
        binding: fields[4].to_string(),
        visibility: fields[5].to_string(),
        section_index: fields[6].to_string(),
        name: fields.get(7).map(|s| s.to_string()),
    })
}

// Sizes are decimal, except that very large ones are printed with an 0x
// prefix.
fn parse_symbol_size(field: &str) -> Option<u64> {
    if let Some(hex) = field.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        field.parse().ok()
    }
}

/// Reads symbol rows out of a block of symbol-table text, reporting and
/// skipping unrecognized lines.
pub fn symbol_records<'a, I>(
    lines: I,
) -> impl Iterator<Item = SymbolRecord> + 'a
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: 'a,
{
    lines.into_iter().filter_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() || fields[0] == "Symbol" || fields[0] == "Num:" {
            return None;
        }
        let rec = parse_symbol_line(line);
        if rec.is_none() {
            eprintln!("WARN: unrecognized symbol row: {}", line);
        }
        rec
    })
}

// Section rows are bracket-indexed: `  [ 3] .data PROGBITS 0060... ...`.
static SECTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(\d+)\]\s*(.*)$").unwrap());

/// Parses one row of the section table.
///
/// The null section has no name, and sections without flags print nothing
/// in the flags column; both cases are normalized to empty strings, the
/// same way the row widths imply.
pub fn parse_section_line(line: &str) -> Option<SectionRecord> {
    let c = SECTION_LINE.captures(line)?;
    let index: u64 = c[1].parse().ok()?;
    let mut fields: Vec<String> =
        c[2].split_whitespace().map(|s| s.to_string()).collect();
    if fields.len() == 8 && fields[0] == "NULL" {
        // The null section prints no name at all.
        fields.insert(0, String::new());
    }
    if fields.len() == 9 {
        // No flags set, nothing printed in the flags column.
        fields.insert(6, String::new());
    }
    if fields.len() != 10 {
        return None;
    }
    Some(SectionRecord {
        index,
        name: fields[0].clone(),
        kind: fields[1].clone(),
        base_address: u64::from_str_radix(&fields[2], 16).ok()?,
        offset: u64::from_str_radix(&fields[3], 16).ok()?,
        size: u64::from_str_radix(&fields[4], 16).ok()?,
        entry_size: u64::from_str_radix(&fields[5], 16).ok()?,
        flags: fields[6].clone(),
        link: fields[7].clone(),
        info: fields[8].clone(),
        alignment: fields[9].clone(),
    })
}

/// Reads section rows out of a block of section-table text. Lines without
/// a bracketed index (headers, the key legend) are skipped silently; a
/// bracket-indexed line that fails to parse is reported.
pub fn section_records<'a, I>(
    lines: I,
) -> impl Iterator<Item = SectionRecord> + 'a
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: 'a,
{
    lines.into_iter().filter_map(|line| {
        SECTION_LINE.captures(line)?;
        let rec = parse_section_line(line);
        if rec.is_none() {
            eprintln!("WARN: unrecognized section row: {}", line);
        }
        rec
    })
}

/// One line of a section hex dump: the address and the bytes it carries.
///
/// The dump prints bytes in address order in groups of up to four,
/// followed by an ASCII rendering. The data block has a fixed width, so we
/// take that window and read hex pairs out of it; a trailing half-byte is
/// ignored, and the first non-hex character ends the data.
pub fn parse_dump_line(line: &str) -> Option<(u64, Vec<u8>)> {
    let pos = line.find("0x")?;
    let line = &line[pos..];
    let pos = line.find(' ')?;
    let addr = u64::from_str_radix(&line[2..pos], 16).ok()?;
    // The data block, including its internal spaces, is at most 37
    // characters wide.
    let block: String = line[pos..]
        .chars()
        .take(37)
        .filter(|c| !c.is_whitespace())
        .collect();
    let mut bytes = Vec::new();
    for pair in block.as_bytes().chunks_exact(2) {
        let pair = std::str::from_utf8(pair).ok()?;
        match u8::from_str_radix(pair, 16) {
            Ok(b) => bytes.push(b),
            Err(_) => break,
        }
    }
    Some((addr, bytes))
}

/// Extracts word size, endianness and machine from the header summary.
///
/// Fails if the class line is missing or names neither a 64- nor a 32-bit
/// image, since nothing downstream can interpret addresses without it.
pub fn parse_image_info(text: &str) -> Result<ImageInfo, crate::Error> {
    let mut class = None;
    let mut little_endian = true;
    let mut machine = String::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.first() {
            Some(&"Class:") => class = fields.get(1).map(|s| s.to_string()),
            Some(&"Data:") => {
                // `2's complement, little endian` / `... big endian`
                little_endian = !line.contains("big endian");
            }
            Some(&"Machine:") => {
                machine = fields.last().unwrap_or(&"").to_string();
            }
            _ => {}
        }
    }
    let bits = match class.as_deref() {
        Some("ELF64") => 64,
        Some("ELF32") => 32,
        other => {
            return Err(crate::Error::MalformedStream(format!(
                "image class {:?} is not recognized",
                other
            )))
        }
    };
    Ok(ImageInfo {
        bits,
        little_endian,
        machine,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_and_attr_lines() {
        let r = parse_info_line(
            " <1><2d>: Abbrev Number: 2 (DW_TAG_variable)",
        )
        .unwrap();
        assert_eq!(
            r,
            DebugRecord::TagStart {
                level: 1,
                ident: 0x2d,
                tag: "DW_TAG_variable".to_string(),
            }
        );

        let r = parse_info_line("    <2e>   DW_AT_name        : x").unwrap();
        assert_eq!(
            r,
            DebugRecord::Attribute {
                name: "DW_AT_name".to_string(),
                value: "x".to_string(),
            }
        );
    }

    #[test]
    fn attr_with_indirect_string() {
        let r = parse_info_line(
            "    <c>   DW_AT_producer    : (indirect string, offset: 0x0): GNU C17 10.2.1",
        )
        .unwrap();
        assert_eq!(
            r,
            DebugRecord::Attribute {
                name: "DW_AT_producer".to_string(),
                value: "GNU C17 10.2.1".to_string(),
            }
        );
    }

    #[test]
    fn noise_is_not_a_record() {
        assert_eq!(parse_info_line("Contents of the .debug_info section:"), None);
        assert_eq!(parse_info_line(""), None);
    }

    #[test]
    fn symbol_rows() {
        let r = parse_symbol_line(
            "    42: 0000000000601040    20 OBJECT  GLOBAL DEFAULT   24 chars",
        )
        .unwrap();
        assert_eq!(r.num, 42);
        assert_eq!(r.address, 0x601040);
        assert_eq!(r.size, 20);
        assert_eq!(r.kind, "OBJECT");
        assert_eq!(r.name.as_deref(), Some("chars"));

        // Unnamed symbols are valid rows.
        let r = parse_symbol_line(
            "     1: 0000000000400238     0 SECTION LOCAL  DEFAULT    1",
        )
        .unwrap();
        assert_eq!(r.name, None);

        // Headers are skipped.
        assert!(parse_symbol_line("Symbol table '.symtab' contains 71 entries:").is_none());
        assert!(parse_symbol_line("   Num:    Value          Size Type    Bind   Vis      Ndx Name").is_none());
    }

    #[test]
    fn section_rows() {
        let r = parse_section_line(
            "  [24] .data             PROGBITS         0000000000601020  00001020  0000000000000040  0000000000000000  WA       0     0     8",
        )
        .unwrap();
        assert_eq!(r.index, 24);
        assert_eq!(r.name, ".data");
        assert_eq!(r.base_address, 0x601020);
        assert_eq!(r.size, 0x40);
        assert_eq!(r.flags, "WA");

        // The null section has no name and no flags.
        let r = parse_section_line(
            "  [ 0]                   NULL             0000000000000000  00000000  0000000000000000  0000000000000000           0     0     0",
        )
        .unwrap();
        assert_eq!(r.index, 0);
        assert_eq!(r.name, "");
        assert_eq!(r.kind, "NULL");
    }

    #[test]
    fn dump_lines() {
        let (addr, bytes) = parse_dump_line(
            "  0x00601040 2a000000 00000000 66000000 00000000  *.......f.......",
        )
        .unwrap();
        assert_eq!(addr, 0x601040);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], 0x2a);
        assert_eq!(bytes[8], 0x66);

        // Short final line.
        let (addr, bytes) =
            parse_dump_line("  0x00601060 1234                                 .4").unwrap();
        assert_eq!(addr, 0x601060);
        assert_eq!(bytes, vec![0x12, 0x34]);

        assert!(parse_dump_line("Hex dump of section '.data':").is_none());
    }

    #[test]
    fn image_info() {
        let text = "ELF Header:\n  Class:                             ELF64\n  Data:                              2's complement, little endian\n  Machine:                           Advanced Micro Devices X86-64\n";
        let info = parse_image_info(text).unwrap();
        assert_eq!(info.bits, 64);
        assert!(info.little_endian);
        assert_eq!(info.machine, "X86-64");

        assert!(parse_image_info("  Class: PE32\n").is_err());
    }
}
