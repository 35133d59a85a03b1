//! String and value partitions (§3 "String tables", §4.3, component C3).
//!
//! Grounded on `original_source/lib/exi/Basic/StringTables.cpp`
//! (`createInitialEntries`, `createURI`, `appendLocalNames`) for pre-seeding,
//! and `original_source/include/exi/Basic/CompactID.hpp` (`CompactIDCounter`,
//! leading-zero-count width) for [`CompactIdCounter`]. The indexed-partition-
//! with-recomputed-width shape generalizes `rscil`'s `TableDecodeContext`
//! (`src/metadata/decode.rs`), which recomputes a table index size from a row
//! count on every lookup.

use std::collections::HashMap;

use crate::error::{ExiError, ExiErrorKind, Result};
use crate::options::ExiOptions;
use crate::stream::{BitReader, BitWriter};

const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
const XML_INITIAL_VALUES: &[&str] = &["base", "id", "lang", "space"];

const XSI_URI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const XSI_INITIAL_VALUES: &[&str] = &["nil", "type"];

const XSD_URI: &str = "http://www.w3.org/2001/XMLSchema";
const XSD_INITIAL_VALUES: &[&str] = &[
    "ENTITIES", "ENTITY", "ID", "IDREF", "IDREFS", "NCName", "NMTOKEN", "NMTOKENS",
    "NOTATION", "Name", "QName", "anySimpleType", "anyType", "anyURI", "base64Binary",
    "boolean", "byte", "date", "dateTime", "decimal", "double", "duration", "float",
    "gDay", "gMonth", "gMonthDay", "gYear", "gYearMonth", "hexBinary", "int", "integer",
    "language", "long", "negativeInteger", "nonNegativeInteger", "nonPositiveInteger",
    "normalizedString", "positiveInteger", "short", "string", "time", "token",
    "unsignedByte", "unsignedInt", "unsignedLong", "unsignedShort",
];

/// `ceil(log2(n))`, via leading-zero-count rather than a table (§3 "Compact
/// ID"). `n <= 1` needs zero bits to address a single possibility.
fn compact_id_width(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

/// Tracks a partition's size and the bit width needed to address it,
/// recomputing the width on every insertion rather than looking it up from a
/// table. `reserved_zero` widens the addressable space by one slot, for
/// partitions (URI, LocalName) where Compact ID `0` is reserved to mean
/// "literal follows".
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactIdCounter {
    value: u64,
    reserved_zero: bool,
    width: u32,
}

impl CompactIdCounter {
    pub fn new(reserved_zero: bool) -> Self {
        let mut counter = Self { value: 0, reserved_zero, width: 0 };
        counter.recompute();
        counter
    }

    fn recompute(&mut self) {
        let addressable = if self.reserved_zero { self.value + 1 } else { self.value };
        self.width = compact_id_width(addressable);
    }

    pub fn inc(&mut self) {
        self.value += 1;
        self.recompute();
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

/// A single URI partition entry: the URI string plus its scoped Prefix and
/// LocalName sub-partitions (§3 "String tables").
#[derive(Debug, Clone, Default)]
struct UriEntry {
    uri: String,
    prefixes: Vec<String>,
    prefix_counter: CompactIdCounter,
    local_names: Vec<String>,
    local_counter: CompactIdCounter,
}

impl UriEntry {
    fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            prefixes: Vec::new(),
            prefix_counter: CompactIdCounter::new(false),
            local_names: Vec::new(),
            local_counter: CompactIdCounter::new(true),
        }
    }

    fn push_prefix(&mut self, prefix: impl Into<String>) {
        self.prefixes.push(prefix.into());
        self.prefix_counter.inc();
    }

    fn push_local_name(&mut self, name: impl Into<String>) {
        self.local_names.push(name.into());
        self.local_counter.inc();
    }
}

/// All four string/value partitions for one in-flight document (§3).
///
/// Owned exclusively by the processor for the document's lifetime; nothing
/// here is shared across documents or threads.
#[derive(Debug, Clone)]
pub struct StringTables {
    uris: Vec<UriEntry>,
    uri_counter: CompactIdCounter,
    /// Bounded-global value partition, stored as a ring buffer: once full, a
    /// new literal overwrites the slot at `global_head` in place so the
    /// evicted Compact ID is reassigned to the newest value, rather than
    /// shifting every surviving entry down (§8 "evicted ID reassignment").
    global_values: Vec<String>,
    global_head: usize,
    global_capacity: Option<u64>,
    local_values: HashMap<(u64, u64), Vec<String>>,
}

impl StringTables {
    /// Builds pre-seeded partitions per §4.3 "Pre-seed sets". A schema
    /// identifier in `opts` additionally seeds the XSD namespace and its
    /// built-in type names.
    pub fn new(opts: &ExiOptions) -> Self {
        let mut tables = Self {
            uris: Vec::new(),
            uri_counter: CompactIdCounter::new(true),
            global_values: Vec::new(),
            global_head: 0,
            global_capacity: opts.value_partition_capacity,
            local_values: HashMap::new(),
        };

        tables.push_uri("", None, &[]);
        tables.push_uri(XML_URI, Some("xml"), XML_INITIAL_VALUES);
        tables.push_uri(XSI_URI, Some("xsi"), XSI_INITIAL_VALUES);
        if opts.schema_id.is_some() {
            tables.push_uri(XSD_URI, Some("xsd"), XSD_INITIAL_VALUES);
        }

        tables
    }

    fn push_uri(&mut self, uri: &str, prefix: Option<&str>, local_names: &[&str]) {
        let mut entry = UriEntry::new(uri);
        if let Some(prefix) = prefix {
            entry.push_prefix(prefix);
        }
        for name in local_names {
            entry.push_local_name(*name);
        }
        self.uris.push(entry);
        self.uri_counter.inc();
    }

    pub fn uri_count(&self) -> usize {
        self.uris.len()
    }

    pub fn uri_str(&self, uri_id: u64) -> Option<&str> {
        self.uris.get(uri_id as usize).map(|e| e.uri.as_str())
    }

    pub fn local_name_str(&self, uri_id: u64, local_id: u64) -> Option<&str> {
        self.uris
            .get(uri_id as usize)
            .and_then(|e| e.local_names.get(local_id as usize))
            .map(|s| s.as_str())
    }

    pub fn prefix_str(&self, uri_id: u64, prefix_id: u64) -> Option<&str> {
        self.uris
            .get(uri_id as usize)
            .and_then(|e| e.prefixes.get(prefix_id as usize))
            .map(|s| s.as_str())
    }

    /// Decodes a URI reference using the reserved-zero convention (§4.3): a
    /// Compact ID of width `ceil(log2(N+1))` is read directly; value `0`
    /// means "literal follows", any other value `v` indexes the partition at
    /// `v - 1`. Returns the resolved URI id.
    pub fn read_uri(&mut self, reader: &mut BitReader) -> Result<u64> {
        let width = self.uri_counter.width();
        let raw = if width == 0 { 0 } else { reader.read_bits(width)? };

        if raw == 0 {
            let literal = reader.read_string()?;
            let id = self.uris.len() as u64;
            self.push_uri(&literal, None, &[]);
            Ok(id)
        } else {
            let id = raw - 1;
            if id >= self.uris.len() as u64 {
                return Err(ExiError::new(
                    ExiErrorKind::CompactIdOutOfRange(id, self.uris.len() as u64),
                    reader.tell(),
                ));
            }
            Ok(id)
        }
    }

    /// Symmetric with [`StringTables::read_uri`]: writes a hit against an
    /// existing `uri_id`, or `None` to write `value` as a fresh literal.
    pub fn write_uri(&mut self, writer: &mut BitWriter, uri_id: Option<u64>, value: &str) -> u64 {
        let width = self.uri_counter.width();
        match uri_id {
            Some(id) => {
                if width > 0 {
                    writer.write_bits(id + 1, width);
                }
                id
            }
            None => {
                if width > 0 {
                    writer.write_bits(0, width);
                }
                writer.write_string(value);
                let id = self.uris.len() as u64;
                self.push_uri(value, None, &[]);
                id
            }
        }
    }

    /// Decodes a LocalName reference scoped to `uri_id`, using the same
    /// reserved-zero convention as [`StringTables::read_uri`].
    pub fn read_local_name(&mut self, reader: &mut BitReader, uri_id: u64) -> Result<u64> {
        let entry = self
            .uris
            .get(uri_id as usize)
            .ok_or_else(|| ExiError::new(ExiErrorKind::CompactIdOutOfRange(uri_id, self.uris.len() as u64), reader.tell()))?;
        let width = entry.local_counter.width();
        let raw = if width == 0 { 0 } else { reader.read_bits(width)? };

        if raw == 0 {
            let literal = reader.read_string()?;
            let entry = &mut self.uris[uri_id as usize];
            let id = entry.local_names.len() as u64;
            entry.push_local_name(literal);
            Ok(id)
        } else {
            let id = raw - 1;
            let entry = &self.uris[uri_id as usize];
            if id >= entry.local_names.len() as u64 {
                return Err(ExiError::new(
                    ExiErrorKind::CompactIdOutOfRange(id, entry.local_names.len() as u64),
                    reader.tell(),
                ));
            }
            Ok(id)
        }
    }

    pub fn write_local_name(
        &mut self,
        writer: &mut BitWriter,
        uri_id: u64,
        local_id: Option<u64>,
        value: &str,
    ) -> u64 {
        let entry = &self.uris[uri_id as usize];
        let width = entry.local_counter.width();
        match local_id {
            Some(id) => {
                if width > 0 {
                    writer.write_bits(id + 1, width);
                }
                id
            }
            None => {
                if width > 0 {
                    writer.write_bits(0, width);
                }
                writer.write_string(value);
                let entry = &mut self.uris[uri_id as usize];
                let id = entry.local_names.len() as u64;
                entry.push_local_name(value);
                id
            }
        }
    }

    /// Decodes a Prefix reference scoped to `uri_id` using the ordinary
    /// hit/miss flag protocol (§4.3 "Partition encoding") — Prefix does not
    /// use the reserved-zero convention.
    pub fn read_prefix(&mut self, reader: &mut BitReader, uri_id: u64) -> Result<u64> {
        let hit = reader.read_bool()?;
        if hit {
            let entry = &self.uris[uri_id as usize];
            let width = entry.prefix_counter.width();
            let id = if width == 0 { 0 } else { reader.read_bits(width)? };
            if id >= entry.prefixes.len() as u64 {
                return Err(ExiError::new(
                    ExiErrorKind::CompactIdOutOfRange(id, entry.prefixes.len() as u64),
                    reader.tell(),
                ));
            }
            Ok(id)
        } else {
            let literal = reader.read_string()?;
            let entry = &mut self.uris[uri_id as usize];
            let id = entry.prefixes.len() as u64;
            entry.push_prefix(literal);
            Ok(id)
        }
    }

    pub fn write_prefix(
        &mut self,
        writer: &mut BitWriter,
        uri_id: u64,
        prefix_id: Option<u64>,
        value: &str,
    ) -> u64 {
        match prefix_id {
            Some(id) => {
                writer.write_bool(true);
                let entry = &self.uris[uri_id as usize];
                let width = entry.prefix_counter.width();
                if width > 0 {
                    writer.write_bits(id, width);
                }
                id
            }
            None => {
                writer.write_bool(false);
                writer.write_string(value);
                let entry = &mut self.uris[uri_id as usize];
                let id = entry.prefixes.len() as u64;
                entry.push_prefix(value);
                id
            }
        }
    }

    fn find_local(&self, key: (u64, u64), value: &str) -> Option<u64> {
        self.local_values
            .get(&key)
            .and_then(|v| v.iter().position(|s| s == value))
            .map(|i| i as u64)
    }

    fn find_global(&self, value: &str) -> Option<u64> {
        self.global_values.iter().position(|s| s == value).map(|i| i as u64)
    }

    fn insert_value(&mut self, key: (u64, u64), value: &str) {
        self.local_values.entry(key).or_default().push(value.to_string());

        if self.global_capacity == Some(0) {
            return;
        }
        match self.global_capacity {
            Some(cap) if self.global_values.len() as u64 >= cap => {
                self.global_values[self.global_head] = value.to_string();
                self.global_head = (self.global_head + 1) % cap as usize;
            }
            _ => self.global_values.push(value.to_string()),
        }
    }

    /// Decodes a value per §4.3's 2-bit discriminant: `00` local hit, `01`
    /// global hit, `10` literal. `11` is reserved and rejected.
    pub fn read_value(&mut self, reader: &mut BitReader, key: (u64, u64)) -> Result<String> {
        let discriminant = reader.read_bits(2)?;
        match discriminant {
            0b00 => {
                let local = self.local_values.get(&key).map(|v| v.len() as u64).unwrap_or(0);
                let width = compact_id_width(local);
                let id = if width == 0 { 0 } else { reader.read_bits(width)? };
                self.local_values
                    .get(&key)
                    .and_then(|v| v.get(id as usize))
                    .cloned()
                    .ok_or_else(|| ExiError::new(ExiErrorKind::CompactIdOutOfRange(id, local), reader.tell()))
            }
            0b01 => {
                let width = compact_id_width(self.global_values.len() as u64);
                let id = if width == 0 { 0 } else { reader.read_bits(width)? };
                self.global_values
                    .get(id as usize)
                    .cloned()
                    .ok_or_else(|| {
                        ExiError::new(
                            ExiErrorKind::CompactIdOutOfRange(id, self.global_values.len() as u64),
                            reader.tell(),
                        )
                    })
            }
            0b10 => {
                let literal = reader.read_string()?;
                self.insert_value(key, &literal);
                Ok(literal)
            }
            _ => Err(ExiError::new(ExiErrorKind::LengthMismatch, reader.tell())
                .with_context("value partition discriminant 11 is reserved")),
        }
    }

    /// Symmetric with [`StringTables::read_value`]: searches local then
    /// global partitions for `value`, writing a hit if found or a literal
    /// (and inserting into both partitions) on miss.
    pub fn write_value(&mut self, writer: &mut BitWriter, key: (u64, u64), value: &str) {
        if let Some(id) = self.find_local(key, value) {
            writer.write_bits(0b00, 2);
            let local = self.local_values.get(&key).map(|v| v.len() as u64).unwrap_or(0);
            let width = compact_id_width(local);
            if width > 0 {
                writer.write_bits(id, width);
            }
            return;
        }

        if self.global_capacity != Some(0) {
            if let Some(id) = self.find_global(value) {
                writer.write_bits(0b01, 2);
                let width = compact_id_width(self.global_values.len() as u64);
                if width > 0 {
                    writer.write_bits(id, width);
                }
                return;
            }
        }

        writer.write_bits(0b10, 2);
        writer.write_string(value);
        self.insert_value(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ExiOptions {
        ExiOptions::default()
    }

    #[test]
    fn pre_seeds_xml_and_xsi_namespaces() {
        let tables = StringTables::new(&opts());
        assert_eq!(tables.uri_count(), 3);
        assert_eq!(tables.uri_str(0), Some(""));
        assert_eq!(tables.uri_str(1), Some(XML_URI));
        assert_eq!(tables.uri_str(2), Some(XSI_URI));
        assert_eq!(tables.local_name_str(1, 0), Some("base"));
        assert_eq!(tables.prefix_str(1, 0), Some("xml"));
    }

    #[test]
    fn schema_present_seeds_xsd_namespace() {
        let opts = ExiOptions { schema_id: Some("urn:s".to_string()), ..Default::default() };
        let tables = StringTables::new(&opts);
        assert_eq!(tables.uri_count(), 4);
        assert_eq!(tables.uri_str(3), Some(XSD_URI));
    }

    #[test]
    fn uri_roundtrip_hit_then_literal() {
        let mut tables = StringTables::new(&opts());
        let mut w = BitWriter::new();
        let new_id = tables.write_uri(&mut w, None, "urn:new");
        let (bytes, _) = w.finalize();

        let mut tables2 = StringTables::new(&opts());
        let mut r = BitReader::new(&bytes);
        let decoded_id = tables2.read_uri(&mut r).unwrap();
        assert_eq!(decoded_id, new_id);
        assert_eq!(tables2.uri_str(decoded_id), Some("urn:new"));
    }

    #[test]
    fn value_partition_evicted_slot_is_reused_for_the_newest_value() {
        let opts = ExiOptions { value_partition_capacity: Some(2), ..Default::default() };
        let mut tables = StringTables::new(&opts);
        let key = (0u64, 0u64);

        let mut w = BitWriter::new();
        tables.write_value(&mut w, key, "a");
        tables.write_value(&mut w, key, "b");
        tables.write_value(&mut w, key, "c");
        let (bytes, _) = w.finalize();

        // "a" occupied slot 0; once the partition is full, "c" overwrites
        // that slot in place rather than shifting "b" down to it, so it
        // inherits the evicted Compact ID 0, not a freshly appended one.
        assert_eq!(tables.global_values, vec!["c".to_string(), "b".to_string()]);

        let mut tables2 = StringTables::new(&opts);
        let mut r = BitReader::new(&bytes);
        assert_eq!(tables2.read_value(&mut r, key).unwrap(), "a");
        assert_eq!(tables2.read_value(&mut r, key).unwrap(), "b");
        assert_eq!(tables2.read_value(&mut r, key).unwrap(), "c");
    }

    #[test]
    fn value_hit_after_repeat() {
        let mut tables = StringTables::new(&opts());
        let key = (0u64, 0u64);
        let mut w = BitWriter::new();
        tables.write_value(&mut w, key, "hello");
        tables.write_value(&mut w, key, "hello");
        let (bytes, _) = w.finalize();

        let mut tables2 = StringTables::new(&opts());
        let mut r = BitReader::new(&bytes);
        assert_eq!(tables2.read_value(&mut r, key).unwrap(), "hello");
        assert_eq!(tables2.read_value(&mut r, key).unwrap(), "hello");
    }
}
