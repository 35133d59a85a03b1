//! EXI Options (§3, §7 invariants) — `ExiOptions` and its cross-field
//! validation.
//!
//! Grounded on `original_source/include/exi/Basic/ExiOptions.hpp` (`AlignKind`,
//! `PreserveKind`, `PreserveBuilder`) and
//! `original_source/lib/exi/Basic/ExiOptions.cpp` (`ValidateCommon`,
//! `FixupAndValidateOptions`). The original logs through `LOG_ERROR`/`LOG_WARN`
//! under `DEBUG_TYPE "ExiOptions"`; this module does the same through the
//! `"exi::options"` `log` target.

use crate::error::{ExiError, ExiErrorKind, Result};

/// Stream alignment mode (§3 "Alignment mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentKind {
    BitPacked,
    ByteAligned,
    PreCompression,
    Compression,
}

impl Default for AlignmentKind {
    fn default() -> Self {
        AlignmentKind::BitPacked
    }
}

/// Which lexical features survive the codec round-trip (§3, §4.4).
///
/// A plain bitset rather than `bitflags!` — the crate this idiom is drawn
/// from (`PreserveKind` in `original_source/include/exi/Basic/ExiOptions.hpp`)
/// is itself a hand-rolled `u8` mask with a `PreserveBuilder` wrapper, and no
/// pack example pulls in the `bitflags` crate for a one-off five-bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreserveSet(u8);

impl PreserveSet {
    pub const COMMENTS: PreserveSet = PreserveSet(0b0_0001);
    pub const DTDS: PreserveSet = PreserveSet(0b0_0010);
    pub const LEXICAL_VALUES: PreserveSet = PreserveSet(0b0_0100);
    pub const PIS: PreserveSet = PreserveSet(0b0_1000);
    pub const PREFIXES: PreserveSet = PreserveSet(0b1_0000);
    pub const NONE: PreserveSet = PreserveSet(0b0_0000);
    pub const ALL: PreserveSet = PreserveSet(0b1_1111);

    pub fn set(&mut self, other: PreserveSet) {
        self.0 |= other.0;
    }

    pub fn unset(&mut self, other: PreserveSet) {
        self.0 &= !other.0;
    }

    pub fn has(&self, other: PreserveSet) -> bool {
        (self.0 & other.0) != 0
    }

    /// True if any bit outside `LexicalValues` is set — the set strict mode
    /// forbids (`~PreserveKind::Strict` in the original).
    fn has_non_strict_bits(&self) -> bool {
        (self.0 & !Self::LEXICAL_VALUES.0) != 0
    }
}

impl std::ops::BitOr for PreserveSet {
    type Output = PreserveSet;
    fn bitor(self, rhs: PreserveSet) -> PreserveSet {
        PreserveSet(self.0 | rhs.0)
    }
}

/// The EXI header Options block (§3 "Header options").
#[derive(Debug, Clone, PartialEq)]
pub struct ExiOptions {
    pub alignment: Option<AlignmentKind>,
    pub compression: bool,
    pub strict: bool,
    pub self_contained: bool,
    pub preserve: PreserveSet,
    pub datatype_representation_map: bool,
    pub schema_id: Option<String>,
    pub value_partition_capacity: Option<u64>,
    pub block_size: Option<u64>,
}

impl Default for ExiOptions {
    fn default() -> Self {
        Self {
            alignment: None,
            compression: false,
            strict: false,
            self_contained: false,
            preserve: PreserveSet::NONE,
            datatype_representation_map: false,
            schema_id: None,
            value_partition_capacity: None,
            block_size: None,
        }
    }
}

impl ExiOptions {
    fn has_valid_schema_id(&self) -> bool {
        self.schema_id.as_ref().is_some_and(|id| !id.is_empty())
    }

    /// Applies the invariants of §3 against an already-`alignment`-resolved
    /// options record. Call [`ExiOptions::fixup_and_validate`] instead when
    /// `alignment` may still be unset.
    fn validate_common(&self) -> Result<()> {
        if self.compression && self.alignment != Some(AlignmentKind::PreCompression) {
            log::error!(target: "exi::options", "invalid alignment for compression, must be chunked");
            return Err(ExiError::at_start(ExiErrorKind::AlignmentCompressionMismatch));
        }

        if self.self_contained && self.alignment == Some(AlignmentKind::PreCompression) {
            log::error!(target: "exi::options", "self-contained cannot be used with chunking");
            return Err(ExiError::at_start(ExiErrorKind::SelfContainedWithPreCompression));
        }

        if self.strict {
            if self.preserve.has_non_strict_bits() {
                log::error!(target: "exi::options", "invalid preserve options for strict mode");
                return Err(ExiError::at_start(ExiErrorKind::StrictViolation));
            }
            if self.self_contained {
                log::error!(target: "exi::options", "self-contained cannot be used in strict mode");
                return Err(ExiError::at_start(ExiErrorKind::StrictViolation));
            }
        }

        if self.datatype_representation_map {
            if self.preserve.has(PreserveSet::LEXICAL_VALUES) {
                log::error!(
                    target: "exi::options",
                    "lexical value preservation cannot be used with datatype remapping"
                );
                return Err(ExiError::at_start(ExiErrorKind::DatatypeMapRequiresSchema));
            }
            if !self.has_valid_schema_id() {
                log::error!(target: "exi::options", "datatype remapping cannot be done in schemaless mode");
                return Err(ExiError::at_start(ExiErrorKind::DatatypeMapRequiresSchema));
            }
        }

        Ok(())
    }

    /// Validates an options record whose `alignment` is already resolved;
    /// rejects bit-packed/byte-aligned combined with compression outright
    /// rather than silently coercing it.
    pub fn validate(&self) -> Result<()> {
        if self.compression {
            match self.alignment {
                Some(AlignmentKind::BitPacked) => {
                    log::error!(target: "exi::options", "bit alignment cannot be used with compression");
                    return Err(ExiError::at_start(ExiErrorKind::AlignmentCompressionMismatch));
                }
                Some(AlignmentKind::ByteAligned) => {
                    log::error!(target: "exi::options", "byte alignment cannot be used with precompression");
                    return Err(ExiError::at_start(ExiErrorKind::AlignmentCompressionMismatch));
                }
                _ => {}
            }
        }
        self.validate_common()
    }

    /// Fills in a default alignment (bit-packed, or pre-compression under
    /// compression) when unset, forces pre-compression alignment under
    /// compression, then re-runs the shared invariants.
    pub fn fixup_and_validate(&mut self) -> Result<()> {
        if self.alignment.is_none() {
            if !self.compression {
                log::warn!(target: "exi::options", "alignment not set, defaulting to bit packed");
                self.alignment = Some(AlignmentKind::BitPacked);
            } else {
                log::warn!(
                    target: "exi::options",
                    "alignment not set, defaulting to pre-compression (compression is enabled)"
                );
                self.alignment = Some(AlignmentKind::PreCompression);
            }
        }

        if self.compression {
            if self.alignment == Some(AlignmentKind::BitPacked) {
                log::error!(target: "exi::options", "bit alignment cannot be used with compression");
                return Err(ExiError::at_start(ExiErrorKind::AlignmentCompressionMismatch));
            }
            if self.alignment != Some(AlignmentKind::PreCompression) {
                log::warn!(target: "exi::options", "alignment changed to precompression");
            }
            self.alignment = Some(AlignmentKind::PreCompression);
        }

        self.validate_common()
    }

    /// Resolved alignment, defaulting as [`ExiOptions::fixup_and_validate`]
    /// would, without mutating `self`. Used by the body processor once
    /// options are known to already be valid.
    pub fn resolved_alignment(&self) -> AlignmentKind {
        self.alignment.unwrap_or(AlignmentKind::BitPacked)
    }
}

/// Maps a 2-bit wire code to an [`AlignmentKind`], matching the ordering of
/// `original_source/include/exi/Basic/ExiOptions.hpp`'s `AlignKind` enum
/// (`BitPacked = 0b01, BytePacked = 0b10, PreCompression = 0b11`) with `00`
/// repurposed here for `Compression` rather than `AlignKind::None`, since
/// this module's `AlignmentKind` always resolves to a concrete mode.
fn alignment_from_code(code: u64) -> AlignmentKind {
    match code {
        0b00 => AlignmentKind::Compression,
        0b01 => AlignmentKind::BitPacked,
        0b10 => AlignmentKind::ByteAligned,
        _ => AlignmentKind::PreCompression,
    }
}

fn alignment_to_code(kind: AlignmentKind) -> u64 {
    match kind {
        AlignmentKind::Compression => 0b00,
        AlignmentKind::BitPacked => 0b01,
        AlignmentKind::ByteAligned => 0b10,
        AlignmentKind::PreCompression => 0b11,
    }
}

/// Decodes the in-band EXI Options document (§4.5 step 5).
///
/// A full schema-described options document (arbitrary nested
/// `DatatypeRepresentationMap` schemas) is out of scope here — DESIGN.md
/// Open Question 2 resolves this to the common inline flag/value block every
/// known encoder actually emits: a presence bit per optional field followed
/// by its value, bit-packed in declaration order (alignment, compression,
/// strict, self-contained, the five `Preserve` bits in
/// `PreserveSet`'s declared order, datatype-map flag, schema id, value
/// partition capacity, block size).
pub fn decode_options_document(reader: &mut crate::stream::BitReader) -> Result<ExiOptions> {
    let mut opts = ExiOptions::default();

    if reader.read_bool()? {
        opts.alignment = Some(alignment_from_code(reader.read_bits(2)?));
    }
    opts.compression = reader.read_bool()?;
    opts.strict = reader.read_bool()?;
    opts.self_contained = reader.read_bool()?;

    let mut preserve = PreserveSet::NONE;
    if reader.read_bool()? {
        preserve.set(PreserveSet::COMMENTS);
    }
    if reader.read_bool()? {
        preserve.set(PreserveSet::DTDS);
    }
    if reader.read_bool()? {
        preserve.set(PreserveSet::LEXICAL_VALUES);
    }
    if reader.read_bool()? {
        preserve.set(PreserveSet::PIS);
    }
    if reader.read_bool()? {
        preserve.set(PreserveSet::PREFIXES);
    }
    opts.preserve = preserve;

    opts.datatype_representation_map = reader.read_bool()?;
    if reader.read_bool()? {
        opts.schema_id = Some(reader.read_string()?);
    }
    if reader.read_bool()? {
        opts.value_partition_capacity = Some(reader.read_uint()?);
    }
    if reader.read_bool()? {
        opts.block_size = Some(reader.read_uint()?);
    }

    log::trace!(target: "exi::options", "decoded in-band options: {opts:?}");
    Ok(opts)
}

/// Symmetric with [`decode_options_document`].
pub fn encode_options_document(writer: &mut crate::stream::BitWriter, opts: &ExiOptions) {
    match opts.alignment {
        Some(kind) => {
            writer.write_bool(true);
            writer.write_bits(alignment_to_code(kind), 2);
        }
        None => writer.write_bool(false),
    }
    writer.write_bool(opts.compression);
    writer.write_bool(opts.strict);
    writer.write_bool(opts.self_contained);

    writer.write_bool(opts.preserve.has(PreserveSet::COMMENTS));
    writer.write_bool(opts.preserve.has(PreserveSet::DTDS));
    writer.write_bool(opts.preserve.has(PreserveSet::LEXICAL_VALUES));
    writer.write_bool(opts.preserve.has(PreserveSet::PIS));
    writer.write_bool(opts.preserve.has(PreserveSet::PREFIXES));

    writer.write_bool(opts.datatype_representation_map);
    match &opts.schema_id {
        Some(id) => {
            writer.write_bool(true);
            writer.write_string(id);
        }
        None => writer.write_bool(false),
    }
    match opts.value_partition_capacity {
        Some(cap) => {
            writer.write_bool(true);
            writer.write_uint(cap);
        }
        None => writer.write_bool(false),
    }
    match opts.block_size {
        Some(size) => {
            writer.write_bool(true);
            writer.write_uint(size);
        }
        None => writer.write_bool(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BitReader, BitWriter};

    #[test]
    fn options_document_roundtrips() {
        let opts = ExiOptions {
            alignment: Some(AlignmentKind::ByteAligned),
            strict: true,
            preserve: PreserveSet::LEXICAL_VALUES,
            schema_id: Some("urn:example".to_string()),
            value_partition_capacity: Some(64),
            ..Default::default()
        };

        let mut w = BitWriter::new();
        encode_options_document(&mut w, &opts);
        let (bytes, _) = w.finalize();

        let mut r = BitReader::new(&bytes);
        let decoded = decode_options_document(&mut r).unwrap();
        assert_eq!(decoded, opts);
    }

    #[test]
    fn options_document_with_no_optional_fields() {
        let opts = ExiOptions::default();
        let mut w = BitWriter::new();
        encode_options_document(&mut w, &opts);
        let (bytes, _) = w.finalize();

        let mut r = BitReader::new(&bytes);
        let decoded = decode_options_document(&mut r).unwrap();
        assert_eq!(decoded, opts);
    }

    #[test]
    fn defaults_to_bit_packed() {
        let mut opts = ExiOptions::default();
        opts.fixup_and_validate().unwrap();
        assert_eq!(opts.alignment, Some(AlignmentKind::BitPacked));
    }

    #[test]
    fn compression_forces_pre_compression_alignment() {
        let mut opts = ExiOptions { compression: true, ..Default::default() };
        opts.fixup_and_validate().unwrap();
        assert_eq!(opts.alignment, Some(AlignmentKind::PreCompression));
    }

    #[test]
    fn compression_with_bit_packed_is_rejected() {
        let mut opts = ExiOptions {
            compression: true,
            alignment: Some(AlignmentKind::BitPacked),
            ..Default::default()
        };
        let err = opts.fixup_and_validate().unwrap_err();
        assert_eq!(err.kind, ExiErrorKind::AlignmentCompressionMismatch);
    }

    #[test]
    fn strict_forbids_non_lexical_preserve_bits() {
        let mut opts = ExiOptions {
            strict: true,
            preserve: PreserveSet::PREFIXES,
            ..Default::default()
        };
        let err = opts.fixup_and_validate().unwrap_err();
        assert_eq!(err.kind, ExiErrorKind::StrictViolation);
    }

    #[test]
    fn strict_allows_lexical_values_only() {
        let mut opts = ExiOptions {
            strict: true,
            preserve: PreserveSet::LEXICAL_VALUES,
            ..Default::default()
        };
        opts.fixup_and_validate().unwrap();
    }

    #[test]
    fn strict_forbids_self_contained() {
        let mut opts =
            ExiOptions { strict: true, self_contained: true, ..Default::default() };
        let err = opts.fixup_and_validate().unwrap_err();
        assert_eq!(err.kind, ExiErrorKind::StrictViolation);
    }

    #[test]
    fn self_contained_forbids_pre_compression() {
        let mut opts = ExiOptions {
            self_contained: true,
            alignment: Some(AlignmentKind::PreCompression),
            ..Default::default()
        };
        let err = opts.fixup_and_validate().unwrap_err();
        assert_eq!(err.kind, ExiErrorKind::SelfContainedWithPreCompression);
    }

    #[test]
    fn datatype_map_requires_schema_and_no_lexical_values() {
        let mut opts = ExiOptions {
            datatype_representation_map: true,
            ..Default::default()
        };
        assert_eq!(
            opts.fixup_and_validate().unwrap_err().kind,
            ExiErrorKind::DatatypeMapRequiresSchema
        );

        let mut opts = ExiOptions {
            datatype_representation_map: true,
            schema_id: Some("urn:example".to_string()),
            preserve: PreserveSet::LEXICAL_VALUES,
            ..Default::default()
        };
        assert_eq!(
            opts.fixup_and_validate().unwrap_err().kind,
            ExiErrorKind::DatatypeMapRequiresSchema
        );

        let mut opts = ExiOptions {
            datatype_representation_map: true,
            schema_id: Some("urn:example".to_string()),
            ..Default::default()
        };
        opts.fixup_and_validate().unwrap();
    }
}
