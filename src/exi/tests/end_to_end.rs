//! Crate-level integration coverage for the full decode/encode pipeline,
//! driving the public `exi` API the way a host binary (the CLI glue crate)
//! would rather than reaching into module internals.

use std::cell::RefCell;

use exi::grammar::GrammarEngine;
use exi::header;
use exi::options::{decode_options_document, encode_options_document};
use exi::stream::{BitReader, BitWriter};
use exi::tables::StringTables;
use exi::{AlignmentKind, ExiErrorKind, ExiOptions, EventStatus, PreserveSet, QName, Serializer, XmlEvent, XmlEventSource};

#[derive(Default)]
struct RecordingSerializer {
    events: RefCell<Vec<String>>,
}

impl Serializer for RecordingSerializer {
    fn sd(&mut self) -> EventStatus {
        self.events.borrow_mut().push("SD".into());
        EventStatus::Continue
    }
    fn ed(&mut self) -> EventStatus {
        self.events.borrow_mut().push("ED".into());
        EventStatus::Done
    }
    fn se(&mut self, name: &QName) -> EventStatus {
        self.events.borrow_mut().push(format!("SE({})", name.local_name));
        EventStatus::Continue
    }
    fn ee(&mut self, name: &QName) -> EventStatus {
        self.events.borrow_mut().push(format!("EE({})", name.local_name));
        EventStatus::Continue
    }
    fn ns(&mut self, uri: &str, prefix: &str, local_element_ns: bool) -> EventStatus {
        self.events.borrow_mut().push(format!("NS({uri},{prefix},{local_element_ns})"));
        EventStatus::Continue
    }
    fn at(&mut self, name: &QName, value: &str) -> EventStatus {
        self.events
            .borrow_mut()
            .push(format!("AT({}={value})", name.local_name));
        EventStatus::Continue
    }
}

struct VecSource {
    events: std::vec::IntoIter<XmlEvent>,
}

impl VecSource {
    fn new(events: Vec<XmlEvent>) -> Self {
        Self { events: events.into_iter() }
    }
}

impl XmlEventSource for VecSource {
    fn next_event(&mut self) -> exi::error::Result<Option<XmlEvent>> {
        Ok(self.events.next())
    }
}

/// Scenario 1: minimal document round-trip under default options.
#[test]
fn minimal_document_round_trips() {
    let events = vec![
        XmlEvent::StartDocument,
        XmlEvent::StartElement(QName::new("", "a")),
        XmlEvent::EndElement(QName::new("", "a")),
        XmlEvent::EndDocument,
    ];
    let mut source = VecSource::new(events);
    let opts = ExiOptions::default();
    let bytes = exi::encode(&mut source, &opts, false, false).unwrap();

    let mut serializer = RecordingSerializer::default();
    exi::decode(&bytes, Some(opts), &mut serializer).unwrap();

    assert_eq!(
        *serializer.events.borrow(),
        vec!["SD".to_string(), "SE(a)".to_string(), "EE(a)".to_string(), "ED".to_string()]
    );
}

/// Scenario 2: a cookie-prefixed, in-band-options header (byte-aligned,
/// strict) leaves the stream aligned to a byte boundary once the header is
/// fully consumed.
#[test]
fn cookie_and_in_band_options_leave_stream_aligned() {
    let opts = ExiOptions { alignment: Some(AlignmentKind::ByteAligned), strict: true, ..Default::default() };

    let mut w = BitWriter::new();
    header::write_header_prefix(&mut w, true, true, header::CURRENT_EXI_VERSION);
    encode_options_document(&mut w, &opts);
    header::write_header_align(&mut w, &opts);
    let (bytes, _) = w.finalize();
    assert_eq!(&bytes[0..4], b"$EXI");

    let mut r = BitReader::new(&bytes);
    let prefix = header::decode_header_prefix(&mut r).unwrap();
    assert!(prefix.has_cookie);
    assert!(prefix.has_options);

    let mut decoded_opts = decode_options_document(&mut r).unwrap();
    assert_eq!(decoded_opts.alignment, Some(AlignmentKind::ByteAligned));
    assert!(decoded_opts.strict);

    header::finish_header(&mut r, &mut decoded_opts).unwrap();
    assert_eq!(r.tell().bit, 0);
}

/// Scenario 3: a strict-mode element grammar has no slot for an event code
/// that addresses more productions than currently exist (a grammar grows
/// spare code space whenever its production count isn't a power of two — two
/// learned AT productions plus the generic fallback gives three slots, which
/// needs two bits and therefore one unaddressed code, `0b11`). Decoding that
/// code under `strict` options returns `StrictProductionForbidden`, not the
/// generic `GrammarViolation` a non-strict stream would get for the same
/// out-of-range index.
#[test]
fn strict_mode_flags_an_unaddressable_code_specifically() {
    let opts = ExiOptions { strict: true, ..Default::default() };

    let mut engine = GrammarEngine::new();
    engine.on_sd();
    engine.on_se((0, 0));
    engine.learn_at((1, 0));
    engine.learn_at((1, 1));

    let mut w = BitWriter::new();
    w.write_bits(0b11, 2);
    let (bytes, _) = w.finalize();

    let mut r = BitReader::new(&bytes);
    let err = engine.next_term(&mut r, &opts).unwrap_err();
    assert_eq!(err.kind, ExiErrorKind::StrictProductionForbidden);
    assert_eq!(err.position.byte, 0);
    assert_eq!(err.position.bit, 2);
}

/// Scenario 4: a value partition bounded to capacity 2 evicts its oldest
/// entry FIFO-style once a third distinct value is written, and a decoder
/// reading the same bytes back reconstructs all three values by literal on
/// the first pass.
#[test]
fn value_partition_evicts_oldest_entry_at_capacity() {
    let opts = ExiOptions { value_partition_capacity: Some(2), ..Default::default() };
    let key = (0u64, 0u64);

    let mut writer_tables = StringTables::new(&opts);
    let mut w = BitWriter::new();
    writer_tables.write_value(&mut w, key, "a");
    writer_tables.write_value(&mut w, key, "b");
    writer_tables.write_value(&mut w, key, "c");
    let (bytes, _) = w.finalize();

    let mut reader_tables = StringTables::new(&opts);
    let mut r = BitReader::new(&bytes);
    assert_eq!(reader_tables.read_value(&mut r, key).unwrap(), "a");
    assert_eq!(reader_tables.read_value(&mut r, key).unwrap(), "b");
    assert_eq!(reader_tables.read_value(&mut r, key).unwrap(), "c");

    // Capacity 2 means only "b" and "c" survived the writes above; a repeat
    // of the evicted "a" must now cost a fresh literal, not a global hit.
    let mut w2 = BitWriter::new();
    writer_tables.write_value(&mut w2, key, "a");
    let (bytes2, _) = w2.finalize();
    assert_eq!(bytes2[0] >> 6, 0b10);
}

/// Scenario 5: a brand-new prefixed element introduces both a URI table
/// entry and a namespace declaration. `NS` is a `StartTagContent` production
/// (only addressable once an element frame is open), so it is emitted after
/// the `SE` that opens that frame, not before it — the URI entry the new
/// qname's prefix resolves against is created by `SE`'s own QName encoding,
/// and `NS` then records that "x" is the prefix in local use for it.
#[test]
fn schemaless_qname_with_namespace_on_a_new_element() {
    let opts = ExiOptions { preserve: PreserveSet::PREFIXES, ..Default::default() };

    let events = vec![
        XmlEvent::StartDocument,
        XmlEvent::StartElement(QName::new("u", "foo").with_prefix("x")),
        XmlEvent::Namespace { uri: "u".to_string(), prefix: "x".to_string(), local_element_ns: true },
        XmlEvent::EndElement(QName::new("u", "foo")),
        XmlEvent::EndDocument,
    ];
    let mut source = VecSource::new(events);
    let bytes = exi::encode(&mut source, &opts, false, false).unwrap();

    let mut serializer = RecordingSerializer::default();
    exi::decode(&bytes, Some(opts), &mut serializer).unwrap();

    assert_eq!(
        *serializer.events.borrow(),
        vec![
            "SD".to_string(),
            "SE(foo)".to_string(),
            "NS(u,x,true)".to_string(),
            "EE(foo)".to_string(),
            "ED".to_string(),
        ]
    );
}

/// Scenario 6: pre-compression alignment pads the stream to a byte boundary
/// right after the header, with the first body bit at offset 0 of that byte.
#[test]
fn pre_compression_alignment_pads_header_to_a_byte_boundary() {
    let opts = ExiOptions { alignment: Some(AlignmentKind::PreCompression), ..Default::default() };

    let mut w = BitWriter::new();
    header::write_header_prefix(&mut w, true, false, header::CURRENT_EXI_VERSION);
    // The cookie-plus-version prefix lands at bit offset 2 of its 6th byte —
    // not already aligned — so this exercises a genuine non-zero pad, unlike
    // the no-cookie, version-1 case which happens to total exactly 8 bits.
    assert_ne!(w.tell().bit, 0);
    header::write_header_align(&mut w, &opts);
    assert_eq!(w.tell().bit, 0);
    let (bytes, _) = w.finalize();

    let mut r = BitReader::new(&bytes);
    let mut decoded_opts = opts.clone();
    header::decode_header_out_of_band(&mut r, &mut decoded_opts).unwrap();
    assert_eq!(r.tell().bit, 0);
    assert_eq!(decoded_opts.resolved_alignment(), AlignmentKind::PreCompression);
}

/// §4.1 "Alignment discipline": under byte-aligned options every primitive
/// atom (event code, compact ID, value) individually pads to a byte boundary
/// rather than packing bit-to-bit, yet the full encode/decode pipeline still
/// round-trips an attribute-bearing document identically to the bit-packed
/// case.
#[test]
fn byte_aligned_document_round_trips_through_full_encode_decode() {
    let opts = ExiOptions { alignment: Some(AlignmentKind::ByteAligned), ..Default::default() };

    let events = vec![
        XmlEvent::StartDocument,
        XmlEvent::StartElement(QName::new("", "a")),
        XmlEvent::Attribute(QName::new("", "k"), "v".to_string()),
        XmlEvent::Characters("hi".to_string()),
        XmlEvent::EndElement(QName::new("", "a")),
        XmlEvent::EndDocument,
    ];
    let mut source = VecSource::new(events);
    let bytes = exi::encode(&mut source, &opts, false, false).unwrap();

    let mut serializer = RecordingSerializer::default();
    exi::decode(&bytes, Some(opts), &mut serializer).unwrap();

    assert_eq!(
        *serializer.events.borrow(),
        vec!["SD".to_string(), "SE(a)".to_string(), "AT(k=v)".to_string(), "EE(a)".to_string(), "ED".to_string()]
    );
}
