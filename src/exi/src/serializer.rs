//! The event sink/source interfaces the body processor drives (§6
//! "Serializer interface").
//!
//! Grounded on `original_source/include/exi/Decode/Serializer.hpp`: a trait
//! with one method per event term, each defaulted to a no-op `Continue` so
//! implementers only override the events they care about.

/// A qualified name: URI, local name, and an optional prefix (§3 "QName").
/// The prefix is only present when `Preserve::Prefixes` is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QName {
    pub uri: String,
    pub local_name: String,
    pub prefix: Option<String>,
}

impl QName {
    pub fn new(uri: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self { uri: uri.into(), local_name: local_name.into(), prefix: None }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// What a [`Serializer`] callback asks the body processor to do next,
/// mirroring `ExiError::OK`/`ExiError::DONE` plus a user error escape hatch
/// (§6 "each callback returns a status").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Continue,
    Done,
    Error(String),
}

/// Receives decoded events in document order, or supplies them for encoding
/// (§4.6 "Persistence contract with Serializer").
///
/// Every method defaults to a no-op that continues decoding; implementors
/// override only the events relevant to them, exactly as
/// `original_source/include/exi/Decode/Serializer.hpp` does with C++ virtual
/// defaults.
pub trait Serializer {
    fn sd(&mut self) -> EventStatus {
        EventStatus::Continue
    }

    fn ed(&mut self) -> EventStatus {
        EventStatus::Done
    }

    fn se(&mut self, _name: &QName) -> EventStatus {
        EventStatus::Continue
    }

    fn ee(&mut self, _name: &QName) -> EventStatus {
        EventStatus::Continue
    }

    fn at(&mut self, _name: &QName, _value: &str) -> EventStatus {
        EventStatus::Continue
    }

    fn ns(&mut self, _uri: &str, _prefix: &str, _local_element_ns: bool) -> EventStatus {
        EventStatus::Continue
    }

    fn ch(&mut self, _value: &str) -> EventStatus {
        EventStatus::Continue
    }

    fn cm(&mut self, _text: &str) -> EventStatus {
        EventStatus::Continue
    }

    fn pi(&mut self, _target: &str, _text: &str) -> EventStatus {
        EventStatus::Continue
    }

    fn dt(&mut self, _name: &str, _public_id: &str, _system_id: &str, _text: &str) -> EventStatus {
        EventStatus::Continue
    }

    fn er(&mut self, _name: &str) -> EventStatus {
        EventStatus::Continue
    }

    fn sc(&mut self) -> EventStatus {
        EventStatus::Continue
    }

    /// True if strings passed to callbacks must outlive the call (§4.6). The
    /// default is conservative — most serializers copy what they need.
    fn needs_persistence(&self) -> bool {
        false
    }
}

/// One XML-shaped event, as produced by an [`XmlEventSource`] for the
/// encoder to consume (§6 "XML source interface").
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    StartDocument,
    EndDocument,
    StartElement(QName),
    EndElement(QName),
    Attribute(QName, String),
    Namespace { uri: String, prefix: String, local_element_ns: bool },
    Characters(String),
    Comment(String),
    ProcessingInstruction { target: String, text: String },
    Doctype { name: String, public_id: String, system_id: String, text: String },
    EntityReference(String),
}

/// A SAX-like pull source the encoder drives one event at a time.
pub trait XmlEventSource {
    fn next_event(&mut self) -> Result<Option<XmlEvent>, crate::error::ExiError>;
}
