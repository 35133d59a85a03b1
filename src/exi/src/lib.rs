//! A schema-optional (builtin/schemaless) Efficient XML Interchange (EXI)
//! processor: bit-packed stream I/O, header decode, the builtin grammar
//! state machine, string/value tables, and the body decoder/encoder that
//! drives them against a [`serializer::Serializer`] / [`serializer::XmlEventSource`].
//!
//! See each module's doc comment for the corresponding spec component
//! (`stream` = C1, primitive codecs live on `stream`'s reader/writer = C2,
//! `tables` = C3, `grammar` = C4, `header` = C5, `body` = C6).

pub mod body;
pub mod error;
pub mod grammar;
pub mod header;
pub mod options;
pub mod serializer;
pub mod stream;
pub mod tables;

pub use body::{decode, encode};
pub use error::{ExiError, ExiErrorKind, Result, StreamPosition};
pub use options::{AlignmentKind, ExiOptions, PreserveSet};
pub use serializer::{EventStatus, QName, Serializer, XmlEvent, XmlEventSource};
