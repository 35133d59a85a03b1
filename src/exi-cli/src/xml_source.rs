//! A minimal SAX-style [`XmlEventSource`] built on `quick_xml::Reader`
//! (§6 "XML source interface"), feeding the `encode` subcommand. Grounded on
//! `pmikstacki-bsharp/src/bsharp_analysis/src/workspace/csproj/reader.rs`'s
//! `reader.read_event_into(&mut buf)` loop.
//!
//! `quick_xml::events::Event::Empty` (a self-closing tag) has no EXI
//! counterpart — the builtin grammar always pairs `SE` with a later `EE` —
//! so each `Empty` is queued as a start immediately followed by an end.
//! Attribute/namespace declarations on a tag arrive as separate EXI events,
//! so each `Start`/`Empty` is decomposed into a `StartElement` followed by
//! its `Namespace` and `Attribute` events.

use std::collections::VecDeque;

use exi::{ExiError, ExiErrorKind, QName, XmlEvent};
use quick_xml::events::Event as QxEvent;
use quick_xml::Reader as QxReader;

pub struct XmlSource<'a> {
    reader: QxReader<&'a [u8]>,
    buf: Vec<u8>,
    pending: VecDeque<XmlEvent>,
    started: bool,
    finished: bool,
}

impl<'a> XmlSource<'a> {
    pub fn new(content: &'a str) -> Self {
        let mut reader = QxReader::from_str(content);
        reader.config_mut().trim_text(true);
        Self { reader, buf: Vec::new(), pending: VecDeque::new(), started: false, finished: false }
    }

    fn parse_qname(raw: &str) -> QName {
        match raw.split_once(':') {
            Some((prefix, local)) => QName::new("", local).with_prefix(prefix),
            None => QName::new("", raw),
        }
    }

    fn queue_start_tag(&mut self, start: &quick_xml::events::BytesStart) -> Result<(), ExiError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        self.pending.push_back(XmlEvent::StartElement(Self::parse_qname(&name)));

        for attr in start.attributes() {
            let attr = attr.map_err(|e| parse_error(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| parse_error(e.to_string()))?
                .into_owned();

            if let Some(prefix) = key.strip_prefix("xmlns:") {
                self.pending.push_back(XmlEvent::Namespace {
                    uri: value,
                    prefix: prefix.to_string(),
                    local_element_ns: true,
                });
            } else if key == "xmlns" {
                self.pending.push_back(XmlEvent::Namespace {
                    uri: value,
                    prefix: String::new(),
                    local_element_ns: true,
                });
            } else {
                self.pending.push_back(XmlEvent::Attribute(Self::parse_qname(&key), value));
            }
        }
        Ok(())
    }

    fn pull_more(&mut self) -> Result<(), ExiError> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(QxEvent::Start(start)) => {
                    self.queue_start_tag(&start)?;
                    return Ok(());
                }
                Ok(QxEvent::Empty(start)) => {
                    self.queue_start_tag(&start)?;
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    self.pending.push_back(XmlEvent::EndElement(Self::parse_qname(&name)));
                    return Ok(());
                }
                Ok(QxEvent::End(end)) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.pending.push_back(XmlEvent::EndElement(Self::parse_qname(&name)));
                    return Ok(());
                }
                Ok(QxEvent::Text(text)) => {
                    let value = text.unescape().map_err(|e| parse_error(e.to_string()))?.into_owned();
                    if !value.is_empty() {
                        self.pending.push_back(XmlEvent::Characters(value));
                        return Ok(());
                    }
                }
                Ok(QxEvent::Comment(text)) => {
                    let value = text.unescape().map_err(|e| parse_error(e.to_string()))?.into_owned();
                    self.pending.push_back(XmlEvent::Comment(value));
                    return Ok(());
                }
                Ok(QxEvent::PI(text)) => {
                    let raw = String::from_utf8_lossy(text.as_ref()).into_owned();
                    let (target, content) = raw.split_once(' ').unwrap_or((raw.as_str(), ""));
                    self.pending.push_back(XmlEvent::ProcessingInstruction {
                        target: target.to_string(),
                        text: content.to_string(),
                    });
                    return Ok(());
                }
                Ok(QxEvent::Decl(_)) | Ok(QxEvent::DocType(_)) => continue,
                Ok(QxEvent::Eof) => {
                    self.pending.push_back(XmlEvent::EndDocument);
                    self.finished = true;
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => return Err(parse_error(e.to_string())),
            }
        }
    }
}

fn parse_error(message: String) -> ExiError {
    ExiError::at_start(ExiErrorKind::OptionsInvalid(message))
}

impl<'a> exi::XmlEventSource for XmlSource<'a> {
    fn next_event(&mut self) -> Result<Option<XmlEvent>, ExiError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            return Ok(Some(XmlEvent::StartDocument));
        }
        self.pull_more()?;
        Ok(self.pending.pop_front())
    }
}
