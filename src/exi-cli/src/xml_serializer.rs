//! An XML-text [`Serializer`] sink built on `quick_xml::Writer`, used by the
//! `decode` subcommand (§6 "CLI surface"). The core treats this as an
//! external collaborator; nothing here is part of the EXI processor.
//!
//! `se`/`at`/`ns` arrive as separate callbacks even though they all belong
//! in one `<tag attr="..." xmlns:p="...">` opening, so this sink buffers
//! each open element's attributes and namespace declarations and only
//! writes the tag once content or the matching `ee` forces a decision
//! between `<tag/>` and `<tag>...`.

use std::io::Write;

use exi::{EventStatus, QName, Serializer};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

struct OpenElement {
    qname: QName,
    attrs: Vec<(String, String)>,
    flushed: bool,
}

pub struct XmlSerializer<W: Write> {
    writer: Writer<W>,
    stack: Vec<OpenElement>,
    error: Option<String>,
}

impl<W: Write> XmlSerializer<W> {
    pub fn new(inner: W) -> Self {
        Self { writer: Writer::new(inner), stack: Vec::new(), error: None }
    }

    fn tag_name(qname: &QName) -> String {
        match &qname.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", qname.local_name),
            _ => qname.local_name.clone(),
        }
    }

    fn flush_open(&mut self, self_closing: bool) -> Result<(), String> {
        let Some(top) = self.stack.last_mut() else { return Ok(()) };
        if top.flushed {
            return Ok(());
        }
        top.flushed = true;

        let name = Self::tag_name(&top.qname);
        let mut start = BytesStart::new(name);
        for (key, value) in &top.attrs {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        let event = if self_closing { Event::Empty(start) } else { Event::Start(start) };
        self.writer.write_event(event).map_err(|e| e.to_string())
    }

    fn record_error(&mut self, err: String) -> EventStatus {
        self.error = Some(err.clone());
        EventStatus::Error(err)
    }

    /// The first write error encountered, if any — surfaced by the `decode`
    /// subcommand after the core loop returns (§7 "User error").
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write> Serializer for XmlSerializer<W> {
    fn se(&mut self, name: &QName) -> EventStatus {
        if let Err(e) = self.flush_open(false) {
            return self.record_error(e);
        }
        self.stack.push(OpenElement { qname: name.clone(), attrs: Vec::new(), flushed: false });
        EventStatus::Continue
    }

    fn ee(&mut self, _name: &QName) -> EventStatus {
        let Some(top) = self.stack.pop() else {
            return self.record_error("unbalanced end element".to_string());
        };
        if !top.flushed {
            let name = Self::tag_name(&top.qname);
            let mut start = BytesStart::new(name);
            for (key, value) in &top.attrs {
                start.push_attribute((key.as_str(), value.as_str()));
            }
            if let Err(e) = self.writer.write_event(Event::Empty(start)) {
                return self.record_error(e.to_string());
            }
            return EventStatus::Continue;
        }
        let name = Self::tag_name(&top.qname);
        if let Err(e) = self.writer.write_event(Event::End(BytesEnd::new(name))) {
            return self.record_error(e.to_string());
        }
        EventStatus::Continue
    }

    fn at(&mut self, name: &QName, value: &str) -> EventStatus {
        let Some(top) = self.stack.last_mut() else {
            return self.record_error("attribute outside any element".to_string());
        };
        top.attrs.push((Self::tag_name(name), value.to_string()));
        EventStatus::Continue
    }

    fn ns(&mut self, uri: &str, prefix: &str, local_element_ns: bool) -> EventStatus {
        if !local_element_ns {
            return EventStatus::Continue;
        }
        let Some(top) = self.stack.last_mut() else {
            return self.record_error("namespace declaration outside any element".to_string());
        };
        let key = if prefix.is_empty() { "xmlns".to_string() } else { format!("xmlns:{prefix}") };
        top.attrs.push((key, uri.to_string()));
        EventStatus::Continue
    }

    fn ch(&mut self, value: &str) -> EventStatus {
        if let Err(e) = self.flush_open(false) {
            return self.record_error(e);
        }
        if let Err(e) = self.writer.write_event(Event::Text(BytesText::new(value))) {
            return self.record_error(e.to_string());
        }
        EventStatus::Continue
    }

    fn cm(&mut self, text: &str) -> EventStatus {
        if let Err(e) = self.flush_open(false) {
            return self.record_error(e);
        }
        if let Err(e) = self.writer.write_event(Event::Comment(quick_xml::events::BytesText::new(text))) {
            return self.record_error(e.to_string());
        }
        EventStatus::Continue
    }

    fn pi(&mut self, target: &str, text: &str) -> EventStatus {
        if let Err(e) = self.flush_open(false) {
            return self.record_error(e);
        }
        let content = format!("{target} {text}");
        if let Err(e) = self
            .writer
            .write_event(Event::PI(quick_xml::events::BytesPI::new(content)))
        {
            return self.record_error(e.to_string());
        }
        EventStatus::Continue
    }

    fn needs_persistence(&self) -> bool {
        false
    }
}
