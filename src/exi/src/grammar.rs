//! The built-in (schemaless) grammar state machine (§4.4, component C4).
//!
//! Grounded on `original_source/include/exi/Grammar/Grammar.hpp` and
//! `original_source/lib/exi/Grammar/Grammar.cpp` (`BuiltinGrammar::getTerm`/
//! `addTerm`: a learned-production list whose first-level code width is
//! recomputed from the list length, `CompactIDLog2`, every time a production
//! is learned) for the per-element learning shape, generalized here to the
//! full production tree spec.md §4.4 lays out for `DocContent`/`DocEnd`/
//! `StartTagContent`/`ElementContent`.

use std::collections::HashMap;

use crate::error::{ExiError, ExiErrorKind, Result};
use crate::options::{ExiOptions, PreserveSet};
use crate::stream::{BitReader, BitWriter};

/// One of the twelve event terms a production may resolve to (§3 "Event
/// term"). `Sd`/`Ed` only ever appear as the Document/DocEnd productions
/// the body processor handles directly; the grammar tree itself never lists
/// them as a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTerm {
    Sd,
    Ed,
    Se,
    Ee,
    At,
    Ch,
    Ns,
    Cm,
    Pi,
    Dt,
    Er,
    Sc,
}

/// A qname identity used as a grammar's learning key: `(uri_id, local_id)`.
pub type QNameKey = (u64, u64);

/// One slot in a production tree: either a terminal event term, or a group
/// that needs one further level of code to disambiguate (§4.4 "Code reading
/// algorithm").
#[derive(Debug, Clone)]
enum Production {
    Term(EventTerm),
    /// A term with a qname already bound by learning — addressable with the
    /// same single code part as any other terminal, but decode/encode must
    /// skip the qname hit/miss dance and use the bound identity directly.
    LearnedQName(EventTerm, QNameKey),
    Group(Vec<Production>),
}

/// Builds a right-leaning binary chain over `items`, matching the
/// `x.0`, `x.1.0`, `x.1.1`, ... numbering spec.md §4.4 shows for DT/CM/PI:
/// a flat 2-item group at the leaf, a fresh nesting level for every item
/// before that.
fn chain(items: Vec<EventTerm>) -> Option<Production> {
    let mut items = items;
    if items.is_empty() {
        return None;
    }
    if items.len() == 1 {
        return Some(Production::Term(items.remove(0)));
    }
    if items.len() == 2 {
        let b = items.remove(1);
        let a = items.remove(0);
        return Some(Production::Group(vec![Production::Term(a), Production::Term(b)]));
    }
    let head = items.remove(0);
    let rest = chain(items).expect("non-empty after removing head");
    Some(Production::Group(vec![Production::Term(head), rest]))
}

/// `ChildContentItems(n, m)` (§4.4): SE(*), CH, optionally ER, and a CM/PI
/// tail — built fresh for both `StartTagContent`'s generic tail and
/// `ElementContent`'s second branch.
fn child_content_items(opts: &ExiOptions) -> Production {
    let mut items = vec![EventTerm::Se, EventTerm::Ch];
    if !opts.strict && opts.preserve.has(PreserveSet::DTDS) {
        items.push(EventTerm::Er);
    }
    let mut tail = Vec::new();
    if !opts.strict && opts.preserve.has(PreserveSet::COMMENTS) {
        tail.push(EventTerm::Cm);
    }
    if !opts.strict && opts.preserve.has(PreserveSet::PIS) {
        tail.push(EventTerm::Pi);
    }
    if let Some(tail) = chain(tail) {
        items_to_group(items, tail)
    } else {
        chain(items).expect("SE/CH are always present")
    }
}

/// Appends a pre-built tail production as the final chain link after a flat
/// items list, used when `ChildContentItems` needs both its always-present
/// head items and an optional CM/PI tail group.
fn items_to_group(mut items: Vec<EventTerm>, tail: Production) -> Production {
    if items.is_empty() {
        return tail;
    }
    let head = items.remove(0);
    let rest = if items.is_empty() {
        tail
    } else {
        items_to_group(items, tail)
    };
    Production::Group(vec![Production::Term(head), rest])
}

/// `StartTagContent`'s fixed (non-learned) production group (§4.4): the
/// `0.x` tree of EE / AT(*) / NS? / SC? / ChildContentItems.
fn start_tag_content_generic(opts: &ExiOptions) -> Production {
    let mut items = vec![EventTerm::Ee, EventTerm::At];
    if !opts.strict && opts.preserve.has(PreserveSet::PREFIXES) {
        items.push(EventTerm::Ns);
    }
    if !opts.strict && opts.self_contained {
        items.push(EventTerm::Sc);
    }
    items_to_group(items, child_content_items(opts))
}

/// `ElementContent`'s fixed production group (§4.4): EE, or
/// `ChildContentItems`.
fn element_content_generic(opts: &ExiOptions) -> Production {
    Production::Group(vec![Production::Term(EventTerm::Ee), child_content_items(opts)])
}

/// `StrictProductionForbidden` when `strict` accounts for every way a term
/// can go missing from a tree lookup; `GrammarViolation` otherwise.
fn forbidden_or_violation(strict: bool) -> ExiErrorKind {
    if strict {
        ExiErrorKind::StrictProductionForbidden
    } else {
        ExiErrorKind::GrammarViolation
    }
}

fn compact_id_width(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

/// Reads/writes a single production-tree level, recursing into nested
/// groups as needed (§4.4 "Code reading algorithm", "up to three parts").
///
/// A strict-mode tree is always the non-strict tree with the CM/PI/DT/ER/NS/SC
/// slots removed and nothing else changed, so an index a strict tree can't
/// resolve is, by construction, a code that only makes sense in a non-strict
/// stream. Reported as `StrictProductionForbidden` rather than the generic
/// `GrammarViolation` so callers can tell "this code names a production the
/// current options forbid" apart from "this code addresses nothing at all"
/// (§4.4 "Failure semantics").
fn read_production<'a>(reader: &mut BitReader, root: &'a Production, strict: bool) -> Result<&'a Production> {
    let mut node = root;
    loop {
        match node {
            Production::Term(_) | Production::LearnedQName(..) => return Ok(node),
            Production::Group(slots) => {
                let width = compact_id_width(slots.len() as u64);
                let idx = if width == 0 { 0 } else { reader.read_bits(width)? } as usize;
                let slot = slots
                    .get(idx)
                    .ok_or_else(|| ExiError::new(forbidden_or_violation(strict), reader.tell()))?;
                node = slot;
            }
        }
    }
}

/// Finds the code-part path to `target` within `root`, writing each part's
/// bits as it descends. Returns `GrammarViolation` if `target` is not one of
/// `root`'s productions (callers only ask for terms they know are present).
fn leaf_count(node: &Production) -> usize {
    match node {
        Production::Term(_) | Production::LearnedQName(..) => 1,
        Production::Group(slots) => slots.iter().map(leaf_count).sum(),
    }
}

fn write_production(writer: &mut BitWriter, root: &Production, target: usize) -> Result<()> {
    match root {
        Production::Term(_) | Production::LearnedQName(..) => {
            if target == 0 {
                Ok(())
            } else {
                Err(ExiError::at_start(ExiErrorKind::GrammarViolation)
                    .with_context("production index not found in grammar tree"))
            }
        }
        Production::Group(slots) => {
            let width = compact_id_width(slots.len() as u64);
            let mut offset = target;
            for (idx, slot) in slots.iter().enumerate() {
                let count = leaf_count(slot);
                if offset < count {
                    if width > 0 {
                        writer.write_bits(idx as u64, width);
                    }
                    return write_production(writer, slot, offset);
                }
                offset -= count;
            }
            Err(ExiError::at_start(ExiErrorKind::GrammarViolation)
                .with_context("production index not found in grammar tree"))
        }
    }
}

/// Flattens a production tree into term order (index = position a caller
/// addresses via [`write_production`]/the resolved leaf of
/// [`read_production`]).
fn flatten<'a>(node: &'a Production, out: &mut Vec<&'a Production>) {
    match node {
        Production::Term(_) | Production::LearnedQName(..) => out.push(node),
        Production::Group(slots) => {
            for slot in slots {
                flatten(slot, out);
            }
        }
    }
}

/// A per-element-qname grammar pair, instantiated the first time that
/// element name is seen (§4.4 "Built-in element grammars"). Learned
/// productions are prepended as fresh level-1 slots ahead of the fixed
/// generic group, so the grammar's first-level width grows exactly as
/// `BuiltinGrammar::addTerm`'s `CompactIDLog2` recomputation does.
struct ElementGrammar {
    learned_start_tag: Vec<(EventTerm, QNameKey)>,
    learned_content: Vec<(EventTerm, QNameKey)>,
}

impl ElementGrammar {
    fn new() -> Self {
        Self { learned_start_tag: Vec::new(), learned_content: Vec::new() }
    }

    fn start_tag_tree(&self, opts: &ExiOptions) -> Production {
        let mut slots: Vec<Production> = self
            .learned_start_tag
            .iter()
            .map(|(t, q)| Production::LearnedQName(*t, *q))
            .collect();
        slots.push(start_tag_content_generic(opts));
        Production::Group(slots)
    }

    fn content_tree(&self, opts: &ExiOptions) -> Production {
        let mut slots: Vec<Production> = self
            .learned_content
            .iter()
            .map(|(t, q)| Production::LearnedQName(*t, *q))
            .collect();
        slots.push(element_content_generic(opts));
        Production::Group(slots)
    }

    /// A learned AT always slots in ahead of the generic AT(*), so a later
    /// AT with the same qname reads as a single short code. Order: AT
    /// entries accumulate before SE/CH learning only affects content, not
    /// start tag, so this never needs de-duplication across the two lists.
    fn learn_start_tag(&mut self, term: EventTerm, qname: QNameKey) {
        if !self.learned_start_tag.iter().any(|(t, q)| *t == term && *q == qname) {
            self.learned_start_tag.push((term, qname));
        }
    }

    fn learn_content(&mut self, term: EventTerm, qname: QNameKey) {
        if !self.learned_content.iter().any(|(t, q)| *t == term && *q == qname) {
            self.learned_content.push((term, qname));
        }
    }
}

/// Which nonterminal is active for the top-level (non-element) part of a
/// document (§3 "Grammar state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopState {
    Document,
    DocContent,
    DocEnd,
}

/// A stack frame for an in-progress element: its qname identity (so
/// learning targets the right [`ElementGrammar`]) and which half of its
/// grammar (StartTag or Content) is active.
struct ElementFrame {
    qname: QNameKey,
    in_start_tag: bool,
}

/// The decoded (or to-be-encoded) shape of one grammar step: the term, plus
/// the qname identity if the production already bound one via learning.
pub struct GrammarStep {
    pub term: EventTerm,
    pub learned_qname: Option<QNameKey>,
}

/// Drives the builtin schemaless grammar (§4.4, component C4): a stack of
/// element frames plus document-level state, dispatching event-code
/// read/write through the production trees above and recording learned
/// productions as they're used.
pub struct GrammarEngine {
    top: TopState,
    stack: Vec<ElementFrame>,
    elements: HashMap<QNameKey, ElementGrammar>,
}

impl GrammarEngine {
    pub fn new() -> Self {
        Self {
            top: TopState::Document,
            stack: Vec::new(),
            elements: HashMap::new(),
        }
    }

    fn element_grammar(&mut self, qname: QNameKey) -> &mut ElementGrammar {
        self.elements.entry(qname).or_insert_with(ElementGrammar::new)
    }

    fn doc_content_tree(opts: &ExiOptions) -> Production {
        let mut tail = Vec::new();
        if !opts.strict && opts.preserve.has(PreserveSet::DTDS) {
            tail.push(EventTerm::Dt);
        }
        let mut cmpi = Vec::new();
        if !opts.strict && opts.preserve.has(PreserveSet::COMMENTS) {
            cmpi.push(EventTerm::Cm);
        }
        if !opts.strict && opts.preserve.has(PreserveSet::PIS) {
            cmpi.push(EventTerm::Pi);
        }
        let rest = match (chain(tail), chain(cmpi)) {
            (Some(Production::Term(t)), Some(cmpi)) => {
                Some(Production::Group(vec![Production::Term(t), cmpi]))
            }
            (Some(dt_only), None) => Some(dt_only),
            (None, Some(cmpi)) => Some(cmpi),
            (None, None) => None,
            (Some(Production::Group(_)), _) => unreachable!("DT tail is always a single term"),
        };
        match rest {
            Some(rest) => Production::Group(vec![Production::Term(EventTerm::Se), rest]),
            None => Production::Term(EventTerm::Se),
        }
    }

    fn doc_end_tree(opts: &ExiOptions) -> Production {
        let mut cmpi = Vec::new();
        if !opts.strict && opts.preserve.has(PreserveSet::COMMENTS) {
            cmpi.push(EventTerm::Cm);
        }
        if !opts.strict && opts.preserve.has(PreserveSet::PIS) {
            cmpi.push(EventTerm::Pi);
        }
        match chain(cmpi) {
            Some(rest) => Production::Group(vec![Production::Term(EventTerm::Ed), rest]),
            None => Production::Term(EventTerm::Ed),
        }
    }

    /// Reads the next event code and resolves it to a [`GrammarStep`]
    /// (§4.4 "Code reading algorithm", "Transitions"). Dispatches on whether
    /// an element frame is open: an empty stack means the document-level
    /// `Document`/`DocContent`/`DocEnd` nonterminals are in play, otherwise
    /// the top frame's per-element grammar drives the read.
    pub fn next_term(&mut self, reader: &mut BitReader, opts: &ExiOptions) -> Result<GrammarStep> {
        if !self.stack.is_empty() {
            return self.next_element_term(reader, opts);
        }

        match self.top {
            TopState::Document => {
                Ok(GrammarStep { term: EventTerm::Sd, learned_qname: None })
            }
            TopState::DocEnd => {
                let tree = Self::doc_end_tree(opts);
                let prod = read_production(reader, &tree, opts.strict)?;
                Ok(GrammarStep { term: production_term(prod), learned_qname: None })
            }
            TopState::DocContent => {
                let tree = Self::doc_content_tree(opts);
                let prod = read_production(reader, &tree, opts.strict)?;
                Ok(GrammarStep { term: production_term(prod), learned_qname: None })
            }
        }
    }

    fn next_element_term(&mut self, reader: &mut BitReader, opts: &ExiOptions) -> Result<GrammarStep> {
        let frame = self.stack.last().ok_or_else(|| {
            ExiError::new(ExiErrorKind::UnexpectedEE, reader.tell())
        })?;
        let qname = frame.qname;
        let in_start_tag = frame.in_start_tag;

        let grammar = self.elements.entry(qname).or_insert_with(ElementGrammar::new);
        let tree = if in_start_tag { grammar.start_tag_tree(opts) } else { grammar.content_tree(opts) };
        let prod = read_production(reader, &tree, opts.strict)?;

        match prod {
            Production::LearnedQName(term, bound) => {
                Ok(GrammarStep { term: *term, learned_qname: Some(*bound) })
            }
            Production::Term(term) => Ok(GrammarStep { term: *term, learned_qname: None }),
            Production::Group(_) => unreachable!("read_production never returns a Group"),
        }
    }

    /// Width (in bits) of the code that would select `term` right now, for
    /// the encoder to mirror when writing the first part — kept in lockstep
    /// with [`GrammarEngine::next_term`] by construction (same tree
    /// builders).
    fn current_tree(&mut self, opts: &ExiOptions) -> Production {
        match self.top {
            TopState::Document => Production::Term(EventTerm::Sd),
            TopState::DocContent => Self::doc_content_tree(opts),
            TopState::DocEnd => Self::doc_end_tree(opts),
        }
    }

    fn current_element_tree(&mut self, opts: &ExiOptions) -> Option<Production> {
        let frame = self.stack.last()?;
        let qname = frame.qname;
        let in_start_tag = frame.in_start_tag;
        let grammar = self.elements.entry(qname).or_insert_with(ElementGrammar::new);
        Some(if in_start_tag { grammar.start_tag_tree(opts) } else { grammar.content_tree(opts) })
    }

    /// Writes the event code selecting `term` (optionally with a bound
    /// `qname` if this write is for a production already learned), then
    /// drives the same state transition `next_term` would.
    pub fn write_term(
        &mut self,
        writer: &mut BitWriter,
        opts: &ExiOptions,
        term: EventTerm,
        qname: Option<QNameKey>,
    ) -> Result<()> {
        if self.stack.is_empty() {
            if matches!(self.top, TopState::Document) {
                // Document has a single production (`SD`); it costs zero bits.
                return Ok(());
            }
            let tree = self.current_tree(opts);
            let mut flat = Vec::new();
            flatten(&tree, &mut flat);
            let idx = flat
                .iter()
                .position(|p| production_term(p) == term)
                .ok_or_else(|| ExiError::at_start(forbidden_or_violation(opts.strict)))?;
            return write_production(writer, &tree, idx);
        }

        let tree = self
            .current_element_tree(opts)
            .ok_or_else(|| ExiError::new(ExiErrorKind::UnexpectedEE, writer.tell()))?;
        let mut flat = Vec::new();
        flatten(&tree, &mut flat);
        let idx = flat
            .iter()
            .position(|p| match p {
                Production::LearnedQName(t, q) => *t == term && Some(*q) == qname,
                Production::Term(t) => *t == term && qname.is_none(),
                Production::Group(_) => false,
            })
            .ok_or_else(|| ExiError::at_start(forbidden_or_violation(opts.strict)))?;
        write_production(writer, &tree, idx)
    }

    /// Transitions on `SD` (§4.4 "Transitions": `Document` → `DocContent`).
    pub fn on_sd(&mut self) {
        self.top = TopState::DocContent;
    }

    /// Transitions on `SE`: the enclosing frame (if any) leaves StartTag for
    /// Content, since a child `SE` is itself a `ChildContentItems`
    /// production, then a new frame is pushed in StartTag state for the
    /// element just opened.
    pub fn on_se(&mut self, qname: QNameKey) {
        self.enter_content();
        self.stack.push(ElementFrame { qname, in_start_tag: true });
    }

    /// Records that `qname` was learned as a child `SE` of the element
    /// currently open one level up (the frame *below* the one just pushed
    /// by [`GrammarEngine::on_se`]).
    pub fn learn_se(&mut self, parent_qname: Option<QNameKey>, qname: QNameKey) {
        if let Some(parent) = parent_qname {
            self.element_grammar(parent).learn_content(EventTerm::Se, qname);
        }
    }

    /// Transitions StartTag → Content for the top frame (first non-AT/NS/SC
    /// production seen).
    pub fn enter_content(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.in_start_tag = false;
        }
    }

    /// Transitions on `EE`: pops the element stack; if now empty, the
    /// top-level state becomes `DocEnd` (§4.4 "Transitions").
    pub fn on_ee(&mut self) -> Result<()> {
        if self.stack.pop().is_none() {
            return Err(ExiError::at_start(ExiErrorKind::UnexpectedEE));
        }
        if self.stack.is_empty() {
            self.top = TopState::DocEnd;
        } else {
            self.enter_content();
        }
        Ok(())
    }

    /// Records a learned `AT(qname)` production on the currently open
    /// element's StartTag grammar.
    pub fn learn_at(&mut self, qname: QNameKey) {
        if let Some(frame) = self.stack.last() {
            let owner = frame.qname;
            self.element_grammar(owner).learn_start_tag(EventTerm::At, qname);
        }
    }

    /// Records a learned `CH` production (schemaless CH learning has no
    /// qname to bind; kept for symmetry with `learn_at`/`learn_se`, but the
    /// builtin grammar always keeps a generic `CH` in the fixed tail so
    /// there is nothing to learn here beyond entering content state).
    pub fn learn_ch(&mut self) {
        self.enter_content();
    }


    pub fn current_element_qname(&self) -> Option<QNameKey> {
        self.stack.last().map(|f| f.qname)
    }

    /// True if `qname` is already a learned `AT` production on the
    /// currently open element — callers use this to decide whether to
    /// address the encoded event code via the learned shortcut or the
    /// generic `AT(*)` fallback.
    pub fn has_learned_at(&self, qname: QNameKey) -> bool {
        self.stack
            .last()
            .and_then(|frame| self.elements.get(&frame.qname))
            .is_some_and(|g| g.learned_start_tag.iter().any(|(t, q)| *t == EventTerm::At && *q == qname))
    }

    /// True if `qname` is already a learned `SE` production on `parent`'s
    /// content grammar.
    pub fn has_learned_se(&self, parent: QNameKey, qname: QNameKey) -> bool {
        self.elements
            .get(&parent)
            .is_some_and(|g| g.learned_content.iter().any(|(t, q)| *t == EventTerm::Se && *q == qname))
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl Default for GrammarEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn production_term(p: &Production) -> EventTerm {
    match p {
        Production::Term(t) | Production::LearnedQName(t, _) => *t,
        Production::Group(_) => unreachable!("flattened productions are never groups"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ExiOptions {
        ExiOptions::default()
    }

    #[test]
    fn minimal_document_sd_se_ee_ed() {
        let mut engine = GrammarEngine::new();
        let mut w = BitWriter::new();
        let o = opts();

        engine.write_term(&mut w, &o, EventTerm::Sd, None).unwrap();
        engine.on_sd();
        engine.write_term(&mut w, &o, EventTerm::Se, None).unwrap();
        engine.on_se((0, 0));
        engine.write_term(&mut w, &o, EventTerm::Ee, None).unwrap();
        engine.on_ee().unwrap();
        engine.write_term(&mut w, &o, EventTerm::Ed, None).unwrap();

        let (bytes, _) = w.finalize();

        let mut engine = GrammarEngine::new();
        let mut r = BitReader::new(&bytes);
        let step = engine.next_term(&mut r, &o).unwrap();
        assert_eq!(step.term, EventTerm::Sd);
        engine.on_sd();

        let step = engine.next_term(&mut r, &o).unwrap();
        assert_eq!(step.term, EventTerm::Se);
        engine.on_se((0, 0));

        let step = engine.next_element_term(&mut r, &o).unwrap();
        assert_eq!(step.term, EventTerm::Ee);
        engine.on_ee().unwrap();

        let step = engine.next_term(&mut r, &o).unwrap();
        assert_eq!(step.term, EventTerm::Ed);
    }

    #[test]
    fn ee_with_empty_stack_is_fatal() {
        let mut engine = GrammarEngine::new();
        let err = engine.on_ee().unwrap_err();
        assert_eq!(err.kind, ExiErrorKind::UnexpectedEE);
    }

    #[test]
    fn strict_mode_excludes_comment_productions() {
        let o = ExiOptions { strict: true, ..Default::default() };
        let tree = GrammarEngine::doc_content_tree(&o);
        let mut flat = Vec::new();
        flatten(&tree, &mut flat);
        assert!(flat.iter().all(|p| production_term(p) != EventTerm::Cm));
    }

    #[test]
    fn strict_mode_rejects_comment_term_with_specific_error() {
        let mut engine = GrammarEngine::new();
        let o = ExiOptions { strict: true, ..Default::default() };
        let mut w = BitWriter::new();

        engine.write_term(&mut w, &o, EventTerm::Sd, None).unwrap();
        engine.on_sd();

        let err = engine.write_term(&mut w, &o, EventTerm::Cm, None).unwrap_err();
        assert_eq!(err.kind, ExiErrorKind::StrictProductionForbidden);
    }

    #[test]
    fn learned_attribute_shrinks_next_code_width() {
        let mut engine = GrammarEngine::new();
        let o = opts();
        engine.on_sd();
        engine.on_se((0, 0));

        let before = engine.current_element_tree(&o).unwrap();
        let mut flat = Vec::new();
        flatten(&before, &mut flat);
        let before_len = flat.len();

        engine.learn_at((1, 0));
        let after = engine.current_element_tree(&o).unwrap();
        let mut flat_after = Vec::new();
        flatten(&after, &mut flat_after);
        assert_eq!(flat_after.len(), before_len + 1);
    }
}
