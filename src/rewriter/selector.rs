//! CSS-selector-driven DOM edits and the serializer that applies them.

use std::collections::HashMap;
use std::sync::LazyLock;

use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::node::{Element, Node};
use scraper::{ElementRef, Html, Selector};

use super::{RewriteContext, RewritePass};

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.$").expect("valid regex"));

/// Zero-width space used to keep `1.` from turning into a Markdown list.
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// HTML5 void elements that must not have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose text children are emitted verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// A single edit recorded against a node of a parsed document.
#[derive(Clone, Debug, PartialEq)]
pub enum Edit {
    /// Drop the node and its subtree.
    Remove,
    /// Set (or add) an attribute.
    SetAttr(String, String),
    /// Replace the node's children with escaped text.
    ReplaceText(String),
    /// Replace the whole node with raw markup.
    ReplaceWith(String),
}

/// Edits collected while walking a document, keyed by node.
#[derive(Debug, Default)]
pub struct EditSet {
    edits: HashMap<NodeId, Vec<Edit>>,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: NodeId, edit: Edit) {
        self.edits.entry(node).or_default().push(edit);
    }

    /// Whether `node` is already being removed or replaced wholesale.
    pub fn is_replaced(&self, node: NodeId) -> bool {
        self.edits.get(&node).is_some_and(|edits| {
            edits
                .iter()
                .any(|e| matches!(e, Edit::Remove | Edit::ReplaceWith(_)))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    fn get(&self, node: NodeId) -> &[Edit] {
        self.edits.get(&node).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Serialize `document`, applying `edits` on the way out.
///
/// Fragments parsed with [`Html::parse_fragment`] are wrapped in a synthetic
/// `<html>` element by the parser; that wrapper is not emitted, so a
/// serialized fragment can be re-parsed without nesting.
pub fn serialize(document: &Html, edits: &EditSet) -> String {
    let root = document.tree.root();
    let start = match root.value() {
        Node::Fragment => root
            .first_child()
            .filter(|c| matches!(c.value(), Node::Element(el) if el.name() == "html"))
            .unwrap_or(root),
        _ => root,
    };

    let mut out = String::new();
    if start.id() == root.id() {
        serialize_node(root, edits, false, &mut out);
    } else {
        for child in start.children() {
            serialize_node(child, edits, false, &mut out);
        }
    }
    out
}

fn serialize_node(node: NodeRef<'_, Node>, edits: &EditSet, raw_text: bool, out: &mut String) {
    let node_edits = edits.get(node.id());
    if node_edits.contains(&Edit::Remove) {
        return;
    }
    if let Some(markup) = node_edits.iter().find_map(|e| match e {
        Edit::ReplaceWith(markup) => Some(markup),
        _ => None,
    }) {
        out.push_str(markup);
        return;
    }

    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                serialize_node(child, edits, raw_text, out);
            }
        }
        Node::Element(el) => {
            let tag = el.name();
            out.push('<');
            out.push_str(tag);
            push_attrs(el, node_edits, out);
            out.push('>');

            if VOID_ELEMENTS.contains(&tag) {
                return;
            }

            let replacement = node_edits.iter().rev().find_map(|e| match e {
                Edit::ReplaceText(text) => Some(text),
                _ => None,
            });
            if let Some(text) = replacement {
                push_escaped_text(text, out);
            } else {
                let raw = RAW_TEXT_ELEMENTS.contains(&tag);
                for child in node.children() {
                    serialize_node(child, edits, raw, out);
                }
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        Node::Text(text) => {
            if raw_text {
                out.push_str(text);
            } else {
                push_escaped_text(text, out);
            }
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        _ => {}
    }
}

fn push_attrs(el: &Element, node_edits: &[Edit], out: &mut String) {
    let mut overrides: Vec<(&str, &str)> = Vec::new();
    for edit in node_edits {
        if let Edit::SetAttr(k, v) = edit {
            overrides.retain(|(name, _)| *name != k.as_str());
            overrides.push((k.as_str(), v.as_str()));
        }
    }
    for (k, v) in el.attrs() {
        if overrides.iter().any(|(name, _)| *name == k) {
            continue;
        }
        push_attr(k, v, out);
    }
    for (k, v) in overrides {
        push_attr(k, v, out);
    }
}

fn push_attr(name: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    push_escaped_attr(value, out);
    out.push('"');
}

pub(crate) fn push_escaped_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

pub(crate) fn push_escaped_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

/// Markup for a single opening tag of `el`, with `src` forced to `src`.
pub(crate) fn img_with_src(el: &Element, src: &str) -> String {
    let mut out = String::from("<img");
    push_attrs(el, &[Edit::SetAttr("src".to_string(), src.to_string())], &mut out);
    out.push('>');
    out
}

/// Action to perform on elements matching a CSS selector.
#[derive(Clone, Debug)]
pub enum SelectorAction {
    /// Remove the entire matching element (and its children).
    RemoveElement,
    /// Replace the element's markup with its own visible text.
    FlattenText,
    /// Prefix a zero-width space to elements whose whole text is a
    /// numbered-list marker such as `3.`.
    GuardListMarker,
}

/// Rewrite pass that locates elements with CSS selectors and edits them.
///
/// Rules are applied in order and each rule re-parses the HTML to account
/// for changes made by earlier rules.
///
/// # Example
///
/// ```
/// use post_archiver::rewriter::{RewriteContext, RewritePass, SelectorAction, SelectorPass};
///
/// let pass = SelectorPass::new(vec![(".subscription-widget-wrap", SelectorAction::RemoveElement)]);
/// let mut ctx = RewriteContext::default();
/// let html = r#"<p>Body</p><div class="subscription-widget-wrap">Subscribe!</div>"#;
/// let result = pass.apply(html, &mut ctx);
/// assert!(!result.contains("Subscribe"));
/// assert!(result.contains("<p>Body</p>"));
/// ```
pub struct SelectorPass {
    rules: Vec<(String, SelectorAction)>,
}

impl SelectorPass {
    /// Create a new `SelectorPass` from `(css_selector, action)` pairs.
    pub fn new(rules: Vec<(&str, SelectorAction)>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(sel, action)| (sel.to_string(), action))
                .collect(),
        }
    }

    fn edit_for(element: ElementRef<'_>, action: &SelectorAction) -> Option<Edit> {
        match action {
            SelectorAction::RemoveElement => Some(Edit::Remove),
            SelectorAction::FlattenText => Some(Edit::ReplaceText(element.text().collect())),
            SelectorAction::GuardListMarker => {
                let text: String = element.text().collect();
                LIST_MARKER_RE
                    .is_match(text.trim())
                    .then(|| Edit::ReplaceText(format!("{ZERO_WIDTH_SPACE}{text}")))
            }
        }
    }
}

impl RewritePass for SelectorPass {
    fn apply(&self, html: &str, _ctx: &mut RewriteContext) -> String {
        let mut result = html.to_string();

        for (selector_str, action) in &self.rules {
            let Ok(selector) = Selector::parse(selector_str) else {
                tracing::warn!("Invalid CSS selector: {selector_str}");
                continue;
            };

            let document = Html::parse_fragment(&result);
            let mut edits = EditSet::new();
            for element in document.select(&selector) {
                if let Some(edit) = Self::edit_for(element, action) {
                    edits.push(element.id(), edit);
                }
            }

            if !edits.is_empty() {
                result = serialize(&document, &edits);
            }
        }

        result
    }
}
