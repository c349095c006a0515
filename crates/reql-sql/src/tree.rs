//! Syntax tree produced by the parser
//!
//! Nodes are immutable once built. Every token of the input except ignored
//! whitespace and comments is kept, so the tree covers the statement text
//! and can be rendered back with block expansions applied.

use crate::block::EmbeddedBlock;
use crate::tag::NodeTag;
use reql_core::Position;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// A lexed token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    /// Terminal name (`IDENT`, `SELECT`, `(`)
    pub kind: Arc<str>,

    /// Raw text
    pub text: String,

    /// Line (1-indexed)
    pub line: usize,

    /// Column (1-indexed)
    pub column: usize,

    /// Byte range in the source text
    pub span: Range<usize>,
}

impl Token {
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    pub fn is(&self, kind: &str) -> bool {
        &*self.kind == kind
    }
}

/// A child of a syntax node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    Token(Token),
    Node(SyntaxNode),
    Block(EmbeddedBlock),
}

impl Child {
    pub fn as_node(&self) -> Option<&SyntaxNode> {
        match self {
            Child::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Child::Token(token) => Some(token),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&EmbeddedBlock> {
        match self {
            Child::Block(block) => Some(block),
            _ => None,
        }
    }
}

/// A tagged interior node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    tag: NodeTag,
    children: Vec<Child>,
    depth: usize,
}

impl SyntaxNode {
    pub fn new(tag: NodeTag, children: Vec<Child>) -> Self {
        let depth = 1 + children
            .iter()
            .filter_map(Child::as_node)
            .map(|node| node.depth)
            .max()
            .unwrap_or(0);
        Self { tag, children, depth }
    }

    pub fn tag(&self) -> NodeTag {
        self.tag
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// Levels of nodes below and including this one
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Child nodes, skipping tokens and blocks
    pub fn child_nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.children.iter().filter_map(Child::as_node)
    }

    /// Direct child tokens
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.children.iter().filter_map(Child::as_token)
    }

    /// First token in document order, searching depth first
    pub fn first_token(&self) -> Option<&Token> {
        self.children.iter().find_map(|child| match child {
            Child::Token(token) => Some(token),
            Child::Node(node) => node.first_token(),
            Child::Block(_) => None,
        })
    }

    /// Every node with `tag`, this one included, in document order
    pub fn descendants(&self, tag: NodeTag) -> Vec<&SyntaxNode> {
        self.walk()
            .filter(|node| node.tag == tag)
            .collect()
    }

    /// Every embedded block in document order
    pub fn blocks(&self) -> Vec<&EmbeddedBlock> {
        let mut blocks = Vec::new();
        for node in self.walk() {
            blocks.extend(node.children.iter().filter_map(Child::as_block));
        }
        blocks
    }

    /// Pre-order iterator over this node and its descendants
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.tag, indent = depth * 2)?;
        for child in &self.children {
            match child {
                Child::Node(node) => node.fmt_indented(f, depth + 1)?,
                Child::Token(token) => writeln!(
                    f,
                    "{:indent$}{} {:?}",
                    "",
                    token.kind,
                    token.text,
                    indent = (depth + 1) * 2
                )?,
                Child::Block(block) => writeln!(
                    f,
                    "{:indent$}{} block {:?}",
                    "",
                    block.kind,
                    block.text,
                    indent = (depth + 1) * 2
                )?,
            }
        }
        Ok(())
    }
}

/// Indented outline, one node or token per line
impl fmt::Display for SyntaxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Pre-order traversal without recursion
pub struct Walk<'a> {
    stack: Vec<&'a SyntaxNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a SyntaxNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.child_nodes().collect::<Vec<_>>().into_iter().rev());
        Some(node)
    }
}

/// Handler invoked for a node with a registered tag
pub type Handler<S> = fn(&mut S, &SyntaxNode);

/// Tag-dispatched tree walker
///
/// Tags without a handler are walked through silently.
pub struct Visitor<S> {
    handlers: HashMap<NodeTag, Handler<S>>,
}

impl<S> Visitor<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `tag`, replacing any previous one
    pub fn on(mut self, tag: NodeTag, handler: Handler<S>) -> Self {
        self.handlers.insert(tag, handler);
        self
    }

    /// Walk `root` pre-order, calling handlers in document order
    pub fn visit(&self, state: &mut S, root: &SyntaxNode) {
        for node in root.walk() {
            if let Some(handler) = self.handlers.get(&node.tag) {
                handler(state, node);
            }
        }
    }
}

impl<S> Default for Visitor<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(kind: &str, text: &str, column: usize) -> Child {
        Child::Token(Token {
            kind: Arc::from(kind),
            text: text.to_string(),
            line: 1,
            column,
            span: column - 1..column - 1 + text.len(),
        })
    }

    fn ident(text: &str, column: usize) -> SyntaxNode {
        SyntaxNode::new(NodeTag::Ident, vec![token("IDENT", text, column)])
    }

    /// `a, b` as table refs under a join
    fn sample() -> SyntaxNode {
        SyntaxNode::new(
            NodeTag::Join,
            vec![
                Child::Node(SyntaxNode::new(NodeTag::TableRef, vec![Child::Node(ident("a", 1))])),
                token(",", ",", 2),
                Child::Node(SyntaxNode::new(NodeTag::TableRef, vec![Child::Node(ident("b", 4))])),
            ],
        )
    }

    #[test]
    fn walk_is_pre_order() {
        let tree = sample();
        let tags: Vec<NodeTag> = tree.walk().map(|n| n.tag()).collect();
        assert_eq!(
            tags,
            vec![
                NodeTag::Join,
                NodeTag::TableRef,
                NodeTag::Ident,
                NodeTag::TableRef,
                NodeTag::Ident
            ]
        );
        assert_eq!(tree.first_token().map(|t| t.text.as_str()), Some("a"));
        assert_eq!(tree.descendants(NodeTag::Ident).len(), 2);
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn visitor_dispatches_by_tag() {
        fn collect(names: &mut Vec<String>, node: &SyntaxNode) {
            if let Some(token) = node.first_token() {
                names.push(token.text.clone());
            }
        }

        let visitor = Visitor::new().on(NodeTag::TableRef, collect);
        let mut names = Vec::new();
        visitor.visit(&mut names, &sample());
        assert_eq!(names, vec!["a", "b"]);

        // unregistered tags are no-ops
        let mut untouched: Vec<String> = Vec::new();
        Visitor::new().visit(&mut untouched, &sample());
        assert!(untouched.is_empty());
    }

    #[test]
    fn display_outlines_the_tree() {
        let outline = sample().to_string();
        assert!(outline.starts_with("join\n  table_ref\n    ident\n      IDENT \"a\"\n"));
    }
}
