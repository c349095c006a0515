//! Embedded macro blocks
//!
//! The lexer captures `[: ... :]`, `[= ... =]` and `[< ... >]` as single
//! opaque tokens. The parser stores them as [`EmbeddedBlock`] leaves; their
//! contents are only looked at here, by [`render`] and [`MacroParser`].

use crate::parser::{MacroGrammar, ParseError, ReqlParser};
use crate::grammar::GrammarError;
use crate::tag::NodeTag;
use crate::tree::{Child, SyntaxNode, Token};
use reql_core::Position;
use std::ops::Range;
use thiserror::Error;

/// The three block forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// `[: ... :]`, parsed with the macro grammar
    Expression,

    /// `[= ... =]`, passed through untouched
    Verbatim,

    /// `[< ... >]`, left for macro expansion
    Folded,
}

impl BlockKind {
    /// Block kind captured by a grammar terminal
    pub fn from_terminal(name: &str) -> Option<Self> {
        match name {
            "EXPR_BLOCK" => Some(BlockKind::Expression),
            "VERBATIM_BLOCK" => Some(BlockKind::Verbatim),
            "FOLDED_BLOCK" => Some(BlockKind::Folded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Expression => "expression",
            BlockKind::Verbatim => "verbatim",
            BlockKind::Folded => "folded",
        }
    }

    pub fn delimiters(&self) -> (&'static str, &'static str) {
        match self {
            BlockKind::Expression => ("[:", ":]"),
            BlockKind::Verbatim => ("[=", "=]"),
            BlockKind::Folded => ("[<", ">]"),
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedBlock {
    pub kind: BlockKind,

    /// Contents between the delimiters
    pub text: String,

    /// Line of the opening delimiter
    pub line: usize,

    /// Column of the opening delimiter
    pub column: usize,

    /// Byte range of the whole block, delimiters included
    pub span: Range<usize>,
}

impl EmbeddedBlock {
    pub fn from_token(kind: BlockKind, token: Token) -> Self {
        let (open, close) = kind.delimiters();
        let text = token
            .text
            .strip_prefix(open)
            .and_then(|t| t.strip_suffix(close))
            .unwrap_or_default()
            .to_string();

        Self {
            kind,
            text,
            line: token.line,
            column: token.column,
            span: token.span,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

/// A block reached rendering without an expansion
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The {kind} block at {position} was not expanded")]
pub struct UnexpandedBlock {
    pub kind: BlockKind,
    pub position: Position,
}

/// Rebuild statement text, replacing each block with its expansion
///
/// `text` must be the text `root` was parsed from.
pub fn render<F, E>(text: &str, root: &SyntaxNode, mut expand: F) -> Result<String, E>
where
    F: FnMut(&EmbeddedBlock) -> Result<String, E>,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for block in root.blocks() {
        out.push_str(text.get(cursor..block.span.start).unwrap_or_default());
        out.push_str(&expand(block)?);
        cursor = block.span.end;
    }
    out.push_str(text.get(cursor..).unwrap_or_default());

    Ok(out)
}

/// Default expansion: verbatim blocks become their contents, others are errors
pub fn pass_verbatim(block: &EmbeddedBlock) -> Result<String, UnexpandedBlock> {
    match block.kind {
        BlockKind::Verbatim => Ok(block.text.clone()),
        kind => Err(UnexpandedBlock {
            kind,
            position: block.position(),
        }),
    }
}

/// One argument of a macro call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroArg {
    /// Quoted string, quotes removed
    String(String),

    /// Number as written
    Number(String),

    /// Bare name
    Name(String),

    /// Nested block
    Block(EmbeddedBlock),
}

/// `name(args)` or `name [block]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroCall {
    pub name: String,
    pub args: Vec<MacroArg>,
}

/// A call followed by `::` mappers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroExpr {
    pub call: MacroCall,
    pub mappers: Vec<MacroCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroError {
    #[error("Only expression blocks hold macro calls, found a {0} block")]
    NotAnExpression(BlockKind),

    #[error("Invalid macro expression at {position}: {source}")]
    Parse {
        position: Position,
        #[source]
        source: ParseError,
    },
}

/// Parser for expression-block contents
#[derive(Debug)]
pub struct MacroParser {
    parser: ReqlParser,
}

impl MacroParser {
    pub fn new() -> Result<Self, GrammarError> {
        Ok(Self {
            parser: ReqlParser::new(&MacroGrammar)?,
        })
    }

    /// Parse macro expression text
    pub fn parse(&self, text: &str) -> Result<MacroExpr, ParseError> {
        let tree = self.parser.parse(text)?;

        let mut calls = tree.child_nodes().filter(|n| {
            matches!(n.tag(), NodeTag::MacroCall | NodeTag::Mapper)
        });
        let call = calls.next().map(macro_call).unwrap_or_else(|| MacroCall {
            name: String::new(),
            args: Vec::new(),
        });
        let mappers = calls.map(macro_call).collect();

        Ok(MacroExpr { call, mappers })
    }

    /// Parse the contents of an expression block
    pub fn parse_block(&self, block: &EmbeddedBlock) -> Result<MacroExpr, MacroError> {
        if block.kind != BlockKind::Expression {
            return Err(MacroError::NotAnExpression(block.kind));
        }
        self.parse(&block.text).map_err(|source| MacroError::Parse {
            position: block.position(),
            source,
        })
    }
}

fn macro_call(node: &SyntaxNode) -> MacroCall {
    let mut name = String::new();
    let mut args = Vec::new();

    for child in node.children() {
        match child {
            Child::Token(token) if token.is("NAME") => name = token.text.clone(),
            Child::Block(block) => args.push(MacroArg::Block(block.clone())),
            Child::Node(arguments) if arguments.tag() == NodeTag::Arguments => {
                args.extend(arguments.children().iter().filter_map(macro_arg));
            }
            _ => {}
        }
    }

    MacroCall { name, args }
}

fn macro_arg(child: &Child) -> Option<MacroArg> {
    match child {
        Child::Block(block) => Some(MacroArg::Block(block.clone())),
        Child::Token(token) if token.is("STRING") => Some(MacroArg::String(unquote(&token.text))),
        Child::Token(token) if token.is("NUMBER") => Some(MacroArg::Number(token.text.clone())),
        Child::Token(token) if token.is("NAME") => Some(MacroArg::Name(token.text.clone())),
        _ => None,
    }
}

/// Strip `'...'` or `"..."` and collapse the doubled quote
fn unquote(text: &str) -> String {
    let Some(quote) = text.chars().next() else {
        return String::new();
    };
    let inner = text
        .strip_prefix(quote)
        .and_then(|t| t.strip_suffix(quote))
        .unwrap_or(text);
    inner.replace(&format!("{}{}", quote, quote), &quote.to_string())
}
