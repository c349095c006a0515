//! ReQL grammar and parser
//!
//! This crate handles:
//! - Loading grammars written in a small EBNF dialect
//! - Building an LALR(1) table and lexer per parser instance
//! - Parsing statements into an immutable syntax tree
//! - Capturing `[: :]`, `[= =]` and `[< >]` blocks and parsing macro expressions
//! - Extracting `query_<id>` references for federation

pub mod tag;
pub mod grammar;
pub mod lexer;
pub mod lalr;
pub mod tree;
pub mod parser;
pub mod block;
pub mod extract;

pub use tag::NodeTag;
pub use grammar::{Grammar, GrammarError, GrammarFragment};
pub use lexer::{LexError, Lexer};
pub use lalr::{Action, Conflict, ParseTable};
pub use tree::{Child, SyntaxNode, Token, Visitor};
pub use parser::{BuiltinGrammar, Dialect, GrammarSource, MacroGrammar, ParseError, ReqlParser, TextGrammar};
pub use block::{
    pass_verbatim, render, BlockKind, EmbeddedBlock, MacroArg, MacroCall, MacroError, MacroExpr,
    MacroParser, UnexpandedBlock,
};
pub use extract::{extract_references, parse_reference_name, unquote_identifier};
