//! Federation reference extraction
//!
//! Finds `query_<id>` and `query_<id>_refresh` table references. Only the
//! leading identifier of a table reference and the table operand of
//! `x IN table` count; column names, aliases and function names never
//! trigger resolution.

use crate::tag::NodeTag;
use crate::tree::{Child, SyntaxNode, Token, Visitor};
use reql_core::QueryReference;
use tracing::warn;

const PREFIX: &str = "query_";
const REFRESH_SUFFIX: &str = "_refresh";

/// References in document order, duplicates kept
pub fn extract_references(root: &SyntaxNode) -> Vec<QueryReference> {
    let mut references = Vec::new();
    Visitor::new()
        .on(NodeTag::TableRef, table_ref)
        .on(NodeTag::ExprIn, in_table)
        .visit(&mut references, root);
    references
}

fn table_ref(references: &mut Vec<QueryReference>, node: &SyntaxNode) {
    if let Some(Child::Node(ident)) = node.children().first() {
        push_reference(references, ident);
    }
}

/// `x IN query_1` reads the whole table, like a subquery would
fn in_table(references: &mut Vec<QueryReference>, node: &SyntaxNode) {
    if let [.., Child::Token(keyword), Child::Node(ident)] = node.children() {
        if keyword.is("IN") {
            push_reference(references, ident);
        }
    }
}

fn push_reference(references: &mut Vec<QueryReference>, ident: &SyntaxNode) {
    if ident.tag() != NodeTag::Ident {
        return;
    }
    let Some(token) = ident.tokens().next() else {
        return;
    };

    let name = unquote_identifier(token);
    if let Some((id, refresh)) = parse_reference_name(&name) {
        references.push(QueryReference {
            name,
            id,
            refresh,
            line: token.line,
            column: token.column,
        });
    }
}

/// Identifier text with its quoting removed
pub fn unquote_identifier(token: &Token) -> String {
    let text = token.text.as_str();
    let strip = |open: char, close: char| {
        text.strip_prefix(open)
            .and_then(|t| t.strip_suffix(close))
            .unwrap_or(text)
    };

    match &*token.kind {
        "DQUOTED" => strip('"', '"').replace("\"\"", "\""),
        "BACKTICK" => strip('`', '`').replace("``", "`"),
        "BRACKETED" => strip('[', ']').to_string(),
        _ => text.to_string(),
    }
}

/// `query_<digits>` with an optional `_refresh`, any case
pub fn parse_reference_name(name: &str) -> Option<(u64, bool)> {
    let lower = name.to_ascii_lowercase();
    let rest = lower.strip_prefix(PREFIX)?;
    let (digits, refresh) = match rest.strip_suffix(REFRESH_SUFFIX) {
        Some(digits) => (digits, true),
        None => (rest, false),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    match digits.parse() {
        Ok(id) => Some((id, refresh)),
        Err(_) => {
            warn!(name, "Ignoring query reference with an out of range id");
            None
        }
    }
}
