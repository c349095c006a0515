//! Grammar sources and the table-driven parser
//!
//! A parser is built from a [`GrammarSource`] handed to its constructor.
//! Building compiles the grammar text, the lexer and the LALR(1) table;
//! nothing is cached or shared between parser instances.

use crate::block::{BlockKind, EmbeddedBlock};
use crate::grammar::{Grammar, GrammarError, GrammarFragment, RuleMode};
use crate::lalr::{Action, Conflict, ParseTable};
use crate::lexer::{LexError, Lexer};
use crate::tag::NodeTag;
use crate::tree::{Child, SyntaxNode};
use reql_core::{Config, Diagnostic, DiagnosticCode, DialectConfig, Location, Position, Severity};
use thiserror::Error;
use tracing::debug;

const BASE_GRAMMAR: &str = include_str!("../grammars/base.grammar");
const SQLITE_GRAMMAR: &str = include_str!("../grammars/sqlite.grammar");
const PGSQL_GRAMMAR: &str = include_str!("../grammars/pgsql.grammar");
const REQL_GRAMMAR: &str = include_str!("../grammars/reql.grammar");
const MACRO_GRAMMAR: &str = include_str!("../grammars/macro.grammar");

/// Deepest tree a parse may build
pub const MAX_DEPTH: usize = 1000;

/// Supplies the grammar text a parser is built from
pub trait GrammarSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> String;

    /// Fragments, compiled in order
    fn fragments(&self) -> Vec<GrammarFragment>;
}

/// SQL flavour accepted by the built-in grammars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl From<DialectConfig> for Dialect {
    fn from(config: DialectConfig) -> Self {
        match config {
            DialectConfig::Sqlite => Dialect::Sqlite,
            DialectConfig::Postgres => Dialect::Postgres,
        }
    }
}

/// The grammars shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinGrammar {
    pub dialect: Dialect,

    /// Accept `[: :]`, `[= =]` and `[< >]` blocks
    pub macros: bool,
}

impl BuiltinGrammar {
    pub fn new(dialect: Dialect, macros: bool) -> Self {
        Self { dialect, macros }
    }

    /// SQLite with blocks, the default federated dialect
    pub fn sqlite() -> Self {
        Self::new(Dialect::Sqlite, true)
    }

    pub fn postgres() -> Self {
        Self::new(Dialect::Postgres, true)
    }
}

impl Default for BuiltinGrammar {
    fn default() -> Self {
        Self::sqlite()
    }
}

impl GrammarSource for BuiltinGrammar {
    fn name(&self) -> String {
        let dialect = match self.dialect {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "pgsql",
        };
        if self.macros {
            format!("{}+reql", dialect)
        } else {
            dialect.to_string()
        }
    }

    fn fragments(&self) -> Vec<GrammarFragment> {
        let mut fragments = vec![GrammarFragment::new("base.grammar", BASE_GRAMMAR)];
        fragments.push(match self.dialect {
            Dialect::Sqlite => GrammarFragment::new("sqlite.grammar", SQLITE_GRAMMAR),
            Dialect::Postgres => GrammarFragment::new("pgsql.grammar", PGSQL_GRAMMAR),
        });
        if self.macros {
            fragments.push(GrammarFragment::new("reql.grammar", REQL_GRAMMAR));
        }
        fragments
    }
}

/// Grammar of expression-block contents
#[derive(Debug, Clone, Copy, Default)]
pub struct MacroGrammar;

impl GrammarSource for MacroGrammar {
    fn name(&self) -> String {
        "macro".to_string()
    }

    fn fragments(&self) -> Vec<GrammarFragment> {
        vec![GrammarFragment::new("macro.grammar", MACRO_GRAMMAR)]
    }
}

/// Grammar supplied as text by the caller
#[derive(Debug, Clone)]
pub struct TextGrammar {
    fragments: Vec<GrammarFragment>,
}

impl TextGrammar {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            fragments: vec![GrammarFragment::new(name, text.into())],
        }
    }

    /// Append another fragment, for `%extend` layering
    pub fn with_fragment(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fragments.push(GrammarFragment::new(name, text.into()));
        self
    }
}

impl GrammarSource for TextGrammar {
    fn name(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }

    fn fragments(&self) -> Vec<GrammarFragment> {
        self.fragments.clone()
    }
}

/// Statement parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Unexpected {found} at line {line} column {column}, expected one of: {}", .expected.join(", "))]
    UnexpectedToken {
        /// Offending token text, or `end of input`
        found: String,
        line: usize,
        column: usize,

        /// Terminals the parser could have accepted
        expected: Vec<String>,
    },

    #[error("Query nests deeper than {limit} levels at line {line} column {column}")]
    TooDeep {
        line: usize,
        column: usize,
        limit: usize,
    },
}

impl ParseError {
    pub fn position(&self) -> Position {
        match self {
            ParseError::Lex(e) => Position::new(e.line, e.column),
            ParseError::UnexpectedToken { line, column, .. }
            | ParseError::TooDeep { line, column, .. } => Position::new(*line, *column),
        }
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        let position = self.position();
        let diag = Diagnostic::new(
            DiagnosticCode::ReqlSyntaxError,
            Severity::Error,
            format!("Failed to parse query: {}", self),
        )
        .with_location(Location::new(position.line, position.column));

        match self {
            ParseError::UnexpectedToken { expected, .. } if !expected.is_empty() => {
                diag.with_hint(format!("Expected one of: {}", expected.join(", ")))
            }
            _ => diag,
        }
    }
}

/// Deterministic LALR(1) parser for one grammar
#[derive(Debug)]
pub struct ReqlParser {
    grammar: Grammar,
    lexer: Lexer,
    table: ParseTable,

    /// Block kind per terminal, for the block-capturing terminals
    block_kinds: Vec<Option<BlockKind>>,
}

impl ReqlParser {
    /// Build a parser from a grammar source
    pub fn new(source: &dyn GrammarSource) -> Result<Self, GrammarError> {
        let grammar = Grammar::compile(&source.fragments())?;
        let lexer = Lexer::new(&grammar)?;
        let table = ParseTable::build(&grammar);
        let block_kinds = grammar
            .terminals
            .iter()
            .map(|t| BlockKind::from_terminal(&t.name))
            .collect();

        debug!(
            grammar = %source.name(),
            terminals = grammar.terminals.len(),
            states = table.state_count(),
            conflicts = table.conflicts().len(),
            "Built parser"
        );

        Ok(Self {
            grammar,
            lexer,
            table,
            block_kinds,
        })
    }

    /// Parser for the configured dialect
    pub fn from_config(config: &Config) -> Result<Self, GrammarError> {
        Self::new(&BuiltinGrammar::new(config.dialect.into(), config.macros))
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Conflicts resolved while building the table; empty for the built-in grammars
    pub fn conflicts(&self) -> &[Conflict] {
        self.table.conflicts()
    }

    /// Parse text into a tree rooted at the start rule
    pub fn parse(&self, text: &str) -> Result<SyntaxNode, ParseError> {
        let mut stream = self.lexer.tokenize(text)?.into_iter();
        let Some(mut current) = stream.next() else {
            return Err(self.unexpected_end(0));
        };

        let mut states: Vec<usize> = vec![0];
        let mut values: Vec<Vec<Child>> = Vec::new();

        loop {
            let state = states[states.len() - 1];

            match self.table.action(state, current.terminal) {
                Some(Action::Shift(next)) => {
                    let Some(following) = stream.next() else {
                        return Err(self.unexpected_end(state));
                    };
                    let shifted = std::mem::replace(&mut current, following);
                    let leaf = match self.block_kinds[shifted.terminal] {
                        Some(kind) => Child::Block(EmbeddedBlock::from_token(kind, shifted.token)),
                        None => Child::Token(shifted.token),
                    };
                    states.push(next);
                    values.push(vec![leaf]);
                }
                Some(Action::Reduce(index)) => {
                    let production = &self.grammar.productions[index];
                    let length = production.rhs.len();

                    let mut children = Vec::new();
                    for group in values.drain(values.len() - length..) {
                        children.extend(group);
                    }
                    states.truncate(states.len() - length);

                    let rule = &self.grammar.rules[production.lhs];
                    let reduced = match (rule.mode, production.alias.or(rule.tag)) {
                        (RuleMode::Splice, _) | (_, None) => children,
                        (RuleMode::Inline, _) if production.alias.is_none() && children.len() == 1 => {
                            children
                        }
                        (_, Some(tag)) => {
                            let node = SyntaxNode::new(tag, children);
                            if node.depth() > MAX_DEPTH {
                                return Err(ParseError::TooDeep {
                                    line: current.token.line,
                                    column: current.token.column,
                                    limit: MAX_DEPTH,
                                });
                            }
                            vec![Child::Node(node)]
                        }
                    };
                    values.push(reduced);

                    let top = states[states.len() - 1];
                    let Some(next) = self.table.goto(top, production.lhs) else {
                        return Err(self.unexpected(state, &current.token));
                    };
                    states.push(next);
                }
                Some(Action::Accept) => {
                    let mut children = values.pop().unwrap_or_default();
                    return Ok(match (children.pop(), children.is_empty()) {
                        (Some(Child::Node(root)), true) => root,
                        (last, _) => {
                            children.extend(last);
                            SyntaxNode::new(NodeTag::Start, children)
                        }
                    });
                }
                None => return Err(self.unexpected(state, &current.token)),
            }
        }
    }

    /// Parse and convert failures to a diagnostic
    pub fn parse_with_diagnostic(&self, text: &str) -> Result<SyntaxNode, Diagnostic> {
        self.parse(text).map_err(|e| e.to_diagnostic())
    }

    fn expected(&self, state: usize) -> Vec<String> {
        self.table
            .expected(state)
            .into_iter()
            .map(|t| self.grammar.terminals[t].name.clone())
            .collect()
    }

    fn unexpected(&self, state: usize, token: &crate::tree::Token) -> ParseError {
        let found = if token.text.is_empty() {
            "end of input".to_string()
        } else {
            format!("{:?}", token.text)
        };
        ParseError::UnexpectedToken {
            found,
            line: token.line,
            column: token.column,
            expected: self.expected(state),
        }
    }

    fn unexpected_end(&self, state: usize) -> ParseError {
        ParseError::UnexpectedToken {
            found: "end of input".to_string(),
            line: 1,
            column: 1,
            expected: self.expected(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sqlite() -> ReqlParser {
        ReqlParser::new(&BuiltinGrammar::sqlite()).unwrap()
    }

    #[test]
    fn builtin_grammars_are_conflict_free() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres] {
            for macros in [false, true] {
                let parser = ReqlParser::new(&BuiltinGrammar::new(dialect, macros)).unwrap();
                assert!(
                    parser.conflicts().is_empty(),
                    "{:?} macros={} has conflicts",
                    dialect,
                    macros
                );
            }
        }
        assert!(ReqlParser::new(&MacroGrammar).unwrap().conflicts().is_empty());
    }

    #[test]
    fn parse_simple_select() {
        let tree = sqlite().parse("SELECT id, name FROM users WHERE active = 1").unwrap();

        assert_eq!(tree.tag(), NodeTag::Start);
        let select = tree.descendants(NodeTag::SelectCore);
        assert_eq!(select.len(), 1);
        assert_eq!(tree.descendants(NodeTag::ResultColumn).len(), 2);
        assert_eq!(tree.descendants(NodeTag::WhereClause).len(), 1);
        assert_eq!(tree.descendants(NodeTag::ExprBinary).len(), 1);
    }

    #[test]
    fn aliases_tag_nodes() {
        let tree = sqlite()
            .parse("SELECT a FROM t WHERE a BETWEEN 1 AND 2 AND b IN (1, 2) AND c LIKE 'x%'")
            .unwrap();

        assert_eq!(tree.descendants(NodeTag::ExprBetween).len(), 1);
        assert_eq!(tree.descendants(NodeTag::ExprIn).len(), 1);
        assert_eq!(tree.descendants(NodeTag::ExprSearch).len(), 1);
    }

    #[test]
    fn keeps_every_token() {
        let tree = sqlite().parse("SELECT * FROM \"query_7\" q").unwrap();
        let table = tree.descendants(NodeTag::TableRef);
        let ident = table[0].child_nodes().next().unwrap();

        assert_eq!(ident.tag(), NodeTag::Ident);
        let token = ident.first_token().unwrap();
        assert!(token.is("DQUOTED"));
        assert_eq!((token.line, token.column), (1, 15));
        assert_eq!(tree.descendants(NodeTag::Star).len(), 1);
        assert_eq!(tree.descendants(NodeTag::Alias).len(), 1);
    }

    #[test]
    fn statement_sequences_allow_empty_statements() {
        let parser = sqlite();
        assert!(parser.parse("").is_ok());
        assert!(parser.parse(";").is_ok());
        let tree = parser.parse("SELECT 1;; SELECT 2;").unwrap();
        assert_eq!(tree.descendants(NodeTag::SelectStmt).len(), 2);
    }

    #[test]
    fn syntax_error_carries_position_and_expectations() {
        let err = sqlite().parse("SELECT a\nFROM WHERE").unwrap_err();

        match &err {
            ParseError::UnexpectedToken {
                found,
                line,
                column,
                expected,
            } => {
                assert_eq!(found, "\"WHERE\"");
                assert_eq!((*line, *column), (2, 6));
                assert!(expected.contains(&"IDENT".to_string()));
            }
            other => panic!("unexpected error {:?}", other),
        }

        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::ReqlSyntaxError);
        assert_eq!(diag.location, Some(Location::new(2, 6)));
        assert!(diag.hint.is_some());
    }

    #[test]
    fn lex_errors_are_parse_errors() {
        let err = sqlite().parse("SELECT # FROM t").unwrap_err();
        assert!(matches!(err, ParseError::Lex(_)));
        assert_eq!(err.position(), Position::new(1, 8));
    }

    #[test]
    fn blocks_need_the_macro_grammar() {
        let plain = ReqlParser::new(&BuiltinGrammar::new(Dialect::Sqlite, false)).unwrap();
        let text = "SELECT [: x :] FROM t";

        // `[: x :]` reads as a bracketed identifier without block support
        let tree = plain.parse(text).unwrap();
        assert!(tree.blocks().is_empty());

        let tree = sqlite().parse(text).unwrap();
        let blocks = tree.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Expression);
        assert_eq!(blocks[0].text, " x ");
    }

    #[test]
    fn keywords_as_names() {
        let postgres = ReqlParser::new(&BuiltinGrammar::postgres()).unwrap();
        for parser in [sqlite(), postgres] {
            let tree = parser.parse("SELECT count(*) AS rows, left(name, 3) FROM t").unwrap();
            assert_eq!(tree.descendants(NodeTag::FunctionCall).len(), 2);

            let tree = parser
                .parse("SELECT first.id FROM first LEFT JOIN range r ON r.id = first.id")
                .unwrap();
            assert_eq!(tree.descendants(NodeTag::TableRef).len(), 2);
        }

        let tree = sqlite()
            .parse("SELECT sum(x) OVER (ORDER BY y ROWS BETWEEN 1 PRECEDING AND CURRENT ROW) FROM t")
            .unwrap();
        assert_eq!(tree.descendants(NodeTag::FrameSpec).len(), 1);

        // a bare alias still stops at keywords
        assert!(sqlite().parse("SELECT a rows FROM t").is_err());
    }

    #[test]
    fn nesting_is_capped() {
        let parser = sqlite();
        let nested = |levels: usize| format!("SELECT {}1{}", "(".repeat(levels), ")".repeat(levels));

        let tree = parser.parse(&nested(50)).unwrap();
        assert_eq!(tree.descendants(NodeTag::ExprParen).len(), 50);

        let err = parser.parse(&nested(1500)).unwrap_err();
        assert!(matches!(err, ParseError::TooDeep { limit: MAX_DEPTH, .. }));
        assert_eq!(err.to_diagnostic().code, DiagnosticCode::ReqlSyntaxError);
    }

    #[test]
    fn postgres_casts() {
        let parser = ReqlParser::new(&BuiltinGrammar::postgres()).unwrap();
        let tree = parser.parse("SELECT a::int, b::numeric(10, 2) FROM t WHERE c ILIKE $1").unwrap();
        assert_eq!(tree.descendants(NodeTag::ExprCast).len(), 2);
        assert_eq!(tree.descendants(NodeTag::Parameter).len(), 1);

        assert!(sqlite().parse("SELECT a::int FROM t").is_err());
    }

    #[test]
    fn text_grammar_with_unknown_tag_is_rejected() {
        let source = TextGrammar::new("custom", "NUM: /[0-9]+/\nstart: thing\nthing: NUM");
        assert!(matches!(
            ReqlParser::new(&source),
            Err(GrammarError::UnknownTag(name)) if name == "thing"
        ));

        let source = TextGrammar::new("custom", "NUM: /[0-9]+/\nstart: literal+\nliteral: NUM");
        let parser = ReqlParser::new(&source).unwrap();
        let tree = parser.parse("1").unwrap();
        assert_eq!(tree.descendants(NodeTag::Literal).len(), 1);
    }
}
