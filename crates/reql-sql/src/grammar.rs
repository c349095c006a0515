//! Grammar definition language
//!
//! Grammars are plain text in a small EBNF dialect:
//!
//! ```text
//! %keywords IDENT
//! %ignore WS
//!
//! WS: /[ \t\r\n]+/
//! IDENT: /[A-Za-z_][A-Za-z0-9_]*/
//! BLOCK.2: /\[:(?s:.*?):\]/
//!
//! start: item ("," item)*
//! ?item: IDENT | "(" start ")" -> group
//! %extend item: BLOCK
//! ```
//!
//! Upper-case names are terminals (`NAME.priority`), lower-case names are
//! rules. A `?rule` collapses into its only child, a `_rule` splices its
//! children into the parent and `-> alias` tags the node built by one
//! alternative. Fragments are concatenated in order, so a dialect fragment
//! can override terminals and `%extend` rules of the base grammar.
//!
//! Compilation expands the EBNF into plain productions: optional items
//! duplicate the alternative, repetitions become left-recursive splice
//! helpers shared between identical uses, and duplicate productions are
//! dropped.

use crate::tag::NodeTag;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Name of the end-of-input terminal, always terminal 0
pub const END: &str = "$END";

/// Name of the augmented start rule, always rule 0
pub const AUGMENTED_START: &str = "$start";

/// One named piece of grammar text
#[derive(Debug, Clone)]
pub struct GrammarFragment {
    pub name: String,
    pub text: Cow<'static, str>,
}

impl GrammarFragment {
    pub fn new(name: impl Into<String>, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Grammar loading errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("{fragment}:{line}: {message}")]
    Syntax {
        fragment: String,
        line: usize,
        message: String,
    },

    #[error("Unknown symbol '{name}' used in {context}")]
    UnknownSymbol { context: String, name: String },

    #[error("Rule '{0}' is defined more than once")]
    DuplicateRule(String),

    #[error("%extend of unknown rule '{0}'")]
    ExtendUnknownRule(String),

    #[error("Node name '{0}' is not a known syntax tag")]
    UnknownTag(String),

    #[error("Invalid pattern for terminal {terminal}: {message}")]
    InvalidPattern { terminal: String, message: String },

    #[error("Keyword literals need a %keywords terminal to be carved from")]
    MissingKeywordSource,

    #[error("Grammar defines no rules")]
    Empty,
}

/// How a terminal is matched by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalKind {
    /// End of input, never matched
    End,

    /// Regular expression
    Pattern,

    /// Operator or punctuation literal
    Literal,

    /// Case-insensitive word carved out of the `%keywords` terminal
    Keyword,
}

/// A terminal symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    /// Terminal name (`IDENT`, `SELECT`, `(`)
    pub name: String,

    /// Regex source for patterns, literal text otherwise
    pub pattern: String,

    /// Lexer priority, higher wins before length is considered
    pub priority: i32,

    pub kind: TerminalKind,
}

/// What the parser does with the node a rule produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleMode {
    /// Always build a node
    Keep,

    /// Pass a lone child through, build a node otherwise (`?rule`)
    Inline,

    /// Hand the children to the parent (`_rule` and expansion helpers)
    Splice,
}

/// A nonterminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub mode: RuleMode,

    /// Tag of nodes built for this rule; `None` for splice rules
    pub tag: Option<NodeTag>,
}

/// Grammar symbol
///
/// Rules order before terminals so state construction visits transitions
/// in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Rule(usize),
    Terminal(usize),
}

/// A plain context-free production
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Production {
    pub lhs: usize,
    pub rhs: Vec<Symbol>,
    pub alias: Option<NodeTag>,
}

/// A compiled grammar: terminals, rules and expanded productions
///
/// Production 0 is always `$start -> <first rule>`.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub terminals: Vec<Terminal>,
    pub rules: Vec<Rule>,
    pub productions: Vec<Production>,

    /// Terminals dropped by the lexer
    pub ignored: Vec<usize>,

    /// Terminal whose matches are retyped to keywords
    pub keyword_source: Option<usize>,
}

impl Grammar {
    /// Compile grammar fragments, concatenated in order
    pub fn compile(fragments: &[GrammarFragment]) -> Result<Self, GrammarError> {
        let mut definitions = Vec::new();
        for fragment in fragments {
            let tokens = meta_tokens(&fragment.name, &fragment.text)?;
            let mut parser = MetaParser {
                fragment: &fragment.name,
                tokens,
                pos: 0,
            };
            definitions.extend(parser.definitions()?);
        }

        Builder::default().build(definitions)
    }

    pub fn terminal_index(&self, name: &str) -> Option<usize> {
        self.terminals.iter().position(|t| t.name == name)
    }

    pub fn rule_index(&self, name: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.name == name)
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        match symbol {
            Symbol::Rule(index) => &self.rules[index].name,
            Symbol::Terminal(index) => &self.terminals[index].name,
        }
    }

    /// Human-readable form of a production, used in conflict reports
    pub fn describe(&self, production: usize) -> String {
        let production = &self.productions[production];
        let mut out = format!("{} ->", self.rules[production.lhs].name);
        for symbol in &production.rhs {
            out.push(' ');
            out.push_str(self.symbol_name(*symbol));
        }
        if let Some(alias) = production.alias {
            out.push_str(" #");
            out.push_str(alias.as_str());
        }
        out
    }
}

// Grammar text tokenizer

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaKind {
    Directive,
    Arrow,
    Name,
    Str,
    Regex,
    Punct,
}

#[derive(Debug, Clone)]
struct MetaToken {
    kind: MetaKind,
    text: String,
    line: usize,
}

impl MetaToken {
    fn is_punct(&self, c: &str) -> bool {
        self.kind == MetaKind::Punct && self.text == c
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn meta_tokens(fragment: &str, text: &str) -> Result<Vec<MetaToken>, GrammarError> {
    let chars: Vec<char> = text.chars().collect();
    let at = |i: usize| chars.get(i).copied();
    let syntax = |line: usize, message: String| GrammarError::Syntax {
        fragment: fragment.to_string(),
        line,
        message,
    };

    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while let Some(c) = at(i) {
        let start = i;
        let start_line = line;

        let kind = if c == '\n' {
            line += 1;
            i += 1;
            continue;
        } else if c.is_whitespace() {
            i += 1;
            continue;
        } else if c == '/' && at(i + 1) == Some('/') {
            while at(i).is_some_and(|c| c != '\n') {
                i += 1;
            }
            continue;
        } else if c == '%' && at(i + 1).is_some_and(|c| c.is_ascii_lowercase()) {
            i += 1;
            while at(i).is_some_and(|c| c.is_ascii_lowercase()) {
                i += 1;
            }
            MetaKind::Directive
        } else if c == '-' && at(i + 1) == Some('>') {
            i += 2;
            MetaKind::Arrow
        } else if is_ident_start(c) || (c == '?' && at(i + 1).is_some_and(is_ident_start)) {
            i += 1;
            while at(i).is_some_and(is_ident_char) {
                i += 1;
            }
            // Optional `.priority` suffix
            if at(i) == Some('.') {
                let mut j = i + 1;
                if at(j) == Some('-') {
                    j += 1;
                }
                if at(j).is_some_and(|c| c.is_ascii_digit()) {
                    while at(j).is_some_and(|c| c.is_ascii_digit()) {
                        j += 1;
                    }
                    i = j;
                }
            }
            MetaKind::Name
        } else if c == '"' {
            i += 1;
            loop {
                match at(i) {
                    None => return Err(syntax(start_line, "unterminated string".to_string())),
                    Some('"') => break,
                    Some('\\') => i += 2,
                    Some('\n') => {
                        line += 1;
                        i += 1;
                    }
                    Some(_) => i += 1,
                }
            }
            i += 1;
            MetaKind::Str
        } else if c == '/' {
            i += 1;
            loop {
                match at(i) {
                    None | Some('\n') => {
                        return Err(syntax(start_line, "unterminated pattern".to_string()))
                    }
                    Some('/') => break,
                    Some('\\') => i += 2,
                    Some(_) => i += 1,
                }
            }
            i += 1;
            MetaKind::Regex
        } else if ":|()[]?*+".contains(c) {
            i += 1;
            MetaKind::Punct
        } else {
            return Err(syntax(line, format!("unexpected character {:?}", c)));
        };

        tokens.push(MetaToken {
            kind,
            text: chars[start..i.min(chars.len())].iter().collect(),
            line: start_line,
        });
    }

    Ok(tokens)
}

// Grammar text parser

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Repeat {
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone)]
enum Atom {
    Literal(String),
    Name(String),
    Group(Vec<Alternative>),
}

#[derive(Debug, Clone)]
struct Item {
    atom: Atom,
    repeat: Option<Repeat>,
}

#[derive(Debug, Clone)]
struct Alternative {
    items: Vec<Item>,
    alias: Option<String>,
}

#[derive(Debug, Clone)]
enum Definition {
    Terminal {
        name: String,
        priority: i32,
        pattern: String,
    },
    Rule {
        name: String,
        alternatives: Vec<Alternative>,
        extend: bool,
    },
    Ignore(String),
    Keywords(String),
}

struct MetaParser<'a> {
    fragment: &'a str,
    tokens: Vec<MetaToken>,
    pos: usize,
}

impl<'a> MetaParser<'a> {
    fn error(&self, message: impl Into<String>) -> GrammarError {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1);
        GrammarError::Syntax {
            fragment: self.fragment.to_string(),
            line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&MetaToken> {
        self.tokens.get(self.pos)
    }

    fn expect_punct(&mut self, c: &str) -> Result<(), GrammarError> {
        match self.peek() {
            Some(token) if token.is_punct(c) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected '{}'", c))),
        }
    }

    fn expect_name(&mut self) -> Result<String, GrammarError> {
        match self.peek() {
            Some(token) if token.kind == MetaKind::Name => {
                let name = token.text.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    /// A definition ends at a directive or at the next `name:`
    fn at_definition_end(&self) -> bool {
        match self.tokens.get(self.pos) {
            None => true,
            Some(token) if token.kind == MetaKind::Directive => true,
            Some(token) if token.kind == MetaKind::Name => self
                .tokens
                .get(self.pos + 1)
                .is_some_and(|next| next.is_punct(":")),
            Some(_) => false,
        }
    }

    fn definitions(&mut self) -> Result<Vec<Definition>, GrammarError> {
        let mut definitions = Vec::new();

        while let Some(token) = self.peek().cloned() {
            match token.kind {
                MetaKind::Directive => {
                    self.pos += 1;
                    match token.text.as_str() {
                        "%ignore" => definitions.push(Definition::Ignore(self.expect_name()?)),
                        "%keywords" => definitions.push(Definition::Keywords(self.expect_name()?)),
                        "%extend" => {
                            let name = self.expect_name()?;
                            self.expect_punct(":")?;
                            let alternatives = self.alternatives()?;
                            definitions.push(Definition::Rule {
                                name,
                                alternatives,
                                extend: true,
                            });
                        }
                        other => return Err(self.error(format!("unknown directive {}", other))),
                    }
                }
                MetaKind::Name => {
                    self.pos += 1;
                    self.expect_punct(":")?;
                    definitions.push(self.definition(&token.text)?);
                }
                _ => return Err(self.error(format!("expected a definition, found '{}'", token.text))),
            }
        }

        Ok(definitions)
    }

    fn definition(&mut self, name: &str) -> Result<Definition, GrammarError> {
        let (base, priority) = match name.split_once('.') {
            Some((base, priority)) => (base, Some(priority)),
            None => (name, None),
        };

        if !is_terminal_name(base) {
            if priority.is_some() {
                return Err(self.error(format!("rule {} cannot carry a priority", base)));
            }
            return Ok(Definition::Rule {
                name: base.to_string(),
                alternatives: self.alternatives()?,
                extend: false,
            });
        }

        let priority = match priority {
            Some(text) => text
                .parse()
                .map_err(|_| self.error(format!("bad priority {}", text)))?,
            None => 1,
        };

        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error(format!("terminal {} has no pattern", base)))?;
        self.pos += 1;

        let inner = &token.text[1..token.text.len() - 1];
        let pattern = match token.kind {
            MetaKind::Regex => inner.replace("\\/", "/"),
            MetaKind::Str => regex::escape(inner),
            _ => return Err(self.error(format!("terminal {} needs /regex/ or \"text\"", base))),
        };

        Ok(Definition::Terminal {
            name: base.to_string(),
            priority,
            pattern,
        })
    }

    fn alternatives(&mut self) -> Result<Vec<Alternative>, GrammarError> {
        let mut alternatives = vec![self.alternative()?];
        while self.peek().is_some_and(|t| t.is_punct("|")) {
            self.pos += 1;
            alternatives.push(self.alternative()?);
        }
        Ok(alternatives)
    }

    fn alternative(&mut self) -> Result<Alternative, GrammarError> {
        let mut items = Vec::new();
        let mut alias = None;

        while !self.at_definition_end() {
            let Some(token) = self.peek() else { break };
            if token.is_punct("|") || token.is_punct(")") || token.is_punct("]") {
                break;
            }
            if token.kind == MetaKind::Arrow {
                self.pos += 1;
                alias = Some(self.expect_name()?);
                continue;
            }
            items.push(self.item()?);
        }

        Ok(Alternative { items, alias })
    }

    fn item(&mut self) -> Result<Item, GrammarError> {
        let token = self.peek().cloned().ok_or_else(|| self.error("unexpected end of grammar"))?;
        self.pos += 1;

        let atom = match token.kind {
            MetaKind::Punct if token.text == "(" => {
                let alternatives = self.alternatives()?;
                self.expect_punct(")")?;
                Atom::Group(alternatives)
            }
            MetaKind::Punct if token.text == "[" => {
                let alternatives = self.alternatives()?;
                self.expect_punct("]")?;
                return Ok(Item {
                    atom: Atom::Group(alternatives),
                    repeat: Some(Repeat::Optional),
                });
            }
            MetaKind::Str => Atom::Literal(token.text[1..token.text.len() - 1].to_string()),
            MetaKind::Name => Atom::Name(token.text),
            _ => {
                self.pos -= 1;
                return Err(self.error(format!("unexpected '{}'", token.text)));
            }
        };

        let repeat = match self.peek() {
            Some(t) if t.is_punct("?") => Some(Repeat::Optional),
            Some(t) if t.is_punct("*") => Some(Repeat::ZeroOrMore),
            Some(t) if t.is_punct("+") => Some(Repeat::OneOrMore),
            _ => None,
        };
        if repeat.is_some() {
            self.pos += 1;
        }

        Ok(Item { atom, repeat })
    }
}

/// `NAME`, `_NAME`: upper-case with at least one letter
fn is_terminal_name(name: &str) -> bool {
    let bare = name.trim_start_matches(['?', '_']);
    bare.starts_with(|c: char| c.is_ascii_uppercase())
        && !name.chars().any(|c| c.is_ascii_lowercase())
}

fn is_word(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char)
}

// EBNF expansion

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HelperKind {
    Repeat,
    Group,
}

impl HelperKind {
    fn as_str(&self) -> &'static str {
        match self {
            HelperKind::Repeat => "star",
            HelperKind::Group => "group",
        }
    }
}

#[derive(Default)]
struct Builder {
    terminals: Vec<Terminal>,
    terminal_index: HashMap<String, usize>,
    rules: Vec<Rule>,
    rule_index: HashMap<String, usize>,
    productions: Vec<Production>,
    helpers: HashMap<(HelperKind, Vec<Vec<Symbol>>), Symbol>,
}

impl Builder {
    fn build(mut self, definitions: Vec<Definition>) -> Result<Grammar, GrammarError> {
        self.add_terminal(Terminal {
            name: END.to_string(),
            pattern: String::new(),
            priority: 0,
            kind: TerminalKind::End,
        });

        let mut ignore = Vec::new();
        let mut keywords = None;
        let mut bodies: Vec<(String, Vec<Alternative>)> = Vec::new();

        for definition in definitions {
            match definition {
                Definition::Terminal {
                    name,
                    priority,
                    pattern,
                } => {
                    let terminal = Terminal {
                        name: name.clone(),
                        pattern,
                        priority,
                        kind: TerminalKind::Pattern,
                    };
                    // Later fragments override earlier definitions in place
                    match self.terminal_index.get(&name) {
                        Some(&index) => self.terminals[index] = terminal,
                        None => {
                            self.add_terminal(terminal);
                        }
                    }
                }
                Definition::Rule {
                    name,
                    alternatives,
                    extend,
                } => {
                    let base = name.trim_start_matches('?');
                    let existing = bodies
                        .iter_mut()
                        .find(|(n, _)| n.trim_start_matches('?') == base);
                    match (existing, extend) {
                        (Some((_, body)), true) => body.extend(alternatives),
                        (None, true) => return Err(GrammarError::ExtendUnknownRule(name)),
                        (Some(_), false) => return Err(GrammarError::DuplicateRule(name)),
                        (None, false) => bodies.push((name, alternatives)),
                    }
                }
                Definition::Ignore(name) => ignore.push(name),
                Definition::Keywords(name) => keywords = Some(name),
            }
        }

        if bodies.is_empty() {
            return Err(GrammarError::Empty);
        }

        self.add_rule(AUGMENTED_START.to_string(), RuleMode::Keep, None);
        for (name, _) in &bodies {
            let (base, mode) = match name.strip_prefix('?') {
                Some(base) => (base, RuleMode::Inline),
                None if name.starts_with('_') => (name.as_str(), RuleMode::Splice),
                None => (name.as_str(), RuleMode::Keep),
            };
            let tag = match mode {
                RuleMode::Splice => None,
                _ => Some(
                    NodeTag::from_name(base)
                        .ok_or_else(|| GrammarError::UnknownTag(base.to_string()))?,
                ),
            };
            self.add_rule(base.to_string(), mode, tag);
        }

        // Augmented production first; the first rule defined is the start rule
        self.productions.push(Production {
            lhs: 0,
            rhs: vec![Symbol::Rule(1)],
            alias: None,
        });

        for (name, alternatives) in &bodies {
            let base = name.trim_start_matches('?');
            let lhs = self.rule_index[base];
            for alternative in alternatives {
                let alias = match &alternative.alias {
                    Some(alias) => Some(
                        NodeTag::from_name(alias)
                            .ok_or_else(|| GrammarError::UnknownTag(alias.clone()))?,
                    ),
                    None => None,
                };
                for rhs in self.expand_alternative(&alternative.items, base)? {
                    self.productions.push(Production { lhs, rhs, alias });
                }
            }
        }

        let mut seen = HashSet::new();
        let productions: Vec<Production> = self
            .productions
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        let ignored = ignore
            .iter()
            .map(|name| {
                self.terminal_index
                    .get(name)
                    .copied()
                    .ok_or_else(|| GrammarError::UnknownSymbol {
                        context: "%ignore".to_string(),
                        name: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let keyword_source = match keywords {
            Some(name) => Some(self.terminal_index.get(&name).copied().ok_or(
                GrammarError::UnknownSymbol {
                    context: "%keywords".to_string(),
                    name,
                },
            )?),
            None => None,
        };

        if keyword_source.is_none()
            && self.terminals.iter().any(|t| t.kind == TerminalKind::Keyword)
        {
            return Err(GrammarError::MissingKeywordSource);
        }

        Ok(Grammar {
            terminals: self.terminals,
            rules: self.rules,
            productions,
            ignored,
            keyword_source,
        })
    }

    fn add_terminal(&mut self, terminal: Terminal) -> usize {
        let index = self.terminals.len();
        self.terminal_index.insert(terminal.name.clone(), index);
        self.terminals.push(terminal);
        index
    }

    fn add_rule(&mut self, name: String, mode: RuleMode, tag: Option<NodeTag>) -> usize {
        let index = self.rules.len();
        self.rule_index.insert(name.clone(), index);
        self.rules.push(Rule { name, mode, tag });
        index
    }

    /// Terminal for a quoted literal: words become keywords, the rest operators
    fn literal(&mut self, text: &str) -> usize {
        let (name, kind, priority) = if is_word(text) {
            (text.to_ascii_uppercase(), TerminalKind::Keyword, 0)
        } else {
            (text.to_string(), TerminalKind::Literal, 1)
        };

        match self.terminal_index.get(&name) {
            Some(&index) => index,
            None => self.add_terminal(Terminal {
                name,
                pattern: text.to_string(),
                priority,
                kind,
            }),
        }
    }

    fn helper(&mut self, kind: HelperKind, sequences: Vec<Vec<Symbol>>, owner: &str) -> Symbol {
        let key = (kind, sequences);
        if let Some(symbol) = self.helpers.get(&key) {
            return *symbol;
        }

        let index = self.rules.len();
        self.add_rule(
            format!("__{}_{}_{}", owner, kind.as_str(), index),
            RuleMode::Splice,
            None,
        );

        for sequence in &key.1 {
            self.productions.push(Production {
                lhs: index,
                rhs: sequence.clone(),
                alias: None,
            });
            if kind == HelperKind::Repeat {
                let mut rhs = Vec::with_capacity(sequence.len() + 1);
                rhs.push(Symbol::Rule(index));
                rhs.extend_from_slice(sequence);
                self.productions.push(Production {
                    lhs: index,
                    rhs,
                    alias: None,
                });
            }
        }

        let symbol = Symbol::Rule(index);
        self.helpers.insert(key, symbol);
        symbol
    }

    fn expand_alternative(
        &mut self,
        items: &[Item],
        owner: &str,
    ) -> Result<Vec<Vec<Symbol>>, GrammarError> {
        let mut sequences: Vec<Vec<Symbol>> = vec![Vec::new()];

        for item in items {
            let mut choices = self.expand_atom(&item.atom, owner)?;
            match item.repeat {
                Some(Repeat::Optional) => choices.push(Vec::new()),
                Some(repeat) => {
                    let helper = self.helper(HelperKind::Repeat, choices, owner);
                    choices = vec![vec![helper]];
                    if repeat == Repeat::ZeroOrMore {
                        choices.push(Vec::new());
                    }
                }
                None => {}
            }

            sequences = sequences
                .iter()
                .flat_map(|prefix| {
                    choices.iter().map(move |choice| {
                        prefix.iter().chain(choice.iter()).copied().collect::<Vec<_>>()
                    })
                })
                .collect();
        }

        Ok(sequences)
    }

    fn expand_atom(&mut self, atom: &Atom, owner: &str) -> Result<Vec<Vec<Symbol>>, GrammarError> {
        match atom {
            Atom::Literal(text) => Ok(vec![vec![Symbol::Terminal(self.literal(text))]]),
            Atom::Name(name) => {
                if let Some(&index) = self.terminal_index.get(name) {
                    Ok(vec![vec![Symbol::Terminal(index)]])
                } else if let Some(&index) = self.rule_index.get(name) {
                    Ok(vec![vec![Symbol::Rule(index)]])
                } else {
                    Err(GrammarError::UnknownSymbol {
                        context: format!("rule '{}'", owner),
                        name: name.clone(),
                    })
                }
            }
            Atom::Group(alternatives) => {
                let mut expanded = Vec::new();
                for alternative in alternatives {
                    expanded.extend(self.expand_alternative(&alternative.items, owner)?);
                }
                if alternatives.len() == 1 {
                    Ok(expanded)
                } else {
                    Ok(vec![vec![self.helper(HelperKind::Group, expanded, owner)]])
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &'static str) -> Result<Grammar, GrammarError> {
        Grammar::compile(&[GrammarFragment::new("test", text)])
    }

    const LIST: &str = r#"
        %keywords NAME
        %ignore WS
        WS: /[ ]+/
        NAME: /[a-z]+/
        start: "SELECT" ident ("," ident)*
        ident: NAME
    "#;

    #[test]
    fn compiles_terminals_and_rules() {
        let grammar = compile(LIST).unwrap();

        assert_eq!(grammar.terminals[0].name, END);
        assert_eq!(grammar.terminals[1].name, "WS");
        assert_eq!(grammar.terminals[2].name, "NAME");
        let select = grammar.terminal_index("SELECT").unwrap();
        assert_eq!(grammar.terminals[select].kind, TerminalKind::Keyword);
        let comma = grammar.terminal_index(",").unwrap();
        assert_eq!(grammar.terminals[comma].kind, TerminalKind::Literal);

        assert_eq!(grammar.rules[0].name, AUGMENTED_START);
        assert_eq!(grammar.rules[1].tag, Some(NodeTag::Start));
        assert_eq!(grammar.describe(0), "$start -> start");
        assert_eq!(grammar.ignored, vec![1]);
        assert_eq!(grammar.keyword_source, Some(2));
    }

    #[test]
    fn repetition_becomes_left_recursive_helper() {
        let grammar = compile(LIST).unwrap();
        let helper = grammar
            .rules
            .iter()
            .position(|r| r.name.starts_with("__start_star"))
            .unwrap();
        assert_eq!(grammar.rules[helper].mode, RuleMode::Splice);

        let described: Vec<String> = (0..grammar.productions.len())
            .filter(|&p| grammar.productions[p].lhs == helper)
            .map(|p| grammar.describe(p))
            .collect();
        let name = &grammar.rules[helper].name;
        assert_eq!(
            described,
            vec![
                format!("{} -> , ident", name),
                format!("{} -> {} , ident", name, name),
            ]
        );
    }

    #[test]
    fn optional_items_duplicate_the_alternative() {
        let grammar = compile(
            r#"
            NAME: /[a-z]+/
            start: NAME ["AS"] NAME
            "#,
        );
        // a word literal without %keywords cannot be lexed
        assert_eq!(grammar.unwrap_err(), GrammarError::MissingKeywordSource);

        let grammar = compile(
            r#"
            NAME: /[a-z]+/
            start: NAME [":"] NAME
            "#,
        )
        .unwrap();
        let start: Vec<String> = (1..grammar.productions.len()).map(|p| grammar.describe(p)).collect();
        assert_eq!(start, vec!["start -> NAME : NAME", "start -> NAME NAME"]);
    }

    #[test]
    fn extend_and_override_across_fragments() {
        let base = GrammarFragment::new(
            "base",
            r#"
            NUM: /[0-9]+/
            start: primary
            ?primary: NUM
            "#,
        );
        let dialect = GrammarFragment::new(
            "dialect",
            r#"
            NUM: /[0-9]+(\.[0-9]+)?/
            STR: /'[^']*'/
            %extend primary: STR -> literal
            "#,
        );

        let grammar = Grammar::compile(&[base, dialect]).unwrap();
        let num = grammar.terminal_index("NUM").unwrap();
        assert_eq!(num, 1);
        assert!(grammar.terminals[num].pattern.contains("\\."));

        let primary = grammar.rule_index("primary").unwrap();
        assert_eq!(grammar.rules[primary].mode, RuleMode::Inline);
        let aliased = grammar
            .productions
            .iter()
            .find(|p| p.lhs == primary && p.alias.is_some())
            .unwrap();
        assert_eq!(aliased.alias, Some(NodeTag::Literal));
    }

    #[test]
    fn reports_grammar_errors() {
        assert!(matches!(
            compile("start: missing"),
            Err(GrammarError::UnknownSymbol { .. })
        ));
        assert!(matches!(
            compile("start: \"x\"\nstart: \"y\""),
            Err(GrammarError::DuplicateRule(_))
        ));
        assert!(matches!(
            compile("start: \"x\"\n%extend other: \"y\""),
            Err(GrammarError::ExtendUnknownRule(_))
        ));
        assert!(matches!(
            compile("start: nonsense\nnonsense: \"x\""),
            Err(GrammarError::UnknownTag(name)) if name == "nonsense"
        ));
        assert!(matches!(
            compile("start: \"x\" -> not_a_tag"),
            Err(GrammarError::UnknownTag(_))
        ));
        assert!(matches!(
            compile("NUM: /[0-9]+\nstart: NUM"),
            Err(GrammarError::Syntax { line: 1, .. })
        ));
        assert!(matches!(compile("%ignore WS"), Err(GrammarError::Empty)));
    }
}
