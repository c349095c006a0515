//! Tokenizer driven by the terminals of a compiled grammar
//!
//! At every position each pattern and literal terminal is tried; the match
//! with the highest priority wins, then the longest, then the terminal
//! declared first. Identifier matches whose text is a keyword of the
//! grammar are retyped to that keyword, so `selection` stays an identifier
//! while `SELECT` and `select` both become the `SELECT` keyword.

use crate::grammar::{Grammar, GrammarError, TerminalKind};
use crate::tree::Token;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Input no terminal matches
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No terminal matches {snippet:?} at line {line} column {column}")]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub offset: usize,

    /// Start of the unmatched input
    pub snippet: String,
}

#[derive(Debug)]
enum Matcher {
    Pattern(Regex),
    Literal(String),
}

impl Matcher {
    fn match_len(&self, input: &str) -> Option<usize> {
        match self {
            Matcher::Pattern(regex) => regex.find(input).map(|m| m.end()),
            Matcher::Literal(text) => input.starts_with(text.as_str()).then_some(text.len()),
        }
    }
}

#[derive(Debug)]
struct Candidate {
    terminal: usize,
    priority: i32,
    matcher: Matcher,
}

/// A token together with the grammar terminal it was lexed as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub terminal: usize,
    pub token: Token,
}

/// Tokenizer for one grammar
#[derive(Debug)]
pub struct Lexer {
    candidates: Vec<Candidate>,
    keywords: HashMap<String, usize>,
    ignored: HashSet<usize>,
    keyword_source: Option<usize>,
    names: Vec<Arc<str>>,
}

impl Lexer {
    /// Build the matchers for every terminal of a grammar
    pub fn new(grammar: &Grammar) -> Result<Self, GrammarError> {
        let mut candidates = Vec::new();
        let mut keywords = HashMap::new();

        for (index, terminal) in grammar.terminals.iter().enumerate() {
            let matcher = match terminal.kind {
                TerminalKind::End => continue,
                TerminalKind::Keyword => {
                    keywords.insert(terminal.pattern.to_lowercase(), index);
                    continue;
                }
                TerminalKind::Literal => Matcher::Literal(terminal.pattern.clone()),
                TerminalKind::Pattern => {
                    let regex = Regex::new(&format!("^(?:{})", terminal.pattern)).map_err(|e| {
                        GrammarError::InvalidPattern {
                            terminal: terminal.name.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    Matcher::Pattern(regex)
                }
            };

            candidates.push(Candidate {
                terminal: index,
                priority: terminal.priority,
                matcher,
            });
        }

        Ok(Self {
            candidates,
            keywords,
            ignored: grammar.ignored.iter().copied().collect(),
            keyword_source: grammar.keyword_source,
            names: grammar
                .terminals
                .iter()
                .map(|t| Arc::from(t.name.as_str()))
                .collect(),
        })
    }

    /// Tokenize the whole input; the last lexeme is always end of input
    pub fn tokenize(&self, text: &str) -> Result<Vec<Lexeme>, LexError> {
        let mut lexemes = Vec::new();
        let mut offset = 0;
        let mut line = 1;
        let mut column = 1;

        while offset < text.len() {
            let rest = &text[offset..];

            // (terminal, length, priority); ties keep the earlier terminal
            let mut best: Option<(usize, usize, i32)> = None;
            for candidate in &self.candidates {
                let Some(len) = candidate.matcher.match_len(rest) else {
                    continue;
                };
                if len == 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, best_len, best_priority)) => {
                        (candidate.priority, len) > (best_priority, best_len)
                    }
                };
                if better {
                    best = Some((candidate.terminal, len, candidate.priority));
                }
            }

            let Some((mut terminal, len, _)) = best else {
                return Err(LexError {
                    line,
                    column,
                    offset,
                    snippet: rest.chars().take(16).collect(),
                });
            };

            let lexeme_text = &rest[..len];
            if Some(terminal) == self.keyword_source {
                if let Some(&keyword) = self.keywords.get(&lexeme_text.to_lowercase()) {
                    terminal = keyword;
                }
            }

            if !self.ignored.contains(&terminal) {
                lexemes.push(Lexeme {
                    terminal,
                    token: Token {
                        kind: self.names[terminal].clone(),
                        text: lexeme_text.to_string(),
                        line,
                        column,
                        span: offset..offset + len,
                    },
                });
            }

            match lexeme_text.rfind('\n') {
                Some(last) => {
                    line += lexeme_text.matches('\n').count();
                    column = lexeme_text[last + 1..].chars().count() + 1;
                }
                None => column += lexeme_text.chars().count(),
            }
            offset += len;
        }

        lexemes.push(Lexeme {
            terminal: 0,
            token: Token {
                kind: self.names[0].clone(),
                text: String::new(),
                line,
                column,
                span: offset..offset,
            },
        });

        Ok(lexemes)
    }
}
