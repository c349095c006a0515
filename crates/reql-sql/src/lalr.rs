//! LALR(1) parse table construction
//!
//! Builds the LR(0) automaton, then computes LALR(1) lookaheads by
//! discovering which lookaheads each kernel item generates spontaneously
//! and which it propagates, and iterating propagation to a fixpoint.
//! Conflicts are resolved (shift over reduce, earlier production over
//! later) and recorded so callers can reject ambiguous grammars.

use crate::grammar::{Grammar, Symbol};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Parser action for a state and lookahead terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shift(usize),
    Reduce(usize),
    Accept,
}

/// A table cell that had more than one candidate action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub state: usize,
    pub terminal: usize,

    /// Action left in the table
    pub kept: Action,

    /// Action that lost
    pub dropped: Action,
}

impl Conflict {
    pub fn is_shift_reduce(&self) -> bool {
        matches!(
            (self.kept, self.dropped),
            (Action::Shift(_), Action::Reduce(_)) | (Action::Reduce(_), Action::Shift(_))
        )
    }
}

/// Action and goto tables of an LALR(1) parser
#[derive(Debug, Clone)]
pub struct ParseTable {
    actions: Vec<Vec<Option<Action>>>,
    gotos: Vec<HashMap<usize, usize>>,
    conflicts: Vec<Conflict>,
}

/// (production, dot position)
type Item = (usize, usize);

type Lookaheads = BTreeSet<usize>;

impl ParseTable {
    /// Build the table for a compiled grammar
    pub fn build(grammar: &Grammar) -> Self {
        let builder = TableBuilder::new(grammar);
        let (kernels, transitions) = builder.lr0_automaton();
        let lookaheads = builder.lookaheads(&kernels, &transitions);
        let (actions, conflicts) = builder.actions(&kernels, &transitions, &lookaheads);

        let gotos = transitions
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|(symbol, target)| match symbol {
                        Symbol::Rule(rule) => Some((*rule, *target)),
                        Symbol::Terminal(_) => None,
                    })
                    .collect()
            })
            .collect();

        debug!(
            states = kernels.len(),
            productions = grammar.productions.len(),
            conflicts = conflicts.len(),
            "Built LALR(1) table"
        );

        Self {
            actions,
            gotos,
            conflicts,
        }
    }

    pub fn action(&self, state: usize, terminal: usize) -> Option<Action> {
        self.actions
            .get(state)
            .and_then(|row| row.get(terminal))
            .copied()
            .flatten()
    }

    pub fn goto(&self, state: usize, rule: usize) -> Option<usize> {
        self.gotos.get(state).and_then(|row| row.get(&rule)).copied()
    }

    /// Terminals with an action in `state`, the expected set on errors
    pub fn expected(&self, state: usize) -> Vec<usize> {
        self.actions
            .get(state)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter_map(|(terminal, action)| action.map(|_| terminal))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn state_count(&self) -> usize {
        self.actions.len()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }
}

struct TableBuilder<'g> {
    grammar: &'g Grammar,
    by_lhs: Vec<Vec<usize>>,
    nullable: Vec<bool>,
    first: Vec<Lookaheads>,
}

impl<'g> TableBuilder<'g> {
    fn new(grammar: &'g Grammar) -> Self {
        let rule_count = grammar.rules.len();

        let mut by_lhs = vec![Vec::new(); rule_count];
        for (index, production) in grammar.productions.iter().enumerate() {
            by_lhs[production.lhs].push(index);
        }

        let mut nullable = vec![false; rule_count];
        let mut changed = true;
        while changed {
            changed = false;
            for production in &grammar.productions {
                if !nullable[production.lhs]
                    && production
                        .rhs
                        .iter()
                        .all(|s| matches!(s, Symbol::Rule(r) if nullable[*r]))
                {
                    nullable[production.lhs] = true;
                    changed = true;
                }
            }
        }

        let mut first = vec![Lookaheads::new(); rule_count];
        let mut changed = true;
        while changed {
            changed = false;
            for production in &grammar.productions {
                for symbol in &production.rhs {
                    match *symbol {
                        Symbol::Terminal(t) => {
                            changed |= first[production.lhs].insert(t);
                            break;
                        }
                        Symbol::Rule(r) => {
                            if r != production.lhs {
                                let inherited: Vec<usize> = first[r].iter().copied().collect();
                                for t in inherited {
                                    changed |= first[production.lhs].insert(t);
                                }
                            }
                            if !nullable[r] {
                                break;
                            }
                        }
                    }
                }
            }
        }

        Self {
            grammar,
            by_lhs,
            nullable,
            first,
        }
    }

    fn rhs(&self, production: usize) -> &[Symbol] {
        &self.grammar.productions[production].rhs
    }

    /// FIRST of a symbol sequence, plus whether the whole sequence is nullable
    fn first_of(&self, symbols: &[Symbol]) -> (Lookaheads, bool) {
        let mut out = Lookaheads::new();
        for symbol in symbols {
            match *symbol {
                Symbol::Terminal(t) => {
                    out.insert(t);
                    return (out, false);
                }
                Symbol::Rule(r) => {
                    out.extend(self.first[r].iter().copied());
                    if !self.nullable[r] {
                        return (out, false);
                    }
                }
            }
        }
        (out, true)
    }

    fn closure0(&self, kernel: &[Item]) -> Vec<Item> {
        let mut items = kernel.to_vec();
        let mut seen: BTreeSet<Item> = kernel.iter().copied().collect();
        let mut k = 0;
        while k < items.len() {
            let (production, dot) = items[k];
            k += 1;
            if let Some(Symbol::Rule(rule)) = self.rhs(production).get(dot) {
                for &next in &self.by_lhs[*rule] {
                    if seen.insert((next, 0)) {
                        items.push((next, 0));
                    }
                }
            }
        }
        items
    }

    fn lr0_automaton(&self) -> (Vec<Vec<Item>>, Vec<BTreeMap<Symbol, usize>>) {
        let mut kernels: Vec<Vec<Item>> = vec![vec![(0, 0)]];
        let mut index: HashMap<Vec<Item>, usize> = HashMap::new();
        index.insert(vec![(0, 0)], 0);
        let mut transitions = Vec::new();

        let mut k = 0;
        while k < kernels.len() {
            let mut moves: BTreeMap<Symbol, BTreeSet<Item>> = BTreeMap::new();
            for (production, dot) in self.closure0(&kernels[k]) {
                if let Some(symbol) = self.rhs(production).get(dot) {
                    moves.entry(*symbol).or_default().insert((production, dot + 1));
                }
            }

            let mut row = BTreeMap::new();
            for (symbol, items) in moves {
                let kernel: Vec<Item> = items.into_iter().collect();
                let target = match index.get(&kernel) {
                    Some(&target) => target,
                    None => {
                        let target = kernels.len();
                        index.insert(kernel.clone(), target);
                        kernels.push(kernel);
                        target
                    }
                };
                row.insert(symbol, target);
            }

            transitions.push(row);
            k += 1;
        }

        (kernels, transitions)
    }

    /// LR(1) closure of items carrying lookahead sets
    fn closure1(&self, items: BTreeMap<Item, Lookaheads>) -> BTreeMap<Item, Lookaheads> {
        let mut result = items;
        let mut work: Vec<Item> = result.keys().copied().collect();

        while let Some((production, dot)) = work.pop() {
            let rhs = self.rhs(production);
            let Some(Symbol::Rule(rule)) = rhs.get(dot) else {
                continue;
            };

            let (mut lookahead, nullable) = self.first_of(&rhs[dot + 1..]);
            if nullable {
                if let Some(inherited) = result.get(&(production, dot)) {
                    lookahead.extend(inherited.iter().copied());
                }
            }

            for &next in &self.by_lhs[*rule] {
                let item = (next, 0);
                let (grew, fresh) = match result.get_mut(&item) {
                    Some(current) => {
                        let before = current.len();
                        current.extend(lookahead.iter().copied());
                        (current.len() != before, false)
                    }
                    None => {
                        result.insert(item, lookahead.clone());
                        (true, true)
                    }
                };
                if (grew || fresh) && !work.contains(&item) {
                    work.push(item);
                }
            }
        }

        result
    }

    fn lookaheads(
        &self,
        kernels: &[Vec<Item>],
        transitions: &[BTreeMap<Symbol, usize>],
    ) -> Vec<BTreeMap<Item, Lookaheads>> {
        // Stands in for "whatever follows the kernel item" while probing
        let lookahead_marker = self.grammar.terminals.len();

        let mut table: Vec<BTreeMap<Item, Lookaheads>> = kernels
            .iter()
            .map(|kernel| kernel.iter().map(|item| (*item, Lookaheads::new())).collect())
            .collect();
        table[0].entry((0, 0)).or_default().insert(0);

        let mut propagation: Vec<(usize, Item, usize, Item)> = Vec::new();

        for (state, kernel) in kernels.iter().enumerate() {
            for &kernel_item in kernel {
                let seed = BTreeMap::from([(kernel_item, Lookaheads::from([lookahead_marker]))]);
                for ((production, dot), lookahead) in self.closure1(seed) {
                    let Some(symbol) = self.rhs(production).get(dot) else {
                        continue;
                    };
                    let Some(&target) = transitions[state].get(symbol) else {
                        continue;
                    };
                    let moved = (production, dot + 1);
                    for terminal in lookahead {
                        if terminal == lookahead_marker {
                            propagation.push((state, kernel_item, target, moved));
                        } else {
                            table[target].entry(moved).or_default().insert(terminal);
                        }
                    }
                }
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for (state, item, target, moved) in &propagation {
                let source: Vec<usize> = table[*state]
                    .get(item)
                    .map(|l| l.iter().copied().collect())
                    .unwrap_or_default();
                let destination = table[*target].entry(*moved).or_default();
                for terminal in source {
                    changed |= destination.insert(terminal);
                }
            }
        }

        table
    }

    fn actions(
        &self,
        kernels: &[Vec<Item>],
        transitions: &[BTreeMap<Symbol, usize>],
        lookaheads: &[BTreeMap<Item, Lookaheads>],
    ) -> (Vec<Vec<Option<Action>>>, Vec<Conflict>) {
        let terminal_count = self.grammar.terminals.len();
        let mut actions = Vec::with_capacity(kernels.len());
        let mut conflicts = Vec::new();

        for (state, _) in kernels.iter().enumerate() {
            let mut row: Vec<Option<Action>> = vec![None; terminal_count];

            for ((production, dot), lookahead) in self.closure1(lookaheads[state].clone()) {
                match self.rhs(production).get(dot) {
                    Some(Symbol::Terminal(terminal)) => {
                        let Some(&target) = transitions[state].get(&Symbol::Terminal(*terminal))
                        else {
                            continue;
                        };
                        let shift = Action::Shift(target);
                        match row[*terminal] {
                            Some(reduce @ Action::Reduce(_)) => {
                                self.record(&mut conflicts, state, *terminal, shift, reduce);
                                row[*terminal] = Some(shift);
                            }
                            Some(_) => {}
                            None => row[*terminal] = Some(shift),
                        }
                    }
                    Some(Symbol::Rule(_)) => {}
                    None => {
                        let action = if production == 0 {
                            Action::Accept
                        } else {
                            Action::Reduce(production)
                        };
                        for terminal in lookahead {
                            match row[terminal] {
                                None => row[terminal] = Some(action),
                                Some(existing) if existing == action => {}
                                Some(existing @ Action::Shift(_)) => {
                                    self.record(&mut conflicts, state, terminal, existing, action);
                                }
                                Some(existing) => match (existing, action) {
                                    (Action::Reduce(kept), Action::Reduce(new)) if new < kept => {
                                        self.record(&mut conflicts, state, terminal, action, existing);
                                        row[terminal] = Some(action);
                                    }
                                    _ => {
                                        self.record(&mut conflicts, state, terminal, existing, action);
                                    }
                                },
                            }
                        }
                    }
                }
            }

            actions.push(row);
        }

        (actions, conflicts)
    }

    fn record(
        &self,
        conflicts: &mut Vec<Conflict>,
        state: usize,
        terminal: usize,
        kept: Action,
        dropped: Action,
    ) {
        let describe = |action: Action| match action {
            Action::Shift(target) => format!("shift to {}", target),
            Action::Reduce(production) => format!("reduce {}", self.grammar.describe(production)),
            Action::Accept => "accept".to_string(),
        };
        debug!(
            state,
            terminal = %self.grammar.terminals[terminal].name,
            kept = %describe(kept),
            dropped = %describe(dropped),
            "Resolved parse table conflict"
        );
        conflicts.push(Conflict {
            state,
            terminal,
            kept,
            dropped,
        });
    }
}
