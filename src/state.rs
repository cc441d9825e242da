use std::fmt;
use std::io::{self, Write};

use itertools::Itertools;
use log::{debug, warn};

use crate::grammar::Grammar;
use crate::production::{Item, ItemSet, RuleIdx};
use crate::symbol::Symbol;

pub type StateId = u32;

/// An LR(0) ambiguity recorded in a state's actions. The builder only
/// reports these; whether one is fatal is the driver's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    ShiftReduce,
    ReduceReduce,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConflictKind::ShiftReduce => write!(f, "shift/reduce"),
            ConflictKind::ReduceReduce => write!(f, "reduce/reduce"),
        }
    }
}

/// One entry of a state's action table. Shift and Goto share structure
/// and differ only in whether the label is a terminal or a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shift { label: Symbol, target: StateId },
    Goto { label: Symbol, target: StateId },
    Reduce { rule: RuleIdx },
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParserState {
    id: StateId,
    items: ItemSet,
    actions: Vec<Action>,
    has_shift: bool,
    has_reduce: bool,
}

impl ParserState {
    fn new(id: StateId, items: ItemSet) -> Self {
        Self {
            id,
            items,
            actions: Vec::new(),
            has_shift: false,
            has_reduce: false,
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn items(&self) -> &ItemSet {
        &self.items
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// True if any action shifts a terminal (gotos do not count).
    pub fn has_shift(&self) -> bool {
        self.has_shift
    }

    pub fn has_reduce(&self) -> bool {
        self.has_reduce
    }

    pub fn shift_target(&self, label: Symbol) -> Option<StateId> {
        self.actions.iter().find_map(|action| match action {
            Action::Shift { label: l, target } if *l == label => Some(*target),
            _ => None,
        })
    }

    pub fn goto_target(&self, label: Symbol) -> Option<StateId> {
        self.actions.iter().find_map(|action| match action {
            Action::Goto { label: l, target } if *l == label => Some(*target),
            _ => None,
        })
    }

    pub fn reduce_rules(&self) -> impl Iterator<Item = RuleIdx> + '_ {
        self.actions.iter().filter_map(|action| match action {
            Action::Reduce { rule } => Some(*rule),
            _ => None,
        })
    }

    /// Classifies the ambiguity the flags record, if any: two distinct
    /// reduce rules, or a reduce item alongside a terminal shift.
    pub fn conflict(&self) -> Option<ConflictKind> {
        let mut reduce_rules = self.reduce_rules();
        let first = reduce_rules.next()?;
        if reduce_rules.any(|other| other != first) {
            Some(ConflictKind::ReduceReduce)
        } else if self.has_shift {
            Some(ConflictKind::ShiftReduce)
        } else {
            None
        }
    }
}

/// The canonical LR(0) collection with its action tables, indexed by
/// state id. Built once from a grammar, then read-only.
#[derive(Debug)]
pub struct ParsingTable {
    states: Vec<ParserState>,
}

impl ParsingTable {
    pub fn build(grammar: &Grammar) -> Self {
        debug_assert!(!grammar.rules().is_empty());

        let mut states: Vec<ParserState> = Vec::new();
        let mut start_items = ItemSet::new();
        start_items.insert(Item::new(
            grammar.rules(),
            grammar.augmentation_rule(),
            1,
        ));
        closure(grammar, &mut start_items);
        states.push(ParserState::new(0, start_items));

        let mut index = 0;
        while index < states.len() {
            // Items ordered by symbol-at-dot: the complete items come
            // first, then one contiguous run per shiftable symbol.
            let snapshot: Vec<Item> = states[index].items.iter().copied().collect();
            let mut actions = Vec::new();
            let mut has_shift = false;
            let mut has_reduce = false;

            for (symbol, run) in &snapshot.iter().group_by(|item| item.symbol_at_dot()) {
                if symbol.is_end() {
                    for item in run {
                        actions.push(Action::Reduce { rule: item.rule() });
                        has_reduce = true;
                    }
                    continue;
                }

                let mut goto_items = ItemSet::new();
                for item in run {
                    goto_items.insert(item.shift_dot(grammar.rules()));
                }
                closure(grammar, &mut goto_items);

                let target = match states.iter().position(|s| s.items == goto_items) {
                    Some(existing) => existing as StateId,
                    None => {
                        let id = states.len() as StateId;
                        states.push(ParserState::new(id, goto_items));
                        id
                    }
                };

                if symbol.is_variable() {
                    actions.push(Action::Goto {
                        label: symbol,
                        target,
                    });
                } else {
                    actions.push(Action::Shift {
                        label: symbol,
                        target,
                    });
                    has_shift = true;
                }
            }

            states[index].actions = actions;
            states[index].has_shift = has_shift;
            states[index].has_reduce = has_reduce;
            if let Some(kind) = states[index].conflict() {
                warn!("state {}: {} conflict", index, kind);
            }
            index += 1;
        }

        debug!("built parsing table: {} states", states.len());
        ParsingTable { states }
    }

    pub fn states(&self) -> &[ParserState] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> &ParserState {
        &self.states[id as usize]
    }

    pub fn start_state(&self) -> &ParserState {
        &self.states[0]
    }

    pub fn write_description<W: Write>(&self, grammar: &Grammar, wtr: &mut W) -> io::Result<()> {
        for state in self.states.iter() {
            writeln!(wtr, "State {}:", state.id)?;
            wtr.write_all(b"    ")?;
            for action in state.actions.iter() {
                match action {
                    Action::Reduce { rule } => {
                        write!(wtr, "r({})", grammar.rule_to_string(*rule))?;
                    }
                    Action::Shift { label, target } => {
                        write!(
                            wtr,
                            "'{}' -> {}",
                            label.as_byte().unwrap_or(b'?') as char,
                            target
                        )?;
                    }
                    Action::Goto { label, target } => {
                        write!(wtr, "{} -> {}", grammar.symbols().name_of(*label), target)?;
                    }
                }
                wtr.write_all(b"; ")?;
            }
            wtr.write_all(b"\n")?;
            if let Some(kind) = state.conflict() {
                writeln!(wtr, "    ({} conflict)", kind)?;
            }

            for item in state.items.iter() {
                let rule = grammar.rule(item.rule());
                write!(wtr, "    {}:", grammar.symbols().name_of(rule.lhs()))?;
                for position in 1..rule.terminator_index() {
                    if position == item.dot() {
                        wtr.write_all(b" .")?;
                    }
                    write!(wtr, " {}", grammar.symbols().display(rule.symbol_at(position)))?;
                }
                if item.dot() == rule.terminator_index() {
                    wtr.write_all(b" .")?;
                }
                wtr.write_all(b"\n")?;
            }
            wtr.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Completes `items` so that every variable sitting right after a dot has
/// all of its rules present with the dot at position 1. The worklist is
/// processed in first-discovery order and no variable is expanded twice.
fn closure(grammar: &Grammar, items: &mut ItemSet) {
    let mut to_visit: Vec<Symbol> = Vec::new();

    for item in items.iter() {
        let symbol = item.symbol_at_dot();
        if symbol.is_variable() && !to_visit.contains(&symbol) {
            to_visit.push(symbol);
        }
    }

    let mut index = 0;
    while index < to_visit.len() {
        let symbol = to_visit[index];
        for rule_index in grammar.rule_range(symbol) {
            let item = Item::new(grammar.rules(), rule_index as RuleIdx, 1);
            let candidate = item.symbol_at_dot();
            items.insert(item);
            if candidate.is_variable() && !to_visit.contains(&candidate) {
                to_visit.push(candidate);
            }
        }
        index += 1;
    }
}
