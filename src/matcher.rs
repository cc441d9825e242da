use std::fmt;

use log::trace;

use crate::grammar::Grammar;
use crate::state::{ConflictKind, ParsingTable, StateId};
use crate::symbol::Symbol;

/// Fatal ambiguity met while driving the automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictError {
    pub state: StateId,
    pub kind: ConflictKind,
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "state {}: {} conflict", self.state, self.kind)
    }
}

impl std::error::Error for ConflictError {}

/// One step of a driver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRecord {
    Shift { byte: u8 },
    Reduce { lhs: Symbol, rhs_len: usize },
    Finish { accepted: bool },
}

/// The shift-reduce pushdown driver. Holds only borrows of the grammar
/// and table, so any number of matchers can run over one table.
///
/// The stack holds `(state id, symbol)` pairs and the cursor walks the
/// input left to right. A state's unique reduce applies when the current
/// byte cannot be shifted from it; a shiftable byte wins. The reduce of
/// the augmentation rule is the accept action and fires only with the
/// input exhausted. More than one distinct reduce rule in a state is
/// fatal.
#[derive(Debug)]
pub struct Matcher<'a> {
    grammar: &'a Grammar,
    table: &'a ParsingTable,
}

impl<'a> Matcher<'a> {
    pub fn new(grammar: &'a Grammar, table: &'a ParsingTable) -> Self {
        Self { grammar, table }
    }

    pub fn matches(&self, input: &[u8]) -> Result<bool, ConflictError> {
        self.run(input, None)
    }

    pub fn matches_with_trace(
        &self,
        input: &[u8],
    ) -> Result<(bool, Vec<StepRecord>), ConflictError> {
        let mut steps = Vec::new();
        let accepted = self.run(input, Some(&mut steps))?;
        Ok((accepted, steps))
    }

    fn run(
        &self,
        input: &[u8],
        mut steps: Option<&mut Vec<StepRecord>>,
    ) -> Result<bool, ConflictError> {
        let mut stack: Vec<(StateId, Symbol)> = vec![(0, Symbol::END)];
        let mut cursor = 0usize;

        loop {
            let state_id = stack.last().expect("the bottom frame is never popped").0;
            let state = self.table.state(state_id);
            trace!("state {} cursor {} stack depth {}", state_id, cursor, stack.len());

            // The symbol the cursor rests on, if it is shiftable at all.
            let pending = input.get(cursor).copied().filter(|byte| *byte != 0);

            if state.has_reduce() {
                if state.conflict() == Some(ConflictKind::ReduceReduce) {
                    return Err(ConflictError {
                        state: state_id,
                        kind: ConflictKind::ReduceReduce,
                    });
                }
                let rule_index = state
                    .reduce_rules()
                    .next()
                    .expect("flag implies a reduce action");

                // A byte the state can shift takes priority over the
                // reduce; without this, an empty rule in the closure
                // would starve every shift in the same state.
                if let Some(byte) = pending {
                    if let Some(target) = state.shift_target(Symbol::terminal(byte)) {
                        stack.push((target, Symbol::terminal(byte)));
                        cursor += 1;
                        if let Some(steps) = steps.as_mut() {
                            steps.push(StepRecord::Shift { byte });
                        }
                        continue;
                    }
                }

                let rule = self.grammar.rule(rule_index);

                if rule.lhs() == Symbol::START {
                    // The accept reduce: only meaningful at end of input.
                    let accepted = cursor >= input.len();
                    if let Some(steps) = steps.as_mut() {
                        if accepted {
                            steps.push(StepRecord::Reduce {
                                lhs: rule.lhs(),
                                rhs_len: rule.rhs_len(),
                            });
                        }
                        steps.push(StepRecord::Finish { accepted });
                    }
                    return Ok(accepted);
                }

                let rhs_len = rule.rhs_len();
                debug_assert!(stack.len() > rhs_len);
                stack.truncate(stack.len() - rhs_len);
                let below = stack.last().expect("the bottom frame is never popped").0;
                let target = self
                    .table
                    .state(below)
                    .goto_target(rule.lhs())
                    .unwrap_or_else(|| {
                        panic!(
                            "malformed goto table: ({}, {})",
                            self.grammar.symbols().name_of(rule.lhs()),
                            below
                        )
                    });
                stack.push((target, rule.lhs()));
                if let Some(steps) = steps.as_mut() {
                    steps.push(StepRecord::Reduce {
                        lhs: rule.lhs(),
                        rhs_len,
                    });
                }
                continue;
            }

            match pending.and_then(|byte| {
                state
                    .shift_target(Symbol::terminal(byte))
                    .map(|target| (byte, target))
            }) {
                Some((byte, target)) => {
                    stack.push((target, Symbol::terminal(byte)));
                    cursor += 1;
                    if let Some(steps) = steps.as_mut() {
                        steps.push(StepRecord::Shift { byte });
                    }
                }
                None => {
                    if let Some(steps) = steps.as_mut() {
                        steps.push(StepRecord::Finish { accepted: false });
                    }
                    return Ok(false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarForm;
    use crate::state::ParsingTable;
    use lazy_static::lazy_static;

    fn build(source: &str) -> (Grammar, ParsingTable) {
        let grammar = Grammar::parse(source, GrammarForm::Custom).expect("grammar should parse");
        let table = ParsingTable::build(&grammar);
        (grammar, table)
    }

    fn accepts(fixture: &(Grammar, ParsingTable), input: &str) -> bool {
        Matcher::new(&fixture.0, &fixture.1)
            .matches(input.as_bytes())
            .expect("no conflicts expected")
    }

    lazy_static! {
        static ref SINGLE: (Grammar, ParsingTable) = build("S : a ;");
        static ref LEFT_RECURSIVE: (Grammar, ParsingTable) = build("S : S a | a ;");
        static ref RIGHT_RECURSIVE: (Grammar, ParsingTable) = build("S : a S | a ;");
        static ref PARENS: (Grammar, ParsingTable) = build("S : ( S ) | ;");
    }

    #[test]
    fn single_terminal_grammar() {
        assert!(accepts(&SINGLE, "a"));
        assert!(!accepts(&SINGLE, ""));
        assert!(!accepts(&SINGLE, "aa"));
        assert!(!accepts(&SINGLE, "b"));
    }

    #[test]
    fn left_recursive_repetition() {
        assert!(accepts(&LEFT_RECURSIVE, "a"));
        assert!(accepts(&LEFT_RECURSIVE, "aaa"));
        assert!(!accepts(&LEFT_RECURSIVE, ""));
        assert!(!accepts(&LEFT_RECURSIVE, "aab"));
    }

    #[test]
    fn right_recursive_repetition() {
        assert!(accepts(&RIGHT_RECURSIVE, "a"));
        assert!(accepts(&RIGHT_RECURSIVE, "aaa"));
        assert!(!accepts(&RIGHT_RECURSIVE, ""));
    }

    #[test]
    fn balanced_parentheses() {
        assert!(accepts(&PARENS, ""));
        assert!(accepts(&PARENS, "()"));
        assert!(accepts(&PARENS, "(())"));
        assert!(!accepts(&PARENS, "("));
        assert!(!accepts(&PARENS, ")("));
        assert!(!accepts(&PARENS, "())"));
    }

    #[test]
    fn escaped_terminal_matches_the_literal_byte() {
        let fixture = build(r"S : \: ;");
        assert!(accepts(&fixture, ":"));
        assert!(!accepts(&fixture, "a"));
    }

    #[test]
    fn forward_referenced_variable_matches() {
        let fixture = build("S : A ; A : b ;");
        assert!(accepts(&fixture, "b"));
        assert!(!accepts(&fixture, ""));
    }

    #[test]
    fn duplicate_rule_is_a_reduce_reduce_conflict() {
        let (grammar, table) = build("S : a | a ;");
        let matcher = Matcher::new(&grammar, &table);
        let error = matcher.matches(b"a").unwrap_err();
        assert_eq!(error.kind, ConflictKind::ReduceReduce);
        // The conflicted state is the one reached by shifting 'a'.
        let expected = table
            .start_state()
            .shift_target(Symbol::terminal(b'a'))
            .unwrap();
        assert_eq!(error.state, expected);
    }

    #[test]
    fn conflict_states_are_only_fatal_when_entered() {
        let (grammar, table) = build("S : a | a ;");
        let matcher = Matcher::new(&grammar, &table);
        // 'b' never reaches the conflicted state.
        assert_eq!(matcher.matches(b"b"), Ok(false));
    }

    #[test]
    fn empty_reduce_pops_nothing() {
        // "()" forces the empty rule to reduce with two frames on the
        // stack; underflow here would panic.
        assert!(accepts(&PARENS, "()"));
    }

    #[test]
    fn nul_bytes_are_never_shiftable() {
        assert_eq!(
            Matcher::new(&SINGLE.0, &SINGLE.1).matches(b"a\0"),
            Ok(false)
        );
        assert_eq!(Matcher::new(&SINGLE.0, &SINGLE.1).matches(b"\0"), Ok(false));
    }

    #[test]
    fn trace_ends_with_finish_matching_the_decision() {
        let matcher = Matcher::new(&PARENS.0, &PARENS.1);
        for input in ["", "()", "(())", "(", "())"].iter() {
            let accepted = matcher.matches(input.as_bytes()).unwrap();
            let (traced, steps) = matcher.matches_with_trace(input.as_bytes()).unwrap();
            assert_eq!(accepted, traced);
            assert_eq!(
                steps.last(),
                Some(&StepRecord::Finish { accepted }),
                "input {:?}",
                input
            );
            let finishes = steps
                .iter()
                .filter(|step| matches!(step, StepRecord::Finish { .. }))
                .count();
            assert_eq!(finishes, 1);
        }
    }

    #[test]
    fn trace_of_an_accepted_input_spells_out_the_derivation() {
        let matcher = Matcher::new(&LEFT_RECURSIVE.0, &LEFT_RECURSIVE.1);
        let (accepted, steps) = matcher.matches_with_trace(b"aa").unwrap();
        assert!(accepted);
        let s = LEFT_RECURSIVE.0.symbols().get("S").unwrap();
        assert_eq!(
            steps,
            vec![
                StepRecord::Shift { byte: b'a' },
                StepRecord::Reduce { lhs: s, rhs_len: 1 },
                StepRecord::Shift { byte: b'a' },
                StepRecord::Reduce { lhs: s, rhs_len: 2 },
                StepRecord::Reduce {
                    lhs: Symbol::START,
                    rhs_len: 1
                },
                StepRecord::Finish { accepted: true },
            ]
        );
    }

    #[test]
    fn empty_input_is_accepted_exactly_when_derivable() {
        assert!(accepts(&PARENS, ""));
        assert!(!accepts(&SINGLE, ""));
    }

    #[test]
    fn matchers_share_a_table_without_interference() {
        let first = Matcher::new(&PARENS.0, &PARENS.1);
        let second = Matcher::new(&PARENS.0, &PARENS.1);
        assert!(first.matches(b"()").unwrap());
        assert!(second.matches(b"((").is_ok());
        assert!(first.matches(b"(())").unwrap());
    }
}
