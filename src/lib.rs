//! An LR(0) parser generator and recognizer for context-free grammars.
//!
//! A grammar source is parsed into an augmented rule set, the canonical
//! collection of LR(0) item sets is built into a shift/goto/reduce
//! parsing table, and a pushdown driver decides membership of candidate
//! strings, optionally recording a step trace for visualization.

pub mod export;
pub mod grammar;
pub mod lexer;
pub mod matcher;
pub mod production;
pub mod state;
pub mod symbol;

pub use crate::grammar::{Grammar, GrammarError, GrammarForm};
pub use crate::matcher::{ConflictError, Matcher, StepRecord};
pub use crate::state::{Action, ConflictKind, ParserState, ParsingTable, StateId};
pub use crate::symbol::{Symbol, SymbolTable};
