use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::grammar::Grammar;
use crate::matcher::StepRecord;
use crate::state::{Action, ParsingTable};

/// Failure to write one of the JSON outputs, with the offending path.
#[derive(Debug)]
pub struct ExportError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl ExportError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for ExportError {}

// One shift or goto edge of a state. Reduce actions are not exported.
#[derive(Debug, Serialize)]
struct TransitionJson {
    label: u32,
    dst: u32,
}

fn automaton_records(table: &ParsingTable) -> Vec<Vec<TransitionJson>> {
    table
        .states()
        .iter()
        .map(|state| {
            state
                .actions()
                .iter()
                .filter_map(|action| match action {
                    Action::Shift { label, target } | Action::Goto { label, target } => {
                        Some(TransitionJson {
                            label: label.code(),
                            dst: *target,
                        })
                    }
                    Action::Reduce { .. } => None,
                })
                .collect()
        })
        .collect()
}

/// Writes the automaton as a JSON array indexed by state id.
pub fn write_automaton(path: &Path, table: &ParsingTable) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|err| ExportError::new(path, err))?;
    serde_json::to_writer(file, &automaton_records(table))
        .map_err(|err| ExportError::new(path, err.into()))
}

#[derive(Debug, Serialize)]
struct ReduceToJson<'a> {
    symbol: &'a str,
    size: usize,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StepJson<'a> {
    Shift,
    Reduce { to: ReduceToJson<'a> },
    Finish { result: u8 },
}

#[derive(Debug, Serialize)]
struct StepsJson<'a> {
    string: &'a str,
    actions: Vec<StepJson<'a>>,
}

fn step_records<'a>(grammar: &'a Grammar, steps: &[StepRecord]) -> Vec<StepJson<'a>> {
    steps
        .iter()
        .map(|step| match step {
            StepRecord::Shift { .. } => StepJson::Shift,
            StepRecord::Reduce { lhs, rhs_len } => StepJson::Reduce {
                to: ReduceToJson {
                    symbol: grammar.symbols().name_of(*lhs),
                    size: *rhs_len,
                },
            },
            StepRecord::Finish { accepted } => StepJson::Finish {
                result: *accepted as u8,
            },
        })
        .collect()
}

/// Writes one candidate string's step trace in driver order.
pub fn write_steps(
    path: &Path,
    grammar: &Grammar,
    input: &str,
    steps: &[StepRecord],
) -> Result<(), ExportError> {
    let records = StepsJson {
        string: input,
        actions: step_records(grammar, steps),
    };
    let file = File::create(path).map_err(|err| ExportError::new(path, err))?;
    serde_json::to_writer(file, &records).map_err(|err| ExportError::new(path, err.into()))
}
