use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::crate_version;
use log::debug;
use structopt::StructOpt;

use lr_matcher::export;
use lr_matcher::{Grammar, GrammarForm, Matcher, ParsingTable};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "lr_matcher",
    about = "LR(0) parser generator and matcher for context-free grammars",
    version = crate_version!(),
)]
struct CLOptions {
    /// Grammar surface form: "custom" or "bnf"
    #[structopt(short = "f", long = "form", default_value = "custom")]
    form: GrammarForm,
    /// Write the automaton as JSON to the given path
    #[structopt(long = "generate-automaton", parse(from_os_str))]
    generate_automaton: Option<PathBuf>,
    /// Write a step trace per candidate string to <prefix><index>
    #[structopt(long = "generate-steps", parse(from_os_str))]
    generate_steps: Option<PathBuf>,
    /// The grammar to build an automaton for
    grammar: String,
    /// Candidate strings to match against the grammar
    candidates: Vec<String>,
}

fn main() {
    if let Ok(spec) = std::env::var("LR_MATCHER_LOG") {
        let _ = flexi_logger::Logger::with_str(spec).start();
    }

    let options = CLOptions::from_args();
    debug!("{:?}", options);

    let grammar = match Grammar::parse(&options.grammar, options.form) {
        Ok(grammar) => grammar,
        Err(error) => {
            for diagnostic in error.diagnostics.iter() {
                eprintln!("{}", diagnostic);
            }
            process::exit(2);
        }
    };

    let table = ParsingTable::build(&grammar);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    grammar.write_description(&mut out).unwrap();
    writeln!(out).unwrap();
    table.write_description(&grammar, &mut out).unwrap();

    if let Some(path) = &options.generate_automaton {
        if let Err(error) = export::write_automaton(path, &table) {
            eprintln!("error: {}", error);
            process::exit(4);
        }
    }

    let matcher = Matcher::new(&grammar, &table);
    for (index, candidate) in options.candidates.iter().enumerate() {
        let decision = if let Some(prefix) = &options.generate_steps {
            match matcher.matches_with_trace(candidate.as_bytes()) {
                Ok((accepted, steps)) => {
                    let mut path = prefix.clone().into_os_string();
                    path.push(index.to_string());
                    let path = PathBuf::from(path);
                    if let Err(error) = export::write_steps(&path, &grammar, candidate, &steps) {
                        eprintln!("error: {}", error);
                        process::exit(4);
                    }
                    Ok(accepted)
                }
                Err(error) => Err(error),
            }
        } else {
            matcher.matches(candidate.as_bytes())
        };

        match decision {
            Ok(accepted) => {
                let verdict = if accepted { "accepted" } else { "rejected" };
                writeln!(out, "{:?}: {}", candidate, verdict).unwrap();
            }
            Err(error) => {
                eprintln!("error: {}", error);
                process::exit(3);
            }
        }
    }
}
