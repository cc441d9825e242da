use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use log::debug;

use crate::lexer::{BnfLexer, CustomLexer, Diagnostic, Location, TokenKind, TokenStream};
use crate::production::{Rule, RuleIdx};
use crate::symbol::{Symbol, SymbolTable};

/// Which surface syntax the grammar source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarForm {
    Custom,
    Bnf,
}

impl FromStr for GrammarForm {
    type Err = String;

    fn from_str(string: &str) -> Result<Self, String> {
        match string {
            "custom" => Ok(GrammarForm::Custom),
            "bnf" => Ok(GrammarForm::Bnf),
            _ => Err(format!("'{}' is not a valid grammar form", string)),
        }
    }
}

/// All lex and parse diagnostics collected for one grammar source.
#[derive(Debug)]
pub struct GrammarError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (index, diagnostic) in self.diagnostics.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for GrammarError {}

/// An augmented context-free grammar: the ordered rule set plus the
/// variable name table. Read-only once built.
#[derive(Debug)]
pub struct Grammar {
    rules: Vec<Rule>,
    symbols: SymbolTable,
}

struct VariableInfo {
    first_seen: Location,
    defined: bool,
}

impl Grammar {
    pub fn parse(source: &str, form: GrammarForm) -> Result<Grammar, GrammarError> {
        match form {
            GrammarForm::Custom => Self::parse_with(CustomLexer::new(source)),
            GrammarForm::Bnf => Self::parse_with(BnfLexer::new(source)),
        }
    }

    fn parse_with<'a, T: TokenStream<'a>>(mut t: T) -> Result<Grammar, GrammarError> {
        let mut symbols = SymbolTable::new();
        let mut variables: BTreeMap<Symbol, VariableInfo> = BTreeMap::new();
        let mut rules: Vec<Rule> = Vec::new();

        while t.peek(0) != TokenKind::EndOfFile {
            if t.peek(0) != TokenKind::Variable {
                let token = t.grab();
                t.diagnostics().push(Diagnostic::new(
                    token.location,
                    "expected a variable to start production".to_string(),
                ));
                // A following ':' means this was meant as a production
                // head; keep going with the bad name so later rules still
                // get checked. Anything else: resynchronize.
                if t.peek(1) != TokenKind::Colon {
                    t.skip_to_next_semicolon();
                    if t.peek(0) == TokenKind::Semicolon {
                        t.advance();
                    }
                    continue;
                }
            }

            let lhs = {
                let token = t.grab();
                t.advance();
                let symbol = symbols.intern(token.text);
                let info = variables.entry(symbol).or_insert(VariableInfo {
                    first_seen: token.location,
                    defined: true,
                });
                info.defined = true;
                symbol
            };

            if !t.expect(TokenKind::Colon) {
                let token = t.grab();
                t.diagnostics().push(Diagnostic::new(
                    token.location,
                    format!("expected ':' before '{}'", token.text),
                ));
            }

            loop {
                let mut sequence = vec![lhs];
                loop {
                    match t.peek(0) {
                        TokenKind::Variable => {
                            let token = t.grab();
                            let symbol = symbols.intern(token.text);
                            variables.entry(symbol).or_insert(VariableInfo {
                                first_seen: token.location,
                                defined: false,
                            });
                            sequence.push(symbol);
                            t.advance();
                        }
                        TokenKind::TerminalsSequence => {
                            let token = t.grab();
                            expand_escapes(token.text, &mut sequence);
                            t.advance();
                        }
                        TokenKind::Colon => {
                            let token = t.grab();
                            t.diagnostics().push(Diagnostic::new(
                                token.location,
                                "expected variable or terminal, not ':'".to_string(),
                            ));
                            t.skip_to_next_semicolon();
                            break;
                        }
                        _ => break,
                    }
                }
                sequence.push(Symbol::END);
                rules.push(Rule::new(sequence));

                if !t.expect(TokenKind::Bar) {
                    break;
                }
            }

            if t.peek(0) == TokenKind::Semicolon {
                t.advance();
            }
        }

        if rules.is_empty() {
            let location = t.grab().location;
            t.diagnostics().push(Diagnostic::new(
                location,
                "empty grammar: no productions".to_string(),
            ));
        } else {
            let first_user = symbols
                .first_user_variable()
                .expect("rules imply at least one variable");
            rules.push(Rule::new(vec![Symbol::START, first_user, Symbol::END]));
        }

        for (symbol, info) in variables.iter() {
            if !info.defined {
                let message =
                    format!("variable '{}' is not defined", symbols.name_of(*symbol));
                t.diagnostics()
                    .push(Diagnostic::new(info.first_seen, message));
            }
        }

        let diagnostics = std::mem::replace(t.diagnostics(), Vec::new());
        if !diagnostics.is_empty() {
            return Err(GrammarError { diagnostics });
        }

        // Lexicographic order groups rules by lhs and puts the
        // augmentation rule first (its lhs is the lowest variable code).
        rules.sort();
        debug_assert_eq!(rules[0].lhs(), Symbol::START);
        debug!(
            "parsed grammar: {} rules, {} variables",
            rules.len(),
            symbols.variable_count()
        );

        Ok(Grammar { rules, symbols })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, index: RuleIdx) -> &Rule {
        &self.rules[index as usize]
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Index of the synthetic start rule; first by construction.
    pub fn augmentation_rule(&self) -> RuleIdx {
        debug_assert_eq!(self.rules[0].lhs(), Symbol::START);
        0
    }

    /// The contiguous range of rules whose lhs is `lhs`.
    pub fn rule_range(&self, lhs: Symbol) -> std::ops::Range<usize> {
        let start = self.rules.partition_point(|rule| rule.lhs() < lhs);
        let end = self.rules.partition_point(|rule| rule.lhs() <= lhs);
        start..end
    }

    pub fn rule_to_string(&self, index: RuleIdx) -> String {
        let rule = self.rule(index);
        let mut string = format!("{}:", self.symbols.name_of(rule.lhs()));
        if rule.rhs_len() == 0 {
            string += " <empty>";
        } else {
            for symbol in rule.rhs() {
                string += &format!(" {}", self.symbols.display(*symbol));
            }
        }
        string
    }

    pub fn write_description<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        wtr.write_all(b"Augmented grammar:\n")?;
        for index in 0..self.rules.len() {
            writeln!(wtr, "    {}", self.rule_to_string(index as RuleIdx))?;
        }
        Ok(())
    }
}

// Expands backslash escapes of a terminals sequence into one terminal
// symbol per byte. NUL bytes only occur on already-diagnosed input and
// are dropped.
fn expand_escapes(text: &str, sequence: &mut Vec<Symbol>) {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let mut byte = bytes[index];
        if byte == b'\\' && index + 1 < bytes.len() {
            index += 1;
            byte = bytes[index];
        }
        if byte != 0 {
            sequence.push(Symbol::terminal(byte));
        }
        index += 1;
    }
}
