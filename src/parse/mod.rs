//! Text front end for the rule language.
//!
//! ```text
//! rule CashbackRule "Give cashback on big payments" salience 10 {
//!     when
//!         Fact.Payment > 100 && Fact.Cashback == 0
//!     then
//!         Fact.Cashback = 10;
//!         Retract("CashbackRule");
//! }
//! ```

mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use parser::ParsedRules;

use winnow::error::{ContextError, ParseError as WinnowError};
use winnow::Parser;

use crate::types::Expr;

fn convert(input: &str, e: &WinnowError<&str, ContextError>) -> ParseError {
    let message = e.inner().to_string();
    let message = if message.is_empty() {
        "unexpected input".to_owned()
    } else {
        message.replace('\n', "; ")
    };
    ParseError::at(input, e.offset(), message)
}

/// Parse a rule-language document into its rules.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid rule syntax.
pub fn parse(input: &str) -> Result<ParsedRules, ParseError> {
    grammar::rules.parse(input).map_err(|e| convert(input, &e))
}

/// Parse a single expression, e.g. a condition built from user input.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not one complete expression.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    grammar::standalone_expr
        .parse(input)
        .map_err(|e| convert(input, &e))
}
