use std::fmt;

/// Errors produced when parsing rule text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
    line: usize,
    column: usize,
}

impl ParseError {
    /// Locate byte `offset` of `input` as a 1-based line and column.
    pub(crate) fn at(input: &str, offset: usize, message: impl Into<String>) -> Self {
        let mut offset = offset.min(input.len());
        while !input.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &input[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before, |nl| &before[nl + 1..])
            .chars()
            .count()
            + 1;
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn column(&self) -> usize {
        self.column
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ParseError::at("rule R {\n  when ?", 16, "expected condition");
        assert_eq!(err.line(), 2);
        assert_eq!(err.column(), 8);
        assert_eq!(
            err.to_string(),
            "parse error at line 2, column 8: expected condition"
        );
    }

    #[test]
    fn offset_past_end_is_clamped() {
        let err = ParseError::at("abc", 99, "eof");
        assert_eq!((err.line(), err.column()), (1, 4));
    }
}
