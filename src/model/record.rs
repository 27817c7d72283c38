use thiserror::Error;

const SEPARATOR: char = ':';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid format '{line}', expected NAME:ID")]
    InvalidFormat { line: String },
}

/// A (name, id) pair captured from the console, waiting for a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub name: String,
    pub id: String,
    pub ready: bool,
}

impl PendingRecord {
    pub fn new(name: String, id: String) -> Self {
        PendingRecord {
            name,
            id,
            ready: true,
        }
    }
}

/// Splits a console line at the first colon. Only the line as a whole is trimmed.
pub fn parse_line(line: &str) -> Result<(String, String), ParseError> {
    let line = line.trim();
    let invalid = || ParseError::InvalidFormat {
        line: line.to_string(),
    };
    let sep = line.find(SEPARATOR).ok_or_else(invalid)?;
    let (name, id) = (&line[..sep], &line[sep + SEPARATOR.len_utf8()..]);
    if name.is_empty() || id.is_empty() {
        return Err(invalid());
    }
    Ok((name.to_string(), id.to_string()))
}

impl std::str::FromStr for PendingRecord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, id) = parse_line(s)?;
        Ok(PendingRecord::new(name, id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ok(name: &str, id: &str) -> Result<(String, String), ParseError> {
        Ok((name.to_string(), id.to_string()))
    }

    #[test]
    fn splits_at_first_colon() {
        assert_eq!(parse_line("Dr. Smith:EMP001"), ok("Dr. Smith", "EMP001"));
        assert_eq!(parse_line("a:b:c"), ok("a", "b:c"));
    }

    #[test]
    fn trims_the_line() {
        assert_eq!(parse_line("  Dr. Smith:EMP001 \r\n"), ok("Dr. Smith", "EMP001"));
        assert_eq!(parse_line("a : b"), ok("a ", " b"));
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in &["NoColonHere", ":EMP002", "Name:", "", ":", "   :x  ", "  x:   "] {
            assert!(
                matches!(parse_line(line), Err(ParseError::InvalidFormat { .. })),
                "accepted {:?}",
                line
            );
        }
    }

    #[test]
    fn long_fields_are_accepted() {
        let name = "A".repeat(40);
        let (parsed, _) = parse_line(&format!("{}:1", name)).unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn parsed_record_is_ready() {
        let record: PendingRecord = "x:y".parse().unwrap();
        assert_eq!(record, PendingRecord::new("x".into(), "y".into()));
        assert!(record.ready);
    }
}
