//! Annual report payloads: `year --- name[ --- state]`.

use std::fmt;

/// Process name of the pending reminders an upload resolves.
pub const ANNUAL_REPORT_REMINDER: &str = "Annual Report Reminder";

/// Separator between payload parts as written by producers.
pub const DATA_DELIMITER: &str = " --- ";

/// Parsed annual report payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnualReportDetails {
    pub year: String,
    pub name: String,
    pub state: Option<String>,
}

impl AnnualReportDetails {
    /// Parse a payload. Parts are split on `---` and trimmed, so spacing
    /// around the delimiter is not significant. Returns `None` when the
    /// year or the report name is missing. Extra parts beyond the third
    /// drop the state entirely.
    pub fn parse(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split("---").map(str::trim).collect();
        if parts.len() < 2 {
            return None;
        }
        let year = parts[0];
        let name = parts[1];
        if year.is_empty() || name.is_empty() {
            return None;
        }
        // A state is only read from an exact three-part payload.
        let state = match parts.as_slice() {
            [_, _, state] if !state.is_empty() => Some(state.to_string()),
            _ => None,
        };

        Some(Self {
            year: year.to_string(),
            name: name.to_string(),
            state,
        })
    }

    /// Reminder payloads this upload resolves: with and without the state.
    pub fn reminder_keys(&self) -> Vec<String> {
        let base = format!("{}{DATA_DELIMITER}{}", self.year, self.name);
        match &self.state {
            Some(state) => {
                let with_state = format!("{base}{DATA_DELIMITER}{state}");
                vec![base, with_state]
            }
            None => vec![base],
        }
    }
}

impl fmt::Display for AnnualReportDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DATA_DELIMITER}{}", self.year, self.name)?;
        if let Some(state) = &self.state {
            write!(f, "{DATA_DELIMITER}{state}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_parts() {
        let details = AnnualReportDetails::parse("2023 --- Delaware Franchise Tax").unwrap();
        assert_eq!(details.year, "2023");
        assert_eq!(details.name, "Delaware Franchise Tax");
        assert!(details.state.is_none());
        assert_eq!(details.reminder_keys(), vec!["2023 --- Delaware Franchise Tax"]);
    }

    #[test]
    fn parses_state_and_tolerates_spacing() {
        let details = AnnualReportDetails::parse("2024---Annual Report --- CA").unwrap();
        assert_eq!(details.name, "Annual Report");
        assert_eq!(details.state.as_deref(), Some("CA"));
        assert_eq!(
            details.reminder_keys(),
            vec!["2024 --- Annual Report", "2024 --- Annual Report --- CA"]
        );
        assert_eq!(details.to_string(), "2024 --- Annual Report --- CA");
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(AnnualReportDetails::parse("2023").is_none());
        assert!(AnnualReportDetails::parse("").is_none());
        assert!(AnnualReportDetails::parse("2023 --- ").is_none());
    }

    #[test]
    fn empty_state_is_none() {
        let details = AnnualReportDetails::parse("2023 --- Franchise Tax --- ").unwrap();
        assert!(details.state.is_none());
    }

    #[test]
    fn four_parts_carry_no_state() {
        let details =
            AnnualReportDetails::parse("2023 --- Annual Report --- CA --- extra").unwrap();
        assert_eq!(details.name, "Annual Report");
        assert!(details.state.is_none());
        assert_eq!(details.reminder_keys(), vec!["2023 --- Annual Report"]);
    }
}
