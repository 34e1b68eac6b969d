use chrono::NaiveDate;

use crate::field::Field;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Parse `H:MM` / `HH:MM` into minutes since midnight.
pub fn parse_time_to_minutes(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let (hours, minutes) = input
        .split_once(':')
        .ok_or_else(|| format!("Invalid time format: {input}"))?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(format!("Invalid time format: {input}"));
    }
    let hours: u32 = hours
        .parse()
        .map_err(|_| format!("Invalid hours: {hours}"))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| format!("Invalid minutes: {minutes}"))?;
    if hours > 23 {
        return Err(format!("Hours must be 0-23: {hours}"));
    }
    if minutes > 59 {
        return Err(format!("Minutes must be 0-59: {minutes}"));
    }
    Ok(hours * 60 + minutes)
}

pub fn format_minutes_to_time(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Accepts ISO `YYYY-MM-DD` and US `MM/DD/YYYY`.
pub fn parse_date(input: &str) -> Result<NaiveDate, String> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(input, "%m/%d/%Y"))
        .map_err(|_| format!("Invalid date: {input}"))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Canonical text for a cell, as the record store would persist it.
/// Values that fail to parse are returned trimmed so that comparison
/// still works on garbage the validator never let through.
pub fn canonical(field: Field, value: &str) -> String {
    let trimmed = value.trim();
    match field {
        Field::Date => parse_date(trimmed)
            .map(format_date)
            .unwrap_or_else(|_| trimmed.to_string()),
        Field::TimeIn | Field::TimeOut => parse_time_to_minutes(trimmed)
            .map(format_minutes_to_time)
            .unwrap_or_else(|_| trimmed.to_string()),
        _ => trimmed.to_string(),
    }
}

/// Canonicalise an optional cell; whitespace-only cells collapse to `None`.
pub fn canonical_cell(field: Field, value: Option<&str>) -> Option<String> {
    value
        .map(|v| canonical(field, v))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_times() {
        assert_eq!(parse_time_to_minutes("08:15"), Ok(495));
        assert_eq!(parse_time_to_minutes("8:15"), Ok(495));
        assert_eq!(parse_time_to_minutes("00:00"), Ok(0));
        assert_eq!(parse_time_to_minutes("23:45"), Ok(1425));
    }

    #[test]
    fn rejects_bad_times() {
        assert!(parse_time_to_minutes("24:00").is_err());
        assert!(parse_time_to_minutes("12:60").is_err());
        assert!(parse_time_to_minutes("1215").is_err());
        assert!(parse_time_to_minutes("12:5").is_err());
        assert!(parse_time_to_minutes("ab:cd").is_err());
        assert!(parse_time_to_minutes("").is_err());
    }

    #[test]
    fn canonicalises_dates_and_times() {
        assert_eq!(canonical(Field::Date, "01/05/2025"), "2025-01-05");
        assert_eq!(canonical(Field::Date, "2025-01-05"), "2025-01-05");
        assert_eq!(canonical(Field::TimeIn, "9:00"), "09:00");
        assert_eq!(canonical(Field::TaskDescription, "  notes "), "notes");
    }

    #[test]
    fn blank_cells_collapse_to_none() {
        assert_eq!(canonical_cell(Field::Project, Some("   ")), None);
        assert_eq!(canonical_cell(Field::Project, None), None);
        assert_eq!(
            canonical_cell(Field::TimeOut, Some("5:30")),
            Some("05:30".to_string())
        );
    }
}
