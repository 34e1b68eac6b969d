use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Editable columns of a timesheet row, in grid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Date,
    TimeIn,
    TimeOut,
    Project,
    Tool,
    ChargeCode,
    TaskDescription,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Date,
        Field::TimeIn,
        Field::TimeOut,
        Field::Project,
        Field::Tool,
        Field::ChargeCode,
        Field::TaskDescription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::TimeIn => "timeIn",
            Self::TimeOut => "timeOut",
            Self::Project => "project",
            Self::Tool => "tool",
            Self::ChargeCode => "chargeCode",
            Self::TaskDescription => "taskDescription",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Date => "Date",
            Self::TimeIn => "Time In",
            Self::TimeOut => "Time Out",
            Self::Project => "Project",
            Self::Tool => "Tool",
            Self::ChargeCode => "Charge Code",
            Self::TaskDescription => "Task Description",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| CoreError::UnknownField(s.to_string()))
    }

    /// Column position in the grid; paste blocks are laid out by this index.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_order_matches_index() {
        for (i, field) in Field::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
            assert_eq!(Field::from_index(i), Some(*field));
        }
        assert_eq!(Field::from_index(7), None);
    }

    #[test]
    fn parse_round_trips_wire_names() {
        assert_eq!(Field::parse("chargeCode").unwrap(), Field::ChargeCode);
        assert!(Field::parse("hours").is_err());
    }
}
