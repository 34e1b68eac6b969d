use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::CoreError;
use crate::normalize::{format_date, parse_date};

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRule {
    pub name: String,
    /// Tools selectable for this project. `None` means the project does not
    /// use tools at all.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolRule {
    pub name: String,
    #[serde(default)]
    pub requires_charge_code: bool,
}

/// A submission window; dates outside every window are rejected when any
/// window is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct DateWindow {
    pub id: String,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Business-rule lookup tables consumed by the validator.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub projects: Vec<ProjectRule>,
    #[serde(default)]
    pub tools: Vec<ToolRule>,
    #[serde(default)]
    pub charge_codes: Vec<String>,
    #[serde(default)]
    pub date_windows: Vec<DateWindow>,
}

impl Catalog {
    pub fn from_toml_str(s: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn project(&self, name: &str) -> Option<&ProjectRule> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolRule> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn is_project(&self, name: &str) -> bool {
        self.project(name).is_some()
    }

    pub fn project_uses_tools(&self, project: &str) -> bool {
        self.project(project).is_some_and(|p| p.tools.is_some())
    }

    pub fn tools_for(&self, project: &str) -> &[String] {
        self.project(project)
            .and_then(|p| p.tools.as_deref())
            .unwrap_or(&[])
    }

    pub fn tool_allowed(&self, project: &str, tool: &str) -> bool {
        self.tools_for(project).iter().any(|t| t == tool)
    }

    pub fn tool_requires_charge_code(&self, tool: &str) -> bool {
        self.tool(tool).is_some_and(|t| t.requires_charge_code)
    }

    pub fn is_charge_code(&self, code: &str) -> bool {
        self.charge_codes.iter().any(|c| c == code)
    }

    /// `None` when the date is acceptable, otherwise a message listing the
    /// open windows.
    pub fn check_date(&self, date: &str) -> Option<String> {
        let parsed = match parse_date(date) {
            Ok(d) => d,
            Err(e) => return Some(e),
        };
        if self.date_windows.is_empty()
            || self
                .date_windows
                .iter()
                .any(|w| parsed >= w.start && parsed <= w.end)
        {
            return None;
        }
        let windows: Vec<String> = self
            .date_windows
            .iter()
            .map(|w| format!("{} ({} to {})", w.name, format_date(w.start), format_date(w.end)))
            .collect();
        Some(format!("Date must be in {}", windows.join(" or ")))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        let tool_projects = [
            "FL-Carver Techs",
            "FL-Carver Tools",
            "OSC-BBB",
            "PTO/RTO",
            "SWFL-CHEM/GAS",
            "SWFL-EQUIP",
        ];
        let tools: Vec<String> = [
            "#1 Rinse and 2D marker",
            "#2 Sputter",
            "Meeting",
            "Training",
            "Internal Support",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut projects: Vec<ProjectRule> = tool_projects
            .iter()
            .map(|name| ProjectRule {
                name: name.to_string(),
                tools: Some(tools.clone()),
            })
            .collect();
        projects.push(ProjectRule {
            name: "Internal".into(),
            tools: None,
        });
        projects.push(ProjectRule {
            name: "Administrative".into(),
            tools: None,
        });

        let tool_rules = vec![
            ToolRule {
                name: "#1 Rinse and 2D marker".into(),
                requires_charge_code: true,
            },
            ToolRule {
                name: "#2 Sputter".into(),
                requires_charge_code: true,
            },
            ToolRule {
                name: "Meeting".into(),
                requires_charge_code: false,
            },
            ToolRule {
                name: "Training".into(),
                requires_charge_code: false,
            },
            ToolRule {
                name: "Internal Support".into(),
                requires_charge_code: false,
            },
        ];

        Self {
            projects,
            tools: tool_rules,
            charge_codes: ["Admin", "EPR1", "EPR2", "Repair", "Training"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            date_windows: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
charge_codes = ["EPR1"]

[[projects]]
name = "Lab"
tools = ["Etcher"]

[[projects]]
name = "Office"

[[tools]]
name = "Etcher"
requires_charge_code = true

[[date_windows]]
id = "Q1-2025"
name = "Q1 2025"
start = "2025-01-01"
end = "2025-03-31"
"#;

    #[test]
    fn loads_from_toml() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert!(catalog.project_uses_tools("Lab"));
        assert!(!catalog.project_uses_tools("Office"));
        assert!(catalog.tool_allowed("Lab", "Etcher"));
        assert!(catalog.tool_requires_charge_code("Etcher"));
        assert!(catalog.is_charge_code("EPR1"));
    }

    #[test]
    fn date_windows_gate_dates() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.check_date("02/14/2025"), None);
        let msg = catalog.check_date("2025-04-01").unwrap();
        assert!(msg.contains("Q1 2025"));
        assert!(catalog.check_date("not a date").is_some());
    }

    #[test]
    fn default_catalog_accepts_any_date() {
        assert_eq!(Catalog::default().check_date("1999-12-31"), None);
    }
}
