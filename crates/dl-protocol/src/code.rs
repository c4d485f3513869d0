use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated Diagnostic Trouble Code as shown to consumers.
///
/// Built only from registry entries, so `description` and `category` always
/// come from the injected lookup table. Two codes are equal when their
/// `code` strings match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// Standard DTC string (e.g., "P0300", "C1201").
    pub code: String,
    /// Human-readable description (from the code registry).
    pub description: String,
    /// System the fault belongs to.
    pub category: CodeCategory,
}

impl DiagnosticCode {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        category: CodeCategory,
    ) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            category,
        }
    }
}

impl PartialEq for DiagnosticCode {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for DiagnosticCode {}

/// Vehicle system a diagnostic code is classified under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeCategory {
    Ignition,
    Fuel,
    Emission,
    Sensors,
    Transmission,
    Electrical,
    Cooling,
    Brakes,
}

impl CodeCategory {
    /// Every category, in display order.
    pub const ALL: [CodeCategory; 8] = [
        CodeCategory::Ignition,
        CodeCategory::Fuel,
        CodeCategory::Emission,
        CodeCategory::Sensors,
        CodeCategory::Transmission,
        CodeCategory::Electrical,
        CodeCategory::Cooling,
        CodeCategory::Brakes,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeCategory::Ignition => "ignition",
            CodeCategory::Fuel => "fuel",
            CodeCategory::Emission => "emission",
            CodeCategory::Sensors => "sensors",
            CodeCategory::Transmission => "transmission",
            CodeCategory::Electrical => "electrical",
            CodeCategory::Cooling => "cooling",
            CodeCategory::Brakes => "brakes",
        }
    }

    /// Human-readable label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            CodeCategory::Ignition => "Ignition problems",
            CodeCategory::Fuel => "Fuel system",
            CodeCategory::Emission => "Emissions",
            CodeCategory::Sensors => "Engine sensors",
            CodeCategory::Transmission => "Transmission",
            CodeCategory::Electrical => "Electrical systems",
            CodeCategory::Cooling => "Cooling system",
            CodeCategory::Brakes => "Brakes and stability",
        }
    }
}

impl fmt::Display for CodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a category or filter name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown code category: {0}")]
pub struct ParseCategoryError(pub String);

impl FromStr for CodeCategory {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        CodeCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ParseCategoryError(s.to_string()))
    }
}

/// Selection applied when viewing the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CategoryFilter {
    /// Every code, unfiltered.
    #[default]
    All,
    /// Only codes of one category.
    Only(CodeCategory),
}

impl CategoryFilter {
    pub fn matches(&self, code: &DiagnosticCode) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(category) => code.category == *category,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CategoryFilter::All => "All faults",
            CategoryFilter::Only(category) => category.label(),
        }
    }
}

impl From<CodeCategory> for CategoryFilter {
    fn from(category: CodeCategory) -> Self {
        CategoryFilter::Only(category)
    }
}

impl FromStr for CategoryFilter {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        s.parse().map(CategoryFilter::Only)
    }
}

impl TryFrom<String> for CategoryFilter {
    type Error = ParseCategoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CategoryFilter> for String {
    fn from(filter: CategoryFilter) -> Self {
        filter.to_string()
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::All => f.write_str("all"),
            CategoryFilter::Only(category) => category.fmt(f),
        }
    }
}
