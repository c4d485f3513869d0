//! Code registry: the injected lookup table from DTC string to
//! description and category.
//!
//! Immutable after construction. `builtin()` carries the default table;
//! deployments can ship their own as TOML:
//!
//! ```toml
//! [codes.P0300]
//! description = "Random/multiple cylinder misfire detected"
//! category = "ignition"
//! ```

use std::collections::HashMap;
use std::path::Path;

use dl_protocol::{CodeCategory, DiagnosticCode};
use serde::Deserialize;

use crate::error::RegistryError;
use crate::scanner;

/// Registry entry for a single code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryEntry {
    pub description: String,
    pub category: CodeCategory,
}

/// Default table shipped with the engine.
const BUILTIN: &[(&str, &str, CodeCategory)] = &[
    // ===== Ignition =====
    ("P0300", "Random/multiple cylinder misfire detected", CodeCategory::Ignition),
    ("P0301", "Cylinder 1 misfire detected", CodeCategory::Ignition),
    // ===== Fuel =====
    ("P0171", "System too lean (Bank 1)", CodeCategory::Fuel),
    ("P0172", "System too rich (Bank 1)", CodeCategory::Fuel),
    // ===== Emission =====
    ("P0420", "Catalyst system efficiency below threshold (Bank 1)", CodeCategory::Emission),
    // ===== Sensors =====
    ("P0100", "Mass air flow circuit malfunction", CodeCategory::Sensors),
    // ===== Transmission =====
    ("P0700", "Transmission control system malfunction", CodeCategory::Transmission),
    // ===== Electrical =====
    ("B1000", "Airbag system general fault", CodeCategory::Electrical),
    ("U0100", "Lost communication with ECM/PCM", CodeCategory::Electrical),
    // ===== Cooling =====
    ("P0125", "Insufficient coolant temperature for closed loop operation", CodeCategory::Cooling),
    ("P0217", "Engine overheat condition", CodeCategory::Cooling),
    // ===== Brakes =====
    ("C1201", "Anti-lock brake system (ABS) malfunction", CodeCategory::Brakes),
    ("C1300", "Steering angle sensor malfunction", CodeCategory::Brakes),
];

#[derive(Deserialize)]
struct RegistryFile {
    codes: HashMap<String, RegistryEntry>,
}

/// Immutable mapping from code string to registry entry.
#[derive(Debug, Clone, Default)]
pub struct CodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl CodeRegistry {
    /// Registry with the built-in table.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN
                .iter()
                .map(|(code, description, category)| {
                    (
                        (*code).to_string(),
                        RegistryEntry {
                            description: (*description).to_string(),
                            category: *category,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Build a registry from arbitrary entries, rejecting malformed codes.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (S, RegistryEntry)>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (code, entry) in entries {
            let code = code.into();
            if !scanner::is_code(&code) {
                return Err(RegistryError::InvalidCode(code));
            }
            map.insert(code, entry);
        }
        Ok(Self { entries: map })
    }

    /// Parse a registry from TOML text (`[codes.<CODE>]` tables).
    pub fn from_toml_str(text: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(text)?;
        Self::from_entries(file.codes)
    }

    /// Load a registry from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Look up a code. Matching is exact: scanned tokens are already uppercase.
    pub fn lookup(&self, code: &str) -> Option<&RegistryEntry> {
        self.entries.get(code)
    }

    /// Build the consumer-facing value for a known code.
    pub fn resolve(&self, code: &str) -> Option<DiagnosticCode> {
        self.lookup(code)
            .map(|e| DiagnosticCode::new(code, e.description.clone(), e.category))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
