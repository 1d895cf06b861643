//! Phase identities and the keys derived from them.
//!
//! Scenarios that run in several phases carry a `Phase<N>` marker in their
//! name (`CheckoutFlowPhase1`, `CheckoutFlowPhase2`). Dropping the marker gives
//! every phase the same base name, so they agree on a storage key without
//! talking to each other.

use std::fmt;
use std::str::FromStr;

use crate::legacy::types::{LegacyError, LegacyResult};

/// Marker that tags a scenario name with its phase number
pub const PHASE_MARKER: &str = "Phase";

/// Separator between the scenario and test parts of a test-scoped key
pub const KEY_SEPARATOR: &str = "__";

/// Suffix carried by every legacy record key
pub const LEGACY_SUFFIX: &str = ".legacy";

/// Who shares a legacy record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every test of the scenario, in every phase
    Case,
    /// Only the same named test, in every phase
    Test,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Case => write!(f, "case"),
            Scope::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "case" => Ok(Scope::Case),
            "test" => Ok(Scope::Test),
            other => Err(format!("unknown scope '{}' (expected 'case' or 'test')", other)),
        }
    }
}

/// Identity of the currently executing test, with the phase split out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseIdentity {
    base_name: String,
    phase: u8,
    test_name: Option<String>,
}

impl PhaseIdentity {
    pub fn new(base_name: impl Into<String>, phase: u8) -> Self {
        Self {
            base_name: base_name.into(),
            phase,
            test_name: None,
        }
    }

    /// Split a phase-tagged scenario name such as `CheckoutFlowPhase2`.
    ///
    /// Every `Phase<digit>` occurrence is removed from the base name; the
    /// first one gives the phase number.
    pub fn from_scenario(scenario: &str) -> LegacyResult<Self> {
        let (base_name, phase) = strip_phase_marker(scenario).ok_or_else(|| {
            LegacyError::KeyDerivation(format!(
                "scenario '{}' carries no {}<digit> marker",
                scenario, PHASE_MARKER
            ))
        })?;
        Ok(Self::new(base_name, phase))
    }

    /// Attach the individual test name
    pub fn with_test(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = Some(test_name.into());
        self
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn phase(&self) -> u8 {
        self.phase
    }

    pub fn test_name(&self) -> Option<&str> {
        self.test_name.as_deref()
    }

    /// The storage key for this identity; the phase never takes part in it
    pub fn derive_key(&self, scope: Scope) -> LegacyResult<String> {
        let base = slugify(self.base_name.trim());
        if base.is_empty() {
            return Err(LegacyError::KeyDerivation(
                "scenario base name is empty once the phase marker is removed".to_string(),
            ));
        }

        match scope {
            Scope::Case => Ok(format!("{}{}", base, LEGACY_SUFFIX)),
            Scope::Test => {
                let test = self
                    .test_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        LegacyError::KeyDerivation(format!(
                            "test scope requested for '{}' without a test name",
                            self.base_name
                        ))
                    })?;
                Ok(format!("{}{}{}{}", base, KEY_SEPARATOR, slugify(test), LEGACY_SUFFIX))
            }
        }
    }
}

/// Derive a key straight from a phase-tagged scenario name
pub fn derive_key(scenario: &str, test_name: Option<&str>, scope: Scope) -> LegacyResult<String> {
    let identity = PhaseIdentity::from_scenario(scenario)?;
    match test_name {
        Some(test) => identity.with_test(test).derive_key(scope),
        None => identity.derive_key(scope),
    }
}

/// Make a name safe for use as a file name, keeping its case
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

fn strip_phase_marker(scenario: &str) -> Option<(String, u8)> {
    let mut base = String::with_capacity(scenario.len());
    let mut phase = None;
    let mut rest = scenario;

    while let Some(pos) = rest.find(PHASE_MARKER) {
        let after = &rest[pos + PHASE_MARKER.len()..];
        match after.chars().next().and_then(|c| c.to_digit(10)) {
            Some(digit) => {
                base.push_str(&rest[..pos]);
                phase.get_or_insert(digit as u8);
                // ASCII digit, one byte
                rest = &after[1..];
            }
            None => {
                base.push_str(&rest[..pos + PHASE_MARKER.len()]);
                rest = after;
            }
        }
    }
    base.push_str(rest);

    phase.map(|phase| (base, phase))
}
