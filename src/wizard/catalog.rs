//! Step catalog — the fixed, ordered list of wizard steps.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::WizardError;

/// The steps of the intake wizard.
///
/// Progresses linearly: Founder → Venture → Team → Upload → Processing →
/// Analysis.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    #[default]
    Founder,
    Venture,
    Team,
    Upload,
    Processing,
    Analysis,
}

impl StepKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Founder => "founder",
            Self::Venture => "venture",
            Self::Team => "team",
            Self::Upload => "upload",
            Self::Processing => "processing",
            Self::Analysis => "analysis",
        }
    }

    /// Position of this step in the catalog.
    pub fn index(&self) -> usize {
        STEPS
            .iter()
            .position(|d| d.key == *self)
            .unwrap_or_default()
    }

    /// Whether this is the last step of the flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Analysis)
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepKey {
    type Err = WizardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepCatalog::index_of(s)
            .map(|i| STEPS[i].key)
            .ok_or_else(|| WizardError::InvalidStepKey { key: s.to_string() })
    }
}

/// Deserialize an advisory step key, mapping anything unknown to the first
/// step instead of failing the whole document.
pub(crate) fn lenient_step_key<'de, D>(deserializer: D) -> Result<StepKey, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()).unwrap_or_default())
}

/// A catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    pub key: StepKey,
    pub display_name: &'static str,
}

/// Number of steps in the flow.
pub const STEP_COUNT: usize = 6;

static STEPS: [StepDescriptor; STEP_COUNT] = [
    StepDescriptor {
        key: StepKey::Founder,
        display_name: "Founder details",
    },
    StepDescriptor {
        key: StepKey::Venture,
        display_name: "Venture",
    },
    StepDescriptor {
        key: StepKey::Team,
        display_name: "Team",
    },
    StepDescriptor {
        key: StepKey::Upload,
        display_name: "Pitch deck upload",
    },
    StepDescriptor {
        key: StepKey::Processing,
        display_name: "Processing",
    },
    StepDescriptor {
        key: StepKey::Analysis,
        display_name: "Analysis",
    },
];

/// Static lookup over the step sequence.
pub struct StepCatalog;

impl StepCatalog {
    /// All steps in order.
    pub fn steps() -> &'static [StepDescriptor] {
        &STEPS
    }

    /// Index of a step by its wire key, or `None` if the key is unknown.
    pub fn index_of(key: &str) -> Option<usize> {
        STEPS.iter().position(|d| d.key.as_str() == key)
    }

    /// Descriptor at `index`, or `None` when out of range.
    pub fn step_at(index: usize) -> Option<&'static StepDescriptor> {
        STEPS.get(index)
    }

    /// Index of the terminal analysis step.
    pub fn analysis_index() -> usize {
        STEP_COUNT - 1
    }

    /// Index of the processing step (second to last).
    pub fn processing_index() -> usize {
        STEP_COUNT - 2
    }

    /// Key at `index`, falling back to the first step when out of range.
    pub fn key_at_or_first(index: usize) -> StepKey {
        Self::step_at(index).map(|d| d.key).unwrap_or_default()
    }
}
