//! Generation model tiers and the static tier table.
//!
//! The table is built once per process. Entries can be overridden from the
//! `[models.<tier>]` sections of the config file.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationModelTier {
    Fast,
    Balanced,
    CodeFocused,
    Complex,
}

impl GenerationModelTier {
    pub const ALL: [GenerationModelTier; 4] = [
        GenerationModelTier::Fast,
        GenerationModelTier::Balanced,
        GenerationModelTier::CodeFocused,
        GenerationModelTier::Complex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::CodeFocused => "code_focused",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for GenerationModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "code_focused" | "code" => Ok(Self::CodeFocused),
            "complex" => Ok(Self::Complex),
            other => Err(format!("Invalid model tier: {}", other)),
        }
    }
}

/// Provider model binding for a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub model: String,
    pub temperature: f32,
}

impl TierSpec {
    fn new(model: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
        }
    }
}

/// Per-tier overrides from the config file; unset fields keep the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierOverride {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    specs: HashMap<GenerationModelTier, TierSpec>,
}

impl Default for TierTable {
    fn default() -> Self {
        let specs = HashMap::from([
            (
                GenerationModelTier::Fast,
                TierSpec::new("claude-haiku-4-5-20251001", 0.7),
            ),
            (
                GenerationModelTier::Balanced,
                TierSpec::new("claude-sonnet-4-5-20250929", 0.7),
            ),
            (
                GenerationModelTier::CodeFocused,
                TierSpec::new("claude-sonnet-4-5-20250929", 0.3),
            ),
            (
                GenerationModelTier::Complex,
                TierSpec::new("claude-opus-4-1-20250805", 0.5),
            ),
        ]);
        Self { specs }
    }
}

impl TierTable {
    pub fn with_overrides(overrides: &HashMap<GenerationModelTier, TierOverride>) -> Self {
        let mut table = Self::default();
        for (tier, over) in overrides {
            if let Some(spec) = table.specs.get_mut(tier) {
                if let Some(model) = &over.model {
                    spec.model = model.clone();
                }
                if let Some(temperature) = over.temperature {
                    spec.temperature = temperature;
                }
            }
        }
        table
    }

    pub fn spec(&self, tier: GenerationModelTier) -> &TierSpec {
        // Every tier is inserted by Default and overrides never remove one.
        &self.specs[&tier]
    }

    pub fn iter(&self) -> impl Iterator<Item = (GenerationModelTier, &TierSpec)> {
        GenerationModelTier::ALL
            .into_iter()
            .map(move |tier| (tier, self.spec(tier)))
    }
}
