use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tiers::GenerationModelTier;

/// Target application framework. Each one maps to a sandbox template and
/// the commands used to validate the generated project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    Nextjs,
    React,
    Vue,
    Angular,
    Svelte,
}

impl Framework {
    pub const ALL: [Framework; 5] = [
        Framework::Nextjs,
        Framework::React,
        Framework::Vue,
        Framework::Angular,
        Framework::Svelte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nextjs => "nextjs",
            Self::React => "react",
            Self::Vue => "vue",
            Self::Angular => "angular",
            Self::Svelte => "svelte",
        }
    }

    /// Sandbox template the project is created from.
    pub fn template(&self) -> &'static str {
        match self {
            Self::Nextjs => "codegen-nextjs",
            Self::React => "codegen-react",
            Self::Vue => "codegen-vue",
            Self::Angular => "codegen-angular",
            Self::Svelte => "codegen-svelte",
        }
    }

    pub fn dev_port(&self) -> u16 {
        match self {
            Self::Nextjs => 3000,
            Self::React | Self::Vue | Self::Svelte => 5173,
            Self::Angular => 4200,
        }
    }

    pub fn lint_command(&self) -> &'static str {
        match self {
            Self::Nextjs => "npm run lint",
            Self::Angular => "npx ng lint",
            Self::React | Self::Vue | Self::Svelte => "npx eslint . --max-warnings=-1",
        }
    }

    pub fn build_command(&self) -> &'static str {
        match self {
            Self::Angular => "npx ng build",
            _ => "npm run build",
        }
    }

    /// Guess the framework from the prompt when the caller did not pick one.
    /// Falls back to Next.js.
    pub fn detect(prompt: &str) -> Framework {
        let lower = prompt.to_lowercase();
        if lower.contains("angular") {
            Framework::Angular
        } else if lower.contains("svelte") {
            Framework::Svelte
        } else if lower.contains("vue") || lower.contains("nuxt") {
            Framework::Vue
        } else if lower.contains("next.js") || lower.contains("nextjs") {
            Framework::Nextjs
        } else if lower.contains("react") || lower.contains("vite") {
            Framework::React
        } else {
            Framework::Nextjs
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nextjs" | "next" | "next.js" => Ok(Self::Nextjs),
            "react" => Ok(Self::React),
            "vue" => Ok(Self::Vue),
            "angular" => Ok(Self::Angular),
            "svelte" => Ok(Self::Svelte),
            other => Err(format!("Invalid framework: {}", other)),
        }
    }
}

/// `fast` skips the validation and auto-fix cycle; `safe` runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Fast,
    Safe,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "safe" => Ok(Self::Safe),
            other => Err(format!("Invalid mode: {}", other)),
        }
    }
}

/// Tier requested by the caller: either let the selector decide, or pin one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierRequest {
    #[default]
    Auto,
    Explicit(GenerationModelTier),
}

impl TierRequest {
    /// Parse a caller-supplied tier name. Unknown names fall back to `Auto`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("auto") => Self::Auto,
            Some(name) => match name.parse::<GenerationModelTier>() {
                Ok(tier) => Self::Explicit(tier),
                Err(_) => {
                    tracing::warn!(tier = name, "unknown model tier requested, using auto selection");
                    Self::Auto
                }
            },
        }
    }
}

/// Inbound run request as accepted over HTTP or the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub project_id: String,
    pub prompt: String,
    /// Tier name or "auto".
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub framework: Option<Framework>,
    #[serde(default)]
    pub mode: RunMode,
    /// Continue inside an existing sandbox instead of creating one.
    #[serde(default)]
    pub sandbox_id: Option<String>,
}

impl RunRequest {
    pub fn new(project_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            prompt: prompt.into(),
            model: None,
            framework: None,
            mode: RunMode::default(),
            sandbox_id: None,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_framework(mut self, framework: Framework) -> Self {
        self.framework = Some(framework);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sandbox_id(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    pub fn tier_request(&self) -> TierRequest {
        TierRequest::parse(self.model.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_parses_aliases() {
        assert_eq!("Next.js".parse::<Framework>().unwrap(), Framework::Nextjs);
        assert_eq!("angular".parse::<Framework>().unwrap(), Framework::Angular);
        assert!("rails".parse::<Framework>().is_err());
    }

    #[test]
    fn framework_detect_from_prompt() {
        assert_eq!(Framework::detect("An Angular admin dashboard"), Framework::Angular);
        assert_eq!(Framework::detect("a vue todo list"), Framework::Vue);
        assert_eq!(Framework::detect("a React + Vite game"), Framework::React);
        assert_eq!(Framework::detect("a landing page"), Framework::Nextjs);
    }

    #[test]
    fn tier_request_parsing() {
        assert_eq!(TierRequest::parse(None), TierRequest::Auto);
        assert_eq!(TierRequest::parse(Some("auto")), TierRequest::Auto);
        assert_eq!(
            TierRequest::parse(Some("fast")),
            TierRequest::Explicit(GenerationModelTier::Fast)
        );
        assert_eq!(TierRequest::parse(Some("gpt-9000")), TierRequest::Auto);
    }

    #[test]
    fn run_request_deserializes_with_defaults() {
        let req: RunRequest =
            serde_json::from_str(r#"{"project_id":"p1","prompt":"hello"}"#).unwrap();
        assert_eq!(req.mode, RunMode::Fast);
        assert!(req.framework.is_none());
        assert_eq!(req.tier_request(), TierRequest::Auto);

        let req: RunRequest = serde_json::from_str(
            r#"{"project_id":"p1","prompt":"hello","mode":"safe","framework":"vue","model":"complex"}"#,
        )
        .unwrap();
        assert_eq!(req.mode, RunMode::Safe);
        assert_eq!(req.framework, Some(Framework::Vue));
        assert_eq!(
            req.tier_request(),
            TierRequest::Explicit(GenerationModelTier::Complex)
        );
    }
}
