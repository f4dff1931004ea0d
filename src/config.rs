use anyhow::Context;
use serde::Deserialize;
use std::{env, fs::File, path::Path};

use crate::constants::{MODEL_FAST, MODEL_PRIMARY};
use crate::orchestrator::CredentialTier;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Models {
    pub primary: Option<String>,
    pub fast: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayCfg {
    pub bind: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Root {
    pub models: Option<Models>,
    pub gateway: Option<GatewayCfg>,
    pub instruction: Option<String>,
}

/// Startup configuration. Credentials and model identifiers are opaque
/// strings read once; the client never interprets them.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: CredentialSet,
    pub model_primary: String,
    pub model_fast: String,
    pub gateway_bind: Option<String>,
    pub instruction: Option<String>,
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let api_key =
            env::var("GEMINI_API_KEY").map_err(|_| anyhow::anyhow!("GEMINI_API_KEY not set"))?;
        let secondary = env::var("GEMINI_API_KEY_SECONDARY")
            .ok()
            .filter(|value| !value.is_empty());
        let root = match path {
            Some(p) => Some(Self::read_yaml(Path::new(p))?),
            None => {
                let mut found = None;
                for candidate in ["scriba.yaml", "scriba.yml"] {
                    let path = Path::new(candidate);
                    if path.exists() {
                        found = Some(Self::read_yaml(path)?);
                        break;
                    }
                }
                found
            }
        };
        Ok(Self::from_parts(
            root,
            CredentialSet::new(api_key, secondary),
        ))
    }

    fn read_yaml(path: &Path) -> anyhow::Result<Root> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(serde_yaml::from_reader(file)?)
    }

    fn from_parts(root: Option<Root>, credentials: CredentialSet) -> Self {
        let r = root.unwrap_or_default();
        let models = r.models.unwrap_or_default();
        let model_primary = env::var("SCRIBA_MODEL_PRIMARY")
            .ok()
            .or(models.primary)
            .unwrap_or_else(|| MODEL_PRIMARY.to_string());
        let model_fast = env::var("SCRIBA_MODEL_FAST")
            .ok()
            .or(models.fast)
            .unwrap_or_else(|| MODEL_FAST.to_string());
        let gateway_bind = r.gateway.and_then(|g| g.bind);

        Self {
            credentials,
            model_primary,
            model_fast,
            gateway_bind,
            instruction: r.instruction,
        }
    }
}

/// Primary/secondary API credentials. Read-only after startup, safe to
/// share across concurrent submissions.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    primary: String,
    secondary: Option<String>,
}

impl CredentialSet {
    pub fn new(primary: String, secondary: Option<String>) -> Self {
        Self { primary, secondary }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Secondary falls back to primary when none is configured.
    pub fn for_tier(&self, tier: CredentialTier) -> &str {
        match tier {
            CredentialTier::Primary => &self.primary,
            CredentialTier::Secondary => self.secondary.as_deref().unwrap_or(&self.primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secondary_falls_back_to_primary() {
        let creds = CredentialSet::new("key-a".into(), None);
        assert_eq!(creds.for_tier(CredentialTier::Secondary), "key-a");
        assert!(!creds.has_secondary());

        let creds = CredentialSet::new("key-a".into(), Some("key-b".into()));
        assert_eq!(creds.for_tier(CredentialTier::Primary), "key-a");
        assert_eq!(creds.for_tier(CredentialTier::Secondary), "key-b");
    }

    #[test]
    fn defaults_apply_without_config_file() {
        let config = AppConfig::from_parts(None, CredentialSet::new("k".into(), None));
        assert_eq!(config.model_primary, MODEL_PRIMARY);
        assert_eq!(config.model_fast, MODEL_FAST);
        assert!(config.gateway_bind.is_none());
    }

    #[test]
    fn yaml_models_override_defaults() {
        let root: Root = serde_yaml::from_str(
            "models:\n  primary: custom-pro\n  fast: custom-flash\ngateway:\n  bind: 0.0.0.0:9000\n",
        )
        .unwrap();
        let config = AppConfig::from_parts(Some(root), CredentialSet::new("k".into(), None));
        assert_eq!(config.model_primary, "custom-pro");
        assert_eq!(config.model_fast, "custom-flash");
        assert_eq!(config.gateway_bind.as_deref(), Some("0.0.0.0:9000"));
    }
}
