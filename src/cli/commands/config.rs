//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: Option<&str>) -> Result<()> {
    let config_path = config_path
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);

    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&redacted(settings))
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Set { key, value } => {
            let mut settings = settings;
            settings.set(key, value)?;
            settings.save_to(&config_path)?;
            Output::success(&format!("Set {} in {}", key, config_path.display()));
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// Mask API keys so the output can be shared.
fn redacted(mut settings: Settings) -> Settings {
    for provider in settings.providers.values_mut() {
        if let Some(key) = provider.api_key.as_mut() {
            *key = mask(key);
        }
    }
    settings
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    #[test]
    fn test_show_masks_keys() {
        let mut settings = Settings::default();
        settings.providers.insert(
            "openai".to_string(),
            ProviderSettings {
                api_key: Some("sk-abcdefghijkl".to_string()),
                ..Default::default()
            },
        );
        let shown = redacted(settings);
        assert_eq!(shown.providers["openai"].api_key.as_deref(), Some("sk-a****"));
        assert_eq!(mask("short"), "****");
    }

    #[test]
    fn test_set_writes_to_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let action = ConfigAction::Set {
            key: "agent.max_steps".to_string(),
            value: "9".to_string(),
        };
        run_config(&action, Settings::default(), path.to_str()).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.agent.max_steps, 9);
    }
}
