//! Plugin description printed by `--about`.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use crate::config::{SettingSpec, PLUGIN_NAME, SETTINGS};

/// Output formats for `--about`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum AboutFormat {
    /// Machine-readable JSON (default).
    #[default]
    Json,
    /// Markdown suitable for a README.
    Markdown,
}

/// Plugin metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AboutInfo {
    /// Plugin name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Supported plugin capabilities.
    pub capabilities: Vec<&'static str>,
    /// Settings in declaration order.
    pub settings: Vec<AboutSetting>,
}

/// One documented setting.
#[derive(Debug, Clone, Serialize)]
pub struct AboutSetting {
    /// Setting key.
    pub name: &'static str,
    /// JSON type.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Default value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether the value is a secret.
    pub secret: bool,
    /// Description.
    pub description: &'static str,
}

impl From<&SettingSpec> for AboutSetting {
    fn from(setting: &SettingSpec) -> Self {
        Self {
            name: setting.name,
            kind: setting.kind.json_type(),
            default: setting.default.and_then(|raw| serde_json::from_str(raw).ok()),
            secret: setting.secret,
            description: setting.description,
        }
    }
}

impl AboutInfo {
    /// Collects metadata for this build.
    pub fn current() -> Self {
        Self {
            name: PLUGIN_NAME,
            description: "Split documents into segments, then vectorize them with OpenAI embeddings.",
            version: env!("CARGO_PKG_VERSION"),
            capabilities: vec!["about"],
            settings: SETTINGS.iter().map(AboutSetting::from).collect(),
        }
    }

    /// Renders the metadata in the requested format.
    pub fn render(&self, format: AboutFormat) -> serde_json::Result<String> {
        match format {
            AboutFormat::Json => serde_json::to_string_pretty(self),
            AboutFormat::Markdown => Ok(self.to_markdown()),
        }
    }

    fn to_markdown(&self) -> String {
        let mut md = format!("# `{}`\n\n{}\n\n", self.name, self.description);
        md.push_str(&format!("Version: {}\n\n", self.version));
        md.push_str("## Capabilities\n\n");
        for capability in &self.capabilities {
            md.push_str(&format!("* `{capability}`\n"));
        }
        md.push_str("\n## Settings\n\n");
        md.push_str("| Setting | Type | Default | Secret | Description |\n");
        md.push_str("|:--------|:-----|:--------|:-------|:------------|\n");
        for setting in &self.settings {
            let default = setting
                .default
                .as_ref()
                .map(|value| format!("`{value}`"))
                .unwrap_or_else(|| "None".to_string());
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                setting.name,
                setting.kind,
                default,
                if setting.secret { "yes" } else { "no" },
                setting.description
            ));
        }
        md
    }
}
