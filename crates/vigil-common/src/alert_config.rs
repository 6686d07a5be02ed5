//! ---
//! vigil_section: "01-core-functionality"
//! vigil_subsection: "module"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Shared primitives and utilities for the supervisor."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
//! Operator-facing alert identity and messaging credentials.
//!
//! The file is plain `KEY=value` text so field technicians can inspect it
//! with any editor. It holds a bot token, so it is always written `0600`.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

const UNCONFIGURED: &str = "unconfigured";

/// Keys recognised in the alert configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertConfigKey {
    HospitalName,
    Region,
    BotToken,
    ChatId,
}

impl AlertConfigKey {
    pub const ALL: [AlertConfigKey; 4] = [
        AlertConfigKey::HospitalName,
        AlertConfigKey::Region,
        AlertConfigKey::BotToken,
        AlertConfigKey::ChatId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertConfigKey::HospitalName => "HOSPITAL_NAME",
            AlertConfigKey::Region => "REGION",
            AlertConfigKey::BotToken => "BOT_TOKEN",
            AlertConfigKey::ChatId => "CHAT_ID",
        }
    }

    fn is_secret(&self) -> bool {
        matches!(self, AlertConfigKey::BotToken)
    }
}

impl fmt::Display for AlertConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertConfigKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "HOSPITAL_NAME" => Ok(AlertConfigKey::HospitalName),
            "REGION" => Ok(AlertConfigKey::Region),
            "BOT_TOKEN" => Ok(AlertConfigKey::BotToken),
            "CHAT_ID" => Ok(AlertConfigKey::ChatId),
            other => Err(format!("unknown alert config key: {}", other)),
        }
    }
}

/// Site identity and messaging credentials used by the alert dispatcher.
#[derive(Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub hospital_name: String,
    pub region: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            hospital_name: UNCONFIGURED.to_owned(),
            region: UNCONFIGURED.to_owned(),
            bot_token: None,
            chat_id: None,
        }
    }
}

impl fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertConfig")
            .field("hospital_name", &self.hospital_name)
            .field("region", &self.region)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl AlertConfig {
    /// Load the alert configuration, tolerating an absent file.
    ///
    /// A missing file yields log-only defaults. Unknown keys are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "alert config absent; alerting is log-only");
            return Ok(Self::default());
        }
        let entries = dotenvy::from_path_iter(path)
            .with_context(|| format!("unable to open alert config {}", path.display()))?;
        let mut config = Self::default();
        for entry in entries {
            let (key, value) = entry
                .with_context(|| format!("failed to parse alert config {}", path.display()))?;
            match key.parse::<AlertConfigKey>() {
                Ok(key) => config.set(key, &value)?,
                Err(_) => debug!(%key, "ignoring unknown alert config key"),
            }
        }
        Ok(config)
    }

    /// Token and chat id when both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().filter(|t| !t.trim().is_empty())?;
        let chat = self.chat_id.as_deref().filter(|c| !c.trim().is_empty())?;
        Some((token, chat))
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn get(&self, key: AlertConfigKey) -> Option<&str> {
        match key {
            AlertConfigKey::HospitalName => Some(self.hospital_name.as_str()),
            AlertConfigKey::Region => Some(self.region.as_str()),
            AlertConfigKey::BotToken => self.bot_token.as_deref(),
            AlertConfigKey::ChatId => self.chat_id.as_deref(),
        }
    }

    /// Value suitable for display; secrets are masked.
    pub fn display_value(&self, key: AlertConfigKey) -> String {
        match self.get(key) {
            Some(value) if key.is_secret() && !value.is_empty() => mask(value),
            Some(value) => value.to_owned(),
            None => "<unset>".to_owned(),
        }
    }

    pub fn set(&mut self, key: AlertConfigKey, value: &str) -> Result<()> {
        if value.contains('\n') || value.contains('\r') {
            return Err(anyhow!("value for {} must be a single line", key));
        }
        let value = value.trim();
        match key {
            AlertConfigKey::HospitalName => {
                self.hospital_name = non_empty(value).unwrap_or(UNCONFIGURED).to_owned()
            }
            AlertConfigKey::Region => {
                self.region = non_empty(value).unwrap_or(UNCONFIGURED).to_owned()
            }
            AlertConfigKey::BotToken => self.bot_token = non_empty(value).map(str::to_owned),
            AlertConfigKey::ChatId => self.chat_id = non_empty(value).map(str::to_owned),
        }
        Ok(())
    }

    /// Render the configuration as `KEY=value` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for key in AlertConfigKey::ALL {
            if let Some(value) = self.get(key) {
                out.push_str(key.as_str());
                out.push('=');
                out.push_str(&quote(value));
                out.push('\n');
            }
        }
        out
    }

    /// Write the configuration with owner-only permissions.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("unable to create {}", parent.display()))?;
            }
        }
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("unable to write alert config {}", path.display()))?;
        // `mode` only applies on creation; tighten pre-existing files as well.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                warn!(path = %path.display(), error = %err, "unable to restrict alert config permissions");
            }
        }
        file.write_all(self.render().as_bytes())
            .with_context(|| format!("unable to write alert config {}", path.display()))?;
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn quote(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for ch in value.chars() {
        if matches!(ch, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

fn mask(secret: &str) -> String {
    let visible: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{visible}")
}
