//! Site settings
//!
//! One versioned JSON document. Every section carries defaults, so a document
//! saved by an older release loads with the fields it lacks filled in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::automation::steps::{EmailContent, PLACEHOLDERS};
use crate::error::ApiResult;
use crate::store::{SettingsStore, StoreError};
use crate::validation::{email, Validator};

pub const SETTINGS_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralSettings {
    pub site_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub logo_url: Option<String>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            site_name: "Leadflow".to_string(),
            contact_email: String::new(),
            contact_phone: None,
            logo_url: None,
        }
    }
}

/// Identity outgoing email is sent as
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SenderIdentity {
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
}

impl Default for SenderIdentity {
    fn default() -> Self {
        Self {
            from_name: "Leadflow".to_string(),
            from_email: "no-reply@leadflow.local".to_string(),
            reply_to: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmailTemplates {
    pub welcome: EmailContent,
    pub lead_confirmation: EmailContent,
    pub footer: String,
}

impl Default for EmailTemplates {
    fn default() -> Self {
        Self {
            welcome: EmailContent {
                subject: "Welcome, {{first_name}}".to_string(),
                body: "Thanks for subscribing, {{name}}.".to_string(),
            },
            lead_confirmation: EmailContent {
                subject: "We received your request".to_string(),
                body: "Hi {{first_name}}, we will be in touch shortly.".to_string(),
            },
            footer: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureToggles {
    pub newsletter: bool,
    pub whatsapp_notifications: bool,
    pub segment_automation: bool,
    pub workflow_automation: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            newsletter: true,
            whatsapp_notifications: false,
            segment_automation: true,
            workflow_automation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteSettings {
    pub version: u32,
    pub general: GeneralSettings,
    pub sender: SenderIdentity,
    pub email_templates: EmailTemplates,
    pub features: FeatureToggles,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            general: GeneralSettings::default(),
            sender: SenderIdentity::default(),
            email_templates: EmailTemplates::default(),
            features: FeatureToggles::default(),
        }
    }
}

impl SiteSettings {
    /// Decode a stored document, upgrading older layouts first
    pub fn from_document(document: Value) -> Result<Self, StoreError> {
        let raw = document.get("version").and_then(Value::as_u64).unwrap_or(1);
        let version = u32::try_from(raw).map_err(|_| {
            StoreError::Corrupt(format!("settings version {} is out of range", raw))
        })?;
        if version > SETTINGS_VERSION {
            return Err(StoreError::Corrupt(format!(
                "settings version {} is newer than supported version {}",
                version, SETTINGS_VERSION
            )));
        }

        let document = if version < 2 {
            upgrade_v1(document)
        } else {
            document
        };
        let mut settings: SiteSettings = serde_json::from_value(document)?;
        settings.version = SETTINGS_VERSION;
        Ok(settings)
    }

    pub fn validate(&self) -> ApiResult<()> {
        let mut validator = Validator::new()
            .required(&self.general.site_name, "general.site_name")
            .max_length(&self.general.site_name, "general.site_name", 120)
            .email(&self.general.contact_email, "general.contact_email")
            .http_url(self.general.logo_url.as_deref().unwrap_or_default(), "general.logo_url")
            .required(&self.sender.from_name, "sender.from_name")
            .required(&self.sender.from_email, "sender.from_email")
            .email(&self.sender.from_email, "sender.from_email")
            .email(self.sender.reply_to.as_deref().unwrap_or_default(), "sender.reply_to");

        for (key, template) in [
            ("email_templates.welcome", &self.email_templates.welcome),
            ("email_templates.lead_confirmation", &self.email_templates.lead_confirmation),
        ] {
            validator = validator
                .required(&template.subject, &format!("{}.subject", key))
                .required(&template.body, &format!("{}.body", key));
            for name in template.placeholders() {
                validator = validator.error_if(
                    !PLACEHOLDERS.contains(&name.as_str()),
                    &format!("{}.body", key),
                    &format!("Unknown placeholder '{{{{{}}}}}'", name),
                );
            }
        }

        validator.finish()
    }
}

/// Version 1 kept everything at the top level
fn upgrade_v1(document: Value) -> Value {
    let Value::Object(old) = document else {
        return Value::Object(Map::new());
    };

    let mut general = Map::new();
    let mut sender = Map::new();
    let mut features = Map::new();
    for (key, value) in old {
        match key.as_str() {
            "site_name" | "contact_email" | "contact_phone" | "logo_url" => {
                general.insert(key, value);
            }
            "from_name" | "from_email" | "reply_to" => {
                sender.insert(key, value);
            }
            "newsletter_enabled" => {
                features.insert("newsletter".to_string(), value);
            }
            "whatsapp_enabled" => {
                features.insert("whatsapp_notifications".to_string(), value);
            }
            _ => {}
        }
    }

    serde_json::json!({
        "version": SETTINGS_VERSION,
        "general": general,
        "sender": sender,
        "features": features,
    })
}

pub struct SettingsService<S: SettingsStore + ?Sized> {
    store: Arc<S>,
}

impl<S: SettingsStore + ?Sized> SettingsService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Stored settings merged with defaults; defaults when nothing was saved
    pub async fn load(&self) -> ApiResult<SiteSettings> {
        match self.store.load_settings().await? {
            Some(document) => Ok(SiteSettings::from_document(document)?),
            None => Ok(SiteSettings::default()),
        }
    }

    pub async fn save(&self, mut settings: SiteSettings) -> ApiResult<SiteSettings> {
        settings.validate()?;
        settings.version = SETTINGS_VERSION;
        settings.general.contact_email = email::normalize(&settings.general.contact_email);
        settings.sender.from_email = email::normalize(&settings.sender.from_email);
        let document = serde_json::to_value(&settings).map_err(StoreError::from)?;
        self.store.save_settings(&document).await?;
        info!("Site settings saved");
        Ok(settings)
    }
}
