use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Json struct for deployment settings
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct Settings {
    pub web_port: Option<u16>,
    /// SQLite database file
    pub database: Option<PathBuf>,
    /// Root directory for stored photos and tags
    pub storage_root: Option<PathBuf>,
    /// Externally visible address of this server, used for storage links
    /// and payment redirects
    pub public_url: Option<String>,
    /// Bearer token for the admin routes. Admin routes are disabled if unset.
    pub admin_token: Option<String>,
    /// Endpoint of the face detection service
    pub face_detector_url: Option<String>,
    pub flutterwave: Option<FlutterwaveSettings>,
    /// Registration fee in whole currency units
    pub registration_fee: Option<u32>,
    pub currency: Option<String>,
    pub network_timeout_secs: Option<u64>,
    /// How long a processed photo is kept for its form session
    pub photo_slot_ttl_secs: Option<u64>,
    /// TrueType/OpenType font used for credential tags
    pub tag_font: Option<PathBuf>,
    pub event: Option<EventBranding>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FlutterwaveSettings {
    pub secret_key: String,
    pub base_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventBranding {
    pub title: String,
    pub theme: String,
    pub text: String,
}

impl Default for EventBranding {
    fn default() -> Self {
        Self {
            title: "DIOCESAN YOUTH CONVENTION 2025".to_string(),
            theme: "Walking in Integrity".to_string(),
            text: "Proverbs 11:3".to_string(),
        }
    }
}

impl Settings {
    pub fn web_port(&self) -> u16 {
        self.web_port.unwrap_or(28010)
    }

    pub fn database(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| PathBuf::from("registrar.db"))
    }

    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("storage"))
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.web_port()))
            .trim_end_matches('/')
            .to_string()
    }

    pub fn registration_fee(&self) -> u32 {
        self.registration_fee.unwrap_or(4000)
    }

    pub fn currency(&self) -> String {
        self.currency.clone().unwrap_or_else(|| "NGN".to_string())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs.unwrap_or(30))
    }

    pub fn photo_slot_ttl(&self) -> Duration {
        Duration::from_secs(self.photo_slot_ttl_secs.unwrap_or(30 * 60))
    }

    pub fn event(&self) -> EventBranding {
        self.event.clone().unwrap_or_default()
    }
}
