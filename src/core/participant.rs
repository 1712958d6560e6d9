use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

use crate::error::{Error, Result};

use super::track::Track;

/// Payment state of a participant record. It only ever moves towards `Paid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotPaid,
    Registered,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::NotPaid => "not_paid",
            PaymentStatus::Registered => "registered",
            PaymentStatus::Paid => "paid",
        }
    }

    /// Whether the record is done with payment and may see its success page.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Registered | PaymentStatus::Paid)
    }
}

/// A struct representing one registrant for one track
#[derive(PartialEq, Debug, FromRow, Clone, Serialize)]
pub struct Participant {
    /// Unique participant ID within its track
    pub id: i64,

    pub full_name: String,
    pub phone: String,
    pub email: String,

    #[serde(skip)]
    pub identity_key: String,

    /// Remaining track specific form fields
    pub profile: Json<BTreeMap<String, String>>,

    pub archdeaconry: Option<String>,
    pub church: Option<String>,

    /// Public link to the normalized photo
    pub photo_url: Option<String>,

    /// Null in rows written before statuses were tracked
    pub payment_status: Option<PaymentStatus>,

    /// Public link to the last generated credential tag
    pub tag_url: Option<String>,

    pub created_at: i64,
}

impl Participant {
    pub fn status(&self) -> PaymentStatus {
        self.payment_status.unwrap_or(PaymentStatus::NotPaid)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.profile.0.get(key).map(|s| s.as_str())
    }
}

/// The natural dedup key of a participant: name, phone and email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub full_name: String,
    pub phone: String,
    pub email: String,
}

impl Identity {
    pub fn new(full_name: &str, phone: &str, email: &str) -> Self {
        Self {
            full_name: full_name.trim().to_string(),
            phone: phone.trim().to_string(),
            email: email.trim().to_lowercase(),
        }
    }

    /// Key backing the store's unique constraint. Name and phone are only
    /// trimmed, so spelling differences make distinct registrants.
    pub fn key(&self) -> String {
        format!("{}\u{1f}{}\u{1f}{}", self.full_name, self.phone, self.email)
    }
}

/// Submitted registration form
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RegistrationForm {
    pub full_name: String,

    #[serde(alias = "phone_number")]
    pub phone: String,

    #[serde(default)]
    pub email: String,

    /// Form session whose processed photo should be attached
    #[serde(default)]
    pub photo: Option<String>,

    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl RegistrationForm {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.full_name, &self.phone, &self.email)
    }

    /// Checks required fields for the track and returns the profile to store.
    pub fn validate(&self, track: Track) -> Result<BTreeMap<String, String>> {
        let mut missing = vec![];

        if self.full_name.trim().is_empty() {
            missing.push("full_name");
        }
        if self.phone.trim().is_empty() {
            missing.push("phone");
        }
        if track.requires_email() && self.email.trim().is_empty() {
            missing.push("email");
        }

        let mut profile = BTreeMap::new();
        for &field in track.required_fields() {
            match self.fields.get(field).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => {
                    profile.insert(field.to_string(), value.to_string());
                }
                _ => missing.push(field),
            }
        }

        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        if track.requires_email() && !self.email.contains('@') {
            return Err(Error::Validation("Invalid email address".to_string()));
        }

        Ok(profile)
    }
}

/// Page a caller should be sent to after an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Route {
    Payment { track: Track, id: i64 },
    Success { track: Track, id: i64 },
}

impl Route {
    /// Where a record in the given state belongs.
    pub fn for_status(track: Track, id: i64, status: PaymentStatus) -> Self {
        if status.is_settled() {
            Route::Success { track, id }
        } else {
            Route::Payment { track, id }
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Route::Payment { id, .. } | Route::Success { id, .. } => *id,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Payment { track: Track::Youth, id } => format!("/payment/{}", id),
            Route::Success { track: Track::Youth, id } => format!("/success/{}", id),
            Route::Payment { track, id } => format!("/{}/payment/{}", track.slug(), id),
            Route::Success { track, id } => format!("/{}/success/{}", track.slug(), id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn youth_form() -> RegistrationForm {
        serde_json::from_str(
            r#"{
                "full_name": " Jane Doe ",
                "phone": "08012345678",
                "email": "JANE@X.COM",
                "gender": "Female",
                "date_of_birth": "2001-04-12",
                "archdeaconry": "Agodi",
                "church": "St. Peter's",
                "occupation": "Student",
                "educational_qualification": "BSc",
                "address": "12 Ring Road",
                "favourite_colour": "blue"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_identity_normalization() {
        let a = Identity::new(" Jane Doe", "08012345678 ", "JANE@X.COM");
        let b = Identity::new("Jane Doe", "08012345678", "jane@x.com ");

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.email, "jane@x.com");
        assert_ne!(a.key(), Identity::new("Jane Doe", "08012345679", "jane@x.com").key());
    }

    #[test]
    fn test_identity_keeps_name_case_and_phone_spacing() {
        let plain = Identity::new("Jane Doe", "08012345678", "jane@x.com");

        assert_ne!(plain.key(), Identity::new("JANE DOE", "08012345678", "jane@x.com").key());
        assert_ne!(plain.key(), Identity::new("Jane Doe", "0801 234 5678", "jane@x.com").key());
    }

    #[test]
    fn test_validate_keeps_track_fields() {
        let profile = youth_form().validate(Track::Youth).unwrap();

        assert_eq!(profile.len(), Track::Youth.required_fields().len());
        assert_eq!(profile["church"], "St. Peter's");
        assert!(!profile.contains_key("favourite_colour"));
    }

    #[test]
    fn test_validate_missing() {
        let mut form = youth_form();
        form.fields.remove("church");
        form.email = " ".to_string();

        match form.validate(Track::Youth) {
            Err(Error::Validation(msg)) => {
                assert!(msg.contains("church"));
                assert!(msg.contains("email"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_leadership_phone_alias() {
        let form: RegistrationForm = serde_json::from_str(
            r#"{
                "full_name": "Ven. Ade",
                "phone_number": "0803",
                "church": "Cathedral",
                "position_held": "Vicar",
                "archdeaconry": "Cathedral",
                "position_held_in_arch": "Secretary",
                "position_held_in_dio": "None"
            }"#,
        )
        .unwrap();

        assert_eq!(form.phone, "0803");
        assert!(form.validate(Track::Leadership).is_ok());
    }

    #[test]
    fn test_routes() {
        assert_eq!(
            Route::for_status(Track::Youth, 7, PaymentStatus::NotPaid).path(),
            "/payment/7"
        );
        assert_eq!(
            Route::for_status(Track::Youth, 7, PaymentStatus::Paid).path(),
            "/success/7"
        );
        assert_eq!(
            Route::for_status(Track::Ignition, 3, PaymentStatus::Registered).path(),
            "/ignition/success/3"
        );
    }
}
