use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::participant::PaymentStatus;

/// One of the parallel registration flows.
///
/// Every track stores its participants in its own table with the same shape;
/// the differences between the flows live here instead of in separate code paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Youth,
    Leadership,
    Mission,
    Ignition,
}

impl Track {
    pub const ALL: [Track; 4] = [
        Track::Youth,
        Track::Leadership,
        Track::Mission,
        Track::Ignition,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Track::Youth => "registrations",
            Track::Leadership => "leadership_registrations",
            Track::Mission => "village_mission",
            Track::Ignition => "ignition_attendance",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Track::Youth => "youth",
            Track::Leadership => "leadership",
            Track::Mission => "mission",
            Track::Ignition => "ignition",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Track::Youth => "Diocesan Youth Convention",
            Track::Leadership => "Leadership Retreat",
            Track::Mission => "Village Mission",
            Track::Ignition => "Ignition",
        }
    }

    /// Profile fields that must be present besides name and phone.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Track::Youth => &[
                "gender",
                "date_of_birth",
                "archdeaconry",
                "church",
                "occupation",
                "educational_qualification",
                "address",
            ],
            Track::Leadership => &[
                "church",
                "position_held",
                "archdeaconry",
                "position_held_in_arch",
                "position_held_in_dio",
            ],
            Track::Mission => &["church", "archdeaconry", "reason_for_registering"],
            Track::Ignition => &["gender", "archdeaconry", "church"],
        }
    }

    pub fn requires_email(&self) -> bool {
        !matches!(self, Track::Leadership)
    }

    pub fn requires_photo(&self) -> bool {
        matches!(self, Track::Youth | Track::Ignition)
    }

    pub fn requires_payment(&self) -> bool {
        matches!(self, Track::Youth)
    }

    pub fn initial_status(&self) -> PaymentStatus {
        if self.requires_payment() {
            PaymentStatus::NotPaid
        } else {
            PaymentStatus::Registered
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for Track {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Track::ALL
            .into_iter()
            .find(|t| t.slug() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown track '{}'", s))
    }
}
