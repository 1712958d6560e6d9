use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::{
    error::{Error, Result},
    util::unix_millis,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Successful,
    Failed,
}

/// A donation made through the payment gateway
#[derive(PartialEq, Debug, FromRow, Clone, Serialize)]
pub struct Donation {
    pub id: i64,
    /// Reference handed to the gateway
    pub tx_ref: String,
    pub full_name: String,
    pub email: String,
    pub amount: i64,
    pub currency: String,
    pub status: DonationStatus,
    pub transaction_id: Option<String>,
    pub created_at: i64,
}

/// Json body of a donation request
#[derive(Deserialize, Debug, Clone)]
pub struct DonationRequest {
    pub full_name: String,
    pub email: String,
    pub amount: i64,
}

impl DonationRequest {
    pub fn validate(&self) -> Result<()> {
        if self.full_name.trim().is_empty() || self.email.trim().is_empty() {
            return Err(Error::Validation("Name and email are required".to_string()));
        }
        if !self.email.contains('@') {
            return Err(Error::Validation("Invalid email address".to_string()));
        }
        if self.amount <= 0 {
            return Err(Error::Validation("Enter a valid amount".to_string()));
        }
        Ok(())
    }
}

pub fn new_donation_ref() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("DON-{}-{}", unix_millis(), suffix)
}
