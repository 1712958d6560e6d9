use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    util::unix_millis,
};

use super::track::Track;

/// Everything the gateway needs to open a hosted checkout
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub tx_ref: String,
    pub amount: u32,
    pub currency: String,
    pub redirect_url: String,
    pub customer_email: String,
    pub customer_name: String,
    pub title: String,
    pub description: String,
    pub meta: Value,
}

/// A transaction as reported by the gateway's lookup API
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VerifiedTransaction {
    pub id: i64,
    pub tx_ref: String,
    pub status: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl VerifiedTransaction {
    pub fn is_successful(&self) -> bool {
        self.status == "successful"
    }
}

/// Hosted checkout provider.
///
/// Client side reports of a finished payment are never trusted on their own:
/// every success goes through [`PaymentGateway::verify`] first.
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout and returns the link to send the payer to.
    fn initialize<'a>(&'a self, request: &'a CheckoutRequest) -> BoxFuture<'a, Result<String>>;

    /// Looks up a transaction by the gateway's transaction id.
    fn verify<'a>(&'a self, transaction_id: &'a str) -> BoxFuture<'a, Result<VerifiedTransaction>>;
}

/// Query the gateway appends when it sends the payer back
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PaymentCallback {
    pub status: Option<String>,
    pub tx_ref: Option<String>,
    pub transaction_id: Option<String>,
}

impl PaymentCallback {
    /// The reference and transaction id to verify, unless the payer backed out.
    pub fn claimed(&self) -> Result<(&str, &str)> {
        if self.status.as_deref() == Some("cancelled") {
            return Err(Error::PaymentNotVerified("Payment was cancelled".to_string()));
        }

        let tx_ref = self
            .tx_ref
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::PaymentNotVerified("No transaction reference".to_string()))?;
        let transaction_id = self
            .transaction_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::PaymentNotVerified("No transaction ID".to_string()))?;

        Ok((tx_ref, transaction_id))
    }
}

/// Checks that a looked up transaction really pays for what we asked for.
pub fn check_transaction(
    transaction: &VerifiedTransaction,
    tx_ref: &str,
    currency: &str,
    min_amount: f64,
) -> Result<()> {
    if !transaction.is_successful() {
        return Err(Error::PaymentNotVerified(format!(
            "Transaction status is {}",
            transaction.status
        )));
    }
    if transaction.tx_ref != tx_ref {
        return Err(Error::PaymentNotVerified(
            "Transaction belongs to another payment".to_string(),
        ));
    }
    if !transaction.currency.eq_ignore_ascii_case(currency) {
        return Err(Error::PaymentNotVerified(format!(
            "Paid in {} instead of {}",
            transaction.currency, currency
        )));
    }
    if transaction.amount < min_amount {
        return Err(Error::PaymentNotVerified(format!(
            "Paid {} of {}",
            transaction.amount, min_amount
        )));
    }
    Ok(())
}

/// `DYC-<track>-<id>-<millis>`
pub fn registration_tx_ref(track: Track, id: i64) -> String {
    format!("DYC-{}-{}-{}", track.slug(), id, unix_millis())
}

pub fn parse_registration_tx_ref(tx_ref: &str) -> Option<(Track, i64)> {
    let mut parts = tx_ref.split('-');
    if parts.next()? != "DYC" {
        return None;
    }
    let track = parts.next()?.parse().ok()?;
    let id = parts.next()?.parse().ok()?;
    parts.next()?.parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((track, id))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_ref_round_trip() {
        let tx_ref = registration_tx_ref(Track::Youth, 14);

        assert!(tx_ref.starts_with("DYC-youth-14-"));
        assert_eq!(parse_registration_tx_ref(&tx_ref), Some((Track::Youth, 14)));
    }

    fn transaction() -> VerifiedTransaction {
        VerifiedTransaction {
            id: 4242,
            tx_ref: "DYC-youth-7-1".to_string(),
            status: "successful".to_string(),
            amount: 4000.0,
            currency: "NGN".to_string(),
            meta: None,
        }
    }

    #[test]
    fn test_check_transaction() {
        assert!(check_transaction(&transaction(), "DYC-youth-7-1", "NGN", 4000.0).is_ok());

        let failed = VerifiedTransaction {
            status: "failed".to_string(),
            ..transaction()
        };
        let short = VerifiedTransaction {
            amount: 100.0,
            ..transaction()
        };
        let dollars = VerifiedTransaction {
            currency: "USD".to_string(),
            ..transaction()
        };

        for (tx, tx_ref) in [
            (&failed, "DYC-youth-7-1"),
            (&short, "DYC-youth-7-1"),
            (&dollars, "DYC-youth-7-1"),
            (&transaction(), "DYC-youth-8-1"),
        ] {
            assert!(matches!(
                check_transaction(tx, tx_ref, "NGN", 4000.0),
                Err(Error::PaymentNotVerified(_))
            ));
        }
    }

    #[test]
    fn test_callback_claims() {
        let cb = PaymentCallback {
            status: Some("successful".to_string()),
            tx_ref: Some("DYC-youth-7-1".to_string()),
            transaction_id: Some("4242".to_string()),
        };
        assert_eq!(cb.claimed().unwrap(), ("DYC-youth-7-1", "4242"));

        let cancelled = PaymentCallback {
            status: Some("cancelled".to_string()),
            ..cb.clone()
        };
        assert!(cancelled.claimed().is_err());

        let no_id = PaymentCallback {
            transaction_id: None,
            ..cb
        };
        assert!(no_id.claimed().is_err());
    }

    #[test]
    fn test_tx_ref_rejects_foreign() {
        assert_eq!(parse_registration_tx_ref("DYC-1738756200"), None);
        assert_eq!(parse_registration_tx_ref("DON-1-2"), None);
        assert_eq!(parse_registration_tx_ref("DYC-choir-1-2"), None);
        assert_eq!(parse_registration_tx_ref("DYC-youth-x-2"), None);
        assert_eq!(parse_registration_tx_ref("DYC-youth-1-2-3"), None);
    }
}
