use futures::{future::BoxFuture, FutureExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    core::{
        payment::{CheckoutRequest, PaymentGateway, VerifiedTransaction},
        settings::FlutterwaveSettings,
    },
    error::{Error, Result},
};

const DEFAULT_BASE_URL: &str = "https://api.flutterwave.com";

/// Envelope every Flutterwave v3 response is wrapped in
#[derive(Deserialize, Debug)]
struct FlutterwaveResponse<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize, Debug)]
struct CheckoutLink {
    link: String,
}

pub struct Flutterwave {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl Flutterwave {
    pub fn new(client: Client, settings: &FlutterwaveSettings) -> Self {
        Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            secret_key: settings.secret_key.clone(),
        }
    }

    fn unwrap_envelope<T>(response: FlutterwaveResponse<T>) -> Result<T> {
        if response.status != "success" {
            return Err(Error::Gateway(
                response
                    .message
                    .unwrap_or_else(|| format!("status {}", response.status)),
            ));
        }
        response
            .data
            .ok_or_else(|| Error::Gateway("Response carried no data".to_string()))
    }

    async fn checkout(&self, request: &CheckoutRequest) -> Result<String> {
        let body: Value = json!({
            "tx_ref": request.tx_ref,
            "amount": request.amount,
            "currency": request.currency,
            "redirect_url": request.redirect_url,
            "payment_options": "card,ussd,banktransfer",
            "customer": {
                "email": request.customer_email,
                "name": request.customer_name,
            },
            "meta": request.meta,
            "customizations": {
                "title": request.title,
                "description": request.description,
            },
        });

        let response: FlutterwaveResponse<CheckoutLink> = self
            .client
            .post(format!("{}/v3/payments", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let link = Self::unwrap_envelope(response)?.link;
        log::info!("Opened checkout {}", request.tx_ref);
        Ok(link)
    }

    async fn lookup(&self, transaction_id: &str) -> Result<VerifiedTransaction> {
        if transaction_id.is_empty() || !transaction_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::PaymentNotVerified(format!(
                "Malformed transaction id {}",
                transaction_id
            )));
        }

        let response: FlutterwaveResponse<VerifiedTransaction> = self
            .client
            .get(format!(
                "{}/v3/transactions/{}/verify",
                self.base_url, transaction_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await?
            .json()
            .await?;

        Self::unwrap_envelope(response)
    }
}

impl PaymentGateway for Flutterwave {
    fn initialize<'a>(&'a self, request: &'a CheckoutRequest) -> BoxFuture<'a, Result<String>> {
        self.checkout(request).boxed()
    }

    fn verify<'a>(&'a self, transaction_id: &'a str) -> BoxFuture<'a, Result<VerifiedTransaction>> {
        self.lookup(transaction_id).boxed()
    }
}
