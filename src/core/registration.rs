//! Registration, payment and voucher flows for every track.
//!
//! Reads and gateway calls go straight through [`Registrar`]. Everything that
//! writes participant, voucher or donation rows is sent to the registration
//! actor so that writes from concurrent requests are applied one at a time.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    actor::{ActorRef, Rto},
    error::{Error, Result},
    photo::ProcessedPhoto,
    util::{sanitize_file_name, unix_millis, with_timeout},
};

use super::{
    db::{NewParticipant, RegistryDb},
    donation::{new_donation_ref, Donation, DonationRequest, DonationStatus},
    participant::{Identity, Participant, PaymentStatus, RegistrationForm, Route},
    payment::{
        check_transaction, parse_registration_tx_ref, registration_tx_ref, CheckoutRequest,
        PaymentCallback, PaymentGateway,
    },
    settings::Settings,
    storage::{Storage, StoredObject, ADMIN_TAG_PREFIX, PHOTO_BUCKET, TAG_BUCKET},
    tag::{TagCard, TagRenderer, TagStyle},
    track::Track,
    voucher::{generate_batch, normalize_code},
};

/// Result of a form submission. Resubmitting an existing identity is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Created { route: Route },
    Existing { route: Route },
}

impl SubmitOutcome {
    pub fn route(&self) -> Route {
        match self {
            SubmitOutcome::Created { route } | SubmitOutcome::Existing { route } => *route,
        }
    }
}

/// Both renderings of a participant's credential tag
#[derive(Debug, Clone)]
pub struct RenderedTag {
    pub file_name: String,
    pub attendee_png: Vec<u8>,
    pub admin_png: Vec<u8>,
}

pub enum RegistrationRequest {
    Submit(
        Track,
        RegistrationForm,
        Option<Arc<ProcessedPhoto>>,
        Rto<SubmitOutcome>,
    ),
    RedeemVoucher(Track, i64, String, Rto<Route>),
    ConfirmPayment(Track, i64, Rto<Route>),
    AttachTag(Track, i64, Vec<u8>, Rto<String>),
    GenerateVouchers(usize, usize, Rto<Vec<String>>),
    RecordDonation(DonationRequest, Rto<Donation>),
    SettleDonation(String, DonationStatus, String, Rto<bool>),
}

pub type RegistrationActor = ActorRef<RegistrationRequest>;

pub struct Registrar {
    db: Arc<RegistryDb>,
    storage: Arc<Storage>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    tags: Option<Arc<TagRenderer>>,
    settings: Arc<Settings>,
}

impl Registrar {
    pub fn new(
        db: Arc<RegistryDb>,
        storage: Arc<Storage>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        tags: Option<Arc<TagRenderer>>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            db,
            storage,
            gateway,
            tags,
            settings,
        }
    }

    pub fn db(&self) -> &RegistryDb {
        &self.db
    }

    /// Whether paid tracks can check out online
    pub fn online_payment(&self) -> bool {
        self.gateway.is_some()
    }

    pub async fn get_registration(&self, track: Track, id: i64) -> Result<Participant> {
        self.db
            .get_participant(track, id)
            .await?
            .ok_or(Error::NotFound)
    }

    /// Creates a participant, or routes to the one that already has this identity.
    pub async fn submit(
        &self,
        track: Track,
        form: &RegistrationForm,
        photo: Option<&ProcessedPhoto>,
    ) -> Result<SubmitOutcome> {
        let profile = form.validate(track)?;
        match (track.requires_photo(), photo.is_some()) {
            (true, false) => return Err(Error::Validation("Please upload a photo.".to_string())),
            (false, true) => {
                return Err(Error::Validation(format!(
                    "{} registration does not take a photo",
                    track.title()
                )))
            }
            _ => {}
        }

        let identity = form.identity();
        if let Some(existing) = self.db.find_participant(track, &identity).await? {
            log::info!(
                "{} already registered for {} as {}",
                identity.full_name,
                track,
                existing.id
            );
            return Ok(SubmitOutcome::Existing {
                route: Route::for_status(track, existing.id, existing.status()),
            });
        }

        self.create(track, identity, profile, photo).await
    }

    /// Uploads the photo and inserts the record. A concurrent insert of the
    /// same identity wins; this one then routes to the winner and drops its upload.
    async fn create(
        &self,
        track: Track,
        identity: Identity,
        profile: BTreeMap<String, String>,
        photo: Option<&ProcessedPhoto>,
    ) -> Result<SubmitOutcome> {
        let stored = match photo {
            Some(photo) => {
                let path = format!("{}_{}", unix_millis(), photo.file_name);
                Some(self.storage.put(PHOTO_BUCKET, &path, &photo.bytes).await?)
            }
            None => None,
        };

        let participant = NewParticipant {
            identity,
            profile,
            photo_url: stored.as_ref().map(|s| s.public_url.clone()),
            payment_status: track.initial_status(),
        };

        match self.db.insert_participant(track, &participant).await {
            Ok(Some(id)) => {
                log::info!(
                    "Registered {} for {} as {}",
                    participant.identity.full_name,
                    track,
                    id
                );
                Ok(SubmitOutcome::Created {
                    route: Route::for_status(track, id, participant.payment_status),
                })
            }
            Ok(None) => {
                self.discard(stored).await;
                let winner = self
                    .db
                    .find_participant(track, &participant.identity)
                    .await?
                    .ok_or(Error::NotFound)?;
                log::info!(
                    "Concurrent registration of {} resolved to {}",
                    participant.identity.full_name,
                    winner.id
                );
                Ok(SubmitOutcome::Existing {
                    route: Route::for_status(track, winner.id, winner.status()),
                })
            }
            Err(e) => {
                log::error!("Failed to save {} registration: {}", track, e);
                self.discard(stored).await;
                Err(e)
            }
        }
    }

    async fn discard(&self, stored: Option<StoredObject>) {
        if let Some(object) = stored {
            if let Err(e) = self.storage.remove(&object.bucket, &object.path).await {
                log::warn!("Failed to remove orphaned photo {}: {}", object.path, e);
            }
        }
    }

    pub async fn redeem_voucher(&self, track: Track, id: i64, code: &str) -> Result<Route> {
        let code = normalize_code(code)?;
        if !track.requires_payment() {
            return Err(Error::Validation(format!(
                "{} registration does not require payment",
                track.title()
            )));
        }

        match self.db.redeem_voucher(track, &code, id).await {
            Ok(_) => {
                log::info!("Voucher {} paid for {} {}", code, track, id);
                Ok(Route::Success { track, id })
            }
            Err(e) => {
                log::warn!("Voucher {} rejected for {} {}: {}", code, track, id, e);
                Err(e)
            }
        }
    }

    fn gateway(&self) -> Result<&dyn PaymentGateway> {
        self.gateway.as_deref().ok_or(Error::GatewayUnavailable)
    }

    /// Opens a hosted checkout for an unpaid participant and returns its link.
    pub async fn start_checkout(&self, track: Track, id: i64) -> Result<String> {
        if !track.requires_payment() {
            return Err(Error::Validation(format!(
                "{} registration does not require payment",
                track.title()
            )));
        }
        let gateway = self.gateway()?;
        let participant = self.get_registration(track, id).await?;
        if participant.status() == PaymentStatus::Paid {
            return Err(Error::AlreadyPaid);
        }

        let request = CheckoutRequest {
            tx_ref: registration_tx_ref(track, id),
            amount: self.settings.registration_fee(),
            currency: self.settings.currency(),
            redirect_url: format!("{}/payment/complete", self.settings.public_url()),
            customer_email: participant.email.clone(),
            customer_name: participant.full_name.clone(),
            title: track.title().to_string(),
            description: "Convention Registration Payment".to_string(),
            meta: json!({ "registration_id": id, "track": track.slug() }),
        };

        log::info!("Starting checkout {} for {}", request.tx_ref, participant.full_name);
        with_timeout(
            self.settings.network_timeout(),
            "payment gateway",
            gateway.initialize(&request),
        )
        .await
    }

    /// Verifies a checkout return with the gateway and names the record it paid for.
    ///
    /// Nothing is written here; the caller confirms the payment afterwards.
    pub async fn verify_payment(&self, callback: &PaymentCallback) -> Result<(Track, i64)> {
        let (tx_ref, transaction_id) = callback.claimed()?;
        let (track, id) = parse_registration_tx_ref(tx_ref).ok_or_else(|| {
            Error::PaymentNotVerified(format!("Unknown transaction reference {}", tx_ref))
        })?;

        let transaction = with_timeout(
            self.settings.network_timeout(),
            "payment verification",
            self.gateway()?.verify(transaction_id),
        )
        .await?;

        check_transaction(
            &transaction,
            tx_ref,
            &self.settings.currency(),
            self.settings.registration_fee() as f64,
        )?;

        Ok((track, id))
    }

    /// Moves a participant to `paid` after a verified gateway payment.
    pub async fn confirm_payment(&self, track: Track, id: i64) -> Result<Route> {
        if self.db.mark_paid(track, id).await? {
            log::info!("Payment confirmed for {} {}", track, id);
        } else {
            // Replayed callback or already paid by voucher
            self.get_registration(track, id).await?;
        }
        Ok(Route::Success { track, id })
    }

    /// Renders both tag cards for a settled participant.
    pub async fn render_tag(&self, track: Track, id: i64) -> Result<RenderedTag> {
        let renderer = self
            .tags
            .clone()
            .ok_or_else(|| Error::Config("Tag rendering is not configured".to_string()))?;
        let participant = self.get_registration(track, id).await?;
        if !participant.status().is_settled() {
            return Err(Error::Validation(
                "Complete payment before downloading your tag.".to_string(),
            ));
        }

        let photo = match &participant.photo_url {
            Some(url) => self.load_photo(url).await,
            None => None,
        };
        let card = TagCard {
            full_name: participant.full_name.clone(),
            archdeaconry: participant.archdeaconry.clone().unwrap_or_default(),
            church: participant.church.clone().unwrap_or_default(),
            photo,
        };

        let (attendee_png, admin_png) = tokio::task::spawn_blocking(move || {
            Ok::<_, Error>((
                renderer.render(&card, TagStyle::Attendee)?,
                renderer.render(&card, TagStyle::Admin)?,
            ))
        })
        .await
        .map_err(|e| Error::General(e.to_string()))??;

        Ok(RenderedTag {
            file_name: sanitize_file_name(&format!(
                "{}_Convention_Tag.png",
                participant.full_name
            )),
            attendee_png,
            admin_png,
        })
    }

    async fn load_photo(&self, url: &str) -> Option<image::RgbImage> {
        match self.storage.read_url(url).await {
            Ok(Some(bytes)) => match image::load_from_memory(&bytes) {
                Ok(image) => Some(image.to_rgb8()),
                Err(e) => {
                    log::warn!("Stored photo {} is unreadable: {}", url, e);
                    None
                }
            },
            Ok(None) => {
                log::warn!("Photo {} is not in local storage", url);
                None
            }
            Err(e) => {
                log::warn!("Failed to read photo {}: {}", url, e);
                None
            }
        }
    }

    /// Stores the organizers' copy of a tag and points the participant at it.
    pub async fn attach_tag(&self, track: Track, id: i64, admin_png: &[u8]) -> Result<String> {
        let participant = self.get_registration(track, id).await?;
        let path = format!(
            "{}/{}_{}.png",
            ADMIN_TAG_PREFIX,
            sanitize_file_name(&participant.full_name),
            unix_millis()
        );

        let stored = self.storage.put(TAG_BUCKET, &path, admin_png).await?;
        self.db.set_tag_url(track, id, &stored.public_url).await?;
        log::info!("Stored tag for {} {} at {}", track, id, stored.path);
        Ok(stored.public_url)
    }

    /// Generates a batch of fresh codes, all new to the voucher table.
    pub async fn generate_vouchers(&self, count: usize, length: usize) -> Result<Vec<String>> {
        let mut added = self.db.add_vouchers(&generate_batch(count, length)?).await?;

        // Codes that collided with stored vouchers are replaced
        let mut attempts = 0;
        while added.len() < count && attempts < 10 {
            let batch = generate_batch(count - added.len(), length)?
                .into_iter()
                .filter(|code| !added.contains(code))
                .collect::<Vec<_>>();
            added.extend(self.db.add_vouchers(&batch).await?);
            attempts += 1;
        }

        if added.len() < count {
            log::warn!(
                "Only {} of {} vouchers of length {} could be generated",
                added.len(),
                count,
                length
            );
        }
        Ok(added)
    }

    pub async fn record_donation(&self, request: &DonationRequest) -> Result<Donation> {
        request.validate()?;
        self.gateway()?;

        let mut donation = Donation {
            id: 0,
            tx_ref: new_donation_ref(),
            full_name: request.full_name.trim().to_string(),
            email: request.email.trim().to_lowercase(),
            amount: request.amount,
            currency: self.settings.currency(),
            status: DonationStatus::Pending,
            transaction_id: None,
            created_at: unix_millis(),
        };
        donation.id = self.db.add_donation(&donation).await?;
        log::info!("Recorded donation {} of {}", donation.tx_ref, donation.amount);
        Ok(donation)
    }

    pub async fn start_donation_checkout(&self, donation: &Donation) -> Result<String> {
        let request = CheckoutRequest {
            tx_ref: donation.tx_ref.clone(),
            amount: u32::try_from(donation.amount)
                .map_err(|_| Error::Validation("Enter a valid amount".to_string()))?,
            currency: donation.currency.clone(),
            redirect_url: format!("{}/donate/complete", self.settings.public_url()),
            customer_email: donation.email.clone(),
            customer_name: donation.full_name.clone(),
            title: "Diocesan Youth Convention".to_string(),
            description: "Donation".to_string(),
            meta: json!({ "donation_id": donation.id }),
        };

        with_timeout(
            self.settings.network_timeout(),
            "payment gateway",
            self.gateway()?.initialize(&request),
        )
        .await
    }

    /// Checks a donation checkout return. Returns the donation reference and
    /// the status it should be settled with. A cancelled return, or one
    /// without a transaction id, is an error and settles nothing.
    pub async fn verify_donation(
        &self,
        callback: &PaymentCallback,
    ) -> Result<(String, DonationStatus, String)> {
        let tx_ref = callback
            .tx_ref
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::PaymentNotVerified("No transaction reference".to_string()))?;
        let donation = self.db.get_donation(&tx_ref).await?.ok_or(Error::NotFound)?;

        let (_, transaction_id) = match callback.claimed() {
            Ok(claimed) => claimed,
            Err(e) => {
                // Left pending, the donor may still retry the same checkout
                log::info!("Donation {} not completed: {}", tx_ref, e);
                return Err(e);
            }
        };

        let transaction = with_timeout(
            self.settings.network_timeout(),
            "payment verification",
            self.gateway()?.verify(transaction_id),
        )
        .await?;

        let status = match check_transaction(
            &transaction,
            &tx_ref,
            &donation.currency,
            donation.amount as f64,
        ) {
            Ok(_) => DonationStatus::Successful,
            Err(e) => {
                log::warn!("Donation {} failed verification: {}", tx_ref, e);
                DonationStatus::Failed
            }
        };
        Ok((tx_ref, status, transaction_id.to_string()))
    }

    pub async fn settle_donation(
        &self,
        tx_ref: &str,
        status: DonationStatus,
        transaction_id: &str,
    ) -> Result<bool> {
        let settled = self
            .db
            .settle_donation(tx_ref, status, transaction_id)
            .await?;
        if settled {
            log::info!("Donation {} settled as {:?}", tx_ref, status);
        }
        Ok(settled)
    }
}

pub async fn run_registration_actor(
    registrar: Arc<Registrar>,
    mut rx: UnboundedReceiver<RegistrationRequest>,
) -> anyhow::Result<()> {
    while let Some(msg) = rx.recv().await {
        match msg {
            RegistrationRequest::Submit(track, form, photo, rto) => {
                rto.reply(registrar.submit(track, &form, photo.as_deref()).await)
            }
            RegistrationRequest::RedeemVoucher(track, id, code, rto) => {
                rto.reply(registrar.redeem_voucher(track, id, &code).await)
            }
            RegistrationRequest::ConfirmPayment(track, id, rto) => {
                rto.reply(registrar.confirm_payment(track, id).await)
            }
            RegistrationRequest::AttachTag(track, id, png, rto) => {
                rto.reply(registrar.attach_tag(track, id, &png).await)
            }
            RegistrationRequest::GenerateVouchers(count, length, rto) => {
                rto.reply(registrar.generate_vouchers(count, length).await)
            }
            RegistrationRequest::RecordDonation(request, rto) => {
                rto.reply(registrar.record_donation(&request).await)
            }
            RegistrationRequest::SettleDonation(tx_ref, status, transaction_id, rto) => {
                rto.reply(
                    registrar
                        .settle_donation(&tx_ref, status, &transaction_id)
                        .await,
                )
            }
        }
    }

    log::info!("Registration actor stopped");
    Ok(())
}

/// Opens the store and storage described by the settings.
pub async fn open_registry(settings: &Settings) -> Result<(Arc<RegistryDb>, Arc<Storage>)> {
    let db = RegistryDb::init(&settings.database()).await?;
    let root = settings.storage_root();
    tokio::fs::create_dir_all(&root).await?;
    let storage = Storage::new(root, &settings.public_url());
    Ok((Arc::new(db), Arc::new(storage)))
}

/// Loads the tag font if one is configured.
pub fn load_tag_renderer(settings: &Settings) -> Result<Option<Arc<TagRenderer>>> {
    match settings.tag_font.as_deref() {
        Some(path) => Ok(Some(Arc::new(TagRenderer::load(
            Some(path),
            settings.event(),
        )?))),
        None => {
            log::warn!("No tag_font configured, credential tags are disabled");
            Ok(None)
        }
    }
}
