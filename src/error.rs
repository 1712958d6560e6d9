use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Unreadable image: {0}")]
    InvalidImage(String),

    #[error("No face detected! Please upload a clear photo.")]
    NoFaceDetected,

    #[error("Photo processing was replaced by a newer selection")]
    Superseded,

    #[error("Registration not found")]
    NotFound,

    #[error("Invalid or already used voucher code.")]
    VoucherInvalid,

    #[error("Registration is already paid")]
    AlreadyPaid,

    #[error("Online payment is not available")]
    GatewayUnavailable,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Payment not verified: {0}")]
    PaymentNotVerified(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether the error comes from a collaborator failing rather than from the caller.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Storage(_)
                | Error::Image(_)
                | Error::Json(_)
                | Error::General(_)
                | Error::Config(_)
        )
    }

    /// Message safe to show to the person using the form.
    pub fn user_message(&self) -> String {
        if self.is_internal() {
            "Something went wrong, please try again.".to_string()
        } else {
            self.to_string()
        }
    }
}
