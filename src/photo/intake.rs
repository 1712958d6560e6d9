//! Per form session photo slots.
//!
//! Each session holds at most one pipeline run. Selecting a new file aborts
//! the run in flight for that session instead of queueing behind it.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::error::{Error, Result};

use super::{detect::FaceDetector, process_photo, ProcessedPhoto};

enum SlotState {
    Processing,
    Ready(Arc<ProcessedPhoto>),
    Rejected(String),
}

struct Slot {
    generation: u64,
    state: SlotState,
    updated: Instant,
    abort: Option<AbortHandle>,
}

/// Progress of a session's photo, as shown next to the upload control
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum IntakeStatus {
    Processing { message: String },
    Ready { file_name: String },
    Rejected { message: String },
}

pub struct PhotoIntake {
    detector: Arc<dyn FaceDetector>,
    detect_timeout: Duration,
    ttl: Duration,
    slots: Arc<DashMap<String, Slot>>,
    generation: AtomicU64,
}

pub fn validate_session(session: &str) -> Result<()> {
    let ok = !session.is_empty()
        && session.len() <= 64
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if ok {
        Ok(())
    } else {
        Err(Error::Validation("Invalid photo session".to_string()))
    }
}

impl PhotoIntake {
    pub fn new(detector: Arc<dyn FaceDetector>, detect_timeout: Duration, ttl: Duration) -> Self {
        Self {
            detector,
            detect_timeout,
            ttl,
            slots: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Processes a newly selected file for a session and waits for the result.
    ///
    /// Returns [`Error::Superseded`] if another file was selected for the same
    /// session before this one finished.
    pub async fn submit(
        &self,
        session: &str,
        file_name: String,
        raw: Vec<u8>,
    ) -> Result<Arc<ProcessedPhoto>> {
        validate_session(session)?;
        self.sweep();

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.slots.insert(
            session.to_string(),
            Slot {
                generation,
                state: SlotState::Processing,
                updated: Instant::now(),
                abort: None,
            },
        );
        if let Some(abort) = previous.and_then(|p| p.abort) {
            log::debug!("Superseding photo in flight for session {}", session);
            abort.abort();
        }

        // The run settles its own slot, so the result is kept even if the
        // request that started it goes away.
        let detector = self.detector.clone();
        let detect_timeout = self.detect_timeout;
        let slots = self.slots.clone();
        let key = session.to_string();
        let handle = tokio::spawn(async move {
            let outcome = process_photo(detector.as_ref(), &file_name, raw, detect_timeout)
                .await
                .map(Arc::new);

            let current = match slots.get_mut(&key) {
                Some(mut slot) if slot.generation == generation => {
                    slot.state = match &outcome {
                        Ok(photo) => SlotState::Ready(photo.clone()),
                        Err(e) => SlotState::Rejected(e.user_message()),
                    };
                    slot.updated = Instant::now();
                    slot.abort = None;
                    true
                }
                _ => false,
            };
            (outcome, current)
        });

        if let Some(mut slot) = self.slots.get_mut(session) {
            if slot.generation == generation && matches!(slot.state, SlotState::Processing) {
                slot.abort = Some(handle.abort_handle());
            }
        }

        match handle.await {
            Ok((outcome, true)) => outcome,
            Ok((_, false)) => Err(Error::Superseded),
            Err(e) if e.is_cancelled() => Err(Error::Superseded),
            Err(e) => Err(Error::General(format!("Photo processing failed: {}", e))),
        }
    }

    pub fn status(&self, session: &str) -> Option<IntakeStatus> {
        self.slots.get(session).map(|slot| match &slot.state {
            SlotState::Processing => IntakeStatus::Processing {
                message: "Processing photo...".to_string(),
            },
            SlotState::Ready(photo) => IntakeStatus::Ready {
                file_name: photo.file_name.clone(),
            },
            SlotState::Rejected(message) => IntakeStatus::Rejected {
                message: message.clone(),
            },
        })
    }

    /// The processed photo of a session, if its latest run succeeded.
    pub fn ready(&self, session: &str) -> Result<Arc<ProcessedPhoto>> {
        match self.slots.get(session).as_deref().map(|s| &s.state) {
            Some(SlotState::Ready(photo)) => Ok(photo.clone()),
            Some(SlotState::Processing) => Err(Error::Validation(
                "Photo is still processing, please wait.".to_string(),
            )),
            Some(SlotState::Rejected(message)) => Err(Error::Validation(message.clone())),
            None => Err(Error::Validation("Please upload a photo.".to_string())),
        }
    }

    /// Forgets a session once its photo has been stored.
    pub fn release(&self, session: &str) {
        if let Some((_, slot)) = self.slots.remove(session) {
            if let Some(abort) = slot.abort {
                abort.abort();
            }
        }
    }

    /// Drops slots nobody has touched within the time to live.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.slots.retain(|_, slot| {
            let keep = slot.updated.elapsed() < ttl;
            if !keep {
                if let Some(abort) = slot.abort.take() {
                    abort.abort();
                }
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Sweeps expired slots for as long as the server runs.
pub async fn run_intake_sweeper(intake: Arc<PhotoIntake>, period: Duration) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        intake.sweep();
        log::debug!("{} photo sessions open", intake.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photo::{
        detect::testing::FixedDetector,
        tests::{sample_face, sample_png},
    };

    fn intake(detector: FixedDetector) -> Arc<PhotoIntake> {
        Arc::new(PhotoIntake::new(
            Arc::new(detector),
            Duration::from_secs(5),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn test_ready_after_submit() {
        let intake = intake(FixedDetector::new(Some(sample_face())));

        assert!(intake.ready("form-1").is_err());

        let photo = intake
            .submit("form-1", "jane.jpg".to_string(), sample_png(1600, 1200))
            .await
            .unwrap();

        assert_eq!(photo.file_name, "jane_facecrop.jpg");
        assert_eq!(intake.ready("form-1").unwrap().bytes, photo.bytes);
        assert_eq!(
            intake.status("form-1"),
            Some(IntakeStatus::Ready {
                file_name: "jane_facecrop.jpg".to_string()
            })
        );

        intake.release("form-1");
        assert!(intake.status("form-1").is_none());
    }

    #[tokio::test]
    async fn test_no_face_leaves_nothing_to_submit() {
        let intake = intake(FixedDetector::new(None));

        let res = intake
            .submit("form-1", "cat.jpg".to_string(), sample_png(200, 200))
            .await;

        assert!(matches!(res, Err(Error::NoFaceDetected)));
        assert!(matches!(intake.ready("form-1"), Err(Error::Validation(_))));
        assert!(matches!(
            intake.status("form-1"),
            Some(IntakeStatus::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_new_selection_supersedes() {
        let intake = intake(FixedDetector {
            face: Some(sample_face()),
            delay: Duration::from_millis(300),
        });

        let first = {
            let intake = intake.clone();
            tokio::spawn(async move {
                intake
                    .submit("form-1", "first.png".to_string(), sample_png(1600, 1200))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = intake
            .submit("form-1", "second.png".to_string(), sample_png(1600, 1200))
            .await
            .unwrap();

        assert!(matches!(first.await.unwrap(), Err(Error::Superseded)));
        assert_eq!(second.file_name, "second_facecrop.jpg");
        assert_eq!(intake.ready("form-1").unwrap().file_name, "second_facecrop.jpg");
    }

    #[tokio::test]
    async fn test_dropped_request_still_finishes() {
        let intake = intake(FixedDetector {
            face: Some(sample_face()),
            delay: Duration::from_millis(100),
        });

        let cut_short = tokio::time::timeout(
            Duration::from_millis(20),
            intake.submit("form-1", "jane.png".to_string(), sample_png(1600, 1200)),
        )
        .await;
        assert!(cut_short.is_err());
        assert!(matches!(
            intake.status("form-1"),
            Some(IntakeStatus::Processing { .. })
        ));

        for _ in 0..200 {
            if !matches!(intake.status("form-1"), Some(IntakeStatus::Processing { .. })) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert_eq!(
            intake.status("form-1"),
            Some(IntakeStatus::Ready {
                file_name: "jane_facecrop.jpg".to_string()
            })
        );
        assert_eq!(intake.ready("form-1").unwrap().file_name, "jane_facecrop.jpg");
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let intake = intake(FixedDetector::new(Some(sample_face())));

        intake
            .submit("a", "a.png".to_string(), sample_png(1600, 1200))
            .await
            .unwrap();
        intake
            .submit("b", "b.png".to_string(), sample_png(1600, 1200))
            .await
            .unwrap();

        assert_eq!(intake.len(), 2);
        assert_eq!(intake.ready("a").unwrap().file_name, "a_facecrop.jpg");
    }

    #[tokio::test]
    async fn test_expired_slots_are_swept() {
        let intake = PhotoIntake::new(
            Arc::new(FixedDetector::new(Some(sample_face()))),
            Duration::from_secs(5),
            Duration::ZERO,
        );

        let _ = intake
            .submit("a", "a.png".to_string(), sample_png(1600, 1200))
            .await;
        intake.sweep();

        assert_eq!(intake.len(), 0);
    }

    #[test]
    fn test_session_names() {
        assert!(validate_session("3f2a-11_b").is_ok());
        assert!(validate_session("").is_err());
        assert!(validate_session("../x").is_err());
        assert!(validate_session(&"a".repeat(65)).is_err());
    }
}
