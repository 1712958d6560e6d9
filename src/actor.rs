use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use crate::error::{Error, Result};

/// Sending half of an actor's mailbox
pub struct ActorRef<T> {
    tx: UnboundedSender<T>,
}

impl<T> Clone for ActorRef<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ActorRef<T> {
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: T) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::General("Actor is no longer running".to_string()))
    }
}

/// Reply-to-origin: the one-shot channel an actor answers a request on
pub struct Rto<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Rto<T> {
    pub fn new() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn reply(self, value: Result<T>) {
        if self.tx.send(value).is_err() {
            log::debug!("Requester went away before the reply was sent");
        }
    }
}

/// Sends a request to an actor and waits for its reply.
///
/// `send_message!(actor, RequestEnum, Variant, args...)` builds
/// `RequestEnum::Variant(args..., rto)`.
#[macro_export]
macro_rules! send_message {
    ($actor:expr, $enum:ident, $variant:ident $(, $arg:expr)* $(,)?) => {{
        let (rto, rx) = $crate::actor::Rto::new();
        match $actor.send($enum::$variant($($arg,)* rto)) {
            Ok(_) => match rx.await {
                Ok(res) => res,
                Err(_) => Err($crate::error::Error::General(
                    "Actor dropped the request".to_string(),
                )),
            },
            Err(e) => Err(e),
        }
    }};
}
