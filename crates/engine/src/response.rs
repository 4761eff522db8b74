use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::envelope::ResponseDescriptor;
use crate::error::{BridgeError, BridgeResult};

/// One-shot response slot for a task.
///
/// Accepts exactly one descriptor. Once it has emitted, or once the host has
/// closed it, every later `emit` fails with `ProtocolViolation`.
pub struct Responder {
    sender: Mutex<Option<oneshot::Sender<ResponseDescriptor>>>,
    emitted: AtomicBool,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<ResponseDescriptor>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            sender: Mutex::new(Some(tx)),
            emitted: AtomicBool::new(false),
        };
        (responder, rx)
    }

    /// Hand a response to the host. An invalid descriptor is rejected
    /// without consuming the slot.
    pub fn emit(&self, response: ResponseDescriptor) -> BridgeResult<()> {
        response.validate()?;
        // Held across the send so a concurrent `close` sees either an open
        // slot or a delivered response, never a response in flight.
        let mut slot = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = slot.take() else {
            let message = if self.has_emitted() {
                "a response was already sent for this request"
            } else {
                "the host closed this request; no response is accepted"
            };
            return Err(BridgeError::ProtocolViolation(message.to_string()));
        };

        self.emitted.store(true, Ordering::Release);
        if sender.send(response).is_err() {
            tracing::debug!("response receiver dropped before emission");
        }
        Ok(())
    }

    /// Stop accepting responses. Returns `true` if the slot was still open.
    pub fn close(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn has_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn accepts_exactly_one_response() {
        let (responder, mut rx) = Responder::channel();
        responder.emit(ResponseDescriptor::new(200, "first")).unwrap();

        let err = responder
            .emit(ResponseDescriptor::new(200, "second"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert!(err.to_string().contains("already sent"));
        assert_eq!(rx.try_recv().unwrap().body, "first");
    }

    #[test]
    fn invalid_status_does_not_consume_the_slot() {
        let (responder, mut rx) = Responder::channel();
        let err = responder.emit(ResponseDescriptor::new(1000, "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!responder.has_emitted());

        responder.emit(ResponseDescriptor::new(500, "fallback")).unwrap();
        assert_eq!(rx.try_recv().unwrap().status, 500);
    }

    #[test]
    fn closed_responder_rejects_late_emission() {
        let (responder, mut rx) = Responder::channel();
        assert!(responder.close());
        assert!(!responder.close());

        let err = responder.emit(ResponseDescriptor::new(200, "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert!(err.to_string().contains("closed"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emission_succeeds_when_host_stopped_listening() {
        let (responder, rx) = Responder::channel();
        drop(rx);
        responder.emit(ResponseDescriptor::new(200, "")).unwrap();
        assert!(responder.has_emitted());
    }
}
