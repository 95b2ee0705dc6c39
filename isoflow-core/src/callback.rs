//! Caller callback contract: exactly one of `on_success` / `on_failure`.

use crate::error::{ErrorCode, ExecutionOutcome};
use tokio::sync::oneshot;

/// Receives the terminal outcome of one scheduled flow.
pub trait FlowCallback<T>: Send {
    fn on_success(self: Box<Self>, payload: T);

    fn on_failure(self: Box<Self>, code: ErrorCode);
}

/// Holds a caller callback until the single outcome is handed to it.
///
/// Delivery consumes the callback, so a second delivery is a no-op that
/// reports `false` instead of invoking the caller again.
pub struct CallbackSlot<T> {
    callback: Option<Box<dyn FlowCallback<T>>>,
}

impl<T> CallbackSlot<T> {
    pub fn new(callback: Box<dyn FlowCallback<T>>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn deliver(&mut self, outcome: ExecutionOutcome<T>) -> bool {
        let Some(callback) = self.callback.take() else {
            return false;
        };
        match outcome {
            ExecutionOutcome::Success(payload) => callback.on_success(payload),
            ExecutionOutcome::Failure(code) => callback.on_failure(code),
        }
        true
    }

    pub fn fail(&mut self, code: ErrorCode) -> bool {
        self.deliver(ExecutionOutcome::Failure(code))
    }

    pub fn is_delivered(&self) -> bool {
        self.callback.is_none()
    }
}

impl<T> std::fmt::Debug for CallbackSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("delivered", &self.is_delivered())
            .finish()
    }
}

/// Callback that forwards the outcome into a oneshot channel.
pub struct ChannelCallback<T> {
    sender: oneshot::Sender<ExecutionOutcome<T>>,
}

impl<T: Send> FlowCallback<T> for ChannelCallback<T> {
    fn on_success(self: Box<Self>, payload: T) {
        // receiver may have gone away; nothing left to tell
        let _ = self.sender.send(ExecutionOutcome::Success(payload));
    }

    fn on_failure(self: Box<Self>, code: ErrorCode) {
        let _ = self.sender.send(ExecutionOutcome::Failure(code));
    }
}

/// Build a callback for callers that want to await the outcome.
pub fn channel<T: Send + 'static>() -> (
    Box<dyn FlowCallback<T>>,
    oneshot::Receiver<ExecutionOutcome<T>>,
) {
    let (sender, receiver) = oneshot::channel();
    (Box::new(ChannelCallback { sender }), receiver)
}

/// Adapts a pair of closures into a [`FlowCallback`].
pub struct FnCallback<S, F> {
    success: S,
    failure: F,
}

impl<S, F> FnCallback<S, F> {
    pub fn new(success: S, failure: F) -> Self {
        Self { success, failure }
    }
}

impl<T, S, F> FlowCallback<T> for FnCallback<S, F>
where
    S: FnOnce(T) + Send,
    F: FnOnce(ErrorCode) + Send,
{
    fn on_success(self: Box<Self>, payload: T) {
        (self.success)(payload)
    }

    fn on_failure(self: Box<Self>, code: ErrorCode) {
        (self.failure)(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_slot_delivers_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let on_success = calls.clone();
        let on_failure = calls.clone();
        let mut slot = CallbackSlot::new(Box::new(FnCallback::new(
            move |_: u32| {
                on_success.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                on_failure.fetch_add(1, Ordering::SeqCst);
            },
        )));

        assert!(slot.deliver(ExecutionOutcome::Success(1)));
        assert!(!slot.fail(ErrorCode::Run));
        assert!(slot.is_delivered());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_callback() {
        let (callback, receiver) = channel::<String>();
        let mut slot = CallbackSlot::new(callback);
        slot.fail(ErrorCode::Timeout);

        let outcome = receiver.await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Failure(ErrorCode::Timeout));
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (callback, receiver) = channel::<u8>();
        drop(receiver);
        let mut slot = CallbackSlot::new(callback);
        assert!(slot.deliver(ExecutionOutcome::Success(3)));
    }
}
