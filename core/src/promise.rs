//! A completable future: a single-assignment handle that one side resolves
//! (with a success value, a failure, or a cancellation) and the other side
//! awaits. Used wherever the network layer hands a caller something that
//! will finish asynchronously — header sync completion, a broadcast's
//! acknowledgement — without making the caller poll a channel directly.

use std::fmt;
use tokio::sync::oneshot;

/// The error produced by a [`Promise`] that was rejected, cancelled, or
/// whose [`Completer`] was dropped before resolving it.
#[derive(Debug)]
pub enum PromiseError<E> {
    Failed(E),
    Cancelled,
    /// The completer was dropped without calling `succeed`, `fail`, or
    /// `cancel` — treated the same as an explicit cancellation.
    Abandoned,
}

impl<E: fmt::Display> fmt::Display for PromiseError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseError::Failed(e) => write!(f, "{e}"),
            PromiseError::Cancelled => write!(f, "cancelled"),
            PromiseError::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for PromiseError<E> {}

enum Outcome<T, E> {
    Success(T),
    Failure(E),
    Cancelled,
}

/// The awaiting half of a promise pair.
pub struct Promise<T, E> {
    receiver: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Promise<T, E> {
    /// Awaits resolution.
    pub async fn await_result(self) -> Result<T, PromiseError<E>> {
        match self.receiver.await {
            Ok(Outcome::Success(v)) => Ok(v),
            Ok(Outcome::Failure(e)) => Err(PromiseError::Failed(e)),
            Ok(Outcome::Cancelled) => Err(PromiseError::Cancelled),
            Err(_) => Err(PromiseError::Abandoned),
        }
    }
}

/// The resolving half of a promise pair.
pub struct Completer<T, E> {
    sender: Option<oneshot::Sender<Outcome<T, E>>>,
}

impl<T, E> Completer<T, E> {
    pub fn succeed(mut self, value: T) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Outcome::Success(value));
        }
    }

    pub fn fail(mut self, error: E) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Outcome::Failure(error));
        }
    }

    pub fn cancel(mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Outcome::Cancelled);
        }
    }
}

/// Creates a linked (`Completer`, `Promise`) pair.
pub fn promise<T, E>() -> (Completer<T, E>, Promise<T, E>) {
    let (tx, rx) = oneshot::channel();
    (Completer { sender: Some(tx) }, Promise { receiver: rx })
}
