//! Completion callbacks for asynchronous media work

use super::MediaHandle;
use crate::stream::MediaFrame;
use crate::utils::error::{MediaCode, MediaError};
use std::any::Any;
use std::sync::{Arc, Weak};

type Callback = Box<dyn FnOnce(&mut MediaClosure) -> MediaCode + Send>;

type Context = dyn Any + Send + Sync;

/// Result of one finished work item, detached from its closure
#[derive(Debug)]
pub struct ClosureOutcome {
    pub result: MediaCode,
    pub error: Option<String>,
    pub frame: Option<MediaFrame>,
}

/// Completion callback plus the data delivered to it
///
/// The callback is invoked synchronously on the media's worker thread, at
/// most once. A callback must not block on work queued behind its own item.
/// Consumers that want results on another thread use
/// [`MediaClosure::channel`] or [`MediaClosure::oneshot`].
pub struct MediaClosure {
    callback: Option<Callback>,
    result: MediaCode,
    error: Option<MediaError>,
    frame: Option<MediaFrame>,
    media: Option<MediaHandle>,
    context: Option<Arc<Context>>,
    weak_context: Option<Weak<Context>>,
}

impl MediaClosure {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(&mut MediaClosure) -> MediaCode + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::empty()
        }
    }

    /// Closure without a callback; the result is discarded
    pub fn empty() -> Self {
        Self {
            callback: None,
            result: MediaCode::NoCallback,
            error: None,
            frame: None,
            media: None,
            context: None,
            weak_context: None,
        }
    }

    /// Closure that sends its outcome over a bounded channel
    pub fn channel() -> (Self, crossbeam_channel::Receiver<ClosureOutcome>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let closure = Self::new(move |closure| {
            let result = closure.result();
            if tx.send(closure.take_outcome()).is_err() {
                log::debug!("Closure receiver dropped before completion");
            }
            result
        });
        (closure, rx)
    }

    /// Closure that completes a tokio oneshot, for async consumers
    pub fn oneshot() -> (Self, tokio::sync::oneshot::Receiver<ClosureOutcome>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let closure = Self::new(move |closure| {
            let result = closure.result();
            if tx.send(closure.take_outcome()).is_err() {
                log::debug!("Closure receiver dropped before completion");
            }
            result
        });
        (closure, rx)
    }

    /// Invoke the callback; a second call returns `NoCallback`
    pub fn call(&mut self) -> MediaCode {
        match self.callback.take() {
            Some(callback) => callback(self),
            None => MediaCode::NoCallback,
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn result(&self) -> MediaCode {
        self.result
    }

    pub fn set_result(&mut self, result: MediaCode) {
        self.result = result;
    }

    /// Error behind a failed result, if any
    pub fn error(&self) -> Option<&MediaError> {
        self.error.as_ref()
    }

    pub(crate) fn set_error(&mut self, error: MediaError) {
        self.result = error.code();
        self.error = Some(error);
    }

    pub fn frame(&self) -> Option<&MediaFrame> {
        self.frame.as_ref()
    }

    pub fn take_frame(&mut self) -> Option<MediaFrame> {
        self.frame.take()
    }

    pub fn set_frame(&mut self, frame: Option<MediaFrame>) {
        self.frame = frame;
    }

    /// Media that ran the work
    pub fn media(&self) -> Option<&MediaHandle> {
        self.media.as_ref()
    }

    pub(crate) fn set_media(&mut self, media: MediaHandle) {
        self.media = Some(media);
    }

    /// Shared context, if it is a `T`
    ///
    /// Owned contexts are checked first, then non-owning ones that are still alive.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let context = self
            .context
            .clone()
            .or_else(|| self.weak_context.as_ref().and_then(Weak::upgrade))?;
        context.downcast::<T>().ok()
    }

    /// Store a context the closure keeps alive
    pub fn set_context<T: Any + Send + Sync>(&mut self, context: Arc<T>) {
        self.context = Some(context);
    }

    /// Store a context without keeping it alive
    ///
    /// The creator owns the value; once it is dropped [`MediaClosure::context`]
    /// returns `None`.
    pub fn set_context_unsafe<T: Any + Send + Sync>(&mut self, context: Weak<T>) {
        let context: Weak<Context> = context;
        self.weak_context = Some(context);
    }

    fn take_outcome(&mut self) -> ClosureOutcome {
        ClosureOutcome {
            result: self.result,
            error: self.error.as_ref().map(ToString::to_string),
            frame: self.frame.take(),
        }
    }
}

impl std::fmt::Debug for MediaClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClosure")
            .field("result", &self.result)
            .field("has_callback", &self.callback.is_some())
            .field("has_frame", &self.frame.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_call_is_single_shot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut closure = MediaClosure::new(move |c| {
            counter.fetch_add(1, Ordering::SeqCst);
            c.result()
        });
        closure.set_result(MediaCode::Success);

        assert_eq!(closure.call(), MediaCode::Success);
        assert_eq!(closure.call(), MediaCode::NoCallback);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_closure() {
        let mut closure = MediaClosure::empty();
        assert_eq!(closure.result(), MediaCode::NoCallback);
        assert_eq!(closure.call(), MediaCode::NoCallback);
    }

    #[test]
    fn test_owned_and_weak_context() {
        let mut closure = MediaClosure::empty();
        closure.set_context(Arc::new(42u32));
        assert_eq!(*closure.context::<u32>().unwrap(), 42);
        assert!(closure.context::<String>().is_none());

        let owner = Arc::new(String::from("borrowed"));
        let mut closure = MediaClosure::empty();
        closure.set_context_unsafe(Arc::downgrade(&owner));
        assert_eq!(closure.context::<String>().unwrap().as_str(), "borrowed");
        drop(owner);
        assert!(closure.context::<String>().is_none());
    }

    #[test]
    fn test_channel_delivers_outcome() {
        let (mut closure, rx) = MediaClosure::channel();
        closure.set_error(MediaError::UnknownCodec("h264".to_string()));
        assert_eq!(closure.call(), MediaCode::UnknownCodec);

        let outcome = rx.recv().unwrap();
        assert_eq!(outcome.result, MediaCode::UnknownCodec);
        assert!(outcome.error.unwrap().contains("h264"));
        assert!(outcome.frame.is_none());
    }

    #[tokio::test]
    async fn test_oneshot_delivers_outcome() {
        let (mut closure, rx) = MediaClosure::oneshot();
        closure.set_result(MediaCode::Success);
        closure.call();
        assert_eq!(rx.await.unwrap().result, MediaCode::Success);
    }
}
