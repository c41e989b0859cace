use tracing::warn;

use crate::error::{Error, Result};

type SuccessFn<T> = Box<dyn FnOnce(&T) + Send>;
type FailFn = Box<dyn FnOnce(&Error) + Send>;

/// Optional subscribers notified when an operation settles.
///
/// Callbacks run on the same completion path that resolves the returned
/// future, so exactly one of them fires, right before the future resolves.
/// Without an `on_fail`, failures are logged at `warn` and otherwise
/// ignored; the future still carries the error.
///
/// ```
/// use webcache::Callbacks;
///
/// let callbacks = Callbacks::<u64>::new()
///     .on_success(|removed| println!("removed {removed} records"))
///     .on_fail(|error| eprintln!("remove failed: {error}"));
/// # drop(callbacks);
/// ```
pub struct Callbacks<T> {
    on_success: Option<SuccessFn<T>>,
    on_fail: Option<FailFn>,
}

impl<T> Callbacks<T> {
    /// No subscribers.
    pub fn new() -> Self {
        Self {
            on_success: None,
            on_fail: None,
        }
    }

    /// Called with the result when the operation succeeds.
    pub fn on_success(mut self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Called with the error when the operation fails.
    pub fn on_fail(mut self, f: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.on_fail = Some(Box::new(f));
        self
    }

    pub(crate) fn settle(self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(value) => {
                if let Some(on_success) = self.on_success {
                    on_success(value);
                }
            }
            Err(error) => match self.on_fail {
                Some(on_fail) => on_fail(error),
                None => warn!(%error, "storage operation failed"),
            },
        }
        result
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}
