//! Failures that can end a call other than the supplier's own error.
//!
//! - [`PanicError`] — a panic intercepted while running the supplier, with the
//!   stack captured where it was raised.
//! - [`Exit`] — the unwind payload of a forced exit started with [`exit`].
//! - [`ConfigError`] — rejected [`Options`](crate::Options).

use core::any::Any;
use std::panic;
use std::sync::Arc;

use thiserror::Error;

/// A panic recovered from a supplier, together with the stack at the point
/// it was raised.
///
/// This is the payload every duplicate caller of [`Group::work`] panics with
/// when the shared call panicked, so all of them observe the same fault.
///
/// [`Group::work`]: crate::Group::work
#[derive(Clone, Debug, Error)]
#[error("{message}\n\n{stack}")]
pub struct PanicError {
    message: String,
    stack: Arc<str>,
}

impl PanicError {
    pub(crate) fn new(payload: Box<dyn Any + Send>, stack: &str) -> PanicError {
        PanicError {
            message: payload_message(payload.as_ref()),
            stack: Arc::from(stack),
        }
    }

    /// The value the supplier panicked with, rendered as text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The captured stack text.
    pub fn stack(&self) -> &str {
        &self.stack
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<PanicError>() {
        e.to_string()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

/// Unwind payload of a forced exit.
///
/// A supplier that calls [`exit`] tears its thread down without reporting a
/// fault. Duplicate callers of [`Group::work`](crate::Group::work) exit the
/// same way; [`Group::work_chan`](crate::Group::work_chan) waiters receive
/// nothing and observe a closed channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Exit;

/// Stops the current thread by unwinding with [`Exit`].
///
/// No panic hook runs, so nothing is reported. Destructors on the way out run
/// as for any unwind.
pub fn exit() -> ! {
    panic::resume_unwind(Box::new(Exit))
}

/// Errors produced when validating [`Options`](crate::Options).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Background threads need a stack.
    #[error("stack_size must be greater than 0")]
    ZeroStackSize,

    /// Thread names are passed to the OS and cannot hold a NUL byte.
    #[error("thread_name {name:?} contains a NUL byte")]
    InvalidThreadName {
        /// The rejected name.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Exit, PanicError};
    use std::panic;

    const STACK: &str = "   0: app::load_config\n             at ./src/config.rs:30:21\n";

    #[test]
    fn test_panic_error_display() {
        let err = PanicError::new(Box::new("boom"), STACK);
        assert_eq!(err.message(), "boom");
        assert_eq!(err.stack(), STACK);
        assert_eq!(err.to_string(), format!("boom\n\n{STACK}"));
    }

    #[test]
    fn test_panic_error_payloads() {
        let err = PanicError::new(Box::new(String::from("owned")), STACK);
        assert_eq!(err.message(), "owned");

        let err = PanicError::new(Box::new(7u32), STACK);
        assert_eq!(err.message(), "Box<dyn Any>");

        let inner = PanicError::new(Box::new("inner"), STACK);
        let err = PanicError::new(Box::new(inner.clone()), STACK);
        assert_eq!(err.message(), inner.to_string());
    }

    #[test]
    fn test_exit_unwinds_with_marker() {
        let payload = panic::catch_unwind(|| super::exit()).unwrap_err();
        assert_eq!(payload.downcast_ref::<Exit>(), Some(&Exit));
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::ZeroStackSize.to_string(),
            "stack_size must be greater than 0"
        );
        let err = ConfigError::InvalidThreadName { name: "a\0b".into() };
        assert!(err.to_string().starts_with("thread_name"));
    }
}
