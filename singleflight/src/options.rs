use std::io;
use std::thread::{self, JoinHandle};

use crate::error::ConfigError;

/// Options represents the options for a [`Group`](crate::Group).
///
/// They only shape the background threads started by
/// [`Group::work_chan`](crate::Group::work_chan); duplicate suppression
/// itself behaves the same under every setting.
#[derive(Clone, Debug)]
pub struct Options {
    /// ThreadName is the name given to background threads. default is "singleflight".
    pub thread_name: String,
    /// StackSize is the stack size in bytes of background threads. default is None,
    /// which keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            thread_name: String::from("singleflight"),
            stack_size: None,
        }
    }
}

impl Options {
    /// Checks the options before a group is built from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name.contains('\0') {
            return Err(ConfigError::InvalidThreadName {
                name: self.thread_name.clone(),
            });
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::ZeroStackSize);
        }
        Ok(())
    }

    /// Starts `job` on a thread of its own.
    pub(crate) fn spawn<F>(&self, job: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = thread::Builder::new().name(self.thread_name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(job)
    }
}
