//! Boundary to the version-control command runner
//!
//! The engine never shells out directly. Every query goes through a
//! [`CommandRunner`], wrapped by a single [`RetryPolicy`].

/// Retry policy applied around runner calls
pub mod retry;
/// `git` subprocess runner
pub mod runner;

pub use retry::RetryPolicy;
pub use runner::GitCommandRunner;

use crate::error::FetchError;
use async_trait::async_trait;
use std::time::Duration;

/// Executes one VCS query and returns its stdout
///
/// Implementations must report a missing repository, an elapsed timeout and a
/// nonzero exit as distinct [`FetchError`] variants.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<String, FetchError>;
}

/// Render an argument list the way it appears in error messages and logs
pub fn display_command(args: &[String]) -> String {
    let mut command = String::from("git");
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}
