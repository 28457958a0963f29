//! Cooperative cancellation shared by executions, triggers and the replay loop.

mod token;

pub use token::CancellationToken;
