//! Message-to-mail pipeline.
//!
//! [`MessageHandler`] turns one broker delivery into at most one mail:
//!
//! 1. look up the action handler for `(exchange, action)`
//! 2. run it to obtain the `MailData`
//! 3. stop if the action asked not to send
//! 4. resolve and load the template (cached)
//! 5. hand the mail to the sender
//! 6. on failure, publish the message again after the resend interval
//!
//! Each step may end the pipeline with a terminal event. Resends are new
//! broker messages with an incremented `resendCounter`, so they run the
//! whole pipeline again.

mod handler;
mod retry;

pub use handler::MessageHandler;
pub use retry::{ResendPolicy, RetryScheduler};
