//! One-time passcodes bound to an identity, a delivery channel and an action.

mod engine;
pub mod handlers;
mod lock;

pub use engine::{generate_code, GeneratedOtp, OtpEngine, OTP_LENGTH};
pub use lock::KeyedLock;
