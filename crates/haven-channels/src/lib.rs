//! # haven-channels
//!
//! Outbound messaging channels: Twilio SMS for caregivers, Resend email for
//! emergency contacts.

pub mod resend;
pub mod twilio;

/// Channel name used for SMS delivery.
pub const SMS: &str = "sms";
/// Channel name used for email delivery.
pub const EMAIL: &str = "email";
