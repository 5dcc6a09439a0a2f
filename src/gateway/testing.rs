//! In-process fakes shared by the gateway tests.

use super::Gateway;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use haven_core::{
    config::Config,
    context::Context,
    error::HavenError,
    message::{GeneratedReply, OutgoingMessage, ReplyMetadata},
    model::{Consent, EmergencyContact, User},
    traits::{Channel, Provider},
};
use haven_memory::Store;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct MockChannel {
    name: String,
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    /// When set, `send()` returns an error (simulates delivery failure).
    fail_send: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), HavenError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(HavenError::Channel("connection reset".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub(crate) struct MockProvider {
    reply: String,
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    /// Sleep before answering (exercises the caller's timeout).
    delay: Option<Duration>,
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    async fn complete(&self, context: &Context) -> Result<GeneratedReply, HavenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HavenError::Provider("model overloaded".to_string()));
        }
        Ok(GeneratedReply {
            text: self.reply.clone(),
            thread_id: context.thread_id.clone(),
            metadata: ReplyMetadata::default(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// A gateway wired to fakes plus handles to inspect and steer them.
pub(crate) struct Harness {
    pub gateway: Gateway,
    pub sms: Arc<Mutex<Vec<OutgoingMessage>>>,
    pub email: Arc<Mutex<Vec<OutgoingMessage>>>,
    pub sms_fail: Arc<AtomicBool>,
    pub email_fail: Arc<AtomicBool>,
    pub provider_fail: Arc<AtomicBool>,
    pub provider_calls: Arc<AtomicUsize>,
}

pub(crate) const GENERATED_REPLY: &str = "I'm so sorry you're carrying this. Please call or text 988.";

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default(), None).await
    }

    pub async fn with_config(config: Config, provider_delay: Option<Duration>) -> Self {
        let store = Store::open_in_memory(50).await.unwrap();

        let sms = Arc::new(Mutex::new(Vec::new()));
        let email = Arc::new(Mutex::new(Vec::new()));
        let sms_fail = Arc::new(AtomicBool::new(false));
        let email_fail = Arc::new(AtomicBool::new(false));
        let provider_fail = Arc::new(AtomicBool::new(false));
        let provider_calls = Arc::new(AtomicUsize::new(0));

        let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();
        channels.insert(
            "sms".to_string(),
            Arc::new(MockChannel {
                name: "sms".into(),
                sent: sms.clone(),
                fail_send: sms_fail.clone(),
            }),
        );
        channels.insert(
            "email".to_string(),
            Arc::new(MockChannel {
                name: "email".into(),
                sent: email.clone(),
                fail_send: email_fail.clone(),
            }),
        );

        let provider = Arc::new(MockProvider {
            reply: GENERATED_REPLY.to_string(),
            fail: provider_fail.clone(),
            calls: provider_calls.clone(),
            delay: provider_delay,
        });

        Self {
            gateway: Gateway::new(provider, channels, store, &config),
            sms,
            email,
            sms_fail,
            email_fail,
            provider_fail,
            provider_calls,
        }
    }

    pub fn store(&self) -> &Store {
        &self.gateway.memory
    }

    pub fn sms_bodies(&self) -> Vec<String> {
        self.sms.lock().unwrap().iter().map(|m| m.body.clone()).collect()
    }

    pub fn email_count(&self) -> usize {
        self.email.lock().unwrap().len()
    }
}

/// Fixed UTC instant.
pub(crate) fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// A subscribed caregiver in UTC with a phone and a consented emergency contact.
pub(crate) fn caregiver(id: &str) -> User {
    let mut user = User::new(id);
    user.first_name = Some("Ana".into());
    user.phone_number = Some("+15555550100".into());
    user.timezone = Some("UTC".into());
    user.consent = Consent {
        emergency: true,
        marketing: false,
    };
    user.emergency_contact = Some(EmergencyContact {
        name: Some("Sam".into()),
        email: Some("sam@example.com".into()),
    });
    user
}
