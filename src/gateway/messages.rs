//! Canned outbound texts.

use haven_core::model::{FollowUpStage, User};

/// Sent when reply generation fails, or in place of a reply that never made it.
pub(super) const CRISIS_RESOURCES: &str = "I hear you, and I'm really glad you reached out. \
You don't have to carry this alone.\n\n\
Please reach out right now:\n\
- Call or text 988 (Suicide & Crisis Lifeline, 24/7)\n\
- Text HOME to 741741 (Crisis Text Line)\n\
- Call 911 if you are in immediate danger\n\n\
I'm here with you.";

pub(super) const SIGNUP_URL: &str = "https://haven.care/signup";

fn first_name(user: &User) -> &str {
    user.first_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("there")
}

pub(super) fn signup_prompt() -> String {
    format!("Hi! To chat with Haven, please sign up first: {SIGNUP_URL}")
}

pub(super) fn followup_checkin(user: &User, stage: FollowUpStage) -> String {
    let name = first_name(user);
    match stage {
        FollowUpStage::T24h => format!(
            "Hi {name}, this is Haven checking in. Yesterday you shared something that \
             worried us. Were you able to connect with the 988 Lifeline or someone you trust? \
             Reply YES, NO, or UNSURE."
        ),
        FollowUpStage::T72h => format!(
            "Hi {name}, checking in again. How are you holding up? The 988 Lifeline is there \
             24/7 by call or text. Reply YES if you've connected with support, or NO / UNSURE."
        ),
    }
}

pub(super) fn followup_closing(user: &User) -> String {
    format!(
        "Thank you for letting me know, {}. I'm really glad you connected with support. \
         I'm here whenever you want to talk.",
        first_name(user)
    )
}

/// Resource reminder after a NO/UNSURE answer. `more_to_come` adds the
/// promise of another check-in.
pub(super) fn followup_reminder(user: &User, more_to_come: bool) -> String {
    let mut text = format!(
        "Thanks for telling me, {}. You don't have to go through this alone. \
         You can call or text 988 any time, day or night, or text HOME to 741741.",
        first_name(user)
    );
    if more_to_come {
        text.push_str(" I'll check in with you again soon.");
    }
    text
}

pub(super) fn wellness_checkin(user: &User) -> String {
    format!(
        "Hi {}, I've noticed your stress levels trending up over the past few check-ins. \
         Want to talk about what's changed and how I can help?",
        first_name(user)
    )
}

/// Subject and body for the emergency-contact email. Never quotes the
/// caregiver's own words.
pub(super) fn emergency_notification(user: &User) -> (String, String) {
    let name = user
        .first_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Someone you care about");
    let contact = user
        .emergency_contact
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("there");
    let subject = format!("Haven: please check in on {name}");
    let body = format!(
        "Hi {contact},\n\n\
         {name} listed you as an emergency contact with Haven, a support service for family \
         caregivers. Today they shared something that suggests they may be going through a \
         very hard time.\n\n\
         Please reach out to them when you can. If you believe they are in immediate danger, \
         call 911. The 988 Suicide & Crisis Lifeline (call or text 988) can also help you \
         support them.\n\n\
         Haven"
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_core::model::EmergencyContact;

    #[test]
    fn test_canned_resources_carry_hotlines() {
        assert!(CRISIS_RESOURCES.contains("988"));
        assert!(CRISIS_RESOURCES.contains("741741"));
        assert!(CRISIS_RESOURCES.contains("911"));
    }

    #[test]
    fn test_name_fallback() {
        let mut user = User::new("u1");
        assert!(followup_closing(&user).contains("there"));
        user.first_name = Some("Ana".into());
        assert!(followup_checkin(&user, FollowUpStage::T24h).starts_with("Hi Ana"));
        assert!(followup_checkin(&user, FollowUpStage::T72h).contains("YES"));
    }

    #[test]
    fn test_reminder_promises_another_checkin_only_before_last_stage() {
        let user = User::new("u1");
        assert!(followup_reminder(&user, true).contains("again soon"));
        assert!(!followup_reminder(&user, false).contains("again soon"));
    }

    #[test]
    fn test_emergency_notification_names() {
        let mut user = User::new("u1");
        user.first_name = Some("Ana".into());
        user.emergency_contact = Some(EmergencyContact {
            name: Some("Sam".into()),
            email: Some("sam@example.com".into()),
        });
        let (subject, body) = emergency_notification(&user);
        assert_eq!(subject, "Haven: please check in on Ana");
        assert!(body.starts_with("Hi Sam"));
        assert!(body.contains("911"));
    }
}
