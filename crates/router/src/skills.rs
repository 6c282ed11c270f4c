//! Local skills
//!
//! A skill is a value with a name, a `can_handle` predicate, and a handler.
//! Enabled skills are listed in configuration and consulted in registration
//! order; the first skill claiming an utterance wins. No runtime scanning.

use async_trait::async_trait;

/// One local skill
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;

    /// Does this skill claim the utterance?
    fn can_handle(&self, text: &str, language: &str) -> bool;

    /// Produce the reply text. Async skills return their acknowledgement
    /// string immediately and finish their action in the background.
    async fn handle(&self, text: &str) -> String;
}

/// Build the skill registry from the configured name list, preserving order.
pub fn build_skills(enabled: &[String]) -> Vec<Box<dyn Skill>> {
    let mut skills: Vec<Box<dyn Skill>> = Vec::new();
    for name in enabled {
        match name.as_str() {
            "time" => skills.push(Box::new(TimeSkill)),
            "greeting" => skills.push(Box::new(GreetingSkill)),
            other => tracing::warn!(skill = other, "Unknown skill in ENABLED_SKILLS, skipping"),
        }
    }
    tracing::info!(count = skills.len(), "Skill registry built");
    skills
}

/// Answers clock questions with the local time
pub struct TimeSkill;

const TIME_TRIGGERS_DE: [&str; 3] = ["wie spät", "wie spaet", "uhrzeit"];
const TIME_TRIGGERS_EN: [&str; 2] = ["what time", "current time"];

#[async_trait]
impl Skill for TimeSkill {
    fn name(&self) -> &'static str {
        "time"
    }

    fn can_handle(&self, text: &str, language: &str) -> bool {
        let lower = text.to_lowercase();
        let triggers: &[&str] = if language.starts_with("en") {
            &TIME_TRIGGERS_EN
        } else {
            &TIME_TRIGGERS_DE
        };
        triggers.iter().any(|t| lower.contains(t))
    }

    async fn handle(&self, _text: &str) -> String {
        let now = chrono::Local::now();
        format!("Es ist {} Uhr.", now.format("%H:%M"))
    }
}

/// Replies to greetings
pub struct GreetingSkill;

const GREETING_TRIGGERS: [&str; 5] = ["hallo", "guten morgen", "guten tag", "guten abend", "hi"];

#[async_trait]
impl Skill for GreetingSkill {
    fn name(&self) -> &'static str {
        "greeting"
    }

    fn can_handle(&self, text: &str, _language: &str) -> bool {
        let lower = text.to_lowercase();
        GREETING_TRIGGERS
            .iter()
            .any(|t| lower.starts_with(t) || lower == *t)
    }

    async fn handle(&self, _text: &str) -> String {
        "Hallo! Wie kann ich dir helfen?".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_time_skill_matches_german_clock_question() {
        let skill = TimeSkill;
        assert!(skill.can_handle("Wie spät ist es?", "de"));
        assert!(skill.can_handle("sag mir die Uhrzeit", "de"));
        assert!(!skill.can_handle("Wie ist das Wetter?", "de"));

        let reply = skill.handle("Wie spät ist es?").await;
        // "Es ist HH:MM Uhr."
        assert!(reply.starts_with("Es ist "));
        assert!(reply.ends_with(" Uhr."));
        let digits: Vec<&str> = reply
            .trim_start_matches("Es ist ")
            .trim_end_matches(" Uhr.")
            .split(':')
            .collect();
        assert_eq!(digits.len(), 2);
        assert_eq!(digits[0].len(), 2);
        assert_eq!(digits[1].len(), 2);
    }

    #[test]
    fn test_greeting_skill_matches_prefix() {
        let skill = GreetingSkill;
        assert!(skill.can_handle("Hallo Assistent", "de"));
        assert!(skill.can_handle("guten Morgen!", "de"));
        assert!(!skill.can_handle("sag hallo zu allen", "de"));
    }

    #[test]
    fn test_registry_preserves_order_and_skips_unknown() {
        let skills = build_skills(&[
            "greeting".to_string(),
            "weather".to_string(),
            "time".to_string(),
        ]);
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name(), "greeting");
        assert_eq!(skills[1].name(), "time");
    }
}
