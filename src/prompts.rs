//! Prompt assembly for the generative backend.

use crate::config::OrgProfile;
use crate::error::Result;

use minijinja::{Environment, context};

/// Persona prompt. The `focus` block is chosen per message kind.
const REPLY_TEMPLATE: &str = r#"You are {{ bot_name }}, the support assistant for {{ org_name }}.
{{ org_description }}

{{ focus }}

Guidelines:
- Answer clearly and concisely, with a warm and professional tone.
- Structure longer answers as short bullet points.
- If you lack the information to answer, suggest contacting {{ support_email }}.
- Never reveal internal errors or system details.
{% if history %}
Previous conversation:
{{ history }}
{% endif %}
Current user message: {{ message }}"#;

const GREETING_FOCUS: &str = "The user is greeting you. Respond warmly, introduce yourself in one \
sentence, and offer your help.";

const TECHNICAL_FOCUS: &str = "The user has a technical question. Give clear step-by-step guidance, \
prefer concrete instructions over theory, and flag anything that should be escalated.";

const GENERAL_FOCUS: &str = "Answer helpfully and stay relevant to the user's request.";

/// Coarse classification of an inbound message, used to pick the prompt focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Greeting,
    Technical,
    General,
}

const GREETINGS: [&str; 6] = ["hola", "hello", "hi", "hey", "good morning", "good afternoon"];

const TECHNICAL_KEYWORDS: [&str; 12] = [
    "error",
    "problem",
    "install",
    "configure",
    "configuration",
    "connection",
    "server",
    "database",
    "api",
    "webhook",
    "deploy",
    "access",
];

impl MessageKind {
    /// Classify a message with keyword heuristics. Matching is on whole
    /// words, so "refreshing" does not read as a greeting.
    pub fn detect(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();

        let greeted = GREETINGS.iter().any(|greeting| match greeting.split_once(' ') {
            Some((first, second)) => words.windows(2).any(|pair| pair == [first, second]),
            None => words.contains(greeting),
        });
        if greeted {
            return MessageKind::Greeting;
        }

        if TECHNICAL_KEYWORDS
            .iter()
            .any(|keyword| words.contains(keyword))
        {
            return MessageKind::Technical;
        }
        MessageKind::General
    }

    fn focus(self) -> &'static str {
        match self {
            MessageKind::Greeting => GREETING_FOCUS,
            MessageKind::Technical => TECHNICAL_FOCUS,
            MessageKind::General => GENERAL_FOCUS,
        }
    }
}

/// Renders prompts and fixed notices from the organization profile.
pub struct PromptBuilder {
    env: Environment<'static>,
    profile: OrgProfile,
}

impl PromptBuilder {
    pub fn new(profile: OrgProfile) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("reply", REPLY_TEMPLATE)?;
        Ok(Self { env, profile })
    }

    /// Assemble the full prompt for one inbound message.
    pub fn build_reply(&self, history: &str, message: &str) -> Result<String> {
        let kind = MessageKind::detect(message);
        let template = self.env.get_template("reply")?;
        let rendered = template.render(context! {
            bot_name => self.profile.bot_name,
            org_name => self.profile.org_name,
            org_description => self.profile.org_description,
            support_email => self.profile.support_email,
            focus => kind.focus(),
            history => history,
            message => message,
        })?;
        Ok(rendered)
    }

    /// Fixed notice sent while the service is in maintenance mode.
    pub fn maintenance_notice(&self) -> String {
        format!(
            "{} is temporarily unavailable for maintenance. Your message was received \
             but cannot be answered right now. For urgent issues contact {}.",
            self.profile.bot_name, self.profile.support_email
        )
    }

    /// One-time notice sent when a dependency first starts failing.
    pub fn degraded_notice(&self) -> String {
        format!(
            "{} is having temporary trouble reaching its backend. I'll keep trying — \
             if this persists, contact {}.",
            self.profile.bot_name, self.profile.support_email
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(OrgProfile::default()).expect("template should compile")
    }

    #[test]
    fn detects_message_kinds() {
        assert_eq!(MessageKind::detect("Hola, buenos días"), MessageKind::Greeting);
        assert_eq!(
            MessageKind::detect("I get an error refreshing the report"),
            MessageKind::Technical
        );
        assert_eq!(
            MessageKind::detect("when is the quarterly review?"),
            MessageKind::General
        );
    }

    #[test]
    fn reply_prompt_embeds_history_and_message() {
        let history = indoc! {"
            user: hi
            assistant: hey
            user: my dashboard is blank"}
        .to_string();

        let prompt = builder()
            .build_reply(&history, "how do I reset my password?")
            .expect("prompt should render");

        assert!(prompt.contains(&format!("Previous conversation:\n{history}")));
        assert!(prompt.contains("Current user message: how do I reset my password?"));
    }

    #[test]
    fn reply_prompt_omits_empty_history_block() {
        let prompt = builder()
            .build_reply("", "greetings there")
            .expect("prompt should render");

        assert!(!prompt.contains("Previous conversation:"));
    }

    #[test]
    fn notices_name_the_support_contact() {
        assert!(builder().maintenance_notice().contains("support@example.com"));
        assert!(builder().degraded_notice().contains("support@example.com"));
    }
}
