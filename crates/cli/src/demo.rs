//! Demo collaborators for `chatloop simulate`.
//!
//! None of these call a model: the planner looks at the latest message for a
//! few keywords, the generator echoes, and the sender prints to stdout. They
//! are enough to watch the loop switch modes, gate, plan and act.

use std::sync::Arc;

use async_trait::async_trait;
use chatloop_core::action::{
    ActionContext, ActionExecutor, ActionOutcome, ActionSet, ActionSpec, PlannedAction,
    StaticActions,
};
use chatloop_core::cycle::ChatMode;
use chatloop_core::error::{ActionError, GenerationError, PlanError, SendError};
use chatloop_core::message::{ChatMessage, StreamInfo, Trigger};
use chatloop_core::planner::{PlanResult, Planner};
use chatloop_core::reply::{ReplyGenerator, ReplySegment, ReplySender, SendOptions};
use chatloop_core::store::MessageStore;
use chatloop_engine::Collaborators;
use chatloop_store::InMemoryMessageStore;

/// Name the simulated bot answers to.
pub const BOT_NAME: &str = "bot";

/// The action a keyword planner can pick besides replying.
const WAVE: &str = "wave";

/// Turn one stdin line into a message. `name: text` sets the sender.
pub fn parse_line(stream_id: &str, line: &str) -> Option<ChatMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (sender, text) = match line.split_once(':') {
        Some((name, text)) if !name.trim().is_empty() && !name.contains(' ') => {
            (name.trim(), text.trim())
        }
        _ => ("user", line),
    };

    let lowered = text.to_lowercase();
    let mut interest: f64 = 0.3;
    if text.contains('?') {
        interest += 0.4;
    }
    if lowered.contains(BOT_NAME) {
        interest += 0.3;
    }

    let mut message = ChatMessage::text(stream_id, sender, text).with_interest(interest.min(1.0));
    message.sender_name = Some(sender.to_string());
    if lowered.contains(&format!("@{BOT_NAME}")) {
        message = message.mentioned();
    }
    Some(message)
}

/// Picks an action from the latest message in the stream.
pub struct KeywordPlanner {
    store: InMemoryMessageStore,
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn plan(
        &self,
        stream: &StreamInfo,
        _mode: ChatMode,
        actions: &ActionSet,
    ) -> Result<PlanResult, PlanError> {
        let messages = self.store.messages(&stream.stream_id).await;
        let Some(latest) = messages.iter().rev().find(|m| !m.from_self) else {
            return Ok(PlanResult::new(PlannedAction::NoAction, "nothing to respond to"));
        };

        let text = latest.text.to_lowercase();
        let plan = if (text.starts_with("hi") || text.starts_with("hello")) && actions.contains(WAVE) {
            PlanResult::new(
                PlannedAction::Custom {
                    name: WAVE.into(),
                    payload: serde_json::json!({ "to": latest.sender_id }),
                },
                "greeting, wave back while replying",
            )
            .parallel()
        } else if (text.contains("bye") || text.contains("shh")) && actions.contains("no_reply") {
            PlanResult::new(PlannedAction::NoReply, "conversation winding down")
        } else {
            PlanResult::new(PlannedAction::Reply, "respond to the latest message")
        };
        Ok(plan.with_target(latest.clone()))
    }
}

/// Echoes the trigger back, one segment per sentence.
pub struct EchoGenerator;

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate(
        &self,
        _stream: &StreamInfo,
        trigger: &Trigger,
        _actions: &ActionSet,
    ) -> Result<Vec<ReplySegment>, GenerationError> {
        let text = match trigger {
            Trigger::Message(message) => {
                let name = message.sender_name.as_deref().unwrap_or(&message.sender_id);
                format!("{name}, you said: {}", message.text)
            }
            Trigger::Proactive { silence, .. } => format!(
                "It has been quiet for {}. Anyone around?",
                chatloop_engine::format_duration(*silence)
            ),
        };

        let segments: Vec<ReplySegment> = text
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ReplySegment::text)
            .collect();
        if segments.is_empty() {
            return Err(GenerationError::EmptyReply);
        }
        Ok(segments)
    }
}

/// Prints each segment and stores it as the bot's own message.
pub struct StdoutSender {
    store: InMemoryMessageStore,
}

#[async_trait]
impl ReplySender for StdoutSender {
    async fn send(
        &self,
        stream: &StreamInfo,
        segment: &ReplySegment,
        options: &SendOptions,
    ) -> Result<(), SendError> {
        let quote = options
            .quote
            .as_deref()
            .map(|id| format!(" (replying to {})", id.chars().take(8).collect::<String>()))
            .unwrap_or_default();
        match segment {
            ReplySegment::Text(text) => println!("[{BOT_NAME} → {}]{quote} {text}", stream.label()),
            ReplySegment::Emoji(name) => println!("[{BOT_NAME} → {}]{quote} :{name}:", stream.label()),
        }

        let mut own = ChatMessage::text(&stream.stream_id, BOT_NAME, segment.content());
        own.from_self = true;
        self.store.push(own).await;
        Ok(())
    }
}

/// Runs the demo's only plugin action.
pub struct WaveExecutor;

#[async_trait]
impl ActionExecutor for WaveExecutor {
    async fn execute(
        &self,
        action: &PlannedAction,
        context: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        match action {
            PlannedAction::Custom { name, payload } if name == WAVE => {
                let to = payload.get("to").and_then(|v| v.as_str()).unwrap_or("everyone");
                println!("[{BOT_NAME} → {}] *waves at {to}*", context.stream.label());
                Ok(ActionOutcome {
                    success: true,
                    reply_text: String::new(),
                    command: WAVE.into(),
                })
            }
            other => Err(ActionError::NotFound(other.name().to_string())),
        }
    }
}

/// Wire the demo collaborators around a shared in-memory store.
pub fn collaborators(store: InMemoryMessageStore) -> Collaborators {
    let actions = ActionSet::core().with(ActionSpec::new(WAVE, "Wave at whoever greeted you").parallel());
    let message_store: Arc<dyn MessageStore> = Arc::new(store.clone());

    Collaborators::new(
        message_store,
        Arc::new(StaticActions(actions)),
        Arc::new(KeywordPlanner {
            store: store.clone(),
        }),
        Arc::new(EchoGenerator),
        Arc::new(StdoutSender { store }),
        Arc::new(WaveExecutor),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_lines() {
        let msg = parse_line("demo", "alice: are you there @bot?").unwrap();
        assert_eq!(msg.sender_id, "alice");
        assert_eq!(msg.text, "are you there @bot?");
        assert!(msg.is_mentioned);
        assert!((msg.interest - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unnamed_lines_come_from_user() {
        let msg = parse_line("demo", "nice weather today").unwrap();
        assert_eq!(msg.sender_id, "user");
        assert!(!msg.is_mentioned);
        assert!((msg.interest - 0.3).abs() < 1e-9);
        assert!(parse_line("demo", "   ").is_none());
    }

    #[tokio::test]
    async fn echo_splits_sentences() {
        let trigger = Trigger::Message(parse_line("demo", "bob: Hi. How are you?").unwrap());
        let segments = EchoGenerator
            .generate(&StreamInfo::private("demo", "demo"), &trigger, &ActionSet::core())
            .await
            .unwrap();
        assert_eq!(
            segments,
            vec![
                ReplySegment::text("bob, you said: Hi."),
                ReplySegment::text("How are you?"),
            ]
        );
    }

    #[tokio::test]
    async fn planner_waves_at_greetings() {
        let store = InMemoryMessageStore::new();
        store.push(parse_line("demo", "carol: hello there").unwrap()).await;
        let planner = KeywordPlanner { store };
        let actions = ActionSet::core().with(ActionSpec::new(WAVE, "wave").parallel());

        let plan = planner
            .plan(&StreamInfo::group("demo", "1"), ChatMode::Engaged, &actions)
            .await
            .unwrap();
        assert_eq!(plan.action.name(), WAVE);
        assert!(plan.is_parallel);
        assert_eq!(plan.target.unwrap().sender_id, "carol");
    }

    #[tokio::test]
    async fn planner_goes_quiet_on_goodbye() {
        let store = InMemoryMessageStore::new();
        store.push(parse_line("demo", "dave: ok bye all").unwrap()).await;
        let planner = KeywordPlanner { store };

        let plan = planner
            .plan(&StreamInfo::group("demo", "1"), ChatMode::Engaged, &ActionSet::core())
            .await
            .unwrap();
        assert_eq!(plan.action, PlannedAction::NoReply);
    }
}
