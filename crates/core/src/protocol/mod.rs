//! SmartMark protocol contract
//!
//! Responsibilities:
//! - Marker literals shared by the classifier, scanner and writer
//! - Turn / Transcript data model
//! - Rendering a transcript back into marker-form text

pub mod classifier;

pub use classifier::{ClassifiedLine, classify};

use serde::{Deserialize, Serialize};

use crate::config::MarkerConfig;
use crate::llm::provider::{Message, MessageRole};

/// Token that marks a user turn (inline prefix or whole-line block boundary)
pub const USER_TOKEN: &str = "===";

/// Token that marks an assistant turn (inline prefix or whole-line block boundary)
pub const ASSISTANT_TOKEN: &str = "= =";

/// Default hard terminator token
pub const DEFAULT_TERMINATOR: &str = "=-=";

/// Minimum dash count that is always accepted as a block separator
pub const MIN_SEPARATOR_LEN: usize = 5;

/// Default tag written before the boundary of an interrupted block
pub const DEFAULT_INTERRUPTION_TAG: &str = "[interrupted]";

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Marker token used for this role
    pub fn token(self) -> &'static str {
        match self {
            Role::User => USER_TOKEN,
            Role::Assistant => ASSISTANT_TOKEN,
        }
    }
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Accumulation mode of a backward scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    None,
    CollectingUser,
    CollectingAssistant,
}

impl ScanMode {
    /// Role a flushed buffer is attributed to, if any
    pub fn role(self) -> Option<Role> {
        match self {
            ScanMode::None => None,
            ScanMode::CollectingUser => Some(Role::User),
            ScanMode::CollectingAssistant => Some(Role::Assistant),
        }
    }

    pub fn collecting(role: Role) -> Self {
        match role {
            Role::User => ScanMode::CollectingUser,
            Role::Assistant => ScanMode::CollectingAssistant,
        }
    }
}

/// One attributed unit of dialogue extracted from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Build a turn from raw content. Returns `None` when the trimmed
    /// content is empty, since a transcript never carries empty turns.
    pub fn new(role: Role, content: &str) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            role,
            content: content.to_string(),
        })
    }

    pub fn user(content: &str) -> Option<Self> {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: &str) -> Option<Self> {
        Self::new(Role::Assistant, content)
    }

    /// Convert into a provider chat message
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role.into(),
            content: self.content.clone(),
            name: None,
        }
    }
}

/// Ordered turns, oldest first
pub type Transcript = Vec<Turn>;

/// Build the provider message list for a transcript, system prompt first
pub fn to_messages(system_prompt: &str, transcript: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    if !system_prompt.trim().is_empty() {
        messages.push(Message {
            role: MessageRole::System,
            content: system_prompt.to_string(),
            name: None,
        });
    }
    messages.extend(transcript.iter().map(Turn::to_message));
    messages
}

/// Literal marker forms, derived from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    pub terminator: String,
    pub separator_repeat: usize,
    pub interruption_tag: String,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR.to_string(),
            separator_repeat: MIN_SEPARATOR_LEN,
            interruption_tag: DEFAULT_INTERRUPTION_TAG.to_string(),
        }
    }
}

impl From<&MarkerConfig> for MarkerSet {
    fn from(config: &MarkerConfig) -> Self {
        Self {
            terminator: config.terminator.trim().to_string(),
            separator_repeat: config.separator_repeat,
            interruption_tag: config.interruption_tag.clone(),
        }
    }
}

impl MarkerSet {
    /// The separator line the writer emits
    pub fn separator(&self) -> String {
        "-".repeat(self.separator_repeat)
    }

    /// Whether a trimmed line is a block separator
    pub fn is_separator(&self, trimmed: &str) -> bool {
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b == b'-') {
            return false;
        }
        trimmed.len() >= MIN_SEPARATOR_LEN || trimmed.len() == self.separator_repeat
    }
}

/// Render a transcript as marker-form text.
///
/// User turns prefer the inline `=== text` form and assistant turns a
/// separator-opened block closed by `= =`. A turn falls back to the other
/// form when its preferred rendering would classify differently on rescan,
/// e.g. user text ending in `===` or an assistant line that reads as a
/// terminator.
pub fn render_transcript(turns: &[Turn], markers: &MarkerSet) -> String {
    turns
        .iter()
        .flat_map(|turn| render_turn(turn, markers))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_turn(turn: &Turn, markers: &MarkerSet) -> Vec<String> {
    let inline = (!turn.content.contains('\n'))
        .then(|| format!("{} {}", turn.role.token(), turn.content))
        .filter(|line| {
            markers.classify(line) == ClassifiedLine::inline(turn.role, &turn.content)
        });
    let block_is_plain = turn
        .content
        .lines()
        .all(|line| !markers.classify(line).is_marker());

    match inline {
        Some(line) if turn.role == Role::User || !block_is_plain => vec![line],
        _ => render_block(turn, markers),
    }
}

fn render_block(turn: &Turn, markers: &MarkerSet) -> Vec<String> {
    let (open, close) = match turn.role {
        Role::User => (USER_TOKEN.to_string(), USER_TOKEN),
        Role::Assistant => (markers.separator(), ASSISTANT_TOKEN),
    };
    let mut lines = vec![open];
    lines.extend(turn.content.lines().map(str::to_string));
    lines.push(close.to_string());
    lines
}
