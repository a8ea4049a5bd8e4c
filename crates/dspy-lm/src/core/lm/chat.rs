use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Capitalized role name used in rendered transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

// ---------------------------------------------------------------------------
// Message: a single turn in a conversation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

// ---------------------------------------------------------------------------
// LmInput: what a caller hands to `LM::invoke`
// ---------------------------------------------------------------------------

/// Either a bare prompt or a full message list, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LmInput {
    /// Sent as a single user message.
    Prompt(String),
    Messages(Vec<Message>),
}

impl LmInput {
    pub fn prompt(&self) -> Option<&str> {
        match self {
            LmInput::Prompt(prompt) => Some(prompt),
            LmInput::Messages(_) => None,
        }
    }

    pub fn to_messages(&self) -> Vec<Message> {
        match self {
            LmInput::Prompt(prompt) => vec![Message::user(prompt.clone())],
            LmInput::Messages(messages) => messages.clone(),
        }
    }
}

impl From<&str> for LmInput {
    fn from(prompt: &str) -> Self {
        LmInput::Prompt(prompt.to_string())
    }
}

impl From<String> for LmInput {
    fn from(prompt: String) -> Self {
        LmInput::Prompt(prompt)
    }
}

impl From<Vec<Message>> for LmInput {
    fn from(messages: Vec<Message>) -> Self {
        LmInput::Messages(messages)
    }
}

impl From<Message> for LmInput {
    fn from(message: Message) -> Self {
        LmInput::Messages(vec![message])
    }
}
