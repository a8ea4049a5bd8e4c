use serde::{Deserialize, Serialize};

use super::{LmUsage, Role};

/// The assistant turn inside a chat choice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

/// One candidate completion. Chat endpoints return a message, text endpoints a bare string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Choice {
    Chat { message: ChoiceMessage },
    Text { text: String },
}

impl Choice {
    pub fn chat(content: impl Into<String>) -> Self {
        Choice::Chat {
            message: ChoiceMessage {
                role: Some(Role::Assistant),
                content: Some(content.into()),
            },
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Choice::Text { text: text.into() }
    }

    /// The literal completion text; a chat choice without content yields `""`.
    pub fn output(&self) -> &str {
        match self {
            Choice::Chat { message } => message.content.as_deref().unwrap_or_default(),
            Choice::Text { text } => text,
        }
    }
}

/// Provider metadata that is not part of the completion itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HiddenParams {
    /// Cost of the call in USD, when the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_cost: Option<f64>,
}

/// What a [`CompletionBackend`](crate::CompletionBackend) returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: LmUsage,
    #[serde(default, rename = "_hidden_params")]
    pub hidden_params: HiddenParams,
}

impl Response {
    pub fn new(choices: Vec<Choice>, usage: LmUsage) -> Self {
        Response {
            model: None,
            choices,
            usage,
            hidden_params: HiddenParams::default(),
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.hidden_params.response_cost = Some(cost);
        self
    }

    /// Output texts in choice order.
    pub fn outputs(&self) -> Vec<String> {
        self.choices
            .iter()
            .map(|choice| choice.output().to_string())
            .collect()
    }

    pub fn cost(&self) -> Option<f64> {
        self.hidden_params.response_cost
    }
}
