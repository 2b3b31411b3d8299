#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The model family picked in the chat header, stored under the `gptVersion` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GptVersion {
    #[default]
    Gpt35,
    Gpt4,
}

impl GptVersion {
    pub const ALL: [GptVersion; 2] = [GptVersion::Gpt35, GptVersion::Gpt4];

    /// Parses a stored preference; only `"4"` selects GPT-4.
    pub fn from_key(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("4") => Self::Gpt4,
            _ => Self::Gpt35,
        }
    }

    pub const fn key(&self) -> &'static str {
        match self {
            Self::Gpt35 => "3.5",
            Self::Gpt4 => "4",
        }
    }

    pub const fn model_id(&self) -> &'static str {
        match self {
            Self::Gpt35 => "gpt-3.5-turbo",
            Self::Gpt4 => "gpt-4",
        }
    }

    pub fn model(&self) -> Model {
        match self {
            Self::Gpt35 => Model::new(self.model_id(), "GPT-3.5").with_description("Fast default"),
            Self::Gpt4 => Model::new(self.model_id(), "GPT-4").with_description("Higher quality"),
        }
    }
}

pub fn available_models() -> Vec<Model> {
    GptVersion::ALL.iter().map(GptVersion::model).collect()
}
