use std::path::Path;

use parley_llm::{GptVersion, Model, available_models};

use crate::cache::{CacheResult, KeyValueCache};

pub const PREFERENCES_FILE_NAME: &str = "preferences.json";
pub const GPT_VERSION: &str = "gptVersion";

/// Remembers which model family the chat header has selected.
pub struct ModelSelector {
    preferences: KeyValueCache,
    available_models: Vec<Model>,
}

impl ModelSelector {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            preferences: KeyValueCache::open(data_dir.join(PREFERENCES_FILE_NAME)),
            available_models: available_models(),
        }
    }

    pub fn current(&self) -> GptVersion {
        GptVersion::from_key(self.preferences.get(GPT_VERSION).as_deref())
    }

    pub fn current_model(&self) -> Model {
        self.current().model()
    }

    pub fn available_models(&self) -> &[Model] {
        &self.available_models
    }

    pub fn select(&self, version: GptVersion) -> CacheResult<()> {
        self.preferences.set(GPT_VERSION, version.key())?;
        tracing::info!(model_id = version.model_id(), "model selection changed");
        Ok(())
    }
}
