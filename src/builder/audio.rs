//! Audio builder: TTS synthesis and STT transcription.

use serde_json::Value;

use crate::builder::check_model;
use crate::client::Client;
use crate::error::{Result, WormholeError};
use crate::middleware::with_provider_label;
use crate::registry::Capability;
use crate::request::{AudioKind, AudioRequest, AudioResponse};

/// Fluent construction of an audio request. Exactly one of [`tts`] or
/// [`stt`] selects the direction.
///
/// [`tts`]: AudioBuilder::tts
/// [`stt`]: AudioBuilder::stt
///
/// # Examples
///
/// ```no_run
/// # async fn demo(client: wormhole::Client) -> wormhole::Result<()> {
/// let speech = client
///     .audio()
///     .model("tts-1")
///     .tts("Hello from the other side")
///     .voice("nova")
///     .format("mp3")
///     .generate()
///     .await?;
/// let bytes = speech.audio.unwrap();
/// # Ok(())
/// # }
/// ```
pub struct AudioBuilder {
    client: Client,
    model: String,
    kind: Option<AudioKind>,
    voice: Option<String>,
    language: Option<String>,
    format: Option<String>,
    options: serde_json::Map<String, Value>,
    base_url: Option<String>,
    using: Option<String>,
}

impl AudioBuilder {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            model: String::new(),
            kind: None,
            voice: None,
            language: None,
            format: None,
            options: serde_json::Map::new(),
            base_url: None,
            using: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Text to synthesize into speech.
    pub fn tts(mut self, text: impl Into<String>) -> Self {
        self.kind = Some(AudioKind::Tts {
            text: text.into(),
            voice: None,
        });
        self
    }

    /// Audio bytes to transcribe. The filename's extension tells the
    /// provider the container format.
    pub fn stt(mut self, audio: Vec<u8>, filename: impl Into<String>) -> Self {
        self.kind = Some(AudioKind::Stt {
            audio,
            filename: filename.into(),
        });
        self
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.using = Some(provider.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    pub async fn generate(self) -> Result<AudioResponse> {
        if self.model.trim().is_empty() {
            return Err(WormholeError::validation("model is required"));
        }
        let mut kind = self
            .kind
            .ok_or_else(|| WormholeError::validation("either tts() or stt() is required"))?;
        if let AudioKind::Tts { voice, .. } = &mut kind {
            *voice = self.voice.clone();
        }

        let lease = self.client.resolve(self.using.as_deref())?;
        check_model(
            self.client.model_registry(),
            &self.model,
            Capability::Audio,
            lease.dynamic_models,
        )?;

        let request = AudioRequest {
            model: self.model.clone(),
            kind,
            language: self.language,
            format: self.format,
            options: self.options,
            base_url: self.base_url,
        };

        let provider_name = lease.name.clone();
        let model = self.model;
        with_provider_label(provider_name.clone(), (lease.handlers.audio)(request))
            .await
            .map_err(|e| {
                e.with_provider(&provider_name)
                    .with_model(&model)
                    .with_operation("audio")
            })
    }
}
