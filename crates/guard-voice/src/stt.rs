//! **Speech-to-Text (STT)**: convert an `Utterance` into text for the detector.
//!
//! `HttpStt` talks to any OpenAI-compatible `/audio/transcriptions` endpoint.
//! `ScriptedStt` replays canned results for tests and offline runs.

use crate::error::{VoiceError, VoiceResult};
use crate::segment::Utterance;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Backend for converting an utterance to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one utterance; return an empty string if nothing was recognized.
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String>;
}

/// Encode mono f32 PCM as 16-bit WAV bytes.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0).round() as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// OpenAI-compatible transcription API (OpenAI Whisper, OpenRouter, a local server, ...).
#[derive(Debug, Clone)]
pub struct HttpStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model: whisper-1 or gpt-4o-transcribe, etc.
    pub model: String,
    /// ISO-639-1 hint, e.g. `id` for Indonesian
    pub language: Option<String>,
    client: reqwest::Client,
}

impl HttpStt {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        language: Option<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            language,
            client,
        })
    }

    /// Build from environment: `STT_API_URL`, `STT_API_KEY`, `STT_MODEL`, `STT_LANGUAGE`.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .map_err(|_| VoiceError::Config("STT_API_URL is not set".to_string()))?;
        let api_key = std::env::var("STT_API_KEY").ok().filter(|k| !k.is_empty());
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let language = std::env::var("STT_LANGUAGE").ok().filter(|l| !l.is_empty());
        Self::new(base_url, api_key, model, language)
    }

    /// Override the language hint (settings file wins over environment).
    pub fn with_language(mut self, language: Option<String>) -> Self {
        if language.is_some() {
            self.language = language;
        }
        self
    }
}

#[async_trait]
impl SttBackend for HttpStt {
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if utterance.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = encode_wav(&utterance.samples, utterance.sample_rate)?;
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let res = request.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "STT API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res.json().await?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

/// Replays queued results in order; empty once the queue runs dry.
#[derive(Debug, Default)]
pub struct ScriptedStt {
    script: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedStt {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(lines.into_iter().map(|l| Ok(l.into())).collect()),
        }
    }

    pub fn push_ok(&self, text: impl Into<String>) {
        self.queue().push_back(Ok(text.into()));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        self.queue().push_back(Err(message.into()));
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SttBackend for ScriptedStt {
    async fn transcribe(&self, _utterance: &Utterance) -> VoiceResult<String> {
        match self.queue().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(VoiceError::Transcription(message)),
            None => Ok(String::new()),
        }
    }
}
