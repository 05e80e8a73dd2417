// Advisory speech queue: serializes spoken advisories into a strictly
// sequential, non-overlapping playback stream.
//
// Playback itself sits behind the SpeechSynthesizer trait so the queue does
// not care whether audio comes from ElevenLabs + rodio or a console print.

use crate::tg_models::{Result, TGError};
use std::future::Future;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const VOICE_ID: &str = "UgBBYS2sOqTuMpoF3BR0";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Turns one advisory into audible (or visible) output. Must complete before
/// the queue advances to the next message.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    fn speak(&self, text: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Handle to the playback worker. Cloneable; all clones share the same
/// pending sequence and dedup memory.
#[derive(Clone)]
pub struct SpeechQueue {
    tx: mpsc::UnboundedSender<String>,
    last_enqueued: Arc<Mutex<Option<String>>>,
}

impl SpeechQueue {
    /// Spawn the playback worker. Messages are consumed one at a time, so at
    /// most one playback is ever in flight; a synthesizer failure is logged
    /// and treated as completion so the queue cannot stall.
    pub fn start<S: SpeechSynthesizer>(synthesizer: S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = synthesizer.speak(&message).await {
                    log::warn!("advisory playback failed: {}", e);
                }
            }
        });

        SpeechQueue {
            tx,
            last_enqueued: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue an advisory for playback. A message identical to the most
    /// recently enqueued one is dropped, regardless of playback state, so
    /// repeated evaluation cycles do not spam the rider.
    pub fn enqueue(&self, message: &str) {
        {
            let mut last = self.last_enqueued.lock().expect("speech dedup lock poisoned");
            if last.as_deref() == Some(message) {
                return;
            }
            *last = Some(message.to_string());
        }

        // Worker gone means we are shutting down; nothing to do.
        let _ = self.tx.send(message.to_string());
    }

    /// Forget the dedup memory. Called on session end so a restarted session
    /// is not muted by stale history.
    pub fn reset(&self) {
        let mut last = self.last_enqueued.lock().expect("speech dedup lock poisoned");
        *last = None;
    }
}

// ============================================================================
// Synthesizers
// ============================================================================

/// Fallback used when no ElevenLabs key is configured or speech is disabled:
/// the advisory is printed instead of spoken.
pub struct ConsoleSpeaker;

impl SpeechSynthesizer for ConsoleSpeaker {
    fn speak(&self, text: &str) -> impl Future<Output = Result<()>> + Send {
        let text = text.to_string();
        async move {
            println!("🔊 {}", text);
            Ok(())
        }
    }
}

/// Fetches an mp3 rendition of the advisory from ElevenLabs and plays it on
/// a blocking worker thread via rodio.
pub struct ElevenLabsSpeaker {
    http: reqwest::Client,
    api_key: String,
    voice_id: String,
}

impl ElevenLabsSpeaker {
    pub fn new(api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TGError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ElevenLabsSpeaker {
            http,
            api_key,
            voice_id: VOICE_ID.to_string(),
        })
    }

    async fn fetch_audio(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", ELEVENLABS_URL, self.voice_id);
        let payload = serde_json::json!({
            "text": text,
            "model_id": "eleven_turbo_v2_5",
            "voice_settings": { "stability": 0.5, "similarity_boost": 0.5 },
        });

        let response = self
            .http
            .post(&url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TGError::Playback(format!("TTS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TGError::Playback(format!(
                "TTS service returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TGError::Playback(format!("Failed to read TTS audio: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

impl SpeechSynthesizer for ElevenLabsSpeaker {
    fn speak(&self, text: &str) -> impl Future<Output = Result<()>> + Send {
        let text = text.to_string();
        async move {
            let audio = self.fetch_audio(&text).await?;

            tokio::task::spawn_blocking(move || play_mp3(audio))
                .await
                .map_err(|e| TGError::Playback(format!("audio worker join failed: {}", e)))?
        }
    }
}

/// Decode and play an mp3 buffer, returning once playback finishes. Runs on
/// a blocking thread because rodio's sink waits synchronously.
fn play_mp3(bytes: Vec<u8>) -> Result<()> {
    let (_stream, handle) = rodio::OutputStream::try_default()
        .map_err(|e| TGError::Playback(format!("Failed to open audio output: {}", e)))?;
    let sink = rodio::Sink::try_new(&handle)
        .map_err(|e| TGError::Playback(format!("Failed to create audio sink: {}", e)))?;
    let decoder = rodio::Decoder::new(Cursor::new(bytes))
        .map_err(|e| TGError::Playback(format!("Failed to decode TTS audio: {}", e)))?;

    sink.append(decoder);
    sink.sleep_until_end();
    Ok(())
}
