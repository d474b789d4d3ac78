use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{info, warn};

/// Reads a sentence aloud. The server has no audio device, so speaking
/// happens client-side; implementations here log or record.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Speaks `text`, logging and swallowing any failure.
pub async fn speak_or_log(speech: &dyn SpeechOutput, text: &str) {
    if let Err(e) = speech.speak(text).await {
        warn!("Speech output failed: {}", e);
    }
}

/// Logs the text instead of speaking it.
pub struct LogSpeech;

#[async_trait]
impl SpeechOutput for LogSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        info!("Speak: {}", text);
        Ok(())
    }
}

/// Records everything it was asked to say.
#[derive(Default)]
pub struct RecordingSpeech {
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechOutput for RecordingSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MutedSpeech;

    #[async_trait]
    impl SpeechOutput for MutedSpeech {
        async fn speak(&self, _text: &str) -> Result<()> {
            Err(anyhow::anyhow!("no audio device"))
        }
    }

    #[tokio::test]
    async fn test_speak_or_log_swallows_failures() {
        crate::test_utils::init_test_logging();
        speak_or_log(&MutedSpeech, "きょうは はれ").await;

        let recording = RecordingSpeech::default();
        speak_or_log(&recording, "きょうは はれ").await;
        assert_eq!(*recording.spoken.lock().unwrap(), vec!["きょうは はれ"]);
    }
}
