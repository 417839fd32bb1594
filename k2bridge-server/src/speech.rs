//! Best-effort speech recognition on the device audio stream
//!
//! Recognitions are logged, never broadcast. A missing or incompatible
//! recognizer disables the path for the session without affecting the bridge.

use crate::driver::SensorDevice;
use async_trait::async_trait;
use k2bridge_core::config::SpeechConfig;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Additional-info key a recognizer uses to declare device audio support.
const DEVICE_COMPATIBLE_KEY: &str = "Kinect";

/// An installed speech recognizer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognizerInfo {
    pub id: String,
    pub name: String,
    /// BCP 47 locale, e.g. `en-US`
    pub culture: String,
    pub additional_info: HashMap<String, String>,
}

impl RecognizerInfo {
    pub fn is_device_compatible(&self) -> bool {
        self.additional_info
            .get(DEVICE_COMPATIBLE_KEY)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// First recognizer that supports device audio and matches `locale`.
pub fn select_recognizer<'a>(recognizers: &'a [RecognizerInfo], locale: &str) -> Option<&'a RecognizerInfo> {
    recognizers
        .iter()
        .find(|r| r.is_device_compatible() && r.culture.eq_ignore_ascii_case(locale))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// Stream of recognized utterances.
#[async_trait]
pub trait SpeechEngine: Send {
    /// Next recognition, or `None` once the engine stops.
    async fn next_recognition(&mut self) -> Option<Recognition>;
}

pub struct SpeechPath {
    recognizer: RecognizerInfo,
    engine: Box<dyn SpeechEngine>,
    threshold: f32,
}

impl SpeechPath {
    pub fn new(recognizer: RecognizerInfo, engine: Box<dyn SpeechEngine>, threshold: f32) -> Self {
        Self { recognizer, engine, threshold }
    }

    /// Find a usable recognizer on `device`. Returns `None`, with the
    /// reason logged, when speech stays disabled for this session.
    pub fn probe(device: &dyn SensorDevice, config: &SpeechConfig) -> Option<Self> {
        if !config.enabled {
            info!("Speech recognition disabled by configuration");
            return None;
        }

        let recognizers = match device.installed_recognizers() {
            Ok(recognizers) => recognizers,
            Err(e) => {
                warn!("Speech recognition unavailable: {}", e);
                return None;
            }
        };

        let Some(recognizer) = select_recognizer(&recognizers, &config.locale) else {
            info!("No speech recognizer for locale {} supports device audio; speech disabled", config.locale);
            return None;
        };

        let Some(engine) = device.open_speech_engine(recognizer) else {
            warn!("Speech recognizer {} could not be started", recognizer.name);
            return None;
        };

        info!("Speech recognition enabled with {} ({})", recognizer.name, recognizer.culture);
        Some(Self::new(recognizer.clone(), engine, config.confidence_threshold))
    }

    pub fn recognizer(&self) -> &RecognizerInfo {
        &self.recognizer
    }

    pub fn accepts(&self, recognition: &Recognition) -> bool {
        recognition.confidence >= self.threshold
    }

    /// Log recognitions until the engine stops or `shutdown` flips.
    /// Returns the number of accepted recognitions.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut accepted = 0;
        loop {
            let recognition = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.engine.next_recognition() => match next {
                    Some(recognition) => recognition,
                    None => break,
                },
            };

            if self.accepts(&recognition) {
                accepted += 1;
                info!(confidence = recognition.confidence, "Speech recognized: {}", recognition.text);
            } else {
                debug!(confidence = recognition.confidence, "Speech rejected: {}", recognition.text);
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn recognizer(culture: &str, kinect: Option<&str>) -> RecognizerInfo {
        let mut additional_info = HashMap::new();
        if let Some(flag) = kinect {
            additional_info.insert(DEVICE_COMPATIBLE_KEY.to_string(), flag.to_string());
        }
        RecognizerInfo {
            id: format!("SR_{}", culture),
            name: format!("Recognizer {}", culture),
            culture: culture.to_string(),
            additional_info,
        }
    }

    struct ScriptedEngine {
        script: VecDeque<Recognition>,
    }

    #[async_trait]
    impl SpeechEngine for ScriptedEngine {
        async fn next_recognition(&mut self) -> Option<Recognition> {
            self.script.pop_front()
        }
    }

    #[test]
    fn test_select_requires_device_flag_and_locale() {
        let recognizers = vec![
            recognizer("en-US", None),
            recognizer("en-US", Some("False")),
            recognizer("de-DE", Some("True")),
            recognizer("en-us", Some("TRUE")),
        ];

        let selected = select_recognizer(&recognizers, "en-US").unwrap();
        assert_eq!(selected.culture, "en-us");
        assert!(select_recognizer(&recognizers, "fr-FR").is_none());
    }

    #[tokio::test]
    async fn test_run_counts_confident_recognitions() {
        let script = [("hello", 0.9), ("mumble", 0.05), ("stop", 0.1)]
            .into_iter()
            .map(|(text, confidence)| Recognition { text: text.to_string(), confidence })
            .collect();
        let path = SpeechPath::new(
            recognizer("en-US", Some("True")),
            Box::new(ScriptedEngine { script }),
            0.1,
        );
        let (_tx, shutdown) = watch::channel(false);

        assert_eq!(path.run(shutdown).await, 2);
    }
}
