//! Bridge configuration
//!
//! Loaded from a JSON, TOML or YAML file, then overridden from `K2BRIDGE_*`
//! environment variables and finally from command line flags.

use crate::correlation::VolumeWeighting;
use crate::error::{Error, Result};
use crate::types::{AudioFormat, FrameGeometry, Modality};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub ports: PortConfig,
    pub audio: AudioSettings,
    pub speech: SpeechConfig,
    pub channels: ChannelConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

/// One listening port per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub bind_address: String,
    pub color: u16,
    pub depth: u16,
    pub infrared: u16,
    pub body: u16,
    pub audio: u16,
    pub face: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Samples per second of the beam stream
    pub sampling_frequency: u32,
    /// Duration of one sub-frame in seconds
    pub frame_lifetime_secs: f64,
    pub volume_weighting: VolumeWeighting,
}

/// Best-effort speech recognition on the beam audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub locale: String,
    /// Recognitions below this confidence are ignored
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Packets queued per subscriber before it starts losing the oldest ones
    pub image_queue_capacity: usize,
    pub record_queue_capacity: usize,
}

/// Parameters of the built-in simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub color: FrameGeometry,
    pub depth: FrameGeometry,
    pub infrared: FrameGeometry,
    pub body_count: usize,
    pub tracked_bodies: usize,
    pub frame_rate: u32,
    /// Every n-th image tick yields an empty frame reference (0 = never)
    pub drop_every: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `k2bridge_server=debug`
    pub level: String,
    pub json: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ports: PortConfig::default(),
            audio: AudioSettings::default(),
            speech: SpeechConfig::default(),
            channels: ChannelConfig::default(),
            simulation: SimulationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            color: 9000,
            depth: 9001,
            infrared: 9002,
            body: 9003,
            audio: 9004,
            face: 9005,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        let format = AudioFormat::default();
        Self {
            sampling_frequency: format.sampling_frequency,
            frame_lifetime_secs: format.frame_lifetime_secs,
            volume_weighting: VolumeWeighting::Identity,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            locale: "en-US".to_string(),
            confidence_threshold: 0.1,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            image_queue_capacity: 4,
            record_queue_capacity: 256,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            color: FrameGeometry::COLOR_1080P,
            depth: FrameGeometry::DEPTH_512,
            infrared: FrameGeometry::INFRARED_512,
            body_count: 6,
            tracked_bodies: 1,
            frame_rate: 30,
            drop_every: 0,
            seed: 42,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PortConfig {
    pub fn port_for(&self, modality: Modality) -> u16 {
        match modality {
            Modality::Color => self.color,
            Modality::Depth => self.depth,
            Modality::Infrared => self.infrared,
            Modality::Body => self.body,
            Modality::Audio => self.audio,
            Modality::Face => self.face,
        }
    }

    pub fn set_port(&mut self, modality: Modality, port: u16) {
        match modality {
            Modality::Color => self.color = port,
            Modality::Depth => self.depth = port,
            Modality::Infrared => self.infrared = port,
            Modality::Body => self.body = port,
            Modality::Audio => self.audio = port,
            Modality::Face => self.face = port,
        }
    }

    /// Validate port assignments
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bind_address.is_empty() {
            return Err("bind_address cannot be empty".to_string());
        }

        let mut seen = HashSet::new();
        for modality in Modality::ALL {
            let port = self.port_for(modality);
            // 0 asks the OS for an ephemeral port
            if port != 0 && !seen.insert(port) {
                return Err(format!("{} port {} is assigned to another channel", modality, port));
            }
        }
        Ok(())
    }
}

impl AudioSettings {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sampling_frequency: self.sampling_frequency,
            frame_lifetime_secs: self.frame_lifetime_secs,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.frame_lifetime_secs.is_finite() || self.frame_lifetime_secs <= 0.0 {
            return Err("frame_lifetime_secs must be positive".to_string());
        }
        let samples = self.format().samples_per_frame();
        if samples == 0 {
            return Err("Audio sub-frame must hold at least one sample".to_string());
        }
        if samples > 65_536 {
            return Err("Audio sub-frame too large (max 65536 samples)".to_string());
        }
        Ok(())
    }
}

impl SpeechConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must be between 0.0 and 1.0".to_string());
        }
        if self.enabled && self.locale.is_empty() {
            return Err("locale cannot be empty when speech is enabled".to_string());
        }
        Ok(())
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.image_queue_capacity == 0 || self.record_queue_capacity == 0 {
            return Err("Channel queue capacities must be > 0".to_string());
        }
        Ok(())
    }

    pub fn capacity_for(&self, modality: Modality) -> usize {
        if modality.is_image() {
            self.image_queue_capacity
        } else {
            self.record_queue_capacity
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, geometry) in [("color", self.color), ("depth", self.depth), ("infrared", self.infrared)] {
            if geometry.sample_len() == 0 {
                return Err(format!("Simulated {} geometry must be non-empty", name));
            }
        }
        if self.body_count == 0 {
            return Err("body_count must be > 0".to_string());
        }
        if self.tracked_bodies > self.body_count {
            return Err("tracked_bodies cannot exceed body_count".to_string());
        }
        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err("frame_rate must be between 1 and 120".to_string());
        }
        Ok(())
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        debug!("Loading configuration from {}", path.as_ref().display());
        Self::from_str(&content)
    }

    /// Load configuration from string
    pub fn from_str(content: &str) -> Result<Self> {
        // Try JSON first
        if let Ok(config) = serde_json::from_str::<BridgeConfig>(content) {
            debug!("Configuration parsed as JSON");
            return Ok(config);
        }

        // Try TOML
        if let Ok(config) = toml::from_str::<BridgeConfig>(content) {
            debug!("Configuration parsed as TOML");
            return Ok(config);
        }

        // Try YAML
        if let Ok(config) = serde_yaml::from_str::<BridgeConfig>(content) {
            debug!("Configuration parsed as YAML");
            return Ok(config);
        }

        Err(Error::Configuration("Unrecognized configuration format".to_string()))
    }

    /// Defaults overridden from the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `K2BRIDGE_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for modality in Modality::ALL {
            let key = format!("K2BRIDGE_{}_PORT", modality.name().to_uppercase());
            if let Some(port) = lookup(&key).and_then(|v| v.parse::<u16>().ok()) {
                self.ports.set_port(modality, port);
            }
        }

        if let Some(address) = lookup("K2BRIDGE_BIND_ADDRESS") {
            self.ports.bind_address = address;
        }

        if let Some(level) = lookup("K2BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(locale) = lookup("K2BRIDGE_SPEECH_LOCALE") {
            self.speech.locale = locale;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.ports.validate()
            .and_then(|_| self.audio.validate())
            .and_then(|_| self.speech.validate())
            .and_then(|_| self.channels.validate())
            .and_then(|_| self.simulation.validate())
            .map_err(Error::Configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ports.port_for(Modality::Face), 9005);
        assert_eq!(config.audio.format().samples_per_frame(), 256);
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let mut config = BridgeConfig::default();
        config.ports.audio = config.ports.color;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ephemeral_ports_may_repeat() {
        let mut config = BridgeConfig::default();
        for modality in Modality::ALL {
            config.ports.set_port(modality, 0);
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        config.apply_env(|key| match key {
            "K2BRIDGE_BODY_PORT" => Some("9103".to_string()),
            "K2BRIDGE_COLOR_PORT" => Some("not-a-port".to_string()),
            "K2BRIDGE_LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.ports.body, 9103);
        assert_eq!(config.ports.color, 9000);
        assert_eq!(config.logging.level, "debug");
    }
}
