//! Per-listener voice assistant: wake word, capture, recognition, commands

pub mod capture;
pub mod commands;
pub mod detector;
pub mod listener;
pub mod recognizer;

pub use commands::VoiceCommand;
pub use detector::{DetectorFactory, EnergyDetector, WakeDetector};
pub use listener::{AssistantServices, ListenerSession};
pub use recognizer::{HttpRecognizer, Recognition, Recognizer};
