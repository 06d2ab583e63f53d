//! Voice command interpretation
//!
//! Maps a [`Recognition`] to a [`VoiceCommand`]. Recognized intents take
//! precedence over phrase matching on the transcribed text.
//!
//! **Phrases** (case-insensitive, trailing punctuation ignored):
//! - `i'm <name>` → introduce
//! - `play next` → skip the current song
//! - `play <query>` → request the song with the closest title
//! - `what song is this`, `what's playing`, `song`, `song name` → now playing
//! - anything else is echoed back

use super::recognizer::Recognition;
use ditty_common::Song;

/// Intents below this confidence are ignored
pub const MIN_INTENT_CONFIDENCE: f64 = 0.5;

const NOW_PLAYING_PHRASES: [&str; 4] = ["what song is this", "what's playing", "song", "song name"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    Introduce { name: String },
    Skip,
    Play { query: String },
    NowPlaying,
    Echo { text: String },
    NotUnderstood,
}

pub fn interpret(recognition: &Recognition) -> VoiceCommand {
    let text = recognition.text.as_deref().map(str::trim).unwrap_or("");
    let normalized = normalize(text);

    if let Some(intent) = recognition
        .top_intent()
        .filter(|intent| intent.confidence >= MIN_INTENT_CONFIDENCE)
    {
        match intent.name.as_str() {
            "skip_song" => return VoiceCommand::Skip,
            "now_playing" => return VoiceCommand::NowPlaying,
            "play_song" => {
                let query = strip_prefix_ci(&normalized, "play ").unwrap_or(&normalized).trim();
                if !query.is_empty() {
                    return VoiceCommand::Play {
                        query: query.to_string(),
                    };
                }
            }
            _ => {}
        }
    }

    if normalized.is_empty() {
        return VoiceCommand::NotUnderstood;
    }
    if let Some(name) = strip_prefix_ci(&normalized, "i'm ") {
        return VoiceCommand::Introduce {
            name: name.trim().to_string(),
        };
    }
    if normalized.eq_ignore_ascii_case("play next") {
        return VoiceCommand::Skip;
    }
    if let Some(query) = strip_prefix_ci(&normalized, "play ") {
        let query = query.trim();
        if !query.is_empty() {
            return VoiceCommand::Play {
                query: query.to_string(),
            };
        }
    }
    if NOW_PLAYING_PHRASES
        .iter()
        .any(|phrase| normalized.eq_ignore_ascii_case(phrase))
    {
        return VoiceCommand::NowPlaying;
    }
    VoiceCommand::Echo {
        text: text.to_string(),
    }
}

/// Trim whitespace and trailing sentence punctuation; straighten apostrophes
fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim()
        .replace('\u{2019}', "'")
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

/// Title similarity in [0, 1]
pub fn title_score(title: &str, query: &str) -> f64 {
    strsim::normalized_levenshtein(&title.to_lowercase(), &query.to_lowercase())
}

/// Closest title to `query`; None only for an empty catalog
///
/// The earliest song wins ties.
pub fn best_match<'a>(songs: &'a [Song], query: &str) -> Option<&'a Song> {
    songs
        .iter()
        .rev()
        .map(|song| (song, title_score(&song.title, query)))
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(song, _)| song)
}

pub fn greeting(name: &str) -> String {
    format!("Hello {}, I'm Ditty bot.", name)
}

pub fn goodbye(name: &str) -> String {
    format!("Goodbye, {}", name)
}

pub fn song_added(title: &str) -> String {
    format!("I have added your song, {} to the queue", title)
}

pub fn now_playing(title: Option<&str>) -> String {
    match title {
        Some(title) => format!("I am currently playing {}", title),
        None => "Nothing is playing right now".to_string(),
    }
}

pub const SKIP_RESPONSE: &str = "Ok, I am skipping this song";
pub const NOT_UNDERSTOOD_RESPONSE: &str = "I'm sorry, I didn't understand that!";
