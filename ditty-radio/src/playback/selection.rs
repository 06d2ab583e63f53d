//! Next-song selection
//!
//! **Order of preference:**
//! 1. the first *ready* song in the explicit request queue (requests whose
//!    audio is not downloaded yet stay queued and do not block later ones)
//! 2. a weighted random draw over all ready songs
//!
//! **Weights:** `weight = rank × flair multiplier`
//! - rank: 1 for the most recently played ready song, 2 for the next, ...;
//!   never-played songs get rank = |ready|
//! - flair dampening: walking history most-recent-first with a denominator
//!   starting at 5 (decremented per entry, floor 1), the first occurrence of
//!   each flair records `1 / denominator`; flairs come from the ready set
//!   only, so entries for songs no longer ready just use up a step
//! - configured per-flair factors multiply in
//!
//! Candidates are laid out history-backed songs first (by recency), then
//! never-played songs in catalog order, and the draw picks the first whose
//! cumulative weight reaches `draw × total`.

use crate::db::SongStore;
use crate::error::Result;
use ditty_common::events::SelectionReason;
use ditty_common::{ChannelId, PlayRecord, Song, SongId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Starting flair denominator
pub const INITIAL_FLAIR_DENOMINATOR: u32 = 5;

/// A ready song with its computed draw weight
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub song_id: SongId,
    pub rank: usize,
    pub multiplier: f64,
    pub weight: f64,
}

/// Outcome of one selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub song: Song,
    pub reason: SelectionReason,
    /// Draw weight (None for requested songs)
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionPolicy {
    /// Configured per-flair factors
    multipliers: HashMap<String, f64>,
}

impl SelectionPolicy {
    pub fn new(multipliers: HashMap<String, f64>) -> Self {
        Self { multipliers }
    }

    /// Remove and return the first queued request that is ready to play
    pub fn take_requested(&self, queue: &mut VecDeque<SongId>, ready: &[Song]) -> Option<Song> {
        let index = queue
            .iter()
            .position(|id| ready.iter().any(|song| &song.id == id))?;
        let id = queue.remove(index)?;
        ready.iter().find(|song| song.id == id).cloned()
    }

    /// Rank per ready song that appears in history (1 = most recent)
    pub fn recency_ranks<'a>(
        &self,
        ready: &[Song],
        history: &'a [PlayRecord],
    ) -> Vec<(&'a SongId, usize)> {
        let ready_ids: HashSet<&SongId> = ready.iter().map(|song| &song.id).collect();
        let mut seen = HashSet::new();
        let mut ranks = Vec::new();
        for record in history {
            if ready_ids.contains(&record.song_id) && seen.insert(&record.song_id) {
                ranks.push((&record.song_id, ranks.len() + 1));
            }
        }
        ranks
    }

    /// Dampening factor per flair from recent history
    pub fn flair_dampening(&self, history: &[PlayRecord], ready: &[Song]) -> HashMap<String, f64> {
        let flairs: HashMap<&SongId, &str> = ready
            .iter()
            .filter_map(|song| song.flair_label().map(|flair| (&song.id, flair)))
            .collect();
        let mut dampening = HashMap::new();
        let mut denominator = INITIAL_FLAIR_DENOMINATOR;
        for record in history {
            if let Some(flair) = flairs.get(&record.song_id) {
                dampening
                    .entry(flair.to_string())
                    .or_insert(1.0 / f64::from(denominator));
            }
            denominator = denominator.saturating_sub(1).max(1);
        }
        dampening
    }

    /// Dampening combined with the configured factor for `flair`
    pub fn multiplier(&self, flair: Option<&str>, dampening: &HashMap<String, f64>) -> f64 {
        let Some(flair) = flair else {
            return 1.0;
        };
        let damped = dampening.get(flair).copied().unwrap_or(1.0);
        let configured = self.multipliers.get(flair).copied().unwrap_or(1.0);
        damped * configured
    }

    /// Weighted candidates in draw order
    pub fn candidates(&self, ready: &[Song], history: &[PlayRecord]) -> Vec<Candidate> {
        let dampening = self.flair_dampening(history, ready);
        let ranks = self.recency_ranks(ready, history);
        let fallback = ready.len();
        let by_id: HashMap<&SongId, &Song> = ready.iter().map(|song| (&song.id, song)).collect();

        let mut candidates = Vec::with_capacity(ready.len());
        let mut ranked = HashSet::new();
        for (id, rank) in ranks {
            if let Some(song) = by_id.get(id) {
                ranked.insert(id);
                candidates.push(self.candidate(song, rank, &dampening));
            }
        }
        for song in ready.iter().filter(|song| !ranked.contains(&song.id)) {
            candidates.push(self.candidate(song, fallback, &dampening));
        }
        candidates
    }

    fn candidate(&self, song: &Song, rank: usize, dampening: &HashMap<String, f64>) -> Candidate {
        let multiplier = self.multiplier(song.flair_label(), dampening);
        Candidate {
            song_id: song.id.clone(),
            rank,
            multiplier,
            weight: rank as f64 * multiplier,
        }
    }

    /// Pick from `candidates` with `unit` in [0, 1)
    ///
    /// Zero-weight candidates are never picked; None if every weight is zero.
    pub fn draw<'a>(&self, candidates: &'a [Candidate], unit: f64) -> Option<&'a Candidate> {
        let total: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        let target = unit.clamp(0.0, 1.0) * total;
        let mut cumulative = 0.0;
        for candidate in candidates.iter().filter(|c| c.weight > 0.0) {
            cumulative += candidate.weight;
            if cumulative >= target {
                return Some(candidate);
            }
        }
        // Rounding left target just above the final sum
        candidates.iter().rev().find(|c| c.weight > 0.0)
    }

    /// Full selection without side effects
    pub fn choose(
        &self,
        queue: &mut VecDeque<SongId>,
        ready: &[Song],
        history: &[PlayRecord],
        unit: f64,
    ) -> Option<Selection> {
        if let Some(song) = self.take_requested(queue, ready) {
            return Some(Selection {
                song,
                reason: SelectionReason::Requested,
                weight: None,
            });
        }

        let candidates = self.candidates(ready, history);
        let picked = self.draw(&candidates, unit)?;
        let song = ready.iter().find(|song| song.id == picked.song_id)?.clone();
        Some(Selection {
            song,
            reason: SelectionReason::Weighted,
            weight: Some(picked.weight),
        })
    }
}

/// Selection bound to a channel's storage and random source
pub struct SongSelector {
    store: Arc<dyn SongStore>,
    channel: ChannelId,
    policy: SelectionPolicy,
    rng: StdRng,
}

impl SongSelector {
    pub fn new(store: Arc<dyn SongStore>, channel: ChannelId, policy: SelectionPolicy) -> Self {
        Self {
            store,
            channel,
            policy,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic draws
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Choose the next song and record its play; None if nothing is ready
    pub async fn select_next(&mut self, queue: &mut VecDeque<SongId>) -> Result<Option<Selection>> {
        let ready = self.store.ready_songs().await?;
        let history = self.store.play_history(self.channel).await?;

        let unit: f64 = self.rng.gen();
        let selection = self.policy.choose(queue, &ready, &history, unit);

        let Some(selection) = selection else {
            debug!("No ready songs for channel {}", self.channel);
            return Ok(None);
        };

        self.store.record_play(self.channel, &selection.song.id).await?;
        info!(
            "Selected {} ({}) for channel {} [{:?}, weight {:?}]",
            selection.song.title, selection.song.id, self.channel, selection.reason, selection.weight
        );
        Ok(Some(selection))
    }
}
