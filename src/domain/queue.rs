use std::collections::VecDeque;

use rand::seq::SliceRandom;

use super::track::Track;

#[derive(Debug, Default)]
pub struct MusicQueue {
    tracks: VecDeque<Track>,
}

impl MusicQueue {
    pub fn push(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Uniform random permutation of the pending tracks.
    pub fn shuffle(&mut self) {
        self.tracks
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
    }

    pub fn list(&self) -> &VecDeque<Track> {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
