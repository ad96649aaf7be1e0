use serde::{Deserialize, Serialize};

/// A named list of saved URLs, stored in the shared playlist file.
///
/// Ids are dense and zero-based on disk; users see them one-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPlaylist {
    pub id: usize,
    pub title: String,
    pub data: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: usize,
    pub url: String,
    pub title: String,
}

impl MemoryPlaylist {
    pub fn new(id: usize, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            data: Vec::new(),
        }
    }

    /// Appends an entry with the next free id and returns it.
    pub fn push_entry(&mut self, url: impl Into<String>, title: impl Into<String>) -> &PlaylistEntry {
        let id = self.data.iter().map(|e| e.id + 1).max().unwrap_or(0);
        self.data.push(PlaylistEntry {
            id,
            url: url.into(),
            title: title.into(),
        });
        &self.data[self.data.len() - 1]
    }

    /// Removes the entry with `id` and renumbers the rest from zero.
    pub fn remove_entry(&mut self, id: usize) -> Option<PlaylistEntry> {
        let idx = self.data.iter().position(|e| e.id == id)?;
        let removed = self.data.remove(idx);
        for (new_id, entry) in self.data.iter_mut().enumerate() {
            entry.id = new_id;
        }
        Some(removed)
    }
}
