use std::fmt;

/// A pending queue entry: where to fetch it from and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub source_url: String,
    pub title: String,
}

impl Track {
    pub fn new(source_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)
    }
}

/// A track whose audio has been located and can be handed to the voice driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableTrack {
    pub title: String,
    pub stream_url: String,
}
