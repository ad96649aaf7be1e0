use reqwest::Client;
use songbird::input::{HttpRequest, Input};

pub struct AudioSource;

impl AudioSource {
    /// Lazily streams an already resolved media URL over HTTP.
    pub fn from_stream(http: Client, stream_url: &str) -> Input {
        HttpRequest::new(http, stream_url.to_string()).into()
    }
}
