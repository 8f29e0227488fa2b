use std::io::{BufRead, BufReader};
use std::path::Path;

/// Pattern and crystal counts from an indexing stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks: u64,
    pub hits: u64,
    pub indexed_patterns: u64,
    pub indexed_crystals: u64,
}

impl StreamStats {
    /// Count chunks, hits and crystals in a stream. A missing or unreadable stream gives
    /// all zeros.
    pub fn from_file(path: &Path) -> Self {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Could not open stream {}: {e}", path.display());
                return Self::default();
            }
        };

        let mut stats = Self::default();
        let mut unindexed: u64 = 0;
        for raw in BufReader::new(file).split(b'\n') {
            let Ok(raw) = raw else {
                log::warn!("Stopped reading {} early", path.display());
                break;
            };
            let line = String::from_utf8_lossy(&raw);
            if line.contains("Image filename") {
                stats.chunks += 1;
            } else if line.contains("hit = 1") {
                stats.hits += 1;
            } else if line.contains("Begin crystal") {
                stats.indexed_crystals += 1;
            } else if line.contains("indexed_by = none") {
                unindexed += 1;
            }
        }
        stats.indexed_patterns = stats.chunks.saturating_sub(unindexed);
        stats
    }
}
