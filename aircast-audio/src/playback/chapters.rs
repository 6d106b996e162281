//! Chapter metadata collaborators
//!
//! Chaptered sources (audiobooks, long-form mixes) carry per-position
//! artist/title/album records in their tags. The scanner that parses them
//! out of file headers lives outside this crate; the decoder session only
//! probes it at packet boundaries and forwards changes to the metadata
//! sink.

/// Character encoding a chapter's text fields were tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// ISO-8859-1
    Latin1,
    /// UTF-8
    Utf8,
    /// UTF-16 with BOM
    Utf16,
}

/// A metadata record associated with a playback position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// Performing artist
    pub artist: String,
    /// Chapter title
    pub title: String,
    /// Containing album or work
    pub album: String,
    /// Encoding of the text fields above
    pub encoding: TextEncoding,
}

/// Looks up the chapter covering a playback position, if any.
///
/// One scanner instance is bound to one source's tag data by the host.
pub trait ChapterScanner {
    /// Chapter active at `position_ms`, or `None` between/without chapters.
    fn scan(&mut self, position_ms: u64) -> Option<Chapter>;
}

/// Scanner for sources without chapter tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChapters;

impl ChapterScanner for NoChapters {
    fn scan(&mut self, _position_ms: u64) -> Option<Chapter> {
        None
    }
}
