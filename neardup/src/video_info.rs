use std::path::PathBuf;

use neardup_common::hashing::hamming::Hamming;

/// Everything we know about one video file. The filesystem identity fields
/// are filled by the scanner, the stream fields by the prober, and `id` by
/// the store on insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    /// Greater than zero once the video has been inserted into the store.
    pub id: i64,
    /// Absolute, normalized.
    pub path: PathBuf,

    /// Unix epoch seconds as text, empty when unknown.
    pub created_at: String,
    pub modified_at: String,

    pub size: u64,
    /// Whole seconds, 0 means the duration is unknown and percentage seeking
    /// is unavailable.
    pub duration: i64,
    pub bit_rate: i64,

    pub video_codec: String,
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    pub avg_frame_rate: f64,
    pub sample_rate: i32,

    /// `(device, inode)` identifies a hard-link group.
    pub device: i64,
    pub inode: i64,
    pub nlinks: u64,

    pub thumbnails: Vec<PathBuf>,
}

/// The ordered perceptual hashes of one video, one per sampled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashGroup {
    pub video_id: i64,
    pub hashes: Vec<Hamming>,
}
