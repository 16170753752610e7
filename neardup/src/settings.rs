//! Search settings, persisted as one JSON blob in the store.
//!
//! Unknown keys are ignored, missing keys take their defaults, and numeric
//! fields outside their documented ranges are clamped on load.

use std::path::PathBuf;

use neardup_common::utils::glob::{self, PatternError};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum HashMethod {
    /// Exactly two samples, at 30% and 70% of the duration.
    Fast,
    /// One sample per second of stream time.
    Slow,
}

/// The compiled forms of the include/exclude patterns. Rebuilt from the raw
/// strings after loading, never serialized.
#[derive(Debug, Clone, Default)]
pub struct CompiledPatterns {
    pub include_file: Vec<Regex>,
    pub include_dir: Vec<Regex>,
    pub exclude_file: Vec<Regex>,
    pub exclude_dir: Vec<Regex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    pub use_glob: bool,
    pub case_insensitive: bool,

    pub extensions: Vec<String>,
    pub include_file_patterns: Vec<String>,
    pub include_dir_patterns: Vec<String>,
    pub exclude_file_patterns: Vec<String>,
    pub exclude_dir_patterns: Vec<String>,

    pub min_bytes: Option<u64>,
    pub max_bytes: Option<u64>,
    pub directories: Vec<DirectoryEntry>,

    /// 1-4
    pub thumbnails_per_video: u32,
    /// Percent of the head and tail not sampled in slow mode, 0-40.
    pub skip_percent: u32,
    /// Upper bound on hashes per video in slow mode.
    pub max_frames: u32,
    /// 0-64
    #[serde(rename = "hammingDistanceThreshold")]
    pub hamming_threshold: u32,

    pub use_percent_threshold: bool,
    /// 1-100
    pub matching_threshold_percent: f64,
    /// 1-10000
    pub matching_threshold_number: u64,

    pub method: HashMethod,
    /// Fast mode only: accept whatever frame the seek landed on.
    pub use_keyframes_only: bool,

    #[serde(skip)]
    pub compiled: CompiledPatterns,
}

fn default_true() -> bool {
    true
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            use_glob: false,
            case_insensitive: false,
            extensions: vec![".mp4".into(), ".mkv".into(), ".webm".into()],
            include_file_patterns: vec![],
            include_dir_patterns: vec![],
            exclude_file_patterns: vec![],
            exclude_dir_patterns: vec![],
            min_bytes: None,
            max_bytes: None,
            directories: vec![],
            thumbnails_per_video: 4,
            skip_percent: 15,
            max_frames: i32::MAX as u32,
            hamming_threshold: 4,
            use_percent_threshold: false,
            matching_threshold_percent: 50.0,
            matching_threshold_number: 5,
            method: HashMethod::Slow,
            use_keyframes_only: false,
            compiled: CompiledPatterns::default(),
        }
    }
}

impl SearchSettings {
    /// Parses the JSON blob stored in the database and brings every numeric
    /// field back into range.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut settings: Self = serde_json::from_str(json)?;
        settings.clamp_ranges();
        Ok(settings)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn clamp_ranges(&mut self) {
        self.thumbnails_per_video = self.thumbnails_per_video.clamp(1, 4);
        self.skip_percent = self.skip_percent.min(40);
        self.max_frames = self.max_frames.max(1);
        self.hamming_threshold = self.hamming_threshold.min(64);
        self.matching_threshold_percent = self.matching_threshold_percent.clamp(1.0, 100.0);
        self.matching_threshold_number = self.matching_threshold_number.clamp(1, 10000);
    }

    /// Compiles the four pattern lists. Must be called before scanning; a bad
    /// pattern is rejected here, before anything touches the filesystem.
    pub fn compile_patterns(&mut self) -> Result<(), PatternError> {
        let compile = |patterns: &[String]| {
            glob::compile_patterns(patterns, self.use_glob, self.case_insensitive)
        };
        self.compiled = CompiledPatterns {
            include_file: compile(&self.include_file_patterns)?,
            include_dir: compile(&self.include_dir_patterns)?,
            exclude_file: compile(&self.exclude_file_patterns)?,
            exclude_dir: compile(&self.exclude_dir_patterns)?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let s = SearchSettings::from_json("{}").unwrap();
        assert_eq!(vec![".mp4", ".mkv", ".webm"], s.extensions);
        assert_eq!(4, s.thumbnails_per_video);
        assert_eq!(4, s.hamming_threshold);
        assert_eq!(5, s.matching_threshold_number);
        assert_eq!(50.0, s.matching_threshold_percent);
        assert!(!s.use_percent_threshold);
        assert_eq!(None, s.min_bytes);
        assert_eq!(None, s.max_bytes);
        assert_eq!(HashMethod::Slow, s.method);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let s = SearchSettings::from_json(r#"{"definitelyNotAKey": 17}"#).unwrap();
        assert_eq!(4, s.hamming_threshold);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let s = SearchSettings::from_json(
            r#"{
                "thumbnailsPerVideo": 9,
                "skipPercent": 99,
                "maxFrames": 0,
                "hammingDistanceThreshold": 1000,
                "matchingThresholdPercent": 0.5,
                "matchingThresholdNumber": 999999
            }"#,
        )
        .unwrap();

        assert_eq!(4, s.thumbnails_per_video);
        assert_eq!(40, s.skip_percent);
        assert_eq!(1, s.max_frames);
        assert_eq!(64, s.hamming_threshold);
        assert_eq!(1.0, s.matching_threshold_percent);
        assert_eq!(10000, s.matching_threshold_number);
    }

    #[test]
    fn null_byte_bounds_mean_unbounded() {
        let s = SearchSettings::from_json(r#"{"minBytes": null, "maxBytes": 100}"#).unwrap();
        assert_eq!(None, s.min_bytes);
        assert_eq!(Some(100), s.max_bytes);
    }

    #[test]
    fn json_roundtrip() {
        let mut s = SearchSettings::default();
        s.use_glob = true;
        s.extensions = vec![".avi".into()];
        s.directories = vec![DirectoryEntry {
            path: "/videos".into(),
            recursive: false,
        }];
        s.method = HashMethod::Fast;
        s.matching_threshold_number = 3;

        let back = SearchSettings::from_json(&s.to_json().unwrap()).unwrap();
        assert!(back.use_glob);
        assert_eq!(s.extensions, back.extensions);
        assert_eq!(1, back.directories.len());
        assert_eq!(PathBuf::from("/videos"), back.directories[0].path);
        assert!(!back.directories[0].recursive);
        assert_eq!(HashMethod::Fast, back.method);
        assert_eq!(3, back.matching_threshold_number);
    }

    #[test]
    fn serialized_keys_are_camel_case() {
        let json = SearchSettings::default().to_json().unwrap();
        assert!(json.contains("\"useGlob\""));
        assert!(json.contains("\"hammingDistanceThreshold\""));
        assert!(json.contains("\"thumbnailsPerVideo\""));
        assert!(!json.contains("compiled"));
    }

    #[test]
    fn directory_recursive_defaults_to_true() {
        let s =
            SearchSettings::from_json(r#"{"directories": [{"path": "/a"}]}"#).unwrap();
        assert!(s.directories[0].recursive);
    }

    #[test]
    fn bad_pattern_is_rejected_before_use() {
        let mut s = SearchSettings::default();
        s.include_file_patterns = vec!["(oops".into()];
        assert!(s.compile_patterns().is_err());

        s.use_glob = true;
        assert!(s.compile_patterns().is_ok());
    }
}
