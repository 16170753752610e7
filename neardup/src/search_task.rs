//! Drives one full detection run: scan, probe, thumbnail, hash, detect,
//! store. Progress and results flow to the caller over a channel; the caller
//! owns the receiving end and renders however it likes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use color_eyre::eyre::{self, Context};
use neardup_common::bin_common::termination::Cookie;
use rayon::prelude::*;

use crate::db::Database;
use crate::decode::{fast, slow};
use crate::engine;
use crate::probe;
use crate::scanner;
use crate::settings::{HashMethod, SearchSettings};
use crate::thumbs;
use crate::video_info::VideoInfo;

/// Everything a front end needs to mirror the state of a run.
#[derive(Debug, Clone)]
pub enum Event {
    DatabaseOpened(PathBuf),
    /// Running total of accepted files while scanning.
    ScanProgress(usize),
    /// (done, total) for the probe/thumbnail stage.
    MetadataProgress(usize, usize),
    /// (done, total) for the hashing stage.
    HashProgress(usize, usize),
    /// The fresh generation of duplicate groups, already persisted.
    DuplicatesUpdated(Vec<Vec<VideoInfo>>),
    Error(String),
    Cancelled,
}

pub struct SearchTask {
    db: Database,
    db_path: PathBuf,
    settings: SearchSettings,
    thumbnail_dir: PathBuf,
    cookie: Cookie,
    events: Sender<Event>,
}

impl SearchTask {
    pub fn new(
        db: Database,
        db_path: PathBuf,
        settings: SearchSettings,
        thumbnail_dir: PathBuf,
        cookie: Cookie,
        events: Sender<Event>,
    ) -> Self {
        Self {
            db,
            db_path,
            settings,
            thumbnail_dir,
            cookie,
            events,
        }
    }

    /// Runs the pipeline to completion, cancellation or failure. Per-file
    /// problems are logged and skipped; store and engine failures abort the
    /// run and are both emitted and returned.
    pub fn run(mut self) -> eyre::Result<()> {
        let started = std::time::Instant::now();
        match self.run_inner() {
            Ok(()) => {
                log::info!(
                    "Search finished after {}",
                    humantime::Duration::from(started.elapsed())
                );
                Ok(())
            }
            Err(e) => {
                self.emit(Event::Error(format!("{e:#}")));
                Err(e)
            }
        }
    }

    fn emit(&self, event: Event) {
        // a vanished listener is not this task's problem
        self.events.send(event).ok();
    }

    fn cancelled(&self) -> bool {
        self.cookie.is_terminating()
    }

    fn run_inner(&mut self) -> eyre::Result<()> {
        self.emit(Event::DatabaseOpened(self.db_path.clone()));

        log::info!("Scanning {} directories", self.settings.directories.len());
        let mut found =
            scanner::scan_directories(&self.settings, &self.cookie, |count| {
                self.emit(Event::ScanProgress(count));
            });
        log::info!("Found {} video files", found.len());

        if self.cancelled() {
            self.emit(Event::Cancelled);
            return Ok(());
        }

        // files the store already knows stay as they are
        let known = self.db.known_paths().wrap_err("failed to list known paths")?;
        let before = found.len();
        found.retain(|v| !known.contains(&v.path));
        log::info!(
            "{} already in the store, {} new",
            before - found.len(),
            found.len()
        );

        let videos = self.probe_and_thumbnail(found)?;
        if self.cancelled() {
            self.emit(Event::Cancelled);
            return Ok(());
        }

        self.hash_videos(&videos)?;
        if self.cancelled() {
            self.emit(Event::Cancelled);
            return Ok(());
        }

        log::info!("Detecting duplicates");
        let all = self.db.all_videos().wrap_err("failed to load videos")?;
        let hash_groups = self
            .db
            .all_hash_groups()
            .wrap_err("failed to load hash groups")?;
        let groups = engine::find_duplicates(&all, &hash_groups, &self.settings);
        log::info!("Found {} duplicate groups", groups.len());

        self.db
            .store_duplicate_groups(&groups)
            .wrap_err("failed to store duplicate groups")?;

        self.emit(Event::DuplicatesUpdated(groups));
        Ok(())
    }

    /// Probes every file, renders thumbnails in parallel across files, then
    /// inserts the survivors in scan order.
    fn probe_and_thumbnail(
        &mut self,
        found: Vec<VideoInfo>,
    ) -> eyre::Result<Vec<VideoInfo>> {
        let total = found.len();
        let mut done = 0;
        self.emit(Event::MetadataProgress(done, total));

        let mut probed = Vec::with_capacity(found.len());
        for mut video in found {
            if self.cancelled() {
                return Ok(Vec::new());
            }

            match probe::probe(&mut video) {
                Ok(()) => probed.push(video),
                Err(e) => {
                    log::warn!("Probe failed, skipping {}: {e:#}", video.path.display());
                }
            }
            done += 1;
            self.emit(Event::MetadataProgress(done, total));
        }

        log::info!("Generating thumbnails for {} videos", probed.len());
        let thumbnail_dir = &self.thumbnail_dir;
        let cookie = &self.cookie;
        let count = self.settings.thumbnails_per_video;
        let thumbnails: HashMap<PathBuf, Vec<PathBuf>> = probed
            .par_iter()
            .map(|video| {
                let paths = if cookie.is_terminating() {
                    Vec::new()
                } else {
                    thumbs::generate_thumbnails(video, count, thumbnail_dir, cookie)
                        .unwrap_or_else(|e| {
                            log::warn!(
                                "No thumbnails for {}: {e:#}",
                                video.path.display()
                            );
                            Vec::new()
                        })
                };
                (video.path.clone(), paths)
            })
            .collect();

        for video in probed.iter_mut() {
            if let Some(paths) = thumbnails.get(&video.path) {
                video.thumbnails = paths.clone();
            }
            self.db
                .insert_video(video)
                .wrap_err_with(|| format!("failed to insert {}", video.path.display()))?;
        }

        Ok(probed)
    }

    /// One video at a time; the decoder parallelizes internally. A cancel
    /// observed during a video throws that video's partial hashes away, so
    /// the store only ever holds fully hashed videos.
    fn hash_videos(&mut self, videos: &[VideoInfo]) -> eyre::Result<()> {
        let total = videos.len();
        let mut done = 0;
        self.emit(Event::HashProgress(done, total));

        for video in videos {
            if self.cancelled() {
                return Ok(());
            }

            log::info!("Hashing {}", video.path.display());
            let hashes = match self.settings.method {
                HashMethod::Slow => {
                    slow::decode_and_hash(video, &self.settings, &self.cookie)
                }
                HashMethod::Fast => {
                    fast::decode_and_hash(video, &self.settings, &self.cookie)
                }
            };

            if self.cancelled() {
                return Ok(());
            }

            match hashes {
                Ok(hashes) if hashes.is_empty() => {
                    log::warn!("No hashes came out of {}", video.path.display());
                }
                Ok(hashes) => {
                    self.db.insert_hashes(video.id, &hashes).wrap_err_with(|| {
                        format!("failed to insert hashes of {}", video.path.display())
                    })?;
                }
                Err(e) => {
                    log::warn!("Hashing failed, skipping {}: {e:#}", video.path.display());
                }
            }

            done += 1;
            self.emit(Event::HashProgress(done, total));
        }

        Ok(())
    }
}
