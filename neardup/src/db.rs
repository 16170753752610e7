//! The SQLite store: videos, their hash blobs, duplicate groups and the
//! settings record. One connection, used from one thread at a time.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use neardup_common::hashing::hamming::Hamming;
use rusqlite::{params, Connection, OptionalExtension};

use crate::settings::SearchSettings;
use crate::video_info::{HashGroup, VideoInfo};

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode or decode the settings blob")]
    SettingsBlob(#[from] serde_json::Error),
}

pub struct Database {
    conn: Connection,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS video (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        created_at DATETIME,
        modified_at DATETIME,
        video_codec TEXT,
        audio_codec TEXT,
        width INTEGER,
        height INTEGER,
        duration INTEGER NOT NULL,
        size INTEGER NOT NULL,
        bit_rate INTEGER,
        num_hard_links INTEGER,
        inode INTEGER,
        device INTEGER,
        sample_rate_avg INTEGER,
        avg_frame_rate REAL,
        thumbnail_path TEXT
    );
    CREATE TABLE IF NOT EXISTS hash (
        video_id INTEGER PRIMARY KEY,
        hash_blob BLOB NOT NULL,
        FOREIGN KEY(video_id) REFERENCES video(id) ON DELETE CASCADE
    );
    CREATE TABLE IF NOT EXISTS dup_group (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS dup_group_map (
        group_id INTEGER NOT NULL,
        video_id INTEGER NOT NULL,
        PRIMARY KEY (group_id, video_id),
        FOREIGN KEY (group_id) REFERENCES dup_group(id) ON DELETE CASCADE,
        FOREIGN KEY (video_id) REFERENCES video(id) ON DELETE CASCADE
    );
    CREATE TABLE IF NOT EXISTS app_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        json_blob TEXT NOT NULL
    );
";

// thumbnail_path holds several paths in one TEXT column
const THUMB_SEPARATOR: char = ';';

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Inserts the video and stamps its fresh id into it.
    pub fn insert_video(&self, video: &mut VideoInfo) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO video (
                path, created_at, modified_at,
                video_codec, audio_codec, width, height,
                duration, size, bit_rate, num_hard_links,
                inode, device, sample_rate_avg, avg_frame_rate, thumbnail_path
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        )?;
        stmt.execute(params![
            video.path.to_string_lossy().into_owned(),
            video.created_at,
            video.modified_at,
            video.video_codec,
            video.audio_codec,
            video.width,
            video.height,
            video.duration,
            video.size,
            video.bit_rate,
            video.nlinks,
            video.inode,
            video.device,
            video.sample_rate,
            video.avg_frame_rate,
            join_thumbnails(&video.thumbnails),
        ])?;

        video.id = self.conn.last_insert_rowid();
        Ok(())
    }

    pub fn update_video(&self, video: &VideoInfo) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE video SET
                path = ?1, created_at = ?2, modified_at = ?3,
                video_codec = ?4, audio_codec = ?5, width = ?6, height = ?7,
                duration = ?8, size = ?9, bit_rate = ?10, num_hard_links = ?11,
                inode = ?12, device = ?13, sample_rate_avg = ?14,
                avg_frame_rate = ?15, thumbnail_path = ?16
            WHERE id = ?17",
        )?;
        stmt.execute(params![
            video.path.to_string_lossy().into_owned(),
            video.created_at,
            video.modified_at,
            video.video_codec,
            video.audio_codec,
            video.width,
            video.height,
            video.duration,
            video.size,
            video.bit_rate,
            video.nlinks,
            video.inode,
            video.device,
            video.sample_rate,
            video.avg_frame_rate,
            join_thumbnails(&video.thumbnails),
            video.id,
        ])?;
        Ok(())
    }

    pub fn delete_video(&self, video_id: i64) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM video WHERE id = ?1")?
            .execute(params![video_id])?;
        Ok(())
    }

    /// Stores the ordered hash sequence of one video as a little-endian
    /// 8-bytes-per-hash blob. Empty sequences are not stored.
    pub fn insert_hashes(&self, video_id: i64, hashes: &[Hamming]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let mut blob = Vec::with_capacity(hashes.len() * Hamming::BYTES);
        for hash in hashes {
            blob.extend_from_slice(&hash.to_le_bytes());
        }

        self.conn
            .prepare_cached("INSERT INTO hash (video_id, hash_blob) VALUES (?1, ?2)")?
            .execute(params![video_id, blob])?;
        Ok(())
    }

    pub fn all_videos(&self) -> Result<Vec<VideoInfo>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, path, created_at, modified_at,
                    video_codec, audio_codec, width, height,
                    duration, size, bit_rate, num_hard_links,
                    inode, device, sample_rate_avg, avg_frame_rate, thumbnail_path
             FROM video
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(VideoInfo {
                id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                created_at: row.get(2)?,
                modified_at: row.get(3)?,
                video_codec: row.get(4)?,
                audio_codec: row.get(5)?,
                width: row.get(6)?,
                height: row.get(7)?,
                duration: row.get(8)?,
                size: row.get(9)?,
                bit_rate: row.get(10)?,
                nlinks: row.get(11)?,
                inode: row.get(12)?,
                device: row.get(13)?,
                sample_rate: row.get(14)?,
                avg_frame_rate: row.get(15)?,
                thumbnails: split_thumbnails(row.get::<_, Option<String>>(16)?),
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn known_paths(&self) -> Result<HashSet<PathBuf>> {
        let mut stmt = self.conn.prepare_cached("SELECT path FROM video")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    pub fn all_hash_groups(&self) -> Result<Vec<HashGroup>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT video_id, hash_blob FROM hash ORDER BY video_id")?;

        let rows = stmt.query_map([], |row| {
            let video_id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((video_id, blob))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            let (video_id, blob) = row?;
            let hashes: Vec<Hamming> = blob
                .chunks_exact(Hamming::BYTES)
                .map(Hamming::from_le_slice)
                .collect();
            if !hashes.is_empty() {
                groups.push(HashGroup { video_id, hashes });
            }
        }
        Ok(groups)
    }

    /// Replaces the previous generation of duplicate groups with `groups`
    /// atomically: either the old generation stays or the new one is fully in
    /// place.
    pub fn store_duplicate_groups(&mut self, groups: &[Vec<VideoInfo>]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM dup_group", [])?;

        {
            let mut insert_map = tx.prepare_cached(
                "INSERT INTO dup_group_map (group_id, video_id) VALUES (?1, ?2)",
            )?;
            for group in groups {
                tx.execute("INSERT INTO dup_group DEFAULT VALUES", [])?;
                let group_id = tx.last_insert_rowid();
                for video in group {
                    insert_map.execute(params![group_id, video.id])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_duplicate_groups(&self) -> Result<Vec<Vec<VideoInfo>>> {
        let by_id: HashMap<i64, VideoInfo> = self
            .all_videos()?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let mut stmt = self.conn.prepare_cached(
            "SELECT group_id, video_id FROM dup_group_map ORDER BY group_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut groups: Vec<Vec<VideoInfo>> = Vec::new();
        let mut current_group = None;
        for row in rows {
            let (group_id, video_id) = row?;
            if current_group != Some(group_id) {
                groups.push(Vec::new());
                current_group = Some(group_id);
            }
            if let Some(video) = by_id.get(&video_id) {
                groups
                    .last_mut()
                    .expect("a group was just pushed")
                    .push(video.clone());
            }
        }
        Ok(groups)
    }

    /// The stored settings, or the defaults when nothing has been saved yet.
    pub fn load_settings(&self) -> Result<SearchSettings> {
        let blob: Option<String> = self
            .conn
            .prepare_cached("SELECT json_blob FROM app_settings WHERE id = 1")?
            .query_row([], |row| row.get(0))
            .optional()?;

        match blob {
            Some(json) => Ok(SearchSettings::from_json(&json)?),
            None => Ok(SearchSettings::default()),
        }
    }

    pub fn save_settings(&self, settings: &SearchSettings) -> Result<()> {
        let json = settings.to_json()?;
        self.conn
            .prepare_cached(
                "REPLACE INTO app_settings (id, json_blob) VALUES (1, ?1)",
            )?
            .execute(params![json])?;
        Ok(())
    }
}

fn join_thumbnails(thumbnails: &[PathBuf]) -> String {
    thumbnails
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(&THUMB_SEPARATOR.to_string())
}

fn split_thumbnails(column: Option<String>) -> Vec<PathBuf> {
    column
        .unwrap_or_default()
        .split(THUMB_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
