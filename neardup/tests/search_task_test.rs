use std::path::PathBuf;
use std::sync::mpsc;

use neardup::db::Database;
use neardup::search_task::{Event, SearchTask};
use neardup::settings::SearchSettings;
use neardup::video_info::VideoInfo;
use neardup_common::bin_common::termination::Cookie;
use neardup_common::hashing::hamming::Hamming;

struct Fixture {
    _dir: tempfile::TempDir,
    db_path: PathBuf,
    thumb_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("videos.db");
        let thumb_dir = dir.path().join("thumbs");
        Self {
            _dir: dir,
            db_path,
            thumb_dir,
        }
    }

    fn open(&self) -> Database {
        Database::open(&self.db_path).unwrap()
    }

    fn run(&self, settings: SearchSettings, cookie: Cookie) -> Vec<Event> {
        let (tx, rx) = mpsc::channel();
        let task = SearchTask::new(
            self.open(),
            self.db_path.clone(),
            settings,
            self.thumb_dir.clone(),
            cookie,
            tx,
        );
        task.run().unwrap();
        rx.into_iter().collect()
    }
}

fn seed_video(db: &Database, path: &str, hashes: &[u64]) -> i64 {
    let mut video = VideoInfo {
        path: PathBuf::from(path),
        duration: 60,
        size: 1_000_000,
        ..VideoInfo::default()
    };
    db.insert_video(&mut video).unwrap();
    let hashes: Vec<Hamming> = hashes.iter().map(|&h| Hamming(h)).collect();
    db.insert_hashes(video.id, &hashes).unwrap();
    video.id
}

#[test]
fn empty_input_produces_an_empty_update_and_no_rows() {
    let fixture = Fixture::new();

    let mut settings = SearchSettings::default();
    settings.directories = vec![];
    settings.compile_patterns().unwrap();

    let events = fixture.run(settings, Cookie::detached());

    assert!(
        !events.iter().any(|e| matches!(e, Event::ScanProgress(_))),
        "nothing should have been found"
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DuplicatesUpdated(groups) if groups.is_empty())));

    let db = fixture.open();
    assert!(db.all_videos().unwrap().is_empty());
    assert!(db.load_duplicate_groups().unwrap().is_empty());
}

#[test]
fn cancelled_run_leaves_the_store_alone() {
    let fixture = Fixture::new();
    {
        let db = fixture.open();
        seed_video(&db, "/v/a.mp4", &[1, 2, 3]);
    }

    let mut settings = SearchSettings::default();
    settings.compile_patterns().unwrap();

    let cookie = Cookie::detached();
    cookie.cancel();
    let events = fixture.run(settings, cookie);

    assert!(events.iter().any(|e| matches!(e, Event::Cancelled)));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, Event::DuplicatesUpdated(_))),
        "a cancelled run must not publish results"
    );

    let db = fixture.open();
    assert_eq!(1, db.all_videos().unwrap().len());
    assert!(db.load_duplicate_groups().unwrap().is_empty());
}

#[test]
fn detection_runs_over_previously_stored_hashes() {
    let fixture = Fixture::new();
    let (a, b, c, lone) = {
        let db = fixture.open();
        // a matches b, b matches c, a and c share nothing
        let a = seed_video(&db, "/v/a.mp4", &[0x00ff, 0x00ee, 0x00dd]);
        let b = seed_video(
            &db,
            "/v/b.mp4",
            &[0x00ff, 0x00ee, 0x00dd, 0xaa00_0000, 0xbb00_0000, 0xcc00_0000],
        );
        let c = seed_video(&db, "/v/c.mp4", &[0xaa00_0000, 0xbb00_0000, 0xcc00_0000]);
        let lone = seed_video(&db, "/v/lone.mp4", &[0x1234_5678_9abc_def0]);
        (a, b, c, lone)
    };

    let mut settings = SearchSettings::default();
    settings.hamming_threshold = 4;
    settings.matching_threshold_number = 3;
    settings.compile_patterns().unwrap();

    let events = fixture.run(settings, Cookie::detached());

    let groups = events
        .iter()
        .find_map(|e| match e {
            Event::DuplicatesUpdated(groups) => Some(groups.clone()),
            _ => None,
        })
        .expect("the run must publish groups");

    assert_eq!(1, groups.len());
    let mut members: Vec<i64> = groups[0].iter().map(|v| v.id).collect();
    members.sort();
    assert_eq!(vec![a, b, c], members);
    assert!(!members.contains(&lone));

    // and the same generation is persisted
    let db = fixture.open();
    let stored = db.load_duplicate_groups().unwrap();
    assert_eq!(1, stored.len());
    let mut stored_members: Vec<i64> = stored[0].iter().map(|v| v.id).collect();
    stored_members.sort();
    assert_eq!(members, stored_members);
}

#[test]
fn each_run_replaces_the_previous_generation() {
    let fixture = Fixture::new();
    {
        let db = fixture.open();
        seed_video(&db, "/v/a.mp4", &[10, 20, 30]);
        seed_video(&db, "/v/b.mp4", &[10, 20, 30]);
    }

    let mut settings = SearchSettings::default();
    settings.matching_threshold_number = 3;
    settings.compile_patterns().unwrap();

    fixture.run(settings.clone(), Cookie::detached());
    fixture.run(settings, Cookie::detached());

    let db = fixture.open();
    let stored = db.load_duplicate_groups().unwrap();
    assert_eq!(1, stored.len(), "old generations must not accumulate");
    assert_eq!(2, stored[0].len());
}
