//! Custom assertions for containers, directories and event streams

use chapter_dl::Event;
use std::fs::File;
use std::path::Path;
use tokio::sync::broadcast;

/// Entry names of a container in stored order
pub fn container_entries(path: &Path) -> Vec<String> {
    let file = File::open(path).unwrap_or_else(|e| panic!("open {}: {e}", path.display()));
    let mut archive = zip::ZipArchive::new(file).expect("valid container");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

/// Sorted file names of a directory
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("read {}: {e}", dir.display()))
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Drain every event currently buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Assert that progress events of `chapter` never go backwards and end at `expected`
pub fn assert_monotonic_progress(events: &[Event], chapter: &str, expected: usize) {
    let mut last = 0;
    for event in events {
        if let Event::Progress {
            chapter: c, done, ..
        } = event
            && c == chapter
        {
            assert!(*done > last, "progress went from {last} to {done} for {chapter}");
            last = *done;
        }
    }
    assert_eq!(last, expected, "final progress of {chapter}");
}

/// Assert no `.part` file remains anywhere under `dir`
pub fn assert_no_partial_files(dir: &Path) {
    if !dir.exists() {
        return;
    }
    for entry in std::fs::read_dir(dir).expect("read dir").flatten() {
        let path = entry.path();
        if path.is_dir() {
            assert_no_partial_files(&path);
        } else {
            assert_ne!(
                path.extension().and_then(|e| e.to_str()),
                Some("part"),
                "leftover partial file {}",
                path.display()
            );
        }
    }
}
