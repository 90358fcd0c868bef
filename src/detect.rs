// src/detect.rs
// Filename-based stem classification and song grouping

use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::audio::{NUM_STEM_TYPES, StemType};
use crate::error::DetectError;

/// One configurable pattern per stem type; `Other` is the implicit fallback.
pub const NUM_PATTERNS: usize = NUM_STEM_TYPES - 1;

pub const AUDIO_EXTENSIONS: [&str; 7] = ["wav", "mp3", "flac", "ogg", "aiff", "aif", "m4a"];

const DEFAULT_PATTERNS: [&str; NUM_PATTERNS] = [
    r"[ _\-(\[]+(?:vocals?|vox|voice|acapella)[)\]]?",
    r"[ _\-(\[]+(?:drums?|percussion|perc)[)\]]?",
    r"[ _\-(\[]+(?:bass)[)\]]?",
    r"[ _\-(\[]+(?:guitars?|gtr)[)\]]?",
    r"[ _\-(\[]+(?:piano|keys)[)\]]?",
];

/// Trailing keyword of an unclassified stem, stripped from the song name only.
const OTHER_SUFFIX: &str = r"[ _\-(\[]+(?:others?|inst(?:rumental)?|accompaniment)[)\]]?$";

/// A song found on disk: one optional file per stem slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSong {
    pub name: String,
    pub files: [Option<PathBuf>; NUM_STEM_TYPES],
    pub found: [bool; NUM_STEM_TYPES],
}

impl DetectedSong {
    fn new(name: String) -> Self {
        Self {
            name,
            files: Default::default(),
            found: [false; NUM_STEM_TYPES],
        }
    }

    pub fn found_count(&self) -> usize {
        self.found.iter().filter(|&&f| f).count()
    }

    pub fn stems(&self) -> impl Iterator<Item = (StemType, &Path)> {
        StemType::ALL.into_iter().filter_map(|stem| {
            let index = stem.index();
            match &self.files[index] {
                Some(path) if self.found[index] => Some((stem, path.as_path())),
                _ => None,
            }
        })
    }
}

#[derive(Debug, Clone)]
struct StemPattern {
    source: String,
    matcher: Option<Regex>,
}

impl StemPattern {
    /// Compile `source` case-insensitively. Invalid regexes become a literal
    /// substring matcher; an empty pattern never matches.
    fn new(source: &str) -> Self {
        let matcher = if source.trim().is_empty() {
            None
        } else {
            match compile_pattern(source) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    log::warn!("{}; matching it as plain text", e);
                    compile_pattern(&regex::escape(source)).ok()
                }
            }
        };
        Self {
            source: source.to_string(),
            matcher,
        }
    }

    fn find(&self, haystack: &str) -> Option<Range<usize>> {
        self.matcher
            .as_ref()?
            .find(haystack)
            .filter(|m| !m.is_empty())
            .map(|m| m.range())
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, DetectError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| DetectError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Scans folders for stem files and groups them into songs.
#[derive(Debug, Clone)]
pub struct StemDetector {
    patterns: Vec<StemPattern>,
    other_suffix: StemPattern,
}

impl Default for StemDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StemDetector {
    pub fn new() -> Self {
        Self::with_patterns(&Self::default_patterns())
    }

    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut detector = Self {
            patterns: Vec::with_capacity(NUM_PATTERNS),
            other_suffix: StemPattern::new(OTHER_SUFFIX),
        };
        detector.set_patterns(patterns);
        detector
    }

    pub fn default_patterns() -> [String; NUM_PATTERNS] {
        DEFAULT_PATTERNS.map(String::from)
    }

    /// Replace the patterns in priority order (Vocals, Drums, Bass, Guitar, Piano).
    ///
    /// Missing entries keep their default; entries past the fifth are ignored.
    pub fn set_patterns<S: AsRef<str>>(&mut self, patterns: &[S]) {
        if patterns.len() > NUM_PATTERNS {
            log::warn!(
                "Ignoring {} extra stem pattern(s)",
                patterns.len() - NUM_PATTERNS
            );
        }
        self.patterns = (0..NUM_PATTERNS)
            .map(|i| match patterns.get(i) {
                Some(p) => StemPattern::new(p.as_ref()),
                None => StemPattern::new(DEFAULT_PATTERNS[i]),
            })
            .collect();
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.source.clone()).collect()
    }

    pub fn reset_patterns(&mut self) {
        self.set_patterns(&DEFAULT_PATTERNS);
    }

    pub fn stem_type_name(index: usize) -> Option<&'static str> {
        StemType::from_index(index).map(StemType::name)
    }

    pub fn is_audio_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                AUDIO_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
    }

    /// Stem type and song name for a file stem (file name without extension).
    pub fn classify(&self, file_stem: &str) -> (StemType, String) {
        for (index, pattern) in self.patterns.iter().enumerate() {
            if let Some(range) = pattern.find(file_stem) {
                let mut name = String::with_capacity(file_stem.len());
                name.push_str(&file_stem[..range.start]);
                name.push_str(&file_stem[range.end..]);
                let stem = StemType::from_index(index).unwrap_or(StemType::Other);
                return (stem, tidy_song_name(&name, file_stem));
            }
        }
        let name = match self.other_suffix.find(file_stem) {
            Some(range) => &file_stem[..range.start],
            None => file_stem,
        };
        (StemType::Other, tidy_song_name(name, file_stem))
    }

    pub fn detect_stem_type(&self, file_stem: &str) -> StemType {
        self.classify(file_stem).0
    }

    pub fn extract_song_name(&self, file_stem: &str) -> String {
        self.classify(file_stem).1
    }

    /// Group the audio files directly inside `dir` into songs, sorted by name.
    pub fn scan_directory(&self, dir: &Path) -> Vec<DetectedSong> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot scan {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && Self::is_audio_file(path))
            .collect();
        files.sort();

        let mut songs: BTreeMap<String, DetectedSong> = BTreeMap::new();
        for path in files {
            let Some(file_stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let (stem, name) = self.classify(&file_stem);
            let song = songs
                .entry(name.clone())
                .or_insert_with(|| DetectedSong::new(name));

            let index = stem.index();
            if song.found[index] {
                log::debug!(
                    "Ignoring duplicate {} stem for '{}': {}",
                    stem,
                    song.name,
                    path.display()
                );
                continue;
            }
            song.files[index] = Some(path);
            song.found[index] = true;
        }

        let mut songs: Vec<DetectedSong> = songs
            .into_values()
            .filter(|song| song.found_count() > 0)
            .collect();
        songs.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });

        log::info!("Found {} song(s) in {}", songs.len(), dir.display());
        songs
    }
}

fn tidy_song_name(name: &str, file_stem: &str) -> String {
    let trimmed = name.trim_matches(['_', '-', ' ']);
    if trimmed.is_empty() {
        file_stem.to_string()
    } else {
        trimmed.to_string()
    }
}
