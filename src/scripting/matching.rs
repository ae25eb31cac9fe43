//! Ownership rules between an extension unit and the filesystem.
//!
//! A unit at `dir/widget.unit` has the stem path `dir/widget`. File rules
//! compare names of files sitting next to the unit; directory rules compare
//! directories against the stem path. Files in other directories are judged
//! by the directory rule applied to their parent.

use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PathMatchingMode: u8 {
        /// A sibling file named exactly like the unit stem (`widget`).
        const EXACT_FILE_MATCH = 1;
        /// The directory at the stem path itself.
        const EXACT_DIR_MATCH = 1 << 1;
        /// Sibling files whose stem or name equals the unit stem (`widget.html`).
        const ANY_MATCHING_FILE_NAME = 1 << 2;
        /// The directory at the stem path and everything below it.
        const ANY_MATCHING_DIR_OR_SUB_DIR = 1 << 3;

        const EXACT_MATCH = Self::EXACT_FILE_MATCH.bits() | Self::EXACT_DIR_MATCH.bits();
        const ANY_MATCHING = Self::ANY_MATCHING_FILE_NAME.bits() | Self::ANY_MATCHING_DIR_OR_SUB_DIR.bits();
        const ANY_FILE_EXACT_DIR = Self::ANY_MATCHING_FILE_NAME.bits() | Self::EXACT_DIR_MATCH.bits();
        const EXACT_FILE_ANY_DIR = Self::EXACT_FILE_MATCH.bits() | Self::ANY_MATCHING_DIR_OR_SUB_DIR.bits();
    }
}

impl PathMatchingMode {
    pub const DEFAULT: Self = Self::ANY_MATCHING;

    /// Whether `candidate` (a file or directory) is owned by the unit whose
    /// source lives at `unit_path`. Both must exist.
    pub fn matches(self, unit_path: &Path, candidate: &Path) -> bool {
        if !unit_path.is_file() {
            return false;
        }
        let Ok(metadata) = std::fs::metadata(candidate) else {
            return false;
        };

        let stem_path = unit_path.with_extension("");
        if metadata.is_dir() {
            return self.dir_matches(&stem_path, candidate);
        }

        match (candidate.parent(), unit_path.parent()) {
            (Some(candidate_dir), Some(unit_dir)) if candidate_dir != unit_dir => {
                self.dir_matches(&stem_path, candidate_dir)
            }
            (Some(_), Some(_)) => self.file_matches(unit_path, candidate),
            _ => false,
        }
    }

    fn dir_matches(self, stem_path: &Path, dir: &Path) -> bool {
        let stem = lowered_components(stem_path);
        let dir = lowered_components(dir);
        if self.contains(Self::ANY_MATCHING_DIR_OR_SUB_DIR) {
            dir.len() >= stem.len() && dir[..stem.len()] == stem[..]
        } else if self.contains(Self::EXACT_DIR_MATCH) {
            dir == stem
        } else {
            false
        }
    }

    fn file_matches(self, unit_path: &Path, file: &Path) -> bool {
        let Some(unit_stem) = unit_path.file_stem() else {
            return false;
        };
        let exact = file.file_name() == Some(unit_stem);
        if self.contains(Self::ANY_MATCHING_FILE_NAME) {
            exact || file.file_stem() == Some(unit_stem)
        } else if self.contains(Self::EXACT_FILE_MATCH) {
            exact
        } else {
            false
        }
    }
}

impl Default for PathMatchingMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn lowered_components(path: &Path) -> Vec<String> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown path matching mode `{0}`")]
pub struct ParseModeError(pub String);

impl FromStr for PathMatchingMode {
    type Err = ParseModeError;

    /// Accepts names like `AnyMatching`, `any-matching` or `any_matching`,
    /// combined with `|`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('|').try_fold(Self::empty(), |mode, part| {
            let key: String = part
                .trim()
                .chars()
                .filter(|c| !matches!(c, '-' | '_' | ' '))
                .collect::<String>()
                .to_lowercase();
            let flag = match key.as_str() {
                "exactfilematch" => Self::EXACT_FILE_MATCH,
                "exactdirmatch" => Self::EXACT_DIR_MATCH,
                "anymatchingfilename" => Self::ANY_MATCHING_FILE_NAME,
                "anymatchingdirorsubdir" => Self::ANY_MATCHING_DIR_OR_SUB_DIR,
                "exactmatch" => Self::EXACT_MATCH,
                "anymatching" => Self::ANY_MATCHING,
                "anyfileexactdir" => Self::ANY_FILE_EXACT_DIR,
                "exactfileanydir" => Self::EXACT_FILE_ANY_DIR,
                "default" => Self::DEFAULT,
                _ => return Err(ParseModeError(part.trim().to_string())),
            };
            Ok(mode | flag)
        })
    }
}

/// Decides which filesystem entries a unit owns.
#[derive(Clone)]
pub enum PathMatcher {
    Mode(PathMatchingMode),
    /// `(unit_path, candidate) -> owned`
    Custom(Arc<dyn Fn(&Path, &Path) -> bool + Send + Sync>),
}

impl PathMatcher {
    pub fn custom(f: impl Fn(&Path, &Path) -> bool + Send + Sync + 'static) -> Self {
        PathMatcher::Custom(Arc::new(f))
    }

    pub fn matches(&self, unit_path: &Path, candidate: &Path) -> bool {
        match self {
            PathMatcher::Mode(mode) => mode.matches(unit_path, candidate),
            PathMatcher::Custom(f) => f(unit_path, candidate),
        }
    }
}

impl From<PathMatchingMode> for PathMatcher {
    fn from(mode: PathMatchingMode) -> Self {
        PathMatcher::Mode(mode)
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMatcher::Mode(mode) => f.debug_tuple("Mode").field(mode).finish(),
            PathMatcher::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
