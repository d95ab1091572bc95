//! Tap index (C4, spec §4.3): reads formula files out of a tap already
//! present on disk under the Paths' `taps/` directory. Acquiring a tap
//! (cloning it from GitHub) is out of this crate's scope per spec §1; the
//! teacher's `tap.rs` is entirely acquisition-oriented (GitHub clone +
//! fetch), so this module's read-side logic is original, grounded only in
//! the teacher's directory-layout conventions (`TapManager::formula_dir`,
//! `formula_path`).

use crate::traits::FileSystem;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use velo_core::formula::Formula;
use velo_core::formula_parser::parse_ruby_formula;
use velo_core::Error;

#[derive(Debug, Clone)]
pub struct TapIndex {
    taps_dir: PathBuf,
}

impl TapIndex {
    pub fn new(taps_dir: impl Into<PathBuf>) -> Self {
        TapIndex { taps_dir: taps_dir.into() }
    }

    /// `taps/<org>/<repo>` for a tap named `org/repo`.
    pub fn tap_dir(&self, tap: &str) -> Result<PathBuf, Error> {
        let (org, repo) = split_tap_name(tap)?;
        Ok(self.taps_dir.join(org).join(repo))
    }

    pub fn formula_dir(&self, tap: &str) -> Result<PathBuf, Error> {
        Ok(self.tap_dir(tap)?.join("Formula"))
    }

    /// Resolves the on-disk path of `name` within `tap`, detecting at read
    /// time whether the tap uses Homebrew's newer sharded layout
    /// (`Formula/<first-letter>/<name>.rb`) or the older flat layout
    /// (`Formula/<name>.rb`) — whichever file actually exists wins, with
    /// the sharded path checked first since it's the current convention.
    pub fn formula_path(&self, tap: &str, name: &str) -> Result<Option<PathBuf>, Error> {
        let dir = self.formula_dir(tap)?;
        let base = name.split('@').next().unwrap_or(name);
        let Some(first_letter) = base.chars().next() else {
            return Ok(None);
        };

        let sharded = dir.join(first_letter.to_lowercase().to_string()).join(format!("{name}.rb"));
        if sharded.is_file() {
            return Ok(Some(sharded));
        }

        let flat = dir.join(format!("{name}.rb"));
        if flat.is_file() {
            return Ok(Some(flat));
        }

        Ok(None)
    }

    pub fn find(&self, tap: &str, name: &str) -> Result<Formula, Error> {
        let Some(path) = self.formula_path(tap, name)? else {
            return Err(Error::FormulaNotFound {
                name: name.to_string(),
                suggestions: self.suggest(tap, name).unwrap_or_default(),
            });
        };

        let source = std::fs::read_to_string(&path).map_err(|e| Error::FormulaParseError {
            name: name.to_string(),
            detail: e.to_string(),
        })?;

        parse_ruby_formula(&source, name)
    }

    /// `taps/<org>/<repo>/.index_cache.json` — the on-disk cache
    /// `build_full_index` persists so repeated lookups don't re-walk and
    /// re-parse the whole tap.
    fn cache_path(&self, tap: &str) -> Result<PathBuf, Error> {
        Ok(self.tap_dir(tap)?.join(".index_cache.json"))
    }

    /// Reads and parses every formula in the tap, then writes the result to
    /// an on-disk cache (spec §4.3: "`build_full_index()`... populates an
    /// on-disk cache"). Per-formula parse errors don't abort the whole
    /// index: a single bad formula shouldn't make the rest of the tap
    /// unusable, so failures are logged and skipped.
    pub fn build_full_index(&self, tap: &str) -> Result<BTreeMap<String, Formula>, Error> {
        let dir = self.formula_dir(tap)?;
        if !dir.is_dir() {
            return Ok(BTreeMap::new());
        }

        let mut index = BTreeMap::new();
        for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rb") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else { continue };

            match std::fs::read_to_string(path) {
                Ok(source) => match parse_ruby_formula(&source, name) {
                    Ok(formula) => {
                        index.insert(name.to_string(), formula);
                    }
                    Err(e) => eprintln!("warning: skipping unparsable formula '{name}': {e}"),
                },
                Err(e) => eprintln!("warning: could not read formula '{name}': {e}"),
            }
        }

        if let Err(e) = self.write_cache(tap, &index) {
            eprintln!("warning: failed to persist tap index cache for '{tap}': {e}");
        }

        Ok(index)
    }

    /// Loads the on-disk index cache for `tap` if present, without touching
    /// the filesystem beyond the cache file itself. Returns `None` on a
    /// cache miss or a stale/corrupt cache, so callers fall back to
    /// [`build_full_index`].
    pub fn load_cached_index(&self, tap: &str) -> Option<BTreeMap<String, Formula>> {
        let path = self.cache_path(tap).ok()?;
        let bytes = std::fs::read(&path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn write_cache(&self, tap: &str, index: &BTreeMap<String, Formula>) -> Result<(), Error> {
        let path = self.cache_path(tap)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| Error::ExtractionFailed {
            name: dir.display().to_string(),
            detail: e.to_string(),
        })?;
        let json = serde_json::to_vec_pretty(index).map_err(|e| Error::ExtractionFailed {
            name: path.display().to_string(),
            detail: format!("failed to serialize tap index cache: {e}"),
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::ExtractionFailed {
            name: path.display().to_string(),
            detail: e.to_string(),
        })?;
        std::io::Write::write_all(&mut tmp, &json).map_err(|e| Error::ExtractionFailed {
            name: path.display().to_string(),
            detail: e.to_string(),
        })?;
        tmp.persist(&path).map_err(|e| Error::ExtractionFailed {
            name: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(())
    }

    /// Forces a rebuild of the on-disk index cache from the tap's current
    /// contents. Spec §4.3: "the index must be refreshable without
    /// deleting installed packages" — this only touches the cache file, so
    /// the Cellar and receipts are untouched either way.
    pub fn refresh_index(&self, tap: &str) -> Result<BTreeMap<String, Formula>, Error> {
        self.build_full_index(tap)
    }

    /// spec §4.3: substring search over formula names, optionally extended
    /// to each formula's parsed `desc`. A query wrapped in `/slashes/` is
    /// treated as a regex instead of a literal substring (teacher's
    /// `search.rs` convention); an invalid pattern falls back to matching
    /// the query literally rather than erroring.
    pub fn search(&self, tap: &str, query: &str, include_descriptions: bool) -> Result<Vec<String>, Error> {
        let index = self.build_full_index(tap)?;

        let names = index.iter().filter(|(name, formula)| {
            let haystacks = std::iter::once(name.as_str())
                .chain(if include_descriptions { formula.description.as_deref() } else { None });
            match regex_query(query) {
                Some(re) => haystacks.clone().any(|h| re.is_match(h)),
                None => haystacks.any(|h| h.contains(query)),
            }
        });
        Ok(names.map(|(name, _)| name.clone()).collect())
    }

    fn suggest(&self, tap: &str, name: &str) -> Result<Vec<String>, Error> {
        let index = self.build_full_index(tap)?;
        Ok(index
            .keys()
            .filter(|candidate| candidate.starts_with(name) || name.starts_with(candidate.as_str()))
            .take(3)
            .cloned()
            .collect())
    }

    pub fn is_tapped(&self, tap: &str) -> bool {
        self.tap_dir(tap).map(|d| d.is_dir()).unwrap_or(false)
    }
}

/// A query wrapped in `/slashes/` is compiled as a regex; anything else
/// (including an invalid pattern) is treated as a plain substring.
fn regex_query(query: &str) -> Option<Regex> {
    let trimmed = query.trim();
    if trimmed.len() > 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
        Regex::new(&trimmed[1..trimmed.len() - 1]).ok()
    } else {
        None
    }
}

fn split_tap_name(tap: &str) -> Result<(&str, &str), Error> {
    let mut parts = tap.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(org), Some(repo)) if !org.is_empty() && !repo.is_empty() => Ok((org, repo)),
        _ => Err(Error::InvalidTapName { spec: tap.to_string() }),
    }
}

/// A `FileSystem`-backed writer for laying down formula files in tests
/// without touching the real filesystem trait impl used elsewhere.
pub fn write_formula(fs: &dyn FileSystem, dir: &Path, name: &str, source: &str) -> std::io::Result<()> {
    fs.create_dir_all(dir)?;
    fs.write(&dir.join(format!("{name}.rb")), source.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StdFileSystem;

    const SAMPLE: &str = r#"
class Tree < Formula
  url "https://example.com/tree-2.1.1.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
end
"#;

    #[test]
    fn finds_formula_in_sharded_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap().join("t");
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();

        let formula = index.find("homebrew/core", "tree").unwrap();
        assert_eq!(formula.version, "2.1.1");
    }

    #[test]
    fn finds_formula_in_flat_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();

        let formula = index.find("homebrew/core", "tree").unwrap();
        assert_eq!(formula.version, "2.1.1");
    }

    #[test]
    fn sharded_layout_is_preferred_when_both_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let flat_dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &flat_dir, "tree", SAMPLE).unwrap();
        let sharded_dir = flat_dir.join("t");
        write_formula(&StdFileSystem, &sharded_dir, "tree", "class Tree < Formula\nurl \"https://example.com/tree-9.9.9.tar.gz\"\nsha256 \"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\"\nend\n").unwrap();

        let formula = index.find("homebrew/core", "tree").unwrap();
        assert_eq!(formula.version, "9.9.9");
    }

    #[test]
    fn missing_formula_reports_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let err = index.find("homebrew/core", "nonexistent").unwrap_err();
        assert!(matches!(err, Error::FormulaNotFound { .. }));
    }

    #[test]
    fn invalid_tap_name_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let err = index.find("not-a-valid-tap", "tree").unwrap_err();
        assert!(matches!(err, Error::InvalidTapName { .. }));
    }

    #[test]
    fn build_full_index_skips_unparsable_formula() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();
        write_formula(&StdFileSystem, &dir, "broken", "not a formula at all").unwrap();

        let full_index = index.build_full_index("homebrew/core").unwrap();
        assert_eq!(full_index.len(), 1);
        assert!(full_index.contains_key("tree"));
    }

    #[test]
    fn build_full_index_persists_an_on_disk_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();

        assert!(index.load_cached_index("homebrew/core").is_none());
        let built = index.build_full_index("homebrew/core").unwrap();

        let cached = index.load_cached_index("homebrew/core").unwrap();
        assert_eq!(cached, built);
        assert!(index.cache_path("homebrew/core").unwrap().is_file());
    }

    #[test]
    fn refresh_index_rebuilds_cache_without_touching_cellar() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();
        index.build_full_index("homebrew/core").unwrap();

        write_formula(&StdFileSystem, &dir, "wget", SAMPLE).unwrap();
        let refreshed = index.refresh_index("homebrew/core").unwrap();

        assert_eq!(refreshed.len(), 2);
        let cached = index.load_cached_index("homebrew/core").unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn search_matches_substring() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();

        let results = index.search("homebrew/core", "tre", false).unwrap();
        assert_eq!(results, vec!["tree".to_string()]);
    }

    const DESCRIBED: &str = r#"
class Tree < Formula
  desc "Display directories as trees"
  url "https://example.com/tree-2.1.1.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
end
"#;

    #[test]
    fn search_without_descriptions_ignores_description_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", DESCRIBED).unwrap();

        let results = index.search("homebrew/core", "directories", false).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn search_with_descriptions_matches_parsed_desc() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", DESCRIBED).unwrap();

        let results = index.search("homebrew/core", "directories", true).unwrap();
        assert_eq!(results, vec!["tree".to_string()]);
    }

    #[test]
    fn search_accepts_a_slash_wrapped_regex_query() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();
        write_formula(&StdFileSystem, &dir, "wget", SAMPLE).unwrap();

        let results = index.search("homebrew/core", "/^(tre|wg)/", false).unwrap();
        assert_eq!(results, vec!["tree".to_string(), "wget".to_string()]);
    }

    #[test]
    fn search_falls_back_to_literal_on_invalid_regex() {
        let tmp = tempfile::tempdir().unwrap();
        let index = TapIndex::new(tmp.path());
        let dir = index.formula_dir("homebrew/core").unwrap();
        write_formula(&StdFileSystem, &dir, "tree", SAMPLE).unwrap();

        // "/(unterminated/" is slash-wrapped but not a valid pattern; it
        // should be treated as a literal (and thus match nothing here)
        // instead of propagating a regex compile error.
        let results = index.search("homebrew/core", "/(unterminated/", false).unwrap();
        assert!(results.is_empty());
    }
}
