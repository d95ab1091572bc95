//! Version comparison for formula versions.
//!
//! Versions follow a modified semver format:
//! - Basic: `1.2.3`
//! - With a revision suffix: `1.2.3_1` (appended when a formula's `revision N`
//!   field is non-zero)
//! - With prerelease: `1.2.3-beta1`
//! - HEAD versions: `HEAD`, `HEAD-abc123`
//!
//! Comparison rules:
//! - Numeric components compared numerically: `1.10.0 > 1.9.0`
//! - Revision suffix is separate: `1.0.0_2 > 1.0.0_1 > 1.0.0`
//! - Prerelease comes before release: `1.0.0-beta < 1.0.0`

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    components: Vec<VersionComponent>,
    prerelease: Vec<VersionComponent>,
    revision: u32,
    original: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum VersionComponent {
    Numeric(u64),
    Alpha(String),
}

impl VersionComponent {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionComponent::Numeric(a), VersionComponent::Numeric(b)) => a.cmp(b),
            (VersionComponent::Alpha(a), VersionComponent::Alpha(b)) => a.cmp(b),
            (VersionComponent::Numeric(_), VersionComponent::Alpha(_)) => Ordering::Less,
            (VersionComponent::Alpha(_), VersionComponent::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl Version {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let original = s.to_string();

        if s.starts_with("HEAD") {
            return Version {
                components: vec![VersionComponent::Alpha("HEAD".to_string())],
                prerelease: vec![],
                revision: 0,
                original,
            };
        }

        let (version_part, revision) = if let Some(idx) = s.rfind('_') {
            let rev_str = &s[idx + 1..];
            if let Ok(r) = rev_str.parse::<u32>() {
                (&s[..idx], r)
            } else {
                (s, 0)
            }
        } else {
            (s, 0)
        };

        let (main_part, prerelease) = if let Some(idx) = version_part.find('-') {
            let prerelease_str = &version_part[idx + 1..];
            (&version_part[..idx], parse_components(prerelease_str))
        } else {
            (version_part, vec![])
        };

        let components = parse_components(main_part);

        Version {
            components,
            prerelease,
            revision,
            original,
        }
    }

    /// Build a version string with an explicit revision, matching the
    /// formula parser's `revision N` -> `version_N` rule.
    pub fn with_revision(version: &str, revision: u32) -> Self {
        if revision == 0 {
            return Version::parse(version);
        }
        Version::parse(&format!("{version}_{revision}"))
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_older_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}

use std::fmt;

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let max_len = self.components.len().max(other.components.len());

        for i in 0..max_len {
            let a = self.components.get(i);
            let b = other.components.get(i);

            match (a, b) {
                (Some(a), Some(b)) => {
                    let cmp = a.cmp(b);
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
                (None, None) => break,
            }
        }

        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {
                let pre_max_len = self.prerelease.len().max(other.prerelease.len());
                for i in 0..pre_max_len {
                    let a = self.prerelease.get(i);
                    let b = other.prerelease.get(i);

                    match (a, b) {
                        (Some(a), Some(b)) => {
                            let cmp = a.cmp(b);
                            if cmp != Ordering::Equal {
                                return cmp;
                            }
                        }
                        (Some(_), None) => return Ordering::Greater,
                        (None, Some(_)) => return Ordering::Less,
                        (None, None) => break,
                    }
                }
            }
            (true, true) => {}
        }

        self.revision.cmp(&other.revision)
    }
}

fn parse_components(s: &str) -> Vec<VersionComponent> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut in_numeric = false;

    for c in s.chars() {
        if c == '.' || c == '-' || c == '+' {
            if !current.is_empty() {
                components.push(parse_component(&current));
                current.clear();
            }
            in_numeric = false;
        } else if c.is_ascii_digit() {
            if !in_numeric && !current.is_empty() {
                components.push(parse_component(&current));
                current.clear();
            }
            in_numeric = true;
            current.push(c);
        } else if c.is_alphanumeric() {
            if in_numeric && !current.is_empty() {
                components.push(parse_component(&current));
                current.clear();
            }
            in_numeric = false;
            current.push(c);
        }
    }

    if !current.is_empty() {
        components.push(parse_component(&current));
    }

    components
}

fn parse_component(s: &str) -> VersionComponent {
    if let Ok(n) = s.parse::<u64>() {
        VersionComponent::Numeric(n)
    } else {
        VersionComponent::Alpha(s.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_version() {
        let v = Version::parse("1.2.3");
        assert_eq!(v.components.len(), 3);
        assert_eq!(v.revision, 0);
    }

    #[test]
    fn parses_version_with_revision_suffix() {
        let v = Version::parse("1.0.0_1");
        assert_eq!(v.revision, 1);
        let v2 = Version::parse("1.0.0_23");
        assert_eq!(v2.revision, 23);
    }

    #[test]
    fn with_revision_appends_suffix() {
        let v = Version::with_revision("8.0.1", 1);
        assert_eq!(v.as_str(), "8.0.1_1");
        let v0 = Version::with_revision("8.0.1", 0);
        assert_eq!(v0.as_str(), "8.0.1");
    }

    #[test]
    fn compares_simple_versions() {
        assert!(Version::parse("1.0.0") < Version::parse("1.0.1"));
        assert!(Version::parse("1.0.0") < Version::parse("1.1.0"));
        assert!(Version::parse("1.9.0") < Version::parse("1.10.0"));
    }

    #[test]
    fn compares_versions_with_revision() {
        assert!(Version::parse("1.0.0") < Version::parse("1.0.0_1"));
        assert!(Version::parse("1.0.0_1") < Version::parse("1.0.0_2"));
    }

    #[test]
    fn compares_versions_with_different_lengths() {
        assert!(Version::parse("1.0") < Version::parse("1.0.1"));
        assert!(Version::parse("1.0.0.0") > Version::parse("1.0.0"));
    }

    #[test]
    fn handles_alpha_components() {
        assert!(Version::parse("1.0.0-beta") < Version::parse("1.0.0"));
        assert!(Version::parse("1.0.0-alpha") < Version::parse("1.0.0-beta"));
    }

    #[test]
    fn handles_head_versions() {
        let v = Version::parse("HEAD");
        assert_eq!(v.original, "HEAD");
        let v2 = Version::parse("HEAD-abc123");
        assert_eq!(v2.original, "HEAD-abc123");
    }

    #[test]
    fn is_older_than_works() {
        assert!(Version::parse("1.0.0").is_older_than(&Version::parse("1.0.1")));
        assert!(!Version::parse("1.0.1").is_older_than(&Version::parse("1.0.0")));
    }
}
