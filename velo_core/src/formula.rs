//! In-memory formula model (C2, spec §3).
//!
//! Field set follows spec §3 directly rather than the Homebrew-API JSON
//! shape (`Versions`/`SourceUrls`/etc.): formulae here come from parsing
//! Ruby-DSL tap files (C3), not from a JSON API response.

use serde::{Deserialize, Serialize};

pub const ZERO_SHA256: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub source_url: String,
    pub source_sha256: String,
    pub version: String,
    #[serde(default)]
    pub post_install_script: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub bottles: Vec<Bottle>,
}

impl Formula {
    /// Runtime (`required`) dependencies, the only edges the install core
    /// traverses (build deps are recorded but not followed).
    pub fn required_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| d.kind == DependencyKind::Required)
    }

    /// Runtime (`required`) dependency names, the only edges the install
    /// core traverses (spec §3: build deps are recorded but not followed).
    pub fn runtime_dependency_names(&self) -> Vec<&str> {
        self.required_dependencies().map(|d| d.name.as_str()).collect()
    }

    /// True if `source_sha256` is the all-zero VCS placeholder.
    pub fn has_placeholder_sha256(&self) -> bool {
        self.source_sha256 == ZERO_SHA256
    }

    /// The bare package name, stripped of any `@version_slot` suffix.
    pub fn base_name(&self) -> &str {
        self.name.split('@').next().unwrap_or(&self.name)
    }

    /// The `@version_slot` suffix, e.g. `"3.11"` for `python@3.11`, if any.
    pub fn version_slot(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, slot)| slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Required,
    Recommended,
    Optional,
    Build,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub kind: DependencyKind,
    #[serde(default)]
    pub constraints: Vec<VersionConstraint>,
}

impl Dependency {
    pub fn required(name: impl Into<String>) -> Self {
        Dependency {
            name: name.into(),
            kind: DependencyKind::Required,
            constraints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Tilde,
    Caret,
}

impl VersionConstraint {
    /// Whether `version` satisfies this predicate. `~>` and `^` are treated
    /// as a lower bound, same as `>=`: this installer has no notion of an
    /// allowed-upgrade ceiling to narrow them further than that.
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        let version = crate::version::Version::parse(version);
        let bound = crate::version::Version::parse(&self.version);
        match self.op {
            ConstraintOp::Ge | ConstraintOp::Tilde | ConstraintOp::Caret => version >= bound,
            ConstraintOp::Le => version <= bound,
            ConstraintOp::Gt => version > bound,
            ConstraintOp::Lt => version < bound,
            ConstraintOp::Eq => version == bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottle {
    pub sha256: String,
    pub platform: Platform,
}

/// Closed platform enum (spec §3). Each variant carries an OS major and an
/// architecture tag used by the bottle selector (C5, `crate::bottle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Arm64Monterey,
    Arm64Ventura,
    Arm64Sonoma,
    Arm64Sequoia,
    Monterey,
    Ventura,
    Sonoma,
    Sequoia,
    BigSur,
    Catalina,
    Mojave,
    All,
}

impl Platform {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "arm64_monterey" => Platform::Arm64Monterey,
            "arm64_ventura" => Platform::Arm64Ventura,
            "arm64_sonoma" => Platform::Arm64Sonoma,
            "arm64_sequoia" => Platform::Arm64Sequoia,
            "monterey" => Platform::Monterey,
            "ventura" => Platform::Ventura,
            "sonoma" => Platform::Sonoma,
            "sequoia" => Platform::Sequoia,
            "big_sur" => Platform::BigSur,
            "catalina" => Platform::Catalina,
            "mojave" => Platform::Mojave,
            "all" => Platform::All,
            _ => return None,
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Platform::Arm64Monterey => "arm64_monterey",
            Platform::Arm64Ventura => "arm64_ventura",
            Platform::Arm64Sonoma => "arm64_sonoma",
            Platform::Arm64Sequoia => "arm64_sequoia",
            Platform::Monterey => "monterey",
            Platform::Ventura => "ventura",
            Platform::Sonoma => "sonoma",
            Platform::Sequoia => "sequoia",
            Platform::BigSur => "big_sur",
            Platform::Catalina => "catalina",
            Platform::Mojave => "mojave",
            Platform::All => "all",
        }
    }

    /// OS major version this tag requires, or `None` for the architecture-
    /// independent `all` tag.
    pub fn os_major(&self) -> Option<u32> {
        match self {
            Platform::Mojave => Some(9),
            Platform::Catalina => Some(10),
            Platform::BigSur => Some(11),
            Platform::Monterey | Platform::Arm64Monterey => Some(12),
            Platform::Ventura | Platform::Arm64Ventura => Some(13),
            Platform::Sonoma | Platform::Arm64Sonoma => Some(14),
            Platform::Sequoia | Platform::Arm64Sequoia => Some(15),
            Platform::All => None,
        }
    }

    pub fn arch(&self) -> crate::host::Arch {
        match self {
            Platform::Arm64Monterey
            | Platform::Arm64Ventura
            | Platform::Arm64Sonoma
            | Platform::Arm64Sequoia => crate::host::Arch::Arm64,
            Platform::All => crate::host::Arch::Arm64, // universal: reachable from either
            _ => crate::host::Arch::X86_64,
        }
    }

    pub fn is_universal(&self) -> bool {
        matches!(self, Platform::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_tag_round_trips() {
        for tag in [
            "arm64_monterey",
            "arm64_ventura",
            "arm64_sonoma",
            "arm64_sequoia",
            "monterey",
            "ventura",
            "sonoma",
            "sequoia",
            "big_sur",
            "catalina",
            "mojave",
            "all",
        ] {
            let platform = Platform::from_tag(tag).unwrap();
            assert_eq!(platform.tag(), tag);
        }
    }

    #[test]
    fn unknown_platform_tag_is_none() {
        assert!(Platform::from_tag("linux_x86_64").is_none());
    }

    #[test]
    fn runtime_dependency_names_excludes_build_deps() {
        let formula = Formula {
            name: "ripgrep".to_string(),
            source_url: "https://example.com".to_string(),
            source_sha256: "a".repeat(64),
            version: "15.1.0".to_string(),
            dependencies: vec![
                Dependency::required("pcre2"),
                Dependency {
                    name: "rust".to_string(),
                    kind: DependencyKind::Build,
                    constraints: Vec::new(),
                },
            ],
            ..Default::default()
        };

        assert_eq!(formula.runtime_dependency_names(), vec!["pcre2"]);
    }

    #[test]
    fn base_name_strips_version_slot() {
        let formula = Formula {
            name: "python@3.11".to_string(),
            ..Default::default()
        };
        assert_eq!(formula.base_name(), "python");
    }

    #[test]
    fn version_constraint_ge_is_satisfied_by_newer_and_equal() {
        let c = VersionConstraint { op: ConstraintOp::Ge, version: "1.2.0".to_string() };
        assert!(c.is_satisfied_by("1.2.0"));
        assert!(c.is_satisfied_by("1.3.0"));
        assert!(!c.is_satisfied_by("1.1.0"));
    }

    #[test]
    fn version_constraint_lt_rejects_equal_and_newer() {
        let c = VersionConstraint { op: ConstraintOp::Lt, version: "2.0.0".to_string() };
        assert!(c.is_satisfied_by("1.9.0"));
        assert!(!c.is_satisfied_by("2.0.0"));
        assert!(!c.is_satisfied_by("2.0.1"));
    }

    #[test]
    fn has_placeholder_sha256_detects_zero_hash() {
        let formula = Formula {
            source_sha256: ZERO_SHA256.to_string(),
            ..Default::default()
        };
        assert!(formula.has_placeholder_sha256());
    }
}
