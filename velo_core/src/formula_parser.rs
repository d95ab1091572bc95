//! Formula DSL parser (C3, spec §4.2).
//!
//! Unlike the teacher, which walks a tree-sitter AST of the Ruby grammar,
//! this scans the formula source line by line with a small set of regexes
//! and manual `do`/`end` depth tracking. The DSL subset a formula actually
//! uses is narrow and regular enough that a full parser buys nothing but
//! another dependency; the line scanner is also far easier to extend when
//! a tap uses a construct we don't recognize yet — it just falls through.

use crate::formula::{Bottle, ConstraintOp, Dependency, DependencyKind, Formula, Platform, VersionConstraint};
use crate::Error;
use regex::Regex;
use std::sync::LazyLock;

static CLASS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*class\s+\w+\s*<\s*Formula"#).unwrap());
static DESC_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*desc\s+"(.*)"\s*$"#).unwrap());
static HOMEPAGE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*homepage\s+"(.*)"\s*$"#).unwrap());
static URL_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*url\s+"(.*)"\s*$"#).unwrap());
/// VCS fallback form: `url "...git", tag: "v1.0", revision: "..."`. Homebrew
/// formulas for git-only sources use this instead of a tarball `url`.
static URL_LINE_VCS_TAGGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*url\s+"([^"]+)"\s*,\s*tag:\s*"([^"]*)"(?:\s*,\s*revision:\s*"[^"]*")?\s*$"#).unwrap()
});
/// Looser catch-all for the same form when no `tag:` is present (e.g. just
/// `branch:` or `using:`); captures the url and drops the rest.
static URL_LINE_VCS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*url\s+"([^"]+)"\s*,.*$"#).unwrap());
static SHA256_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*sha256\s+"([0-9a-fA-F]{64})"\s*$"#).unwrap());
static VERSION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*version\s+"(.*)"\s*$"#).unwrap());
static REVISION_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*revision\s+(\d+)\s*$"#).unwrap());
static REBUILD_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*rebuild\s+(\d+)\s*$"#).unwrap());
static BOTTLE_DO_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*bottle\s+do\s*$"#).unwrap());
static BOTTLE_SHA_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*sha256\s+cellar:\s*:any(?:_skip_relocation)?,\s*(\w+):\s*"([0-9a-fA-F]{64})"\s*$"#).unwrap());
/// Matches both `depends_on "name"` and `depends_on "name" => :build`; the
/// quoted part may itself carry a trailing version predicate (`"name >= 1.2"`).
static DEPENDS_ON_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*depends_on\s+"([^"]+)"\s*(?:=>\s*:(\w+))?\s*$"#).unwrap());
static VERSION_PREDICATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(>=|<=|~>|>|<|=|\^)\s*(.+)$"#).unwrap());
static POST_INSTALL_DEF_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*def\s+post_install\s*$"#).unwrap());
static DO_OPENER_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\bdo\s*(\|[^|]*\|)?\s*$"#).unwrap());
static END_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*end\s*$"#).unwrap());

/// Parses a single formula's Ruby-DSL source into a [`Formula`].
///
/// `name` is the formula name the caller expects (derived from the tap's
/// file path, e.g. `Formula/r/ripgrep.rb` -> `ripgrep`); it is trusted over
/// whatever class name appears in the source.
pub fn parse_ruby_formula(source: &str, name: &str) -> Result<Formula, Error> {
    if !source.lines().any(|l| CLASS_LINE.is_match(l)) {
        return Err(Error::FormulaParseError {
            name: name.to_string(),
            detail: "no `class ... < Formula` declaration found".to_string(),
        });
    }

    let mut description = None;
    let mut homepage = None;
    let mut source_url = None;
    let mut source_sha256 = None;
    let mut explicit_version = None;
    let mut revision: u32 = 0;
    let mut rebuild: u32 = 0;
    let mut dependencies = Vec::new();
    let mut bottles = Vec::new();
    let mut post_install_lines: Vec<String> = Vec::new();
    let mut vcs_tag: Option<String> = None;

    let mut in_bottle_block = false;
    let mut in_post_install = false;
    let mut skip_depth: u32 = 0;

    for raw_line in source.lines() {
        let line = raw_line;

        // Skip over any other `do ... end` / `def ... end` block bodies we
        // don't understand (on_macos, on_linux, resource blocks, etc.) so
        // their contents can never be misread as top-level fields.
        if skip_depth > 0 {
            if DO_OPENER_LINE.is_match(line) || is_block_opener(line) {
                skip_depth += 1;
            } else if END_LINE.is_match(line) {
                skip_depth -= 1;
            }
            continue;
        }

        if in_bottle_block {
            if END_LINE.is_match(line) {
                in_bottle_block = false;
                continue;
            }
            if let Some(caps) = REBUILD_LINE.captures(line) {
                rebuild = caps[1].parse().unwrap_or(0);
                continue;
            }
            if let Some(caps) = BOTTLE_SHA_LINE.captures(line) {
                let tag = &caps[1];
                let hash = &caps[2];
                if let Some(platform) = Platform::from_tag(tag) {
                    bottles.push(Bottle {
                        sha256: hash.to_string(),
                        platform,
                    });
                }
                continue;
            }
            continue;
        }

        if in_post_install {
            if END_LINE.is_match(line) {
                in_post_install = false;
                continue;
            }
            post_install_lines.push(line.trim().to_string());
            continue;
        }

        if BOTTLE_DO_LINE.is_match(line) {
            in_bottle_block = true;
            continue;
        }

        if POST_INSTALL_DEF_LINE.is_match(line) {
            in_post_install = true;
            continue;
        }

        if let Some(caps) = DESC_LINE.captures(line) {
            description = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = HOMEPAGE_LINE.captures(line) {
            homepage = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = URL_LINE.captures(line) {
            source_url = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = URL_LINE_VCS_TAGGED.captures(line) {
            source_url = Some(caps[1].to_string());
            vcs_tag = Some(caps[2].to_string());
            continue;
        }
        if let Some(caps) = URL_LINE_VCS.captures(line) {
            source_url = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = SHA256_LINE.captures(line) {
            source_sha256 = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = VERSION_LINE.captures(line) {
            explicit_version = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = REVISION_LINE.captures(line) {
            revision = caps[1].parse().unwrap_or(0);
            continue;
        }
        if let Some(caps) = DEPENDS_ON_LINE.captures(line) {
            let (dep_name, constraints) = parse_dependency_spec(&caps[1]);
            let kind = match caps.get(2).map(|m| m.as_str()) {
                Some("build") => DependencyKind::Build,
                Some("optional") => DependencyKind::Optional,
                Some("recommended") => DependencyKind::Recommended,
                _ => DependencyKind::Required,
            };
            dependencies.push(Dependency {
                name: dep_name,
                kind,
                constraints,
            });
            continue;
        }

        if is_block_opener(line) {
            skip_depth = 1;
        }
    }

    let source_url = source_url.ok_or_else(|| Error::FormulaParseError {
        name: name.to_string(),
        detail: "missing `url` declaration".to_string(),
    })?;
    let source_sha256 = source_sha256.ok_or_else(|| Error::FormulaParseError {
        name: name.to_string(),
        detail: "missing top-level `sha256` declaration".to_string(),
    })?;

    let raw_version = explicit_version
        .or_else(|| extract_version_from_url(&source_url))
        .or_else(|| vcs_tag.as_deref().map(|t| t.trim_start_matches('v').to_string()))
        .ok_or_else(|| Error::FormulaParseError {
            name: name.to_string(),
            detail: "could not determine version from `version` field or `url`".to_string(),
        })?;

    // `rebuild N` inside the bottle block and `revision N` both feed the
    // same `_N` suffix; a bottle rebuild takes precedence if both are set.
    let effective_revision = if rebuild > 0 { rebuild } else { revision };
    let version = crate::version::Version::with_revision(&raw_version, effective_revision)
        .as_str()
        .to_string();

    let post_install_script = if post_install_lines.is_empty() {
        None
    } else {
        Some(post_install_lines.join("\n"))
    };

    Ok(Formula {
        name: name.to_string(),
        description,
        homepage,
        source_url,
        source_sha256,
        version,
        post_install_script,
        dependencies,
        bottles,
    })
}

/// True for any DSL line that opens an unrecognized `do`/`def` block we
/// need to skip wholesale (`on_macos do`, `resource "..." do`, `def install`,
/// `head do`). A `head do` body describes a HEAD-only build with its own
/// `url`/`depends_on` lines that must never leak into the stable formula.
fn is_block_opener(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("bottle do") || trimmed.starts_with("def post_install") {
        return false;
    }
    if trimmed.starts_with("def ") {
        return true;
    }
    (trimmed.starts_with("on_") || trimmed.starts_with("resource") || trimmed.starts_with("head"))
        && DO_OPENER_LINE.is_match(line)
}

/// Ordered list of version-extraction regexes applied to a source URL when
/// no explicit `version` field is present, tried in order from most to
/// least specific. The first match wins.
static VERSION_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // vX.Y.Z or X.Y.Z immediately before a known archive extension or path end.
        Regex::new(r"[-_/]v?(\d+\.\d+(?:\.\d+)?(?:\.\d+)?)(?:[-_.](?:tar|zip|gz|tgz|xz|bz2)|/|$)").unwrap(),
        // Date-stamped releases: YYYYMMDD or YYYY-MM-DD.
        Regex::new(r"[-_/](\d{4}-\d{2}-\d{2})(?:[-_.]|/|$)").unwrap(),
        Regex::new(r"[-_/](\d{8})(?:[-_.]|/|$)").unwrap(),
        // Revision-only tags: rN.
        Regex::new(r"[-_/]r(\d+)(?:[-_.]|/|$)").unwrap(),
        // Dotted version with a trailing letter, e.g. v1.2.3a.
        Regex::new(r"[-_/]v?(\d+\.\d+\.\d+[a-z])(?:[-_.]|/|$)").unwrap(),
        // Underscore-separated numeric version, e.g. 1_2_3.
        Regex::new(r"[-_/](\d+_\d+(?:_\d+)?)(?:[-_.]|/|$)").unwrap(),
        // Bare integer tag as a last resort, e.g. /42/archive.tar.gz.
        Regex::new(r"[-_/](\d+)(?:[-_.](?:tar|zip|gz|tgz|xz|bz2)|/|$)").unwrap(),
    ]
});

/// Splits a `depends_on` quoted spec into the bare name and any trailing
/// version predicate, e.g. `"cmake >= 3.20"` -> (`cmake`, `[>= 3.20]`).
fn parse_dependency_spec(spec: &str) -> (String, Vec<VersionConstraint>) {
    let spec = spec.trim();
    let Some((name, rest)) = spec.split_once(char::is_whitespace) else {
        return (spec.to_string(), Vec::new());
    };

    match VERSION_PREDICATE.captures(rest.trim()) {
        Some(caps) => {
            let op = match &caps[1] {
                ">=" => ConstraintOp::Ge,
                "<=" => ConstraintOp::Le,
                ">" => ConstraintOp::Gt,
                "<" => ConstraintOp::Lt,
                "=" => ConstraintOp::Eq,
                "~>" => ConstraintOp::Tilde,
                "^" => ConstraintOp::Caret,
                _ => unreachable!("VERSION_PREDICATE only captures the operators listed above"),
            };
            (name.to_string(), vec![VersionConstraint { op, version: caps[2].trim().to_string() }])
        }
        None => (spec.to_string(), Vec::new()),
    }
}

fn extract_version_from_url(url: &str) -> Option<String> {
    for re in VERSION_REGEXES.iter() {
        if let Some(caps) = re.captures(url) {
            let raw = caps.get(1)?.as_str();
            return Some(raw.replace('_', "."));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_formula() {
        let source = r#"
class Ripgrep < Formula
  desc "Search tool"
  homepage "https://example.com"
  url "https://example.com/ripgrep-15.1.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"

  bottle do
    sha256 cellar: :any, arm64_sonoma: "1111111111111111111111111111111111111111111111111111111111111111"
    sha256 cellar: :any, sonoma: "2222222222222222222222222222222222222222222222222222222222222222"
  end

  depends_on "pcre2"
end
"#;
        let formula = parse_ruby_formula(source, "ripgrep").unwrap();
        assert_eq!(formula.name, "ripgrep");
        assert_eq!(formula.description.as_deref(), Some("Search tool"));
        assert_eq!(formula.version, "15.1.0");
        assert_eq!(formula.bottles.len(), 2);
        assert_eq!(formula.dependencies.len(), 1);
        assert_eq!(formula.dependencies[0].kind, DependencyKind::Required);
    }

    #[test]
    fn build_dependency_is_tagged() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
  depends_on "rust" => :build
  depends_on "openssl" => :recommended
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.dependencies[0].kind, DependencyKind::Build);
        assert_eq!(formula.dependencies[1].kind, DependencyKind::Recommended);
        assert!(formula.runtime_dependency_names().is_empty());
    }

    #[test]
    fn depends_on_version_predicate_is_captured() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
  depends_on "cmake >= 3.20" => :build
  depends_on "zlib ~> 1.2"
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.dependencies[0].name, "cmake");
        assert_eq!(formula.dependencies[0].kind, DependencyKind::Build);
        assert_eq!(formula.dependencies[0].constraints.len(), 1);
        assert_eq!(formula.dependencies[0].constraints[0].op, crate::formula::ConstraintOp::Ge);
        assert_eq!(formula.dependencies[0].constraints[0].version, "3.20");

        assert_eq!(formula.dependencies[1].name, "zlib");
        assert_eq!(formula.dependencies[1].kind, DependencyKind::Required);
        assert_eq!(formula.dependencies[1].constraints[0].op, crate::formula::ConstraintOp::Tilde);
    }

    #[test]
    fn revision_appends_suffix_to_version() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
  revision 2
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.version, "1.0.0_2");
    }

    #[test]
    fn explicit_version_overrides_url_extraction() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-latest.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
  version "9.9.9"
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.version, "9.9.9");
    }

    #[test]
    fn missing_class_declaration_is_parse_error() {
        let err = parse_ruby_formula("# not a formula\n", "foo").unwrap_err();
        assert!(matches!(err, Error::FormulaParseError { .. }));
    }

    #[test]
    fn missing_url_is_parse_error() {
        let source = r#"
class Foo < Formula
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
end
"#;
        let err = parse_ruby_formula(source, "foo").unwrap_err();
        assert!(matches!(err, Error::FormulaParseError { .. }));
    }

    #[test]
    fn on_macos_block_contents_are_not_mistaken_for_top_level_fields() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"

  on_linux do
    depends_on "glibc"
  end

  depends_on "zlib"
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.dependencies.len(), 1);
        assert_eq!(formula.dependencies[0].name, "zlib");
    }

    #[test]
    fn head_do_block_contents_are_not_mistaken_for_top_level_fields() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"

  head do
    url "https://github.com/foo/foo.git", branch: "main"
    depends_on "cmake" => :build
  end

  depends_on "zlib"
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.source_url, "https://example.com/foo-1.0.0.tar.gz");
        assert_eq!(formula.dependencies.len(), 1);
        assert_eq!(formula.dependencies[0].name, "zlib");
    }

    #[test]
    fn vcs_tag_url_form_is_parsed_and_tag_is_version_fallback() {
        let source = r#"
class Foo < Formula
  url "https://github.com/foo/foo.git", tag: "v1.2.3", revision: "abcdef1234567890"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.source_url, "https://github.com/foo/foo.git");
        assert_eq!(formula.version, "1.2.3");
    }

    #[test]
    fn post_install_script_is_captured_verbatim() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"

  def post_install
    (var/"foo").mkpath
  end
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.post_install_script.as_deref(), Some("(var/\"foo\").mkpath"));
    }

    #[test]
    fn extracts_version_from_python_style_url() {
        assert_eq!(
            extract_version_from_url("https://example.com/Python-3.12.0.tgz"),
            Some("3.12.0".to_string())
        );
    }

    #[test]
    fn extracts_version_from_jq_style_url() {
        assert_eq!(
            extract_version_from_url("https://github.com/jqlang/jq/archive/jq-1.7.1.tar.gz"),
            Some("1.7.1".to_string())
        );
    }

    #[test]
    fn extracts_date_stamped_version() {
        assert_eq!(
            extract_version_from_url("https://example.com/tool-2024-03-15.tar.gz"),
            Some("2024-03-15".to_string())
        );
    }

    #[test]
    fn rebuild_takes_precedence_over_revision() {
        let source = r#"
class Foo < Formula
  url "https://example.com/foo-1.0.0.tar.gz"
  sha256 "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
  revision 1

  bottle do
    rebuild 3
    sha256 cellar: :any, arm64_sonoma: "1111111111111111111111111111111111111111111111111111111111111111"
  end
end
"#;
        let formula = parse_ruby_formula(source, "foo").unwrap();
        assert_eq!(formula.version, "1.0.0_3");
    }
}
