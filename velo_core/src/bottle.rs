//! Bottle selection (C5, spec §4.4).
//!
//! Picks the best [`Bottle`] for the running host out of a formula's bottle
//! list: native arch+OS exact match first, then the universal `all` tag,
//! then (Arm64 hosts only) the newest compatible x86_64 tag reachable via
//! Rosetta 2.

use crate::formula::{Bottle, Formula, Platform};
use crate::host::{Arch, HostIdentity};
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedBottle {
    pub sha256: String,
    pub platform: Platform,
    pub via_rosetta: bool,
}

/// Selects the bottle this host should download, per the priority order in
/// spec §4.4: exact arch+OS match, then `all`, then Rosetta fallback to the
/// newest x86_64 tag. Returns [`Error::NoCompatibleBottle`] if nothing
/// qualifies, listing every platform tag the formula does publish.
pub fn select_bottle(formula: &Formula, host: &HostIdentity) -> Result<SelectedBottle, Error> {
    if let Some(bottle) = exact_match(formula, host) {
        return Ok(SelectedBottle {
            sha256: bottle.sha256.clone(),
            platform: bottle.platform,
            via_rosetta: false,
        });
    }

    if let Some(bottle) = formula.bottles.iter().find(|b| b.platform.is_universal()) {
        return Ok(SelectedBottle {
            sha256: bottle.sha256.clone(),
            platform: bottle.platform,
            via_rosetta: false,
        });
    }

    if host.arch == Arch::Arm64 {
        if let Some(bottle) = newest_rosetta_candidate(formula) {
            return Ok(SelectedBottle {
                sha256: bottle.sha256.clone(),
                platform: bottle.platform,
                via_rosetta: true,
            });
        }
    }

    Err(Error::NoCompatibleBottle {
        name: formula.name.clone(),
        available_platforms: formula.bottles.iter().map(|b| b.platform.tag().to_string()).collect(),
    })
}

fn exact_match<'a>(formula: &'a Formula, host: &HostIdentity) -> Option<&'a Bottle> {
    formula
        .bottles
        .iter()
        .filter(|b| b.platform.arch() == host.arch && !b.platform.is_universal())
        .filter(|b| b.platform.os_major().map(|major| major <= host.os_major).unwrap_or(false))
        .max_by_key(|b| b.platform.os_major())
}

/// The newest x86_64 tag in the formula's bottle list, used as a Rosetta
/// fallback on Arm64 hosts. Unlike `exact_match`, this ignores the host's
/// OS major entirely: Rosetta translation is independent of the host OS.
fn newest_rosetta_candidate(formula: &Formula) -> Option<&Bottle> {
    formula
        .bottles
        .iter()
        .filter(|b| b.platform.arch() == Arch::X86_64 && !b.platform.is_universal())
        .max_by_key(|b| b.platform.os_major())
}

/// Whether a formula has at least one bottle an Arm64 host could install
/// through Rosetta 2, independent of whether a native bottle also exists.
pub fn has_rosetta_compatible_bottle(formula: &Formula) -> bool {
    newest_rosetta_candidate(formula).is_some()
}

/// Constructs the content-addressed registry URL for a bottle per spec §6:
/// `https://<registry>/v2/<namespace>/<path>/blobs/sha256:<hash>`, splitting
/// a `name@slot` formula name into its path segment per the registry's
/// per-package namespacing.
pub fn bottle_url(registry_base: &str, namespace: &str, formula: &Formula, bottle: &Bottle) -> String {
    let name = formula.base_name();
    match formula.version_slot() {
        Some(slot) => format!("{registry_base}/v2/{namespace}/{name}/{slot}/blobs/sha256:{}", bottle.sha256),
        None => format!("{registry_base}/v2/{namespace}/{name}/blobs/sha256:{}", bottle.sha256),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Dependency;

    fn formula_with(bottles: Vec<Bottle>) -> Formula {
        Formula {
            name: "ripgrep".to_string(),
            source_url: "https://example.com/ripgrep.tar.gz".to_string(),
            source_sha256: "a".repeat(64),
            version: "15.1.0".to_string(),
            dependencies: Vec::<Dependency>::new(),
            bottles,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_exact_arch_and_os_match() {
        let formula = formula_with(vec![
            Bottle { sha256: "sonoma-hash".to_string(), platform: Platform::Arm64Sonoma },
            Bottle { sha256: "sequoia-hash".to_string(), platform: Platform::Arm64Sequoia },
        ]);
        let host = HostIdentity::with_values(Arch::Arm64, 14);

        let selected = select_bottle(&formula, &host).unwrap();
        assert_eq!(selected.sha256, "sonoma-hash");
        assert!(!selected.via_rosetta);
    }

    #[test]
    fn newer_host_os_picks_newest_compatible_tag() {
        let formula = formula_with(vec![
            Bottle { sha256: "sonoma-hash".to_string(), platform: Platform::Arm64Sonoma },
            Bottle { sha256: "sequoia-hash".to_string(), platform: Platform::Arm64Sequoia },
        ]);
        let host = HostIdentity::with_values(Arch::Arm64, 15);

        let selected = select_bottle(&formula, &host).unwrap();
        assert_eq!(selected.sha256, "sequoia-hash");
    }

    #[test]
    fn falls_back_to_universal_tag() {
        let formula = formula_with(vec![Bottle { sha256: "all-hash".to_string(), platform: Platform::All }]);
        let host = HostIdentity::with_values(Arch::Arm64, 14);

        let selected = select_bottle(&formula, &host).unwrap();
        assert_eq!(selected.sha256, "all-hash");
    }

    #[test]
    fn arm64_host_falls_back_to_rosetta_x86_64() {
        let formula = formula_with(vec![Bottle { sha256: "x86-hash".to_string(), platform: Platform::Sonoma }]);
        let host = HostIdentity::with_values(Arch::Arm64, 14);

        let selected = select_bottle(&formula, &host).unwrap();
        assert_eq!(selected.sha256, "x86-hash");
        assert!(selected.via_rosetta);
        assert!(has_rosetta_compatible_bottle(&formula));
    }

    #[test]
    fn x86_64_host_never_gets_rosetta_fallback() {
        let formula = formula_with(vec![Bottle { sha256: "arm-hash".to_string(), platform: Platform::Arm64Sonoma }]);
        let host = HostIdentity::with_values(Arch::X86_64, 23);

        let err = select_bottle(&formula, &host).unwrap_err();
        assert!(matches!(err, Error::NoCompatibleBottle { .. }));
    }

    #[test]
    fn no_bottles_is_no_compatible_bottle_error() {
        let formula = formula_with(vec![]);
        let host = HostIdentity::with_values(Arch::Arm64, 14);

        let err = select_bottle(&formula, &host).unwrap_err();
        match err {
            Error::NoCompatibleBottle { name, available_platforms } => {
                assert_eq!(name, "ripgrep");
                assert!(available_platforms.is_empty());
            }
            _ => panic!("wrong error variant"),
        }
    }

    #[test]
    fn bottle_url_is_flat_for_unslotted_names() {
        let formula = formula_with(vec![]);
        let bottle = Bottle { sha256: "deadbeef".to_string(), platform: Platform::Arm64Sonoma };
        let url = bottle_url("https://ghcr.io", "homebrew", &formula, &bottle);
        assert_eq!(url, "https://ghcr.io/v2/homebrew/ripgrep/blobs/sha256:deadbeef");
    }

    #[test]
    fn bottle_url_splits_version_slot_name() {
        let mut formula = formula_with(vec![]);
        formula.name = "python@3.11".to_string();
        let bottle = Bottle { sha256: "deadbeef".to_string(), platform: Platform::Arm64Sonoma };
        let url = bottle_url("https://ghcr.io", "homebrew", &formula, &bottle);
        assert_eq!(url, "https://ghcr.io/v2/homebrew/python/3.11/blobs/sha256:deadbeef");
    }
}
