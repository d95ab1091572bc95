//! Placeholder relocation (part of C9, spec §4.8).
//!
//! Bottles are built with two placeholder tokens baked into dynamic
//! library references and scripts: `@@HOMEBREW_PREFIX@@` and
//! `@@HOMEBREW_CELLAR@@`. Installing means rewriting both to this host's
//! real prefix and Cellar path. Mach-O binaries are patched in place via
//! load-command inspection (new path must fit the existing string slot);
//! text files (shebangs, pkg-config files, wrapper scripts) get a plain
//! literal substitution and are rewritten wholesale since their length is
//! free to change.
//!
//! Not grounded in the teacher, whose workspace has no bottle relocation
//! code at all (`build.rs` covers source compilation, not bottle
//! relocation). Enriched from the sibling example
//! `alexykn-sp/sapphire-core/src/build/formula/macho.rs`, which solves the
//! same problem against the same `object` crate API.

use object::read::macho::{FatArch, FatHeader, LoadCommandVariant, MachHeader, MachOFile};
use object::{Endianness, FileKind};
use std::collections::HashMap;
use std::path::Path;
use velo_core::Error;

pub const PLACEHOLDER_PREFIX: &str = "@@HOMEBREW_PREFIX@@";
pub const PLACEHOLDER_CELLAR: &str = "@@HOMEBREW_CELLAR@@";

pub fn placeholder_replacements(prefix: &Path, cellar: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(PLACEHOLDER_PREFIX.to_string(), prefix.display().to_string());
    map.insert(PLACEHOLDER_CELLAR.to_string(), cellar.display().to_string());
    map
}

/// Relocates a single file in place. Returns `Ok(true)` if anything was
/// rewritten, `Ok(false)` if the file contained no placeholders. Per spec
/// §4.8's failure semantics, a relocation failure on one file must not
/// abort the whole install — the caller is expected to log and continue.
pub fn relocate_file(path: &Path, replacements: &HashMap<String, String>) -> Result<bool, Error> {
    let bytes = std::fs::read(path).map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    if bytes.len() < 4 {
        return Ok(false);
    }

    if looks_like_macho(&bytes) {
        patch_macho_file(path, &bytes, replacements)
    } else if is_probably_text(&bytes) {
        patch_text_file(path, &bytes, replacements)
    } else {
        Ok(false)
    }
}

fn looks_like_macho(bytes: &[u8]) -> bool {
    FileKind::parse(bytes).map(|kind| {
        matches!(
            kind,
            FileKind::MachO32 | FileKind::MachO64 | FileKind::MachOFat32 | FileKind::MachOFat64
        )
    })
    .unwrap_or(false)
}

fn is_probably_text(bytes: &[u8]) -> bool {
    bytes.iter().take(4096).all(|b| *b == b'\n' || *b == b'\t' || (0x20..0x7f).contains(b))
}

fn patch_text_file(path: &Path, bytes: &[u8], replacements: &HashMap<String, String>) -> Result<bool, Error> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Ok(false);
    };

    let mut changed = false;
    let mut rewritten = text.to_string();
    for (placeholder, replacement) in replacements {
        if rewritten.contains(placeholder.as_str()) {
            rewritten = rewritten.replace(placeholder.as_str(), replacement);
            changed = true;
        }
    }

    if !changed {
        return Ok(false);
    }

    atomic_write(path, rewritten.as_bytes())?;
    Ok(true)
}

fn patch_macho_file(path: &Path, bytes: &[u8], replacements: &HashMap<String, String>) -> Result<bool, Error> {
    let kind = FileKind::parse(bytes).map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut buffer = bytes.to_vec();
    let changed = match kind {
        FileKind::MachO32 => patch_single_arch::<object::macho::MachHeader32<Endianness>>(&mut buffer, 0, replacements, path)?,
        FileKind::MachO64 => patch_single_arch::<object::macho::MachHeader64<Endianness>>(&mut buffer, 0, replacements, path)?,
        FileKind::MachOFat32 => patch_fat::<object::macho::FatHeader32>(&mut buffer, replacements, path, true)?,
        FileKind::MachOFat64 => patch_fat::<object::macho::FatHeader32>(&mut buffer, replacements, path, false)?,
        _ => false,
    };

    if changed {
        atomic_write(path, &buffer)?;
    }

    Ok(changed)
}

fn patch_fat<T>(
    buffer: &mut [u8],
    replacements: &HashMap<String, String>,
    path: &Path,
    is_32: bool,
) -> Result<bool, Error> {
    let ranges: Vec<(u64, u64)> = if is_32 {
        let (_header, arches) = FatHeader::parse32(&*buffer).map_err(|e| Error::RelocationFailed {
            file: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        arches.iter().map(|a| a.file_range()).collect()
    } else {
        let (_header, arches) = FatHeader::parse64(&*buffer).map_err(|e| Error::RelocationFailed {
            file: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        arches.iter().map(|a| a.file_range()).collect()
    };

    let mut any_changed = false;
    for (offset, size) in ranges {
        let (offset, size) = (offset as usize, size as usize);
        if offset + size > buffer.len() || size < 4 {
            continue;
        }
        let slice = &buffer[offset..offset + size];
        let Ok(kind) = FileKind::parse(slice) else { continue };
        let changed = match kind {
            FileKind::MachO32 => {
                patch_single_arch::<object::macho::MachHeader32<Endianness>>(&mut buffer[offset..offset + size], 0, replacements, path)?
            }
            FileKind::MachO64 => {
                patch_single_arch::<object::macho::MachHeader64<Endianness>>(&mut buffer[offset..offset + size], 0, replacements, path)?
            }
            _ => false,
        };
        any_changed |= changed;
    }

    Ok(any_changed)
}

fn patch_single_arch<Mach: MachHeader<Endian = Endianness>>(
    slice: &mut [u8],
    base_offset: usize,
    replacements: &HashMap<String, String>,
    path: &Path,
) -> Result<bool, Error> {
    let read_slice: &[u8] = slice;
    let file = MachOFile::<Mach, &[u8]>::parse(read_slice).map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let endian = file.endian();

    let mut edits: Vec<(usize, usize, String)> = Vec::new();

    for command in file.macho_load_commands().map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })? {
        let command = command.map_err(|e| Error::RelocationFailed {
            file: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let (string_offset, raw) = match command.variant() {
            Ok(LoadCommandVariant::Dylib(d)) | Ok(LoadCommandVariant::IdDylib(d)) => {
                let Ok(s) = command.string(endian, d.dylib.name) else { continue };
                (d.dylib.name.offset.get(endian), s)
            }
            Ok(LoadCommandVariant::Rpath(r)) => {
                let Ok(s) = command.string(endian, r.path) else { continue };
                (r.path.offset.get(endian), s)
            }
            _ => continue,
        };

        let Ok(original) = std::str::from_utf8(raw) else { continue };
        if let Some(new_path) = substitute(original, replacements) {
            edits.push((string_offset as usize, original.len(), new_path));
        }
    }

    if edits.is_empty() {
        return Ok(false);
    }

    for (offset, allocated_len, new_path) in edits {
        let new_bytes = new_path.as_bytes();
        if new_bytes.len() >= allocated_len {
            return Err(Error::RelocationFailed {
                file: path.to_path_buf(),
                detail: format!(
                    "relocated path '{new_path}' ({} bytes) does not fit existing slot ({allocated_len} bytes)",
                    new_bytes.len()
                ),
            });
        }
        let absolute = base_offset + offset;
        slice[absolute..absolute + new_bytes.len()].copy_from_slice(new_bytes);
        for byte in &mut slice[absolute + new_bytes.len()..absolute + allocated_len] {
            *byte = 0;
        }
    }

    Ok(true)
}

fn substitute(original: &str, replacements: &HashMap<String, String>) -> Option<String> {
    let mut result = original.to_string();
    let mut changed = false;
    for (placeholder, replacement) in replacements {
        if result.contains(placeholder.as_str()) {
            result = result.replace(placeholder.as_str(), replacement);
            changed = true;
        }
    }
    changed.then_some(result)
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    std::io::Write::write_all(&mut tmp, contents).map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    tmp.as_file().sync_all().map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let permissions = std::fs::metadata(path).ok().map(|m| m.permissions());
    tmp.persist(path).map_err(|e| Error::RelocationFailed {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    if let Some(permissions) = permissions {
        let _ = std::fs::set_permissions(path, permissions);
    }

    Ok(())
}
