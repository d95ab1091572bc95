//! Archive extraction (part of C9, spec §6: bottles are gzipped tarballs).

use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;
use velo_core::Error;

/// Extracts a gzip-compressed tarball into `dest`, which must already
/// exist. Returns `dest` on success; the caller is responsible for
/// promoting the extracted tree into its final location atomically.
pub fn extract_tarball(tarball: &Path, dest: &Path) -> Result<PathBuf, Error> {
    let name = tarball
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| tarball.display().to_string());

    let file = File::open(tarball).map_err(|e| Error::ExtractionFailed {
        name: name.clone(),
        detail: e.to_string(),
    })?;

    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    archive.unpack(dest).map_err(|e| Error::ExtractionFailed {
        name,
        detail: e.to_string(),
    })?;

    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn make_tarball(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_files_from_a_gzipped_tarball() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball_path = tmp.path().join("bottle.tar.gz");
        make_tarball(&tarball_path, &[("bin/tool", b"#!/bin/sh\necho hi\n")]);

        let dest = tmp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();

        extract_tarball(&tarball_path, &dest).unwrap();

        let extracted = dest.join("bin/tool");
        assert!(extracted.is_file());
        assert_eq!(std::fs::read(&extracted).unwrap(), b"#!/bin/sh\necho hi\n");
    }

    #[test]
    fn missing_tarball_is_extraction_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_tarball(&tmp.path().join("nope.tar.gz"), tmp.path()).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[test]
    fn corrupt_tarball_is_extraction_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball_path = tmp.path().join("bad.tar.gz");
        std::fs::write(&tarball_path, b"not a gzip stream").unwrap();

        let err = extract_tarball(&tarball_path, tmp.path()).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }
}
