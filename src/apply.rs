// src/apply.rs
//
// Writes a candidate patch into a checked-out source file, leaving a
// `<file>.bak` copy of the original beside it. Restoring is the caller's job.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::state::PatchLevel;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("failed to back up {path}: {source}")]
    Backup { path: PathBuf, source: io::Error },

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("line range {start}-{end} does not fit {path} ({lines} lines)")]
    RangeOutOfBounds {
        path: PathBuf,
        start: usize,
        end: usize,
        lines: usize,
    },

    #[error("{0} is not a backup file")]
    NotABackup(PathBuf),
}

/// Resolves a patch site path against the fixture's working directory.
pub fn resolve_target(work_dir: &Path, file_path: &str) -> PathBuf {
    work_dir.join(file_path.trim_start_matches('/'))
}

pub fn backup_path(target: &Path) -> PathBuf {
    let mut s = target.as_os_str().to_os_string();
    s.push(".bak");
    PathBuf::from(s)
}

pub fn apply(
    level: PatchLevel,
    target: &Path,
    start_line: usize,
    end_line: usize,
    patch: &str,
) -> Result<PathBuf, ApplyError> {
    match level {
        PatchLevel::Line => apply_line(target, start_line, end_line, patch),
        PatchLevel::File => apply_file(target, patch),
    }
}

/// Copies the backup over its original and returns the original's path.
pub fn restore(backup: &Path) -> Result<PathBuf, ApplyError> {
    let raw = backup.as_os_str().to_string_lossy();
    let Some(original) = raw.strip_suffix(".bak") else {
        return Err(ApplyError::NotABackup(backup.to_path_buf()));
    };
    let target = PathBuf::from(original);

    fs::copy(backup, &target).map_err(|source| ApplyError::Write {
        path: target.clone(),
        source,
    })?;
    Ok(target)
}

/* ---------- line level ---------- */

fn apply_line(
    target: &Path,
    start_line: usize,
    end_line: usize,
    patch: &str,
) -> Result<PathBuf, ApplyError> {
    let data = fs::read(target).map_err(|source| ApplyError::Read {
        path: target.to_path_buf(),
        source,
    })?;
    let lines: Vec<&[u8]> = data.split_inclusive(|b| *b == b'\n').collect();

    if start_line == 0 || start_line > end_line || end_line > lines.len() {
        return Err(ApplyError::RangeOutOfBounds {
            path: target.to_path_buf(),
            start: start_line,
            end: end_line,
            lines: lines.len(),
        });
    }

    let backup = make_backup(target)?;

    let body = patch.trim();
    let last = lines[end_line - 1];
    let terminator: &[u8] = if last.ends_with(b"\r\n") {
        b"\r\n"
    } else if last.ends_with(b"\n") {
        b"\n"
    } else {
        b""
    };

    let mut out = Vec::with_capacity(data.len() + body.len());
    let mut patched = false;
    for (idx, line) in lines.iter().enumerate() {
        if start_line - 1 <= idx && idx <= end_line - 1 {
            if !patched {
                if !body.is_empty() {
                    out.extend_from_slice(body.as_bytes());
                    out.extend_from_slice(terminator);
                }
                patched = true;
            }
        } else {
            out.extend_from_slice(line);
        }
    }

    write(target, &out)?;
    Ok(backup)
}

/* ---------- file level ---------- */

fn apply_file(target: &Path, patch: &str) -> Result<PathBuf, ApplyError> {
    let backup = make_backup(target)?;
    write(target, patch.trim().as_bytes())?;
    Ok(backup)
}

/* ---------- helpers ---------- */

fn make_backup(target: &Path) -> Result<PathBuf, ApplyError> {
    let backup = backup_path(target);
    fs::copy(target, &backup).map_err(|source| ApplyError::Backup {
        path: target.to_path_buf(),
        source,
    })?;
    Ok(backup)
}

fn write(target: &Path, bytes: &[u8]) -> Result<(), ApplyError> {
    fs::write(target, bytes).map_err(|source| ApplyError::Write {
        path: target.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "class Foo {\n    int a = 1;\n    int b = 2;\n    int c = 3;\n}\n";

    fn fixture(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Foo.java");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn line_patch_replaces_range_once() {
        let (_dir, path) = fixture(SOURCE);

        let backup = apply(PatchLevel::Line, &path, 2, 3, "    int a = 10;\n    int b = 20;\n").unwrap();

        assert_eq!(backup, backup_path(&path));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "class Foo {\nint a = 10;\n    int b = 20;\n    int c = 3;\n}\n"
        );
        assert_eq!(fs::read_to_string(&backup).unwrap(), SOURCE);
    }

    #[test]
    fn line_patch_then_restore_is_byte_identical() {
        let content = "a\r\nb\r\nc";
        let (_dir, path) = fixture(content);

        for (s, e) in [(1, 1), (2, 3), (1, 3), (3, 3)] {
            let backup = apply(PatchLevel::Line, &path, s, e, "PATCH").unwrap();
            assert_ne!(fs::read(&path).unwrap(), content.as_bytes());
            let restored = restore(&backup).unwrap();
            assert_eq!(restored, path);
            assert_eq!(fs::read(&path).unwrap(), content.as_bytes());
        }
    }

    #[test]
    fn line_patch_keeps_following_line_separate() {
        let (_dir, path) = fixture("a\nb\nc\n");
        apply(PatchLevel::Line, &path, 2, 2, "  X  ").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nX\nc\n");
    }

    #[test]
    fn empty_patch_deletes_range() {
        let (_dir, path) = fixture("a\nb\nc\n");
        apply(PatchLevel::Line, &path, 1, 2, "\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "c\n");
    }

    #[test]
    fn out_of_range_is_rejected_without_touching_file() {
        let (_dir, path) = fixture("a\nb\n");

        for (s, e) in [(0, 1), (2, 1), (2, 3)] {
            let err = apply(PatchLevel::Line, &path, s, e, "X").unwrap_err();
            assert!(matches!(err, ApplyError::RangeOutOfBounds { lines: 2, .. }));
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn file_patch_replaces_everything_and_restores() {
        let (_dir, path) = fixture(SOURCE);

        let backup = apply(PatchLevel::File, &path, 0, 0, "\n\nclass Foo {}\n\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "class Foo {}");

        restore(&backup).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);
    }

    #[test]
    fn restore_requires_bak_suffix() {
        let (_dir, path) = fixture(SOURCE);
        assert!(matches!(restore(&path), Err(ApplyError::NotABackup(_))));
    }

    #[test]
    fn resolve_target_ignores_leading_slash() {
        let root = Path::new("/tmp/Lang_1");
        assert_eq!(
            resolve_target(root, "/src/Foo.java"),
            PathBuf::from("/tmp/Lang_1/src/Foo.java")
        );
        assert_eq!(
            resolve_target(root, "src/Foo.java"),
            PathBuf::from("/tmp/Lang_1/src/Foo.java")
        );
    }
}
