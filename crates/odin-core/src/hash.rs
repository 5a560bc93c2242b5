//! SHA-1 hashing of files and argument vectors.
//!
//! These digests feed the task fingerprints used by the hash cache: the
//! argument hash covers the container command line, and the file hash covers
//! the sorted, recursively expanded contents of the declared input or output
//! paths.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

const BLOCK_SIZE: usize = 1024;

/// Update `hasher` with the contents of one file.
pub fn hash_file(path: &Path, hasher: &mut Sha1) -> std::io::Result<()> {
    let mut file = File::open(path)?;
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(())
}

/// Hash a list of files and directories.
///
/// Directories are expanded recursively; the expanded list is sorted so the
/// digest does not depend on declaration or traversal order. Paths that do
/// not exist are skipped with a warning.
pub fn hash_files<I, P>(files: I) -> String
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut expanded = expand_dirs(files);
    expanded.sort();
    let mut hasher = Sha1::new();
    for path in expanded {
        if let Err(err) = hash_file(&path, &mut hasher) {
            tracing::warn!(path = %path.display(), error = %err, "failed to hash file");
        }
    }
    hex::encode(hasher.finalize())
}

/// Expand directories into the files they contain, recursively.
pub fn expand_dirs<I, P>(files: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut out = Vec::new();
    for file in files {
        let path = file.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "requested hash of a missing path");
            continue;
        }
        if path.is_dir() {
            expand_dir(path, &mut out);
        } else {
            out.push(path.to_path_buf());
        }
    }
    out
}

fn expand_dir(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "failed to read directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            expand_dir(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Hash the command and arguments of a container.
pub fn hash_args(command: &[String], args: &[String]) -> String {
    let mut hasher = Sha1::new();
    for part in command.iter().chain(args) {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Hash an arbitrary string payload.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn directory_hash_matches_sorted_file_list() {
        let dir = std::env::temp_dir().join(format!("odin-hash-{}", std::process::id()));
        let sub = dir.join("sub");
        fs::create_dir_all(&sub).unwrap();
        let a = write(&dir, "a.txt", "alpha");
        let b = write(&dir, "b.txt", "beta");
        let c = write(&sub, "c.txt", "gamma");

        let by_dir = hash_files([&dir]);
        let by_files = hash_files([&a, &b, &c]);
        assert_eq!(by_dir, by_files);

        // Declaration order must not matter.
        let reordered = hash_files([&c, &a, &b]);
        assert_eq!(by_dir, reordered);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_paths_are_skipped() {
        let empty: [&Path; 0] = [];
        assert_eq!(hash_files(["/no/such/path/anywhere"]), hash_files(empty));
    }

    #[test]
    fn arg_hash_covers_command_and_args() {
        let command = vec!["odin-train".to_string()];
        let args = vec!["--epochs".to_string(), "5".to_string()];
        let same = hash_args(&command, &args);
        assert_eq!(same, hash_args(&command, &args));
        assert_ne!(
            same,
            hash_args(&command, &["--epochs".to_string(), "6".to_string()])
        );
    }
}
