//! Helpers for bots that draw their content from files

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use rand::Rng;

/// Pick a uniformly random line from `path` without reading it all into memory
///
/// The trailing newline is stripped. Blank lines count as lines.
///
/// # Errors
///
/// Returns the I/O error if the file can't be read, or an `InvalidInput` error
/// if it has no lines.
pub fn random_line(path: &Path) -> io::Result<String> {
    random_line_with(path, &mut rand::thread_rng())
}

/// [`random_line`] with a caller-supplied generator
pub fn random_line_with<R: Rng + ?Sized>(path: &Path, rng: &mut R) -> io::Result<String> {
    let reader = BufReader::new(File::open(path)?);

    let mut chosen = None;
    for (seen, line) in reader.lines().enumerate() {
        let line = line?;
        if rng.gen_range(0..=seen) == 0 {
            chosen = Some(line);
        }
    }

    chosen.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no lines", path.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write(temp: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = temp.path().join("lines.txt");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_single_line() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "only line\n");

        assert_eq!(random_line(&path).unwrap(), "only line");
    }

    #[test]
    fn test_every_line_reachable() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "a\nb\nc\n");
        let mut rng = StdRng::seed_from_u64(7);

        let seen: HashSet<String> = (0..200)
            .map(|_| random_line_with(&path, &mut rng).unwrap())
            .collect();

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_empty_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "");

        let err = random_line(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(random_line(&temp.path().join("missing.txt")).is_err());
    }
}
