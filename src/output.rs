//! Writing bundles to disk.
//!
//! Artifacts are collected in a [`Staged`] set and committed together. Every
//! file is written to a temporary file in its target directory and renamed
//! over the destination, so readers only ever see a complete old or complete
//! new bundle. Files whose content did not change are left untouched.

use std::fmt::Debug;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::error::TaskError;

/// 32 bytes length content hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        Hash32(blake3::hash(buffer.as_ref()).into())
    }

    fn hash_file(path: &Utf8Path) -> Option<Self> {
        fs::read(path).ok().map(Self::hash)
    }

    pub fn to_hex(self) -> String {
        crate::utils::hex(&self.0)
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// A file produced by a processor.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: Utf8PathBuf,
    pub hash: Hash32,
    /// False when the file already held identical bytes.
    pub written: bool,
}

/// Artifacts waiting to be committed to one output directory.
pub struct Staged {
    dir: Utf8PathBuf,
    files: Vec<(String, Vec<u8>)>,
}

impl Staged {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    pub fn add(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.files.push((name.into(), data));
    }

    /// Writes every staged file. Stops at the first I/O error; files already
    /// committed before it stay complete.
    pub fn commit(self) -> Result<Vec<Artifact>, TaskError> {
        fs::create_dir_all(&self.dir).map_err(|e| TaskError::io(self.dir.clone(), e))?;

        let mut artifacts = Vec::with_capacity(self.files.len());
        for (name, data) in self.files {
            let path = self.dir.join(&name);
            let hash = Hash32::hash(&data);

            if Hash32::hash_file(&path) == Some(hash) {
                tracing::trace!(%path, "unchanged, skipping write");
                artifacts.push(Artifact {
                    path,
                    hash,
                    written: false,
                });
                continue;
            }

            write_atomic(&self.dir, &path, &data).map_err(|e| TaskError::io(path.clone(), e))?;
            tracing::debug!(%path, bytes = data.len(), "wrote artifact");

            artifacts.push(Artifact {
                path,
                hash,
                written: true,
            });
        }

        Ok(artifacts)
    }
}

fn write_atomic(dir: &Utf8Path, path: &Utf8Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        (tmp, path)
    }

    #[test]
    fn commit_creates_directory_and_files() {
        let (_tmp, root) = dir();
        let out = root.join("assets/js");

        let mut staged = Staged::new(&out);
        staged.add("script.js", b"let a = 1;".to_vec());
        staged.add("script.js.map", b"{}".to_vec());
        let artifacts = staged.commit().unwrap();

        assert_eq!(artifacts.len(), 2);
        assert!(artifacts.iter().all(|a| a.written));
        assert_eq!(fs::read_to_string(out.join("script.js")).unwrap(), "let a = 1;");
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let (_tmp, root) = dir();

        let mut staged = Staged::new(&root);
        staged.add("style.css", b"a{}".to_vec());
        staged.commit().unwrap();

        let mut staged = Staged::new(&root);
        staged.add("style.css", b"a{}".to_vec());
        let artifacts = staged.commit().unwrap();
        assert!(!artifacts[0].written);

        let mut staged = Staged::new(&root);
        staged.add("style.css", b"b{}".to_vec());
        let artifacts = staged.commit().unwrap();
        assert!(artifacts[0].written);
        assert_eq!(fs::read_to_string(root.join("style.css")).unwrap(), "b{}");
    }

    #[test]
    fn no_temporary_files_are_left_behind() {
        let (_tmp, root) = dir();

        let mut staged = Staged::new(&root);
        staged.add("vendor.js", Vec::new());
        staged.commit().unwrap();

        let names: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["vendor.js"]);
    }
}
