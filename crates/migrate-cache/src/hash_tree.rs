use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Recursive content digest over a directory tree.
///
/// Persisted verbatim as an entry's `hash-tree.json`; only the root `hash` is
/// compared when validating a cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashTree {
    pub name: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HashTree>,
}

/// Computes the content fingerprint of a chunk's migration directories.
pub trait ContentHasher: Send + Sync {
    /// Hash the sub-directories of `root` named in `include`.
    fn hash(&self, root: &Path, include: &[String]) -> Result<HashTree>;
}

/// Default [`ContentHasher`]: SHA-256 over file contents, folded bottom-up.
///
/// A file's hash covers its contents; a folder's hash covers the ordered
/// names and hashes of its children, so renames and moves change the root.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirHasher;

impl ContentHasher for DirHasher {
    fn hash(&self, root: &Path, include: &[String]) -> Result<HashTree> {
        let mut include: Vec<&String> = include.iter().collect();
        include.sort();
        include.dedup();

        let children = include
            .into_iter()
            .map(|name| hash_dir(&root.join(name), name.clone()))
            .collect::<Result<Vec<_>>>()?;

        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(fold(name, children))
    }
}

fn hash_dir(dir: &Path, name: String) -> Result<HashTree> {
    let mut children = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        let child_name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type();
        if file_type.is_dir() {
            children.push(hash_dir(entry.path(), child_name)?);
        } else if file_type.is_file() {
            children.push(HashTree {
                name: child_name,
                hash: hash_file(entry.path())?,
                children: Vec::new(),
            });
        } else {
            tracing::debug!(
                target: "migrate.cache",
                path = %entry.path().display(),
                "skipping non-regular file while hashing"
            );
        }
    }

    if children.is_empty() && !dir.is_dir() {
        return Err(CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("migration directory {} does not exist", dir.display()),
        )));
    }

    Ok(fold(name, children))
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn fold(name: String, children: Vec<HashTree>) -> HashTree {
    let mut hasher = Sha256::new();
    for child in &children {
        hasher.update(child.name.as_bytes());
        hasher.update([0]);
        hasher.update(child.hash.as_bytes());
        hasher.update([0]);
    }
    HashTree {
        name,
        hash: hex::encode(hasher.finalize()),
        children,
    }
}
