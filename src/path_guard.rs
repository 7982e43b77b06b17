//! Containment checks for serving files out of a fixed root directory.
//!
//! Every file endpoint funnels untrusted request paths through
//! [`SafePathResolver`]. The resolver joins, normalizes and canonicalizes the
//! request, then requires the result to sit strictly below the root when
//! compared component by component, so `/srv/data-private` is never treated
//! as part of `/srv/data`.

use std::{
    collections::BTreeSet,
    ffi::OsString,
    fmt, fs,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;

/// Why a request path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed path")]
    MalformedInput,
    #[error("path escapes root")]
    TraversalAttempt,
    #[error("file not found")]
    NotFound,
    #[error("file type not allowed")]
    DisallowedType,
}

/// `Ok` carries the canonical absolute path of an allowed file.
pub type Decision = Result<PathBuf, Rejection>;

#[derive(Debug, Error)]
pub enum RootError {
    #[error("root {path} cannot be resolved: {source}")]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("root {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Case-insensitive allow-list of file extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedExtensions(BTreeSet<String>);

impl AllowedExtensions {
    /// Parses a comma-separated list such as `".json, csv,.PNG"`.
    pub fn parse(list: &str) -> Self {
        list.split(',').collect()
    }

    pub fn permits(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.0.contains(&ext.to_ascii_lowercase()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for AllowedExtensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.iter().collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowedExtensions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// A canonical root plus an optional extension filter, fixed at startup.
#[derive(Debug, Clone)]
pub struct SafePathResolver {
    root: PathBuf,
    allowed: Option<AllowedExtensions>,
}

impl SafePathResolver {
    pub fn new(
        root: impl AsRef<Path>,
        allowed: Option<AllowedExtensions>,
    ) -> Result<Self, RootError> {
        let root = root.as_ref();
        let canonical = match dunce::canonicalize(root) {
            Ok(canonical) => canonical,
            Err(source) => {
                return Err(RootError::Unresolvable {
                    path: root.to_path_buf(),
                    source,
                });
            }
        };
        if !canonical.is_dir() {
            return Err(RootError::NotADirectory(canonical));
        }
        Ok(Self {
            root: canonical,
            allowed,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed(&self) -> Option<&AllowedExtensions> {
        self.allowed.as_ref()
    }

    pub fn resolve(&self, requested: &str) -> Decision {
        resolve(&self.root, requested, self.allowed.as_ref())
    }

    pub fn resolve_encoded(&self, raw: &str) -> Decision {
        resolve_encoded(&self.root, raw, self.allowed.as_ref())
    }
}

/// Percent-decodes `raw` once, then behaves like [`resolve`].
pub fn resolve_encoded(root: &Path, raw: &str, allowed: Option<&AllowedExtensions>) -> Decision {
    if raw.is_empty() || raw.contains('\0') {
        return Err(Rejection::MalformedInput);
    }
    let Ok(decoded) = urlencoding::decode(raw) else {
        return Err(Rejection::MalformedInput);
    };
    resolve(root, &decoded, allowed)
}

/// Classifies an already-decoded request path against a canonical `root`.
///
/// Only `metadata`-style queries touch the filesystem. Absence is reported as
/// [`Rejection::NotFound`], never as an I/O error. A relative `root` cannot
/// anchor containment, so nothing resolves against it.
pub fn resolve(root: &Path, requested: &str, allowed: Option<&AllowedExtensions>) -> Decision {
    if requested.is_empty() || requested.contains('\0') {
        return Err(Rejection::MalformedInput);
    }
    if !root.is_absolute() {
        return Err(Rejection::TraversalAttempt);
    }

    let lexical = normalize_lexically(&root.join(requested));
    if lexical == root {
        return Err(Rejection::NotFound);
    }
    if !is_strictly_within(root, &lexical) {
        return Err(Rejection::TraversalAttempt);
    }

    // symlinks may still point elsewhere
    let target = canonicalize_existing_prefix(&lexical);
    if target == root {
        return Err(Rejection::NotFound);
    }
    if !is_strictly_within(root, &target) {
        return Err(Rejection::TraversalAttempt);
    }

    if let Some(allowed) = allowed
        && !allowed.permits(&target)
    {
        return Err(Rejection::DisallowedType);
    }

    match fs::metadata(&target) {
        Ok(meta) if meta.is_file() => Ok(target),
        _ => Err(Rejection::NotFound),
    }
}

/// Resolves `.` and `..` without consulting the filesystem. `..` at the
/// filesystem root stays at the root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_top = matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                if !at_top {
                    normalized.pop();
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Canonicalizes the longest existing prefix of `path` and re-appends the
/// missing tail, so targets that do not exist yet still get their symlinked
/// ancestors resolved.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut canonical) = dunce::canonicalize(&existing) {
            canonical.extend(missing.iter().rev());
            return canonical;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Component-wise strict prefix test; `root` itself is not within `root`.
fn is_strictly_within(root: &Path, candidate: &Path) -> bool {
    candidate != root && candidate.starts_with(root)
}
