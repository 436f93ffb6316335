use std::path::{Component, Path};

/// A stable document identifier derived from a normalized source path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId {
    /// The numeric ID used as the key in redb tables and the lexical index.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a source path.
    ///
    /// The path is normalized first, so `notes/./a.md` and `notes//a.md`
    /// map to the same document.
    pub fn for_path(path: &str) -> Self {
        Self::from_numeric(Self::hash_path(&normalize_path(path)))
    }

    /// Rebuild an ID from the numeric key stored in an index.
    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            short: Self::short_hex(numeric, 6),
        }
    }

    fn hash_path(normalized: &str) -> u64 {
        let digest = blake3::hash(normalized.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    fn short_hex(value: u64, len: usize) -> String {
        let full = format!("{value:016x}");
        full[..len].to_string()
    }

    /// Extend the short ID to avoid collisions.
    /// Returns a new DocumentId with a longer short hex string.
    pub fn extend_short(&self, len: usize) -> Self {
        let len = len.clamp(6, 16);
        Self {
            numeric: self.numeric,
            short: Self::short_hex(self.numeric, len),
        }
    }

    /// Parse a `#a1b2c3…` or bare hex reference into a full 16-digit ID.
    ///
    /// Only full-length references can be resolved without a lookup.
    pub fn parse_full(reference: &str) -> Option<Self> {
        let hex = reference.strip_prefix('#').unwrap_or(reference);
        if hex.len() != 16 {
            return None;
        }
        u64::from_str_radix(hex, 16).ok().map(Self::from_numeric)
    }

    /// Full 16-digit hex form.
    pub fn full_hex(&self) -> String {
        format!("{:016x}", self.numeric)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

/// Lexically normalize a path: unify separators, drop `.` segments, resolve
/// `..` against preceding segments, and strip trailing slashes.
///
/// The filesystem is never consulted, so paths that no longer exist still
/// normalize to the same key they were ingested under.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<String> = Vec::new();

    for component in Path::new(&unified).components() {
        match component {
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|p| p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => {
                parts.push(part.to_string_lossy().into_owned());
            }
            Component::Prefix(prefix) => {
                parts.push(prefix.as_os_str().to_string_lossy().into_owned());
            }
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = DocumentId::for_path("notes/hello.md");
        let b = DocumentId::for_path("notes/hello.md");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = DocumentId::for_path("notes/hello.md");
        let b = DocumentId::for_path("notes/world.md");
        assert_ne!(a.numeric, b.numeric);
    }

    #[test]
    fn equivalent_paths_share_an_id() {
        let a = DocumentId::for_path("/data/notes/hello.md");
        let b = DocumentId::for_path("/data//notes/./hello.md");
        let c = DocumentId::for_path("/data/notes/sub/../hello.md");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn normalize_handles_separators_and_parents() {
        assert_eq!(normalize_path("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("../x/./y"), "../x/y");
        assert_eq!(normalize_path("/../x"), "/x");
    }

    #[test]
    fn short_id_is_six_chars() {
        let id = DocumentId::for_path("notes/hello.md");
        assert_eq!(id.short.len(), 6);
    }

    #[test]
    fn display_has_hash_prefix() {
        let id = DocumentId::for_path("notes/hello.md");
        let s = id.to_string();
        assert!(s.starts_with('#'));
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn from_numeric_matches_for_path() {
        let id = DocumentId::for_path("notes/hello.md");
        assert_eq!(DocumentId::from_numeric(id.numeric), id);
    }

    #[test]
    fn parse_full_roundtrips_full_hex() {
        let id = DocumentId::for_path("notes/hello.md");
        assert_eq!(DocumentId::parse_full(&id.full_hex()), Some(id.clone()));
        assert_eq!(
            DocumentId::parse_full(&format!("#{}", id.full_hex())),
            Some(id.clone())
        );
        assert_eq!(DocumentId::parse_full(&id.short), None);
    }

    #[test]
    fn extend_short_clamps() {
        let id = DocumentId::for_path("notes/hello.md");
        assert_eq!(id.extend_short(2).short.len(), 6);
        assert_eq!(id.extend_short(100).short.len(), 16);
        assert!(id.extend_short(10).short.starts_with(&id.short));
    }
}
