// Cache path utilities.
// Constructs filesystem paths for the cache database and encodes keys as file names.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use sha2::{Digest, Sha256};

/// File extension used for entry files.
pub const ENTRY_EXTENSION: &str = "json";

/// Get the base cache directory (~/.cache/gymcache on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Path to the default configuration file.
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
}

/// Path to a database's directory.
pub fn database_dir(root: &Path, database: &str) -> PathBuf {
    root.join(encode_key(database))
}

/// Path to a database's manifest file.
pub fn manifest_path(root: &Path, database: &str) -> PathBuf {
    database_dir(root, database).join("manifest.json")
}

/// Path to a store's directory inside a database.
pub fn store_dir(root: &Path, database: &str, store: &str) -> PathBuf {
    database_dir(root, database).join(encode_key(store))
}

/// Path to the file holding the entry for `key`.
pub fn entry_path(store_dir: &Path, key: &str) -> PathBuf {
    store_dir.join(format!("{}.{}", entry_stem(key), ENTRY_EXTENSION))
}

/// Longest encoded key used verbatim as a file stem. Longer keys are hashed.
pub const MAX_STEM_LEN: usize = 200;

/// Encoded bytes of a long key kept in front of its digest.
const HASHED_PREFIX_LEN: usize = 64;

/// Separates the readable prefix from the digest. `encode_key` never emits it.
const HASH_MARKER: char = '~';

/// What an entry file name says about the key it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryName {
    /// The key, recovered from the name.
    Key(String),
    /// A long key stored under its digest; the key is only in the file body.
    Hashed,
}

/// File stem for `key`: its encoding, or a readable prefix plus a SHA-256
/// digest when the encoding is longer than [`MAX_STEM_LEN`].
pub fn entry_stem(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_STEM_LEN {
        return encoded;
    }

    let mut prefix = String::with_capacity(HASHED_PREFIX_LEN);
    for byte in key.bytes() {
        let before = prefix.len();
        push_encoded(byte, &mut prefix);
        if prefix.len() > HASHED_PREFIX_LEN {
            prefix.truncate(before);
            break;
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}{}{}", prefix, HASH_MARKER, hex::encode(hasher.finalize()))
}

/// Classify an entry file name. Returns None for anything [`entry_stem`]
/// would not have produced.
pub fn parse_entry_file_name(file_name: &str) -> Option<EntryName> {
    let stem = file_name.strip_suffix(ENTRY_EXTENSION)?.strip_suffix('.')?;

    if let Some((prefix, digest)) = stem.split_once(HASH_MARKER) {
        let well_formed = prefix.len() <= HASHED_PREFIX_LEN
            && prefix.bytes().all(is_encoded_byte)
            && digest.len() == 64
            && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        return well_formed.then_some(EntryName::Hashed);
    }

    if stem.len() > MAX_STEM_LEN {
        return None;
    }
    decode_key(stem)
        .filter(|key| encode_key(key) == stem)
        .map(EntryName::Key)
}

/// Encode a key for use as a file name.
/// Lowercase ASCII letters, digits, '-' and '_' pass through; every other
/// byte becomes %XX. Uppercase letters are escaped too, so keys differing
/// only in case stay distinct on case-insensitive filesystems.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        push_encoded(byte, &mut out);
    }
    out
}

fn push_encoded(byte: u8, out: &mut String) {
    match byte {
        b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
        _ => out.push_str(&format!("%{:02X}", byte)),
    }
}

fn is_encoded_byte(byte: u8) -> bool {
    matches!(byte, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'%' | b'A'..=b'F')
}

/// Reverse of [`encode_key`]. Callers that need to reject foreign names
/// should re-encode and compare.
pub fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "gymcache")
}
