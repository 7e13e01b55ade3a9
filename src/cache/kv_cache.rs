//! Per-plugin expiring key/value store. One file per key, at
//! `{cache_dir}/{base64(plugin_name + "." + key)}`.
//!
//! File layout: `i64 expiry_unix_seconds`, `u32 value_len`, `value_bytes`.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;

/// Handle for the per-plugin KV cache rooted at `$XDG_CACHE_HOME/gtuber`.
/// Reads/writes for a given (plugin, key) always go through the same
/// process-wide mutex as [`super::plugin_cache::PluginCache`] (callers use
/// [`crate::cache::PluginCache`]'s lock in practice; this type is safe to
/// call concurrently on its own merit since each operation is a single file
/// read/write).
pub struct KvCache {
    dir: PathBuf,
}

impl KvCache {
    pub fn new() -> Self {
        Self {
            dir: crate::util::cache_dir(),
        }
    }

    fn file_name(plugin: &str, key: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{plugin}.{key}"))
    }

    fn path(&self, plugin: &str, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(plugin, key))
    }

    /// Returns the stored value iff `now < expiry`. A missing file or a
    /// parse failure is treated as "not present" and logged, never as an
    /// error the caller must handle; cache errors are never fatal to extraction.
    pub fn read(&self, plugin: &str, key: &str) -> Option<String> {
        let path = self.path(plugin, key);
        let bytes = fs::read(&path).ok()?;
        let (expiry, value) = parse_entry(&bytes).ok()?;
        let now = now_unix();
        if now < expiry {
            Some(value)
        } else {
            None
        }
    }

    /// Write `value` for `plugin`/`key` with an absolute unix-seconds
    /// expiry.
    pub fn write_until(&self, plugin: &str, key: &str, value: &str, expiry_unix: i64) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serialize_entry(expiry_unix, value);
        let path = self.path(plugin, key);
        let tmp = path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
        }
        fs::rename(&tmp, &path)
    }

    /// Write `value` for `plugin`/`key`, expiring `ttl_seconds` from now.
    pub fn write_for(&self, plugin: &str, key: &str, value: &str, ttl_seconds: i64) -> io::Result<()> {
        self.write_until(plugin, key, value, now_unix() + ttl_seconds)
    }
}

impl Default for KvCache {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn serialize_entry(expiry_unix: i64, value: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + value.len());
    buf.extend_from_slice(&expiry_unix.to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    buf
}

fn parse_entry(bytes: &[u8]) -> io::Result<(i64, String)> {
    if bytes.len() < 12 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "kv entry truncated"));
    }
    let expiry = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let value_bytes = bytes
        .get(12..12 + len)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "kv entry truncated"))?;
    let value = String::from_utf8(value_bytes.to_vec())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "kv value not utf-8"))?;
    Ok((expiry, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_cache() -> (KvCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let _ = n;
        (KvCache { dir: dir.path().to_path_buf() }, dir)
    }

    #[test]
    fn expiry_roundtrip() {
        let (cache, _tmp) = scratch_cache();
        let now = now_unix();
        cache.write_until("plug", "k", "v", now + 5).unwrap();
        assert_eq!(cache.read("plug", "k").as_deref(), Some("v"));

        cache.write_until("plug", "k2", "v2", now - 1).unwrap();
        assert_eq!(cache.read("plug", "k2"), None);
    }

    #[test]
    fn missing_key_is_none() {
        let (cache, _tmp) = scratch_cache();
        assert_eq!(cache.read("plug", "absent"), None);
    }

    #[test]
    fn file_name_is_base64_of_plugin_and_key() {
        let name = KvCache::file_name("plug", "k");
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(name)
            .unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "plug.k");
    }
}
