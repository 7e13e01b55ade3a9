//! Binary-file-backed plugin scheme/host index.
//!
//! File layout (not a stability contract — any header mismatch triggers a
//! full rebuild):
//!
//! ```text
//! magic:          7 bytes, "GTUBER\0"
//! version:        u32
//! dir_count:      u32
//! dirs: [
//!   path_len:        u32
//!   path:            path_len bytes (utf-8)
//!   max_mod_time:    i64 (unix seconds)
//!   plugin_count:    u32
//!   plugins: [
//!     name_len:      u32
//!     name:          name_len bytes
//!     scheme_count:  u32
//!     schemes: [ len: u32, bytes ]*
//!     host_count:    u32
//!     hosts:   [ len: u32, bytes ]*
//!   ]*
//! ]*
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use once_cell::sync::OnceCell;

const MAGIC: &[u8; 7] = b"GTUBER\0";
const VERSION: u32 = 1;

/// Default schemes assigned to a plugin that exports no `schemes()` symbol.
pub const DEFAULT_SCHEMES: &[&str] = &["http", "https"];

/// One extractor module's advertised dispatch keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    pub module_name: String,
    pub schemes: Vec<String>,
    pub hosts: Vec<String>,
}

/// One searched directory, with the plugin entries discovered in it and the
/// filesystem fingerprint used to detect staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDir {
    pub path: PathBuf,
    pub max_mod_time_unix: i64,
    pub plugins: Vec<PluginEntry>,
}

/// A fully-built in-memory index plus the on-disk cache file it is backed
/// by. Lazily populated on first use and guarded by a single mutex covering
/// init, lookup mutation, and KV file I/O.
pub struct PluginCache {
    cache_file: PathBuf,
    state: Mutex<Option<Vec<PluginDir>>>,
}

static GLOBAL: OnceCell<PluginCache> = OnceCell::new();

impl PluginCache {
    fn new(cache_file: PathBuf) -> Self {
        Self {
            cache_file,
            state: Mutex::new(None),
        }
    }

    /// The process-wide, lazily-initialized cache.
    pub fn global() -> &'static PluginCache {
        GLOBAL.get_or_init(|| PluginCache::new(crate::util::cache_dir().join("gtuber_cache.bin")))
    }

    /// Ensure the in-memory index reflects `search_path`, rebuilding from
    /// disk or from a fresh directory scan as needed. A scan/write failure
    /// is logged and leaves the index empty rather than failing the caller
    /// (cache errors are non-fatal to extraction).
    pub fn ensure_loaded(&self, search_path: &[PathBuf]) {
        let mut guard = self.state.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let fresh = scan_search_path(search_path);
        match self.try_read_compatible(search_path, &fresh) {
            Ok(Some(dirs)) => {
                tracing::debug!("plugin cache loaded from disk");
                *guard = Some(dirs);
            }
            _ => {
                tracing::info!("rebuilding plugin cache");
                let dirs = build_dirs(&fresh);
                if let Err(e) = self.write(&dirs) {
                    tracing::warn!(error = %e, "failed to write plugin cache; continuing unpersisted");
                }
                *guard = Some(dirs);
            }
        }
    }

    /// Candidates, in cache order, whose scheme (and, for http/https, host)
    /// matches `scheme`/`host`.
    pub fn find_plugins_for_uri(&self, scheme: &str, host: &str) -> Vec<(PathBuf, String)> {
        let stripped = strip_host_prefix(host);
        let guard = self.state.lock().unwrap();
        let Some(dirs) = guard.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for dir in dirs {
            for plugin in &dir.plugins {
                if !plugin.schemes.iter().any(|s| s == scheme) {
                    continue;
                }
                if (scheme == "http" || scheme == "https")
                    && !plugin.hosts.iter().any(|h| h == stripped)
                {
                    continue;
                }
                out.push((dir.path.join(&plugin.module_name), plugin.module_name.clone()));
            }
        }
        out
    }

    fn try_read_compatible(
        &self,
        search_path: &[PathBuf],
        fresh: &[(PathBuf, i64, usize)],
    ) -> io::Result<Option<Vec<PluginDir>>> {
        let bytes = fs::read(&self.cache_file)?;
        let dirs = parse(&bytes)?;
        if dirs.len() != search_path.len() || dirs.len() != fresh.len() {
            return Ok(None);
        }
        for (i, dir) in dirs.iter().enumerate() {
            if dir.path != search_path[i] {
                return Ok(None);
            }
            let (_, max_mod, count) = &fresh[i];
            if dir.max_mod_time_unix != *max_mod || dir.plugins.len() != *count {
                return Ok(None);
            }
        }
        Ok(Some(dirs))
    }

    fn write(&self, dirs: &[PluginDir]) -> io::Result<()> {
        if let Some(parent) = self.cache_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serialize(dirs);
        let tmp = self.cache_file.with_extension("bin.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
        }
        fs::rename(&tmp, &self.cache_file)?;
        Ok(())
    }
}

fn strip_host_prefix(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix("www.") {
        rest
    } else if let Some(rest) = host.strip_prefix("m.") {
        rest
    } else {
        host
    }
}

/// Walk each directory in `search_path`, returning `(dir, max_mtime, count)`
/// for each — the fingerprint used for cache-validity comparison.
fn scan_search_path(search_path: &[PathBuf]) -> Vec<(PathBuf, i64, usize)> {
    search_path
        .iter()
        .map(|dir| {
            let mut max_mod = 0i64;
            let mut count = 0usize;
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if !is_plugin_name(&entry.file_name().to_string_lossy()) {
                        continue;
                    }
                    count += 1;
                    if let Ok(meta) = entry.metadata() {
                        if let Ok(modified) = meta.modified() {
                            if let Ok(since_epoch) = modified.duration_since(UNIX_EPOCH) {
                                max_mod = max_mod.max(since_epoch.as_secs() as i64);
                            }
                        }
                    }
                }
            }
            (dir.clone(), max_mod, count)
        })
        .collect()
}

/// A file is a plugin iff its name ends in the platform dynamic-library
/// suffix.
pub fn is_plugin_name(name: &str) -> bool {
    name.ends_with(std::env::consts::DLL_SUFFIX)
}

fn build_dirs(fresh: &[(PathBuf, i64, usize)]) -> Vec<PluginDir> {
    fresh
        .iter()
        .map(|(dir, max_mod, _)| {
            let mut plugins = Vec::new();
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !is_plugin_name(&name) {
                        continue;
                    }
                    match crate::loader::inspect_plugin(&entry.path()) {
                        Some((schemes, hosts)) => {
                            let hosts = augment_hosts(&name, hosts);
                            plugins.push(PluginEntry {
                                module_name: name,
                                schemes,
                                hosts,
                            });
                        }
                        None => {
                            tracing::warn!(module = %name, "plugin exports neither schemes() nor hosts(); skipped");
                        }
                    }
                }
            }
            PluginDir {
                path: dir.clone(),
                max_mod_time_unix: *max_mod,
                plugins,
            }
        })
        .collect()
}

/// Merge `$XDG_CONFIG_HOME/gtuber/{plugin}.hosts` ahead of the compiled-in
/// host list.
fn augment_hosts(module_name: &str, compiled_in: Vec<String>) -> Vec<String> {
    let stem = Path::new(module_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| module_name.to_string());
    let hosts_file = crate::util::config_dir().join(format!("{stem}.hosts"));
    let mut merged = Vec::new();
    if let Ok(contents) = fs::read_to_string(&hosts_file) {
        for line in contents.lines() {
            let line = line.trim();
            if !line.is_empty() {
                merged.push(line.to_string());
            }
        }
    }
    merged.extend(compiled_in);
    merged
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_strings(buf: &mut Vec<u8>, items: &[String]) {
    buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for item in items {
        write_string(buf, item);
    }
}

fn serialize(dirs: &[PluginDir]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(dirs.len() as u32).to_le_bytes());
    for dir in dirs {
        write_string(&mut buf, &dir.path.to_string_lossy());
        buf.extend_from_slice(&dir.max_mod_time_unix.to_le_bytes());
        buf.extend_from_slice(&(dir.plugins.len() as u32).to_le_bytes());
        for plugin in &dir.plugins {
            write_string(&mut buf, &plugin.module_name);
            write_strings(&mut buf, &plugin.schemes);
            write_strings(&mut buf, &plugin.hosts);
        }
    }
    buf
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "cache truncated"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> io::Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> io::Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "cache string not utf-8"))
    }

    fn strings(&mut self) -> io::Result<Vec<String>> {
        let count = self.u32()? as usize;
        (0..count).map(|_| self.string()).collect()
    }
}

fn parse(bytes: &[u8]) -> io::Result<Vec<PluginDir>> {
    let mut cur = Cursor::new(bytes);
    let magic = cur.take(7)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad cache magic"));
    }
    let version = cur.u32()?;
    if version != VERSION {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "cache version mismatch"));
    }
    let dir_count = cur.u32()? as usize;
    let mut dirs = Vec::with_capacity(dir_count);
    for _ in 0..dir_count {
        let path = PathBuf::from(cur.string()?);
        let max_mod_time_unix = cur.i64()?;
        let plugin_count = cur.u32()? as usize;
        let mut plugins = Vec::with_capacity(plugin_count);
        for _ in 0..plugin_count {
            let module_name = cur.string()?;
            let schemes = cur.strings()?;
            let hosts = cur.strings()?;
            plugins.push(PluginEntry {
                module_name,
                schemes,
                hosts,
            });
        }
        dirs.push(PluginDir {
            path,
            max_mod_time_unix,
            plugins,
        });
    }
    Ok(dirs)
}
