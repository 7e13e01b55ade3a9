//! The plugin dispatch cache: a filesystem-indexed map from
//! `(scheme, host)` to candidate extractor modules, plus a per-plugin
//! expiring key/value store.
//!
//! Both halves share one process-wide mutex:
//! lazy initialization, the in-memory index, and KV file I/O are all
//! serialized through [`PluginCache`].

pub mod kv_cache;
pub mod plugin_cache;

pub use kv_cache::KvCache;
pub use plugin_cache::{PluginCache, PluginDir, PluginEntry};
