//! Small shared helpers: XDG base-directory resolution and basic arithmetic
//! used by the manifest generator.

use std::path::PathBuf;

/// `$XDG_CACHE_HOME/gtuber` (falling back to `~/.cache/gtuber`).
pub fn cache_dir() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", ".cache").join("gtuber")
}

/// `$XDG_CONFIG_HOME/gtuber` (falling back to `~/.config/gtuber`).
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("gtuber")
}

fn xdg_dir(env_var: &str, fallback_under_home: &str) -> PathBuf {
    if let Ok(dir) = std::env::var(env_var) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
    PathBuf::from(home).join(fallback_under_home)
}

/// Recursive Euclidean GCD, used to reduce a resolution to a pixel aspect
/// ratio.
pub fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// `"W:H"` reduced by [`gcd`], or `"1:1"` when either dimension is zero.
pub fn pixel_aspect_ratio(width: u32, height: u32) -> String {
    if width == 0 || height == 0 {
        return "1:1".to_string();
    }
    let d = gcd(width, height);
    format!("{}:{}", width / d, height / d)
}
