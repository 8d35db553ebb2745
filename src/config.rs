//! Engine configuration
//!
//! All knobs are collected into an explicit [`CompositorConfig`] value that
//! is computed once (optionally from the process environment) and threaded
//! through every constructor. There is no hidden global state: two engines
//! built from equal configs behave identically.

use std::env;

// =============================================================================
// Tuning constants
// =============================================================================

/// Minimum rows a blend worker must receive for the pooled path to pay off.
/// Below this the kernels run inline on the calling thread.
pub const MIN_ROWS_PER_WORKER: usize = 8;

/// Upper bound on blend pool size regardless of core count.
pub const MAX_BLEND_WORKERS: usize = 16;

// =============================================================================
// External reduction strategy
// =============================================================================

/// Multi-image reduction strategy of the external compositing backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalStrategy {
    Reduce,
    BinaryTree,
    RadixK,
    BinarySwap,
}

impl ExternalStrategy {
    /// Parse an environment-variable value. Unknown values are `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "reduce" => Some(Self::Reduce),
            "tree" | "binary-tree" => Some(Self::BinaryTree),
            "radixk" | "radix-k" => Some(Self::RadixK),
            "bswap" | "binary-swap" => Some(Self::BinarySwap),
            _ => None,
        }
    }
}

// =============================================================================
// Compositor configuration
// =============================================================================

/// Process-wide compositor configuration, immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositorConfig {
    /// Use the external compositing backend instead of the built-in
    /// strategies. Requesting it in a build without a backend linked is a
    /// configuration error, never a silent fallback.
    pub use_external: bool,
    /// Reduction strategy the external backend would run.
    pub external_strategy: ExternalStrategy,
    /// Force single-threaded blending; the pooled path produces bitwise
    /// identical results, so this only trades speed for simpler scheduling.
    pub single_thread_blend: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            use_external: false,
            external_strategy: ExternalStrategy::Reduce,
            single_thread_blend: false,
        }
    }
}

impl CompositorConfig {
    /// Read configuration from the process environment once.
    ///
    /// Variables: `SORTLAST_EXTERNAL` (`1`/`true` enables the external
    /// backend), `SORTLAST_STRATEGY` (`reduce`, `tree`, `radixk`, `bswap`),
    /// `SORTLAST_SINGLE_THREAD` (`1`/`true` forces inline blending).
    /// Unknown strategy values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("SORTLAST_EXTERNAL") {
            config.use_external = parse_bool(&v);
        }
        if let Ok(v) = env::var("SORTLAST_STRATEGY") {
            match ExternalStrategy::parse(&v) {
                Some(s) => config.external_strategy = s,
                None => log::warn!("SORTLAST_STRATEGY={v:?} not recognized, keeping default"),
            }
        }
        if let Ok(v) = env::var("SORTLAST_SINGLE_THREAD") {
            config.single_thread_blend = parse_bool(&v);
        }

        config
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!(ExternalStrategy::parse("bswap"), Some(ExternalStrategy::BinarySwap));
        assert_eq!(ExternalStrategy::parse("Radix-K"), Some(ExternalStrategy::RadixK));
        assert_eq!(ExternalStrategy::parse("nope"), None);
    }

    #[test]
    fn test_default_config() {
        let config = CompositorConfig::default();
        assert!(!config.use_external);
        assert!(!config.single_thread_blend);
    }
}
