//! External compositing backend hook
//!
//! Placeholder for delegating the image reduction to an external library
//! (radix-k, binary-swap and friends, selected through
//! [`CompositorConfig::external_strategy`]). No backend is linked into this
//! build, so requesting it is a hard configuration error. Falling back to a
//! built-in strategy here would hide a deployment mistake behind a silently
//! different communication pattern, so the choice stays with the caller.
//!
//! [`CompositorConfig::external_strategy`]: crate::config::CompositorConfig

use crate::config::CompositorConfig;
use crate::error::CompositeError;

/// Report the requested-but-absent backend. Always returns
/// [`CompositeError::ExternalUnavailable`].
pub(crate) fn create(config: &CompositorConfig) -> CompositeError {
    log::error!(
        "external compositing backend requested (strategy {:?}) but none is linked",
        config.external_strategy
    );
    CompositeError::ExternalUnavailable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ParallelContext;
    use crate::compositor::{Compositor, StrategyKind};
    use crate::types::{DepthOrder, OPAQUE_BLACK};

    #[test]
    fn test_external_request_is_an_error_not_a_fallback() {
        let world = ParallelContext::local_world(1).pop().unwrap();

        let result = Compositor::new(
            StrategyKind::External,
            world.clone(),
            OPAQUE_BLACK,
            DepthOrder::BackToFront,
            &CompositorConfig::default(),
        );
        assert!(matches!(result, Err(CompositeError::ExternalUnavailable)));

        let config = CompositorConfig {
            use_external: true,
            ..CompositorConfig::default()
        };
        let result = Compositor::new(
            StrategyKind::MultiPatch,
            world,
            OPAQUE_BLACK,
            DepthOrder::BackToFront,
            &config,
        );
        assert!(matches!(result, Err(CompositeError::ExternalUnavailable)));
    }
}
