//! Built-in effects
//!
//! Small processing bodies that make a session audible without a plugin
//! host: a generator, a gain stage, a step gate, and a meter.

pub mod oscillator;
pub mod pattern;
pub mod peak;
pub mod volume;

use crate::recall::EffectRegistry;

/// Register every built-in effect under its type id
pub fn register_builtin(registry: &mut EffectRegistry) {
    registry.register(oscillator::definition());
    registry.register(pattern::definition());
    registry.register(peak::definition());
    registry.register(volume::definition());
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let mut registry = EffectRegistry::new();
        register_builtin(&mut registry);
        assert_eq!(registry.type_ids(), vec!["oscillator", "pattern", "peak", "volume"]);
        assert!(registry.get("peak").unwrap().recycling.is_some());
        assert!(registry.get("volume").unwrap().channel_run.is_some());
    }
}
