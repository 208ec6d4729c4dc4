//! Placeholder value rotation strategies

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

/// Strategy types for placeholder rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderRotation {
    #[default]
    Sequential,
    Random,
}

impl PlaceholderRotation {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "random" | "rand" | "shuffle" => Self::Random,
            _ => Self::Sequential,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Random => "random",
        }
    }
}

/// Picks one value out of a placeholder's value list
pub trait ValueSelector: Send + Sync {
    /// Returns `None` only for an empty slice
    fn select<'a>(&self, values: &'a [String]) -> Option<&'a str>;

    fn strategy_name(&self) -> &'static str;
}

/// Walks the values in file order, wrapping around
#[derive(Debug, Default)]
pub struct SequentialSelector {
    index: AtomicUsize,
}

impl SequentialSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueSelector for SequentialSelector {
    fn select<'a>(&self, values: &'a [String]) -> Option<&'a str> {
        if values.is_empty() {
            return None;
        }

        let len = values.len();
        // Keep the cursor inside the list so it never overflows
        let idx = self
            .index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
            .unwrap_or(0)
            % len;

        values.get(idx).map(String::as_str)
    }

    fn strategy_name(&self) -> &'static str {
        "sequential"
    }
}

/// Independent uniform draw on every call
#[derive(Debug, Default)]
pub struct RandomSelector;

impl ValueSelector for RandomSelector {
    fn select<'a>(&self, values: &'a [String]) -> Option<&'a str> {
        let mut rng = rand::thread_rng();
        values.choose(&mut rng).map(String::as_str)
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}

/// Create a value selector for the rotation strategy
pub fn create_selector(rotation: PlaceholderRotation) -> Box<dyn ValueSelector> {
    match rotation {
        PlaceholderRotation::Sequential => Box::new(SequentialSelector::new()),
        PlaceholderRotation::Random => Box::new(RandomSelector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rotation_from_str() {
        assert_eq!(
            PlaceholderRotation::from_str("random"),
            PlaceholderRotation::Random
        );
        assert_eq!(
            PlaceholderRotation::from_str(" Random "),
            PlaceholderRotation::Random
        );
        assert_eq!(
            PlaceholderRotation::from_str("sequential"),
            PlaceholderRotation::Sequential
        );
        assert_eq!(
            PlaceholderRotation::from_str("unknown"),
            PlaceholderRotation::Sequential
        );
    }

    #[test]
    fn test_create_selector_strategy_name() {
        assert_eq!(
            create_selector(PlaceholderRotation::Sequential).strategy_name(),
            "sequential"
        );
        assert_eq!(
            create_selector(PlaceholderRotation::Random).strategy_name(),
            "random"
        );
    }

    #[test]
    fn test_sequential_cycles_with_period_n() {
        let selector = SequentialSelector::new();
        let list = values(&["a", "b", "c"]);

        let picked: Vec<_> = (0..7).map(|_| selector.select(&list).unwrap()).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn test_selectors_handle_empty_lists() {
        assert!(SequentialSelector::new().select(&[]).is_none());
        assert!(RandomSelector.select(&[]).is_none());
    }

    #[test]
    fn test_random_returns_members() {
        let selector = RandomSelector;
        let list = values(&["x", "y", "z"]);
        for _ in 0..50 {
            let picked = selector.select(&list).unwrap();
            assert!(list.iter().any(|v| v == picked));
        }
    }
}
