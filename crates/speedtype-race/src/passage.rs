//! Where race passages come from.
//!
//! The store never fetches text itself; it asks an injected
//! [`PassageSource`] once per room. Any `Fn() -> Option<String>` closure
//! is a source, so a caller can plug in an HTTP-backed quote service
//! without this crate knowing about it.

use std::sync::Arc;

use rand::seq::IndexedRandom;

/// The immutable text of a race, shared read-only by the room and every
/// event that carries it.
pub type Passage = Arc<str>;

/// Supplies the passage for a newly created room.
pub trait PassageSource: Send + Sync + 'static {
    /// Returns a passage, or `None` when nothing can be selected.
    fn passage(&self) -> Option<String>;
}

impl<F> PassageSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn passage(&self) -> Option<String> {
        self()
    }
}

/// Picks a random quote from a fixed list.
#[derive(Debug, Clone)]
pub struct QuoteList {
    quotes: Vec<String>,
}

impl QuoteList {
    /// Creates a list from the given quotes.
    pub fn new<I, S>(quotes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            quotes: quotes.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of quotes available.
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Returns `true` if there is nothing to pick from.
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl Default for QuoteList {
    fn default() -> Self {
        Self::new([
            "The quick brown fox jumps over the lazy dog.",
            "To be or not to be, that is the question.",
            "All that glitters is not gold.",
            "A journey of a thousand miles begins with a single step.",
            "Actions speak louder than words.",
            "Success is not final, failure is not fatal: \
             it is the courage to continue that counts.",
            "The future depends on what you do today.",
            "Life is like riding a bicycle. \
             To keep your balance, you must keep moving.",
            "The only limit to our realization of tomorrow \
             will be our doubts of today.",
            "It does not matter how slowly you go as long as you do not stop.",
        ])
    }
}

impl PassageSource for QuoteList {
    fn passage(&self) -> Option<String> {
        self.quotes.choose(&mut rand::rng()).cloned()
    }
}

/// Always yields the same passage. Handy for practice rooms and tests.
#[derive(Debug, Clone)]
pub struct FixedPassage(pub String);

impl PassageSource for FixedPassage {
    fn passage(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Asks `source` for a passage and normalizes it.
///
/// Surrounding whitespace is trimmed; blank text counts as no passage.
pub(crate) fn select(source: &dyn PassageSource) -> Option<Passage> {
    let text = source.passage()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(Arc::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_list_picks_from_its_quotes() {
        let list = QuoteList::new(["alpha", "beta"]);
        for _ in 0..20 {
            let picked = list.passage().unwrap();
            assert!(picked == "alpha" || picked == "beta");
        }
    }

    #[test]
    fn test_default_quote_list_is_populated() {
        assert_eq!(QuoteList::default().len(), 10);
    }

    #[test]
    fn test_empty_quote_list_yields_nothing() {
        let list = QuoteList::new(Vec::<String>::new());
        assert!(list.is_empty());
        assert!(select(&list).is_none());
    }

    #[test]
    fn test_select_trims_and_rejects_blank() {
        let padded = FixedPassage("  THE QUICK BROWN FOX \n".into());
        assert_eq!(select(&padded).as_deref(), Some("THE QUICK BROWN FOX"));
        assert!(select(&FixedPassage("   ".into())).is_none());
    }

    #[test]
    fn test_closure_is_a_source() {
        let source = || Some("from a closure".to_string());
        assert_eq!(select(&source).as_deref(), Some("from a closure"));
    }
}
