//! tag classification against the configured correct / known ids

use crate::domain::Verdict;
use std::collections::HashSet;

/// the configured answer key of a node
#[derive(Clone, Debug)]
pub struct Classifier {
    correct_id: String,
    known_ids: HashSet<String>,
}

impl Classifier {
    pub fn new<I, S>(correct_id: impl Into<String>, known_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            correct_id: correct_id.into(),
            known_ids: known_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, tag_id: Option<&str>) -> Option<Verdict> {
        classify(tag_id, &self.correct_id, &self.known_ids)
    }
}

/// absent -> None, correct -> Correct, known -> Wrong, anything else -> Unknown
pub fn classify(tag_id: Option<&str>, correct_id: &str, known_ids: &HashSet<String>) -> Option<Verdict> {
    let id = tag_id?;
    if id == correct_id {
        Some(Verdict::Correct)
    } else if known_ids.contains(id) {
        Some(Verdict::Wrong)
    } else {
        Some(Verdict::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Classifier {
        Classifier::new("A", ["A", "B", "C"])
    }

    #[test]
    fn absent_tag_has_no_verdict() {
        assert_eq!(key().classify(None), None);
    }

    #[test]
    fn correct_known_and_unknown() {
        let c = key();
        assert_eq!(c.classify(Some("A")), Some(Verdict::Correct));
        assert_eq!(c.classify(Some("B")), Some(Verdict::Wrong));
        assert_eq!(c.classify(Some("C")), Some(Verdict::Wrong));
        assert_eq!(c.classify(Some("Z")), Some(Verdict::Unknown));
        assert_eq!(c.classify(Some("")), Some(Verdict::Unknown));
    }

    #[test]
    fn correct_wins_even_when_not_listed_as_known() {
        let c = Classifier::new("584186924480", ["119591732478"]);
        assert_eq!(c.classify(Some("584186924480")), Some(Verdict::Correct));
        assert_eq!(c.classify(Some("119591732478")), Some(Verdict::Wrong));
    }
}
