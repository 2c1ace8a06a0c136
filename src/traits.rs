//! Observed discrete trait states at the tips.
//!
//! A [`TraitData`] maps leaf labels to state indices `0..k`. The number of
//! states of the model is `k = max(index) + 1`, so indices that never occur
//! still count as possible states.
//!
//! When trait values come as category names (e.g. `"red"`, `"blue"`), use
//! [`TraitData::from_categories`]: categories are sorted and numbered, and the
//! index → name mapping is kept here, outside of the tree.

use crate::error::StructureError;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraitData {
    states: HashMap<String, usize>,
    categories: Option<Vec<String>>,
}

impl TraitData {
    /// Build from `label → state index` pairs.
    ///
    /// # Errors
    /// Returns [`StructureError::EmptyStateAssignment`] when no pair is given.
    pub fn new<I, S>(states: I) -> Result<Self, StructureError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let states: HashMap<String, usize> = states
            .into_iter()
            .map(|(label, state)| (label.into(), state))
            .collect();
        if states.is_empty() {
            return Err(StructureError::EmptyStateAssignment);
        }
        Ok(TraitData {
            states,
            categories: None,
        })
    }

    /// Build from `label → category name` pairs.
    ///
    /// Category names are numbered in lexicographic order, so the same set of
    /// categories always yields the same indices.
    ///
    /// # Example
    /// ```
    /// # use rust_mk_tree_mcmc::traits::TraitData;
    /// let traits = TraitData::from_categories([("A", "red"), ("B", "blue"), ("C", "red")]).unwrap();
    /// assert_eq!(traits.n_states(), 2);
    /// assert_eq!(traits.state_of("A"), Some(1));
    /// assert_eq!(traits.category_name(0), Some("blue"));
    /// ```
    pub fn from_categories<I, L, C>(values: I) -> Result<Self, StructureError>
    where
        I: IntoIterator<Item = (L, C)>,
        L: Into<String>,
        C: Into<String>,
    {
        let values: Vec<(String, String)> = values
            .into_iter()
            .map(|(label, category)| (label.into(), category.into()))
            .collect();

        let categories: Vec<String> = values
            .iter()
            .map(|(_, category)| category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let index: HashMap<&str, usize> = categories
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let states: Vec<(String, usize)> = values
            .iter()
            .map(|(label, category)| (label.clone(), index[category.as_str()]))
            .collect();

        let mut traits = TraitData::new(states)?;
        traits.categories = Some(categories);
        Ok(traits)
    }

    /// Number of discrete states, `max(index) + 1`.
    pub fn n_states(&self) -> usize {
        self.states.values().max().map_or(0, |max| max + 1)
    }

    pub fn state_of(&self, label: &str) -> Option<usize> {
        self.states.get(label).copied()
    }

    /// Category name of a state index, when built with [`TraitData::from_categories`].
    pub fn category_name(&self, state: usize) -> Option<&str> {
        self.categories.as_ref()?.get(state).map(String::as_str)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_count_is_max_plus_one() {
        // State 1 is never observed but still counts
        let traits = TraitData::new([("A", 0), ("B", 2)]).unwrap();
        assert_eq!(traits.n_states(), 3);
        assert_eq!(traits.state_of("B"), Some(2));
        assert_eq!(traits.state_of("Z"), None);
        assert_eq!(traits.category_name(0), None);
    }

    #[test]
    fn test_empty_assignment_rejected() {
        let empty: [(&str, usize); 0] = [];
        assert_eq!(
            TraitData::new(empty),
            Err(StructureError::EmptyStateAssignment)
        );
    }

    #[test]
    fn test_categories_sorted() {
        let traits =
            TraitData::from_categories([("A", "marine"), ("B", "freshwater"), ("C", "terrestrial")])
                .unwrap();
        assert_eq!(traits.n_states(), 3);
        assert_eq!(traits.state_of("B"), Some(0));
        assert_eq!(traits.state_of("A"), Some(1));
        assert_eq!(traits.state_of("C"), Some(2));
        assert_eq!(traits.category_name(2), Some("terrestrial"));
        assert_eq!(traits.category_name(3), None);
    }
}
