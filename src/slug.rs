//! GitHub-style heading slugs.
//!
//! A [`Slugger`] is scoped to one document: the first occurrence of a slug
//! is returned as-is, later collisions get `-1`, `-2`, … appended.

use std::collections::HashMap;

/// Stateful slug generator that disambiguates repeated headings.
#[derive(Debug, Default)]
pub struct Slugger {
    occurrences: HashMap<String, usize>,
}

impl Slugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a slug for `value` that is unique among all slugs issued so far.
    pub fn slug(&mut self, value: &str) -> String {
        let base = slugify(value);
        let mut result = base.clone();

        if let Some(&seen) = self.occurrences.get(&base) {
            let mut count = seen;
            loop {
                count += 1;
                result = format!("{}-{}", base, count);
                if !self.occurrences.contains_key(&result) {
                    break;
                }
            }
            self.occurrences.insert(base, count);
        }

        self.occurrences.insert(result.clone(), 0);
        result
    }
}

/// Lowercase `value`, drop punctuation and symbols, and turn spaces into `-`.
///
/// Letters, digits, `_`, `-` and spaces survive, in any script.
pub fn slugify(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            '-' | '_' => Some(c),
            c if c.is_alphanumeric() => Some(c),
            _ => None,
        })
        .collect()
}
