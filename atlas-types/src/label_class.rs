use anyhow::{format_err, Error};
use serde::{self, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Named groups over an index space. Group `i` owns `indices[offsets[i]..offsets[i + 1]]`.
/// Used both for feature-type blocks of a matrix and for observation groups of a label column.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LabelClass {
    /// Group names
    pub labels: Vec<String>,
    /// Start of each group within `indices`
    pub offsets: Vec<usize>,
    /// Member indices, concatenated group by group
    #[serde(deserialize_with = "default_if_empty")]
    pub indices: Vec<usize>,
}

impl LabelClass {
    /// Build a `LabelClass`, checking that the offsets describe valid group boundaries.
    pub fn new(labels: Vec<String>, offsets: Vec<usize>, indices: Vec<usize>) -> Result<LabelClass, Error> {
        if labels.len() != offsets.len() {
            return Err(format_err!("Label and offsets length unequal"));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) || offsets.last().is_some_and(|&o| o > indices.len()) {
            return Err(format_err!("Offsets are not monotone within {} indices", indices.len()));
        }
        Ok(LabelClass {
            labels,
            offsets,
            indices,
        })
    }

    /// Group observation indices by label. Groups come out in lexicographic label order and
    /// observations without a label are left out, so every group has at least one member.
    pub fn from_observation_labels<S: AsRef<str>>(labels: &[Option<S>]) -> LabelClass {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            if let Some(label) = label {
                groups.entry(label.as_ref()).or_default().push(i);
            }
        }

        let mut res = LabelClass::default();
        for (label, members) in groups {
            res.labels.push(label.to_string());
            res.offsets.push(res.indices.len());
            res.indices.extend(members);
        }
        res
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if there are no groups
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn group(&self, idx: usize) -> &[usize] {
        let offset = self.offsets[idx];
        if idx == self.offsets.len() - 1 {
            &self.indices[offset..]
        } else {
            &self.indices[offset..self.offsets[idx + 1]]
        }
    }

    /// Iterate over `(label, member indices)` in group order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> + '_ {
        (0..self.len()).map(move |idx| (self.labels[idx].as_str(), self.group(idx)))
    }

    /// Remove the groups whose label does not contain `pattern`. Returns the indices they held.
    pub fn remove_unlike(&mut self, pattern: &str) -> BTreeSet<usize> {
        let mut r = BTreeSet::default();
        let mut idx = 0;
        while idx < self.labels.len() {
            if self.labels[idx].contains(pattern) {
                idx += 1
            } else {
                self.remove_index(idx, &mut r);
            }
        }
        r
    }

    fn remove_index(&mut self, idx: usize, set: &mut BTreeSet<usize>) {
        self.labels.remove(idx);
        let start = self.offsets.remove(idx);
        let end = if self.offsets.len() > idx {
            let end = self.offsets[idx];
            let len = end - start;
            for v in self.offsets.iter_mut().skip(idx) {
                *v -= len;
            }
            end
        } else {
            self.indices.len()
        };
        set.extend(self.indices.drain(start..end));
    }
}

/// Deserialize a missing or null field as its default value
pub fn default_if_empty<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de> + Default,
{
    Option::<T>::deserialize(de).map(std::option::Option::unwrap_or_default)
}

/// Build the feature-type `LabelClass` of a matrix from the per-feature type column. Features of
/// one type are expected to be contiguous, as in 10x `features.tsv` files.
pub fn make_labelclass_from_feature_type_vector(feature_types: &[String]) -> Result<LabelClass, Error> {
    let mut idx = 0;
    let mut labels = vec![feature_types
        .first()
        .ok_or_else(|| format_err!("no features found!"))?
        .clone()];
    let mut offsets = vec![idx];
    for (i, feature_type) in feature_types.iter().enumerate() {
        if feature_type != &feature_types[idx] {
            idx = i;
            labels.push(feature_types[idx].clone());
            offsets.push(idx);
        }
    }
    let indices = (0..feature_types.len()).collect::<Vec<_>>();
    LabelClass::new(labels, offsets, indices)
}
