//! Column identity and named-tensor extraction.
//!
//! Every subject array shares one [`FieldIndex`]: an ordered catalog of
//! unique column names. A [`FieldGroups`] mapping names logical tensors
//! (e.g. `main_input_acc`) and [`FieldExtractor`] slices them out of a
//! `[step, sample, field]` array into a [`NamedTensors`] collection.

use std::collections::HashMap;

use ndarray::{concatenate, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Ordered catalog of unique field names.
///
/// Position in the catalog is the column position in every subject array of
/// a store, and never changes for the lifetime of that store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl FieldIndex {
    /// Build an index from an ordered list of names.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateField`] if a name repeats.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if positions.insert(name.clone(), i).is_some() {
                return Err(PipelineError::DuplicateField(name.clone()));
            }
        }
        Ok(Self { names, positions })
    }

    /// Parse the JSON column list stored as dataset metadata.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or duplicate names.
    pub fn from_json(json: &str) -> Result<Self> {
        let names: Vec<String> = serde_json::from_str(json)?;
        Self::new(names)
    }

    /// Column position of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingField`] if the name is not indexed.
    pub fn position(&self, name: &str) -> Result<usize> {
        self.positions
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::missing_field(name))
    }

    /// Column positions of several names, in the order given.
    ///
    /// # Errors
    ///
    /// Fails on the first name that is not indexed.
    pub fn positions<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        names.iter().map(|n| self.position(n.as_ref())).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A logical group name mapped to an ordered list of field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub name: String,
    pub fields: Vec<String>,
}

impl FieldGroup {
    #[must_use]
    pub fn new<S: Into<String>>(name: impl Into<String>, fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordered collection of field groups.
///
/// Insertion order is preserved so that models concatenating groups along
/// the field axis always see the same column layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldGroups(Vec<FieldGroup>);

impl FieldGroups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group, replacing any existing group with the same name.
    #[must_use]
    pub fn with_group<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.insert(FieldGroup::new(name, fields));
        self
    }

    pub fn insert(&mut self, group: FieldGroup) {
        match self.0.iter_mut().find(|g| g.name == group.name) {
            Some(existing) => *existing = group,
            None => self.0.push(group),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldGroup> {
        self.0.iter().find(|g| g.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldGroup> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|g| g.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a FieldGroups {
    type Item = &'a FieldGroup;
    type IntoIter = std::slice::Iter<'a, FieldGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Ordered set of `[step, sample, field]` tensors keyed by group name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedTensors {
    entries: Vec<(String, Array3<f64>)>,
}

impl NamedTensors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, replacing an existing one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Array3<f64>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = tensor,
            None => self.entries.push((name, tensor)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Array3<f64>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Array3<f64>> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Tensor for `name`, or a missing-field error naming the group.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingField`] if no such group exists.
    pub fn require(&self, name: &str) -> Result<&Array3<f64>> {
        self.get(name).ok_or_else(|| PipelineError::missing_field(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array3<f64>)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of steps shared by all tensors (0 when empty).
    #[must_use]
    pub fn steps(&self) -> usize {
        self.entries.first().map_or(0, |(_, t)| t.len_of(Axis(0)))
    }

    /// Concatenate every tensor along the field axis, in insertion order.
    ///
    /// # Errors
    ///
    /// Fails if the collection is empty or step/sample counts disagree.
    pub fn concat_fields(&self) -> Result<Array3<f64>> {
        if self.entries.is_empty() {
            return Err(PipelineError::invalid_input("no tensors to concatenate"));
        }
        let views: Vec<ArrayView3<'_, f64>> = self.entries.iter().map(|(_, t)| t.view()).collect();
        concatenate(Axis(2), &views).map_err(|e| {
            let first = self.entries[0].1.shape();
            PipelineError::shape_mismatch(format!("field concatenation ({e})"), first, &[])
        })
    }
}

/// Projects named field groups out of subject arrays.
#[derive(Debug, Clone, Copy)]
pub struct FieldExtractor<'a> {
    index: &'a FieldIndex,
}

impl<'a> FieldExtractor<'a> {
    #[must_use]
    pub const fn new(index: &'a FieldIndex) -> Self {
        Self { index }
    }

    /// Copy the columns of one group out of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingField`] for any unknown field.
    pub fn extract_group(&self, data: &Array3<f64>, group: &FieldGroup) -> Result<Array3<f64>> {
        let locs = self.index.positions(&group.fields)?;
        if let Some(&bad) = locs.iter().find(|&&l| l >= data.len_of(Axis(2))) {
            return Err(PipelineError::shape_mismatch(
                format!("group {}", group.name),
                &[self.index.len()],
                &[bad],
            ));
        }
        Ok(data.select(Axis(2), &locs))
    }

    /// Copy every group of `groups` out of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingField`] for any unknown field.
    pub fn extract(&self, data: &Array3<f64>, groups: &FieldGroups) -> Result<NamedTensors> {
        let mut out = NamedTensors::new();
        for group in groups {
            out.insert(group.name.clone(), self.extract_group(data, group)?);
        }
        Ok(out)
    }
}

/// Number of non-padding samples per step, judged on a single column.
///
/// Windows are zero-padded at the end, so the count of non-zero values in a
/// continuously non-zero channel is the step's real length.
#[must_use]
pub fn step_lengths(tensor: &Array3<f64>, column: usize) -> Vec<usize> {
    tensor
        .index_axis(Axis(2), column)
        .outer_iter()
        .map(|step| step.iter().filter(|&&v| v != 0.0).count())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn index() -> FieldIndex {
        FieldIndex::new(["a", "b", "c", "d"]).unwrap()
    }

    fn data() -> Array3<f64> {
        Array3::from_shape_fn((2, 3, 4), |(s, t, f)| (s * 100 + t * 10 + f) as f64)
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = FieldIndex::new(["a", "b", "a"]).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateField(ref n) if n == "a"));
    }

    #[test]
    fn test_from_json() {
        let idx = FieldIndex::from_json(r#"["x", "y", "z"]"#).unwrap();
        assert_eq!(idx.position("z").unwrap(), 2);
        assert!(FieldIndex::from_json(r#"["x", "x"]"#).is_err());
    }

    #[test]
    fn test_missing_field() {
        let idx = index();
        let err = idx.positions(&["a", "nope"]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingField(ref n) if n == "nope"));
    }

    #[test]
    fn test_extract_group_order() {
        let idx = index();
        let groups = FieldGroups::new().with_group("g", ["d", "b"]);
        let out = FieldExtractor::new(&idx).extract(&data(), &groups).unwrap();
        let g = out.get("g").unwrap();
        assert_eq!(g.shape(), &[2, 3, 2]);
        assert_eq!(g[[1, 2, 0]], 123.0);
        assert_eq!(g[[1, 2, 1]], 121.0);
    }

    #[test]
    fn test_extract_is_a_copy() {
        let idx = index();
        let mut source = data();
        let groups = FieldGroups::new().with_group("g", ["a"]);
        let out = FieldExtractor::new(&idx).extract(&source, &groups).unwrap();
        source[[0, 0, 0]] = -1.0;
        assert_eq!(out.get("g").unwrap()[[0, 0, 0]], 0.0);
    }

    #[test]
    fn test_concat_fields_in_insertion_order() {
        let mut t = NamedTensors::new();
        t.insert("second", Array3::from_elem((2, 3, 1), 2.0));
        t.insert("first", Array3::from_elem((2, 3, 2), 1.0));
        let all = t.concat_fields().unwrap();
        assert_eq!(all.shape(), &[2, 3, 3]);
        assert_eq!(all[[0, 0, 0]], 2.0);
        assert_eq!(all[[0, 0, 2]], 1.0);
    }

    #[test]
    fn test_step_lengths() {
        let mut t = Array3::<f64>::zeros((2, 5, 1));
        for i in 0..3 {
            t[[0, i, 0]] = 1.0;
        }
        for i in 0..5 {
            t[[1, i, 0]] = -1.0;
        }
        assert_eq!(step_lengths(&t, 0), vec![3, 5]);
    }
}
