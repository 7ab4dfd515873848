//! Class labels and the index-to-label mapping of the classifier output.
//!
use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Result};
use serde::Serialize;

/// Classes the hand/face model knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Hand,
    Face,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Hand => "hand",
            Label::Face => "face",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hand" => Ok(Label::Hand),
            "face" => Ok(Label::Face),
            other => Err(anyhow!("unknown label {other:?}, expected \"hand\" or \"face\"")),
        }
    }
}

/// Ordered mapping from class index to label.
///
/// Index `i` of the mapping names entry `i` of the model output. The mapping has no gaps by
/// construction; `check_output_len` ties it to an actual model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<Label>,
}

impl LabelMap {
    pub fn new(labels: Vec<Label>) -> Result<Self> {
        if labels.is_empty() {
            bail!("label mapping is empty");
        }
        for (index, label) in labels.iter().enumerate() {
            if labels[..index].contains(label) {
                bail!("label {label} is mapped twice");
            }
        }

        Ok(Self { labels })
    }

    /// Parse labels in class index order, e.g. `["hand", "face"]`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let labels = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<Label>>>()?;
        Self::new(labels)
    }

    pub fn get(&self, index: usize) -> Option<Label> {
        self.labels.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Fail unless the model produces exactly one score per mapped label.
    pub fn check_output_len(&self, output_len: usize) -> Result<()> {
        if output_len != self.labels.len() {
            bail!(
                "model produces {} class scores but {} labels are mapped",
                output_len,
                self.labels.len()
            );
        }
        Ok(())
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            labels: vec![Label::Hand, Label::Face],
        }
    }
}
