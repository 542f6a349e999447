use serde::{Deserialize, Serialize};

/// Face descriptor: fixed-length embedding vector (512-dimensional for
/// the bundled ArcFace model), L2-normalized by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another descriptor.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Map this box from frame coordinates into a display coordinate
    /// space by the given per-axis scale factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
        }
    }

    /// Box area in square pixels.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Named pose of an enrollment reference image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewAngle {
    Front,
    Left,
    Right,
}

/// One reference image of an enrolled person. The location is an opaque
/// locator; the daemon resolves it as a filesystem path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub view: ViewAngle,
    pub location: String,
}

/// An enrolled person as read from the enrollment store. Read-only to
/// this system; `id` is the stable identifier, `label` the display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledPerson {
    pub id: String,
    pub label: String,
    /// Zero to three reference images; any may be absent.
    pub images: Vec<ReferenceImage>,
}

/// A person's descriptor set for one session: one descriptor per
/// reference image that yielded a face. Never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptors {
    pub person_id: String,
    pub label: String,
    descriptors: Vec<Descriptor>,
}

impl LabeledDescriptors {
    /// Returns `None` when `descriptors` is empty: a person with no
    /// usable reference image does not enter the gallery.
    pub fn new(
        person_id: impl Into<String>,
        label: impl Into<String>,
        descriptors: Vec<Descriptor>,
    ) -> Option<Self> {
        if descriptors.is_empty() {
            return None;
        }
        Some(Self {
            person_id: person_id.into(),
            label: label.into(),
            descriptors,
        })
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }
}

/// The full set of labeled descriptor sets built for one session.
/// Built once, then read-only for the session's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gallery {
    entries: Vec<LabeledDescriptors>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor set, keeping at most one entry per person id.
    /// Returns the displaced entry when the person was already present.
    pub fn insert(&mut self, set: LabeledDescriptors) -> Option<LabeledDescriptors> {
        let previous = self
            .entries
            .iter()
            .position(|e| e.person_id == set.person_id)
            .map(|i| self.entries.remove(i));
        self.entries.push(set);
        previous
    }

    pub fn entries(&self) -> &[LabeledDescriptors] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of matching a live descriptor against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MatchResult {
    /// Closest enrolled person within the threshold.
    Match {
        person_id: String,
        label: String,
        distance: f32,
    },
    /// Nothing within the threshold, or the gallery was empty.
    /// `distance` is the closest distance seen, when there was one.
    Unknown { distance: Option<f32> },
}

impl MatchResult {
    /// Display label: the matched person's label, or the
    /// `"unknown"` sentinel.
    pub fn label(&self) -> &str {
        match self {
            MatchResult::Match { label, .. } => label,
            MatchResult::Unknown { .. } => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MatchResult::Unknown { .. })
    }
}
