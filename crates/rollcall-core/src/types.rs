use serde::Serialize;

/// Norms at or below this are treated as degenerate and left undivided.
pub const NORM_EPSILON: f32 = 1e-6;

/// Score reported when there is nothing to compare against.
pub const NO_MATCH_SCORE: f32 = -1.0;

/// Face bounding box in original-image pixel coordinates.
///
/// Corners are ordered and clamped to the image, with `x2`/`y2` exclusive:
/// `0 <= x1 <= x2 <= width` and `0 <= y1 <= y2 <= height`. A box pushed
/// against an edge by clamping can collapse to zero area; such boxes are
/// never cropped (see [`BoundingBox::is_empty`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl BoundingBox {
    /// Build a box from signed corners, clamping it into a `width` × `height` image.
    ///
    /// This is the only constructor.
    pub fn clamped(x1: i32, y1: i32, x2: i32, y2: i32, width: u32, height: u32) -> Self {
        let clamp = |v: i32, max: u32| (v.max(0) as u32).min(max);

        let x1 = clamp(x1, width);
        let y1 = clamp(y1, height);
        let x2 = clamp(x2, width).max(x1);
        let y2 = clamp(y2, height).max(y1);

        Self { x1, y1, x2, y2 }
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// True when clamping collapsed the box to zero area.
    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Corners as `[x1, y1, x2, y2]`.
    pub fn corners(&self) -> [u32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// A detected face before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// Face embedding vector, unit L2 norm unless the raw vector was degenerate.
///
/// Similarity is a raw dot product, so every constructor normalizes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// L2-normalize `raw`. A vector whose norm is at most [`NORM_EPSILON`]
    /// is returned unchanged rather than divided.
    pub fn normalized(raw: Vec<f32>) -> Self {
        let norm = l2_norm(&raw);
        let values = if norm > NORM_EPSILON {
            raw.into_iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    pub fn view(&self) -> ndarray::ArrayView1<'_, f32> {
        ndarray::ArrayView1::from(self.values.as_slice())
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Embedding of one detected face together with where it was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceEmbedding {
    pub embedding: Embedding,
    pub bbox: BoundingBox,
}

/// One enrolled identity and its canonical reference vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryEntry {
    /// Opaque caller-supplied identifier.
    pub identity: String,
    pub reference: Embedding,
}

/// Outcome of matching one query embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Identity of the match; `None` unless `matched`.
    pub identity: Option<String>,
    /// Best similarity seen, or [`NO_MATCH_SCORE`] for an empty gallery.
    pub score: f32,
    pub bbox: Option<BoundingBox>,
}

impl MatchResult {
    pub fn unmatched(score: f32) -> Self {
        Self {
            matched: false,
            identity: None,
            score,
            bbox: None,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}
