use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance function an index generation is built and queried with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `sqrt(2 - 2 * cos(u, v))`, in `[0, 2]`.
    Angular,
    Euclidean,
    /// Negated inner product; smaller is closer.
    Dot,
}

impl Default for Metric {
    fn default() -> Self {
        Self::Angular
    }
}

impl Metric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Angular => "angular",
            Self::Euclidean => "euclidean",
            Self::Dot => "dot",
        }
    }

    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Angular => {
                let cos = cosine(a, b);
                (2.0 - 2.0 * cos).max(0.0).sqrt()
            }
            Self::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Self::Dot => -dot(a, b),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "angular" | "cosine" => Ok(Self::Angular),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "dot" => Ok(Self::Dot),
            other => Err(format!(
                "unknown metric '{other}' (expected angular, euclidean or dot)"
            )),
        }
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    (dot(a, b) / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn angular_distance_bounds() {
        let m = Metric::Angular;
        assert!(close(m.distance(&[1.0, 0.0], &[2.0, 0.0]), 0.0));
        assert!(close(m.distance(&[1.0, 0.0], &[0.0, 3.0]), 2.0_f32.sqrt()));
        assert!(close(m.distance(&[1.0, 0.0], &[-1.0, 0.0]), 2.0));
    }

    #[test]
    fn angular_zero_vector_is_orthogonal() {
        assert!(close(
            Metric::Angular.distance(&[0.0, 0.0], &[1.0, 1.0]),
            2.0_f32.sqrt()
        ));
    }

    #[test]
    fn euclidean_and_dot() {
        assert!(close(Metric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0));
        assert!(close(Metric::Dot.distance(&[1.0, 2.0], &[3.0, 4.0]), -11.0));
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("Cosine".parse::<Metric>().unwrap(), Metric::Angular);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
