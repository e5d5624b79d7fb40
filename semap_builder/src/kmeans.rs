//! K-means over 2-D layout points with a pinned prefix of centers.
//!
//! Representatives committed at a coarser zoom must keep their exact
//! position when a tile is re-clustered one level deeper. `fit` therefore
//! accepts a prefix of fixed centers that Lloyd iterations never move; only
//! the remaining `k − f` centers are seeded and optimized.
//!
//! # Examples
//!
//! ```
//! use semap_builder::ConstrainedKMeans;
//!
//! let points = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
//! let fixed = [[0.0, 0.0], [10.0, 10.0]];
//! let fit = ConstrainedKMeans::new(4).fit(&points, &fixed).unwrap();
//! assert_eq!(&fit.centers[..2], &fixed);
//! assert_eq!(fit.inertia, 0.0);
//! ```

use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone, Debug)]
pub struct ConstrainedKMeans {
	k: usize,
	n_init: usize,
	max_iter: usize,
	tol: f32,
	seed: u64,
}

/// Result of a fit: `centers[..fixed]` are the pinned inputs, untouched.
///
/// `labels` is the assignment of the final Lloyd pass. At convergence every
/// moving (non-pinned) cluster is guaranteed at least one member under this
/// assignment, which downstream representative selection relies on.
#[derive(Clone, Debug)]
pub struct KMeansFit {
	pub centers: Vec<[f32; 2]>,
	pub fixed: usize,
	pub inertia: f32,
	pub labels: Vec<usize>,
}

fn l2(a: [f32; 2], b: [f32; 2]) -> f32 {
	let dx = a[0] - b[0];
	let dy = a[1] - b[1];
	dx * dx + dy * dy
}

/// Index of the center nearest to `point`; ties go to the lowest index.
fn nearest(centers: &[[f32; 2]], point: [f32; 2]) -> usize {
	let mut best = 0;
	let mut best_dist = f32::INFINITY;
	for (i, center) in centers.iter().enumerate() {
		let dist = l2(*center, point);
		if dist < best_dist {
			best = i;
			best_dist = dist;
		}
	}
	best
}

impl ConstrainedKMeans {
	pub fn new(k: usize) -> ConstrainedKMeans {
		ConstrainedKMeans {
			k,
			n_init: 1,
			max_iter: 1000,
			tol: 1e-6,
			seed: 0,
		}
	}

	pub fn with_n_init(mut self, n_init: usize) -> ConstrainedKMeans {
		self.n_init = n_init.max(1);
		self
	}

	pub fn with_max_iter(mut self, max_iter: usize) -> ConstrainedKMeans {
		self.max_iter = max_iter;
		self
	}

	pub fn with_seed(mut self, seed: u64) -> ConstrainedKMeans {
		self.seed = seed;
		self
	}

	/// Fits `k` centers to `points`, keeping `fixed` as the immutable center
	/// prefix. Runs `n_init` restarts and keeps the lowest-inertia result.
	pub fn fit(&self, points: &[[f32; 2]], fixed: &[[f32; 2]]) -> Result<KMeansFit> {
		ensure!(self.k >= 1, "k must be >= 1");
		ensure!(
			fixed.len() <= self.k,
			"{} fixed centers exceed k = {}",
			fixed.len(),
			self.k
		);
		ensure!(
			points.len() >= self.k,
			"{} points cannot fill k = {} clusters",
			points.len(),
			self.k
		);
		for p in points.iter().chain(fixed) {
			ensure!(p[0].is_finite() && p[1].is_finite(), "coordinates must be finite");
		}

		// Fully pinned: nothing to optimize, a single assignment pass scores it.
		if fixed.len() == self.k {
			let centers = fixed.to_vec();
			let labels: Vec<usize> = points.iter().map(|p| nearest(&centers, *p)).collect();
			let inertia = inertia_of(&centers, points, &labels);
			return Ok(KMeansFit {
				centers,
				fixed: fixed.len(),
				inertia,
				labels,
			});
		}

		let mut best: Option<KMeansFit> = None;
		for init in 0..self.n_init {
			let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(init as u64));
			let fit = self.fit_once(points, fixed, &mut rng)?;
			if best.as_ref().is_none_or(|b| fit.inertia < b.inertia) {
				best = Some(fit);
			}
		}
		Ok(best.unwrap())
	}

	fn fit_once(&self, points: &[[f32; 2]], fixed: &[[f32; 2]], rng: &mut StdRng) -> Result<KMeansFit> {
		let mut centers = self.seed_centers(points, fixed, rng);
		let mut labels = vec![0usize; points.len()];

		for _ in 0..self.max_iter {
			for (label, point) in labels.iter_mut().zip(points) {
				*label = nearest(&centers, *point);
			}

			// Recompute the moving centers only.
			let mut shift: f32 = 0.0;
			for c in fixed.len()..self.k {
				let mut sum = [0f64; 2];
				let mut count = 0usize;
				for (label, point) in labels.iter().zip(points) {
					if *label == c {
						sum[0] += f64::from(point[0]);
						sum[1] += f64::from(point[1]);
						count += 1;
					}
				}
				let new_center = if count == 0 {
					// Re-seed an empty cluster with a random point and force
					// another iteration so the assignment catches up.
					shift = f32::INFINITY;
					points[rng.gen_range(0..points.len())]
				} else {
					[(sum[0] / count as f64) as f32, (sum[1] / count as f64) as f32]
				};
				shift = shift.max(l2(centers[c], new_center));
				centers[c] = new_center;
			}

			if shift <= self.tol {
				break;
			}
		}

		let inertia = inertia_of(&centers, points, &labels);
		Ok(KMeansFit {
			centers,
			fixed: fixed.len(),
			inertia,
			labels,
		})
	}

	/// Seeds the free centers: farthest-point for a single init (stable and
	/// spread out), D²-weighted sampling when restarts provide the variance.
	fn seed_centers(&self, points: &[[f32; 2]], fixed: &[[f32; 2]], rng: &mut StdRng) -> Vec<[f32; 2]> {
		let mut centers: Vec<[f32; 2]> = fixed.to_vec();
		if centers.is_empty() {
			centers.push(points[rng.gen_range(0..points.len())]);
		}
		while centers.len() < self.k {
			let weights: Vec<f32> = points.iter().map(|p| {
				centers.iter().map(|c| l2(*c, *p)).fold(f32::INFINITY, f32::min)
			}).collect();
			let next = if self.n_init == 1 {
				// Farthest point, ties to the lowest index.
				let mut best = 0;
				for (i, w) in weights.iter().enumerate() {
					if *w > weights[best] {
						best = i;
					}
				}
				points[best]
			} else {
				let total: f64 = weights.iter().map(|w| f64::from(*w)).sum();
				if total <= 0.0 {
					points[rng.gen_range(0..points.len())]
				} else {
					let mut target = rng.gen_range(0.0..total);
					let mut chosen = points.len() - 1;
					for (i, w) in weights.iter().enumerate() {
						target -= f64::from(*w);
						if target <= 0.0 {
							chosen = i;
							break;
						}
					}
					points[chosen]
				}
			};
			centers.push(next);
		}
		centers
	}
}

impl KMeansFit {
	pub fn k(&self) -> usize {
		self.centers.len()
	}

	/// Cluster of `point` under the fitted centers.
	pub fn predict(&self, point: [f32; 2]) -> usize {
		nearest(&self.centers, point)
	}
}

fn inertia_of(centers: &[[f32; 2]], points: &[[f32; 2]], labels: &[usize]) -> f32 {
	points.iter().zip(labels).map(|(p, label)| l2(centers[*label], *p)).sum()
}
