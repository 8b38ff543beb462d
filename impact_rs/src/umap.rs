//! Seeded UMAP-style 2-d embedding.
//!
//! Fuzzy k-nearest-neighbour graph with a per-point bandwidth, symmetrized
//! with the probabilistic union, then laid out by SGD with negative sampling.

use hashbrown::HashMap;
use rand::{rngs::StdRng, Rng, SeedableRng};

const GRAD_CLIP: f64 = 4.0;
const NEGATIVE_SAMPLES: usize = 5;
const SIGMA_STEPS: usize = 64;
const INIT_SCALE: f64 = 10.0;
const SPREAD: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct Umap {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub seed: u64,
}

impl Umap {
    pub fn embed(&self, data: &[Vec<f64>]) -> Vec<[f64; 2]> {
        let n = data.len();
        if n < 2 {
            return vec![[0.0, 0.0]; n];
        }
        let k = self.n_neighbors.clamp(1, n - 1);
        let edges = fuzzy_graph(data, k);
        let (a, b) = fit_ab(self.min_dist, SPREAD);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut emb: Vec<[f64; 2]> = (0..n)
            .map(|_| {
                [
                    rng.gen_range(-INIT_SCALE..INIT_SCALE),
                    rng.gen_range(-INIT_SCALE..INIT_SCALE),
                ]
            })
            .collect();
        self.optimize(&mut emb, &edges, a, b, &mut rng);
        emb
    }

    fn optimize(
        &self,
        emb: &mut [[f64; 2]],
        edges: &[(usize, usize, f64)],
        a: f64,
        b: f64,
        rng: &mut StdRng,
    ) {
        let n = emb.len();
        let max_w = edges.iter().map(|e| e.2).fold(0.0, f64::max);
        if max_w <= 0.0 {
            return;
        }
        // heavier edges are sampled more often
        let per_sample: Vec<f64> = edges.iter().map(|e| max_w / e.2).collect();
        let mut next_sample = per_sample.clone();
        let epochs = self.n_epochs.max(1);

        for epoch in 0..epochs {
            let lr = 1.0 - epoch as f64 / epochs as f64;
            for (ei, &(i, j, _)) in edges.iter().enumerate() {
                if next_sample[ei] > (epoch + 1) as f64 {
                    continue;
                }
                next_sample[ei] += per_sample[ei];

                let d = diff(&emb[i], &emb[j]);
                let dist_sq = d[0] * d[0] + d[1] * d[1];
                if dist_sq > 0.0 {
                    let coef = -2.0 * a * b * dist_sq.powf(b - 1.0) / (1.0 + a * dist_sq.powf(b));
                    for c in 0..2 {
                        let g = clip(coef * d[c]) * lr;
                        emb[i][c] += g;
                        emb[j][c] -= g;
                    }
                }

                for _ in 0..NEGATIVE_SAMPLES {
                    let other = rng.gen_range(0..n);
                    if other == i {
                        continue;
                    }
                    let d = diff(&emb[i], &emb[other]);
                    let dist_sq = d[0] * d[0] + d[1] * d[1];
                    for c in 0..2 {
                        let g = if dist_sq > 0.0 {
                            let coef = 2.0 * b / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)));
                            clip(coef * d[c])
                        } else {
                            GRAD_CLIP
                        };
                        emb[i][c] += g * lr;
                    }
                }
            }
        }
    }
}

fn diff(p: &[f64; 2], q: &[f64; 2]) -> [f64; 2] {
    [p[0] - q[0], p[1] - q[1]]
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRAD_CLIP, GRAD_CLIP)
}

fn euclid(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Symmetric membership edges `(i, j, w)` with `i < j`.
fn fuzzy_graph(data: &[Vec<f64>], k: usize) -> Vec<(usize, usize, f64)> {
    let n = data.len();
    let target = (k as f64).log2();
    let mut directed: HashMap<(usize, usize), f64> = HashMap::new();
    for i in 0..n {
        let mut neigh: Vec<(usize, f64)> = (0..n)
            .filter(|j| *j != i)
            .map(|j| (j, euclid(&data[i], &data[j])))
            .collect();
        neigh.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        neigh.truncate(k);
        let rho = neigh.first().map(|x| x.1).unwrap_or(0.0);
        let sigma = find_sigma(&neigh, rho, target);
        for (j, d) in neigh {
            directed.insert((i, j), membership(d, rho, sigma));
        }
    }

    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    for (&(i, j), &p) in directed.iter() {
        if i < j || !directed.contains_key(&(j, i)) {
            let q = directed.get(&(j, i)).copied().unwrap_or(0.0);
            let w = p + q - p * q;
            if w > 1e-10 {
                edges.push((i.min(j), i.max(j), w));
            }
        }
    }
    // map iteration order is not stable across runs
    edges.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
    edges
}

fn membership(d: f64, rho: f64, sigma: f64) -> f64 {
    if d <= rho {
        1.0
    } else {
        (-(d - rho) / sigma).exp()
    }
}

fn find_sigma(neigh: &[(usize, f64)], rho: f64, target: f64) -> f64 {
    let (mut lo, mut hi) = (1e-10_f64, 100.0_f64);
    for _ in 0..SIGMA_STEPS {
        let mid = (lo + hi) / 2.0;
        let sum: f64 = neigh.iter().map(|x| membership(x.1, rho, mid)).sum();
        if sum > target {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    (lo + hi) / 2.0
}

/// Least-squares fit of `1 / (1 + a d^(2b))` to the target low-dimensional
/// membership curve, by coarse then fine grid search.
pub fn fit_ab(min_dist: f64, spread: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * spread * 3.0 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|x| {
            if *x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();
    let err = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(ys.iter())
            .map(|(x, y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };
    let search = |a_range: (f64, f64), b_range: (f64, f64), steps: usize| -> (f64, f64) {
        let mut best = (a_range.0, b_range.0, f64::INFINITY);
        for ia in 0..=steps {
            let a = a_range.0 + (a_range.1 - a_range.0) * ia as f64 / steps as f64;
            for ib in 0..=steps {
                let b = b_range.0 + (b_range.1 - b_range.0) * ib as f64 / steps as f64;
                let e = err(a, b);
                if e < best.2 {
                    best = (a, b, e);
                }
            }
        }
        (best.0, best.1)
    };
    let (mut a, mut b) = search((0.05, 5.0), (0.2, 2.0), 60);
    let (mut da, mut db) = (4.95 / 60.0, 1.8 / 60.0);
    for _ in 0..4 {
        (a, b) = search(
            ((a - 2.0 * da).max(1e-3), a + 2.0 * da),
            ((b - 2.0 * db).max(1e-3), b + 2.0 * db),
            20,
        );
        da /= 5.0;
        db /= 5.0;
    }
    (a, b)
}
