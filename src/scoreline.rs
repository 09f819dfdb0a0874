use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_MAX_GOALS: usize = 6;
pub const DEFAULT_DC_TAU: f64 = -0.10;
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

// 170! is the largest factorial representable as f64.
const MAX_FACTORIAL: usize = 170;

static FACTORIALS: Lazy<Vec<f64>> = Lazy::new(|| {
    let mut out = Vec::with_capacity(MAX_FACTORIAL + 1);
    out.push(1.0_f64);
    for k in 1..=MAX_FACTORIAL {
        let prev = out[k - 1];
        out.push(prev * k as f64);
    }
    out
});

/// Generating model for the scoreline table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum ScoreModel {
    #[serde(rename = "uni")]
    Independent,
    #[serde(rename = "dc")]
    DixonColes { tau: f64 },
    #[serde(rename = "bivariate")]
    Bivariate { rho: f64 },
}

impl Default for ScoreModel {
    fn default() -> Self {
        ScoreModel::DixonColes {
            tau: DEFAULT_DC_TAU,
        }
    }
}

impl ScoreModel {
    /// Parses the short mode names used in config files: `uni`, `dc`, `bivariate`.
    pub fn parse(mode: &str, tau: f64, rho: f64) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "uni" | "poisson" | "independent" => Some(ScoreModel::Independent),
            "dc" | "dixon-coles" | "dixon_coles" => Some(ScoreModel::DixonColes { tau }),
            "bivariate" | "bp" => Some(ScoreModel::Bivariate { rho }),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreModel::Independent => "uni",
            ScoreModel::DixonColes { .. } => "dc",
            ScoreModel::Bivariate { .. } => "bivariate",
        }
    }

    fn key_parts(&self) -> (u8, u64) {
        match *self {
            ScoreModel::Independent => (0, 0),
            ScoreModel::DixonColes { tau } => (1, tau.to_bits()),
            ScoreModel::Bivariate { rho } => (2, rho.to_bits()),
        }
    }
}

/// Square table of scoreline probabilities. Rows are home goals, columns away goals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorelineMatrix {
    size: usize,
    cells: Vec<f64>,
}

impl ScorelineMatrix {
    pub fn zeros(max_goals: usize) -> Self {
        let size = max_goals + 1;
        Self {
            size,
            cells: vec![0.0; size * size],
        }
    }

    /// Builds a matrix from row vectors, padding ragged input with zeros.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let size = rows
            .iter()
            .map(|r| r.len())
            .chain(std::iter::once(rows.len()))
            .max()
            .unwrap_or(0)
            .max(1);
        let mut out = Self::zeros(size - 1);
        for (h, row) in rows.iter().enumerate() {
            for (a, p) in row.iter().enumerate() {
                out.set(h, a, *p);
            }
        }
        out
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_goals(&self) -> usize {
        self.size - 1
    }

    pub fn get(&self, home_goals: usize, away_goals: usize) -> f64 {
        if home_goals >= self.size || away_goals >= self.size {
            return 0.0;
        }
        self.cells[home_goals * self.size + away_goals]
    }

    pub(crate) fn set(&mut self, home_goals: usize, away_goals: usize, p: f64) {
        if home_goals < self.size && away_goals < self.size {
            self.cells[home_goals * self.size + away_goals] = p;
        }
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }

    /// Row-major iteration over `(home_goals, away_goals, probability)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let size = self.size;
        self.cells
            .iter()
            .enumerate()
            .map(move |(idx, p)| (idx / size, idx % size, *p))
    }

    fn scale(&mut self, factor: f64) {
        for p in &mut self.cells {
            *p *= factor;
        }
    }
}

pub fn poisson_probability(lambda: f64, k: usize) -> f64 {
    let lambda = sanitize_rate(lambda);
    if lambda == 0.0 {
        return if k == 0 { 1.0 } else { 0.0 };
    }
    if k > MAX_FACTORIAL {
        // Log space keeps the far tail finite.
        let ln_fact: f64 = (1..=k).map(|i| (i as f64).ln()).sum();
        return (k as f64 * lambda.ln() - lambda - ln_fact).exp();
    }
    lambda.powi(k as i32) * (-lambda).exp() / FACTORIALS[k]
}

pub fn scoreline_matrix(
    lambda_home: f64,
    lambda_away: f64,
    max_goals: usize,
    model: ScoreModel,
) -> ScorelineMatrix {
    let lh = sanitize_rate(lambda_home);
    let la = sanitize_rate(lambda_away);

    let mut out = match model {
        ScoreModel::Independent => independent_grid(lh, la, max_goals),
        ScoreModel::DixonColes { tau } => dixon_coles_grid(lh, la, max_goals, tau),
        ScoreModel::Bivariate { rho } => bivariate_grid(lh, la, max_goals, rho),
    };

    for p in &mut out.cells {
        if !p.is_finite() || *p < 0.0 {
            *p = 0.0;
        }
    }
    out
}

pub fn normalize_matrix(matrix: &ScorelineMatrix) -> ScorelineMatrix {
    let total = matrix.total();
    let mut out = matrix.clone();
    if total > 0.0 && total.is_finite() {
        out.scale(1.0 / total);
    } else {
        out.cells.iter_mut().for_each(|p| *p = 0.0);
    }
    out
}

fn independent_grid(lh: f64, la: f64, max_goals: usize) -> ScorelineMatrix {
    let pmf_h: Vec<f64> = (0..=max_goals).map(|k| poisson_probability(lh, k)).collect();
    let pmf_a: Vec<f64> = (0..=max_goals).map(|k| poisson_probability(la, k)).collect();

    let mut out = ScorelineMatrix::zeros(max_goals);
    for (h, p_h) in pmf_h.iter().enumerate() {
        for (a, p_a) in pmf_a.iter().enumerate() {
            out.set(h, a, p_h * p_a);
        }
    }
    out
}

fn dixon_coles_grid(lh: f64, la: f64, max_goals: usize, tau: f64) -> ScorelineMatrix {
    let tau = if tau.is_finite() { tau } else { 0.0 };
    let mut out = independent_grid(lh, la, max_goals);
    let mass_before = out.total();

    for h in 0..=max_goals.min(1) {
        for a in 0..=max_goals.min(1) {
            let p = out.get(h, a) * dc_adjustment(h, a, lh, la, tau);
            out.set(h, a, p.max(0.0));
        }
    }

    // The low-score correction only moves mass between scorelines.
    let mass_after = out.total();
    if mass_after > 0.0 && mass_before > 0.0 {
        out.scale(mass_before / mass_after);
    }
    out
}

fn dc_adjustment(home_goals: usize, away_goals: usize, lh: f64, la: f64, tau: f64) -> f64 {
    match (home_goals, away_goals) {
        (0, 0) => 1.0 + (-lh - la) * tau + lh * la * tau * tau,
        (0, 1) => 1.0 + lh * tau,
        (1, 0) => 1.0 + la * tau,
        (1, 1) => 1.0 - tau,
        _ => 1.0,
    }
}

fn bivariate_grid(lh: f64, la: f64, max_goals: usize, rho: f64) -> ScorelineMatrix {
    let rho = sanitize_rate(rho);
    let base = (-(lh + la + rho)).exp();
    let mut out = ScorelineMatrix::zeros(max_goals);

    for x in 0..=max_goals {
        for y in 0..=max_goals {
            let mut sum = 0.0;
            for k in 0..=x.min(y) {
                sum += lh.powi((x - k) as i32) * la.powi((y - k) as i32) * rho.powi(k as i32)
                    / (factorial(x - k) * factorial(y - k) * factorial(k));
            }
            out.set(x, y, base * sum);
        }
    }
    out
}

// Beyond 170! the term underflows to zero anyway.
fn factorial(n: usize) -> f64 {
    FACTORIALS.get(n).copied().unwrap_or(f64::INFINITY)
}

fn sanitize_rate(v: f64) -> f64 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}

type CacheKey = (u64, u64, usize, u8, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Bounded memo of scoreline tables keyed on the exact input bit patterns.
///
/// When full, the least recently used table is evicted.
pub struct ScorelineCache {
    inner: Mutex<LruCache<CacheKey, Arc<ScorelineMatrix>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ScorelineCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ScorelineCache {
    pub fn new(capacity: usize) -> Self {
        let size = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(size)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn matrix(
        &self,
        lambda_home: f64,
        lambda_away: f64,
        max_goals: usize,
        model: ScoreModel,
    ) -> Arc<ScorelineMatrix> {
        let lh = sanitize_rate(lambda_home);
        let la = sanitize_rate(lambda_away);
        let (mode, extra) = model.key_parts();
        let key = (lh.to_bits(), la.to_bits(), max_goals, mode, extra);

        {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = guard.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(hit);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(lh, la, max_goals, mode = model.label(), "scoreline cache miss");
        let computed = Arc::new(scoreline_matrix(lh, la, max_goals, model));
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.put(key, Arc::clone(&computed));
        computed
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: guard.len(),
            capacity: guard.cap().get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{a} vs {b}");
    }

    #[test]
    fn poisson_matches_closed_form() {
        assert_close(poisson_probability(1.8, 3), 0.1607, 1e-4);
        let direct = (-1.8_f64).exp() * 1.8_f64.powi(3) / 6.0;
        assert_close(poisson_probability(1.8, 3), direct, 1e-15);
    }

    #[test]
    fn poisson_zero_rate_is_point_mass() {
        assert_eq!(poisson_probability(0.0, 0), 1.0);
        assert_eq!(poisson_probability(0.0, 2), 0.0);
        assert_eq!(poisson_probability(-3.0, 0), 1.0);
        assert_eq!(poisson_probability(f64::NAN, 1), 0.0);
    }

    #[test]
    fn uni_grid_sums_close_to_one() {
        let m = scoreline_matrix(1.2, 0.9, 6, ScoreModel::Independent);
        assert_eq!(m.size(), 7);
        assert_close(m.total(), 1.0, 5e-4);
    }

    #[test]
    fn dixon_coles_with_zero_tau_is_independent() {
        let uni = scoreline_matrix(1.4, 1.1, 6, ScoreModel::Independent);
        let dc = scoreline_matrix(1.4, 1.1, 6, ScoreModel::DixonColes { tau: 0.0 });
        for (h, a, p) in uni.iter() {
            assert_close(dc.get(h, a), p, 1e-15);
        }
    }

    #[test]
    fn negative_tau_inflates_low_draws_and_keeps_mass() {
        let uni = scoreline_matrix(1.3, 1.0, 6, ScoreModel::Independent);
        let dc = scoreline_matrix(1.3, 1.0, 6, ScoreModel::DixonColes { tau: -0.10 });
        assert!(dc.get(0, 0) > uni.get(0, 0));
        assert!(dc.get(1, 1) > uni.get(1, 1));
        assert!(dc.get(1, 0) < uni.get(1, 0));
        assert_close(dc.total(), uni.total(), 1e-12);
    }

    #[test]
    fn bivariate_with_zero_rho_is_independent() {
        let uni = scoreline_matrix(1.6, 0.7, 6, ScoreModel::Independent);
        let bp = scoreline_matrix(1.6, 0.7, 6, ScoreModel::Bivariate { rho: 0.0 });
        for (h, a, p) in uni.iter() {
            assert_close(bp.get(h, a), p, 1e-12);
        }
    }

    #[test]
    fn bivariate_shared_term_raises_draw_mass() {
        let uni = scoreline_matrix(1.2, 1.0, 8, ScoreModel::Independent);
        let bp = scoreline_matrix(1.2, 1.0, 8, ScoreModel::Bivariate { rho: 0.15 });
        let diag = |m: &ScorelineMatrix| (0..m.size()).map(|i| m.get(i, i)).sum::<f64>();
        assert!(bp.total() > 0.99);
        assert!(diag(&bp) > diag(&uni) * 0.9);
    }

    #[test]
    fn bad_lambdas_are_clamped() {
        let m = scoreline_matrix(-1.0, f64::INFINITY, 4, ScoreModel::default());
        assert_close(m.get(0, 0), 1.0, 1e-12);
        assert!(m.iter().all(|(_, _, p)| p >= 0.0));
    }

    #[test]
    fn normalize_rescales_or_zeroes() {
        let m = scoreline_matrix(3.5, 3.2, 4, ScoreModel::Independent);
        assert!(m.total() < 0.9);
        let n = normalize_matrix(&m);
        assert_close(n.total(), 1.0, 1e-12);

        let z = normalize_matrix(&ScorelineMatrix::zeros(3));
        assert_eq!(z.total(), 0.0);
    }

    #[test]
    fn from_rows_pads_to_square() {
        let m = ScorelineMatrix::from_rows(&[vec![0.5, 0.1], vec![0.2]]);
        assert_eq!(m.size(), 2);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.get(5, 5), 0.0);
    }

    #[test]
    fn model_parse_accepts_short_names() {
        assert_eq!(
            ScoreModel::parse("UNI", 0.0, 0.0),
            Some(ScoreModel::Independent)
        );
        assert_eq!(
            ScoreModel::parse("dc", -0.05, 0.0),
            Some(ScoreModel::DixonColes { tau: -0.05 })
        );
        assert_eq!(
            ScoreModel::parse("bivariate", 0.0, 0.1),
            Some(ScoreModel::Bivariate { rho: 0.1 })
        );
        assert!(ScoreModel::parse("negbin", 0.0, 0.0).is_none());
    }

    #[test]
    fn cache_hits_on_exact_key_and_evicts_lru() {
        let cache = ScorelineCache::new(2);
        let a = cache.matrix(1.2, 0.9, 6, ScoreModel::Independent);
        let b = cache.matrix(1.2, 0.9, 6, ScoreModel::Independent);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().hits, 1);

        cache.matrix(1.3, 0.9, 6, ScoreModel::Independent);
        cache.matrix(1.4, 0.9, 6, ScoreModel::Independent);
        let stats = cache.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.misses, 3);

        // (1.2, 0.9) was least recently used and is gone.
        let c = cache.matrix(1.2, 0.9, 6, ScoreModel::Independent);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn cache_distinguishes_model_parameters() {
        let cache = ScorelineCache::new(8);
        let dc1 = cache.matrix(1.2, 0.9, 6, ScoreModel::DixonColes { tau: -0.1 });
        let dc2 = cache.matrix(1.2, 0.9, 6, ScoreModel::DixonColes { tau: -0.2 });
        assert!(!Arc::ptr_eq(&dc1, &dc2));
        assert_eq!(cache.stats().misses, 2);
    }
}
