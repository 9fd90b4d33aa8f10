//! Deterministic, seedable random variate library.
//!
//! Everything the simulation draws comes through [`RandGen`]: uniforms,
//! Gaussians, Poisson and Binomial deviates (direct method for small
//! parameters, rejection sampling above, after Press et al., Numerical
//! Recipes in C), truncated Normal/skew-Normal/Gamma variates, exponentials
//! and weighted index sampling over `u64`/`f64` weight arrays. Generators
//! can be `split()` into independent children for worker threads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{SimError, SimResult};

/// Seedable generator with reusable cumulative-sum buffers.
///
/// The buffers back `sample_index_u64`/`sample_index_f64` and grow
/// monotonically to the largest weight array ever sampled; they are never
/// shrunk within a run.
pub struct RandGen {
    rng: StdRng,
    seed: u64,
    csum_u64: Vec<u64>,
    csum_f64: Vec<f64>,
    gauss_spare: Option<f64>,
}

impl RandGen {
    pub fn new(seed: u64) -> Self {
        RandGen {
            rng: StdRng::seed_from_u64(seed),
            seed,
            csum_u64: Vec::new(),
            csum_f64: Vec::new(),
            gauss_spare: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive an independent child generator seeded from this generator's
    /// next draw. Used to hand each sampler worker its own stream.
    pub fn split(&mut self) -> RandGen {
        let child_seed = self.rng.gen::<u64>();
        RandGen::new(child_seed)
    }

    /// Uniform real in [0, 1).
    pub fn f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform real in [0, max).
    pub fn f64_below(&mut self, max: f64) -> f64 {
        self.rng.gen::<f64>() * max
    }

    /// Uniform integer in [0, n). `n` must be positive.
    pub fn u64_below(&mut self, n: u64) -> u64 {
        self.rng.gen_range(0..n)
    }

    /// Standard normal deviate via the Marsaglia polar method. The second
    /// variate of each pair is cached and served on the next call.
    pub fn gauss(&mut self) -> f64 {
        if let Some(spare) = self.gauss_spare.take() {
            return spare;
        }
        loop {
            let u = 2.0 * self.f64() - 1.0;
            let v = 2.0 * self.f64() - 1.0;
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                let factor = (-2.0 * s.ln() / s).sqrt();
                self.gauss_spare = Some(v * factor);
                return u * factor;
            }
        }
    }

    /// Normal deviate with the given mean and standard deviation.
    pub fn gauss_with(&mut self, mean: f64, sd: f64) -> f64 {
        self.gauss() * sd + mean
    }

    /// Poisson deviate. Direct product-of-uniforms method for mean < 12,
    /// rejection with a Lorentzian comparison function above.
    pub fn poisson(&mut self, mean: f64) -> u32 {
        if mean < 12.0 {
            let g = (-mean).exp();
            let mut em: i64 = -1;
            let mut t = 1.0;
            loop {
                em += 1;
                t *= self.f64();
                if t <= g {
                    return em as u32;
                }
            }
        }
        let sq = (2.0 * mean).sqrt();
        let alxm = mean.ln();
        let g = mean * alxm - ln_gamma(mean + 1.0);
        loop {
            let mut em;
            let mut y;
            loop {
                y = (std::f64::consts::PI * self.f64()).tan();
                em = sq * y + mean;
                if em >= 0.0 {
                    break;
                }
            }
            em = em.floor();
            let t = 0.9 * (1.0 + y * y) * (em * alxm - ln_gamma(em + 1.0) - g).exp();
            if self.f64() <= t {
                return em as u32;
            }
        }
    }

    /// Binomial deviate. Direct Bernoulli summation for n < 25, rejection
    /// above. The success probability is folded to p <= 0.5 and the result
    /// reflected back, as in the Numerical Recipes formulation.
    pub fn binomial(&mut self, n: u64, pp: f64) -> u64 {
        if n == 0 || pp <= 0.0 {
            return 0;
        }
        if pp >= 1.0 {
            return n;
        }
        let p = if pp <= 0.5 { pp } else { 1.0 - pp };

        let bnl = if n < 25 {
            let mut hits = 0u64;
            for _ in 0..n {
                if self.f64() < p {
                    hits += 1;
                }
            }
            hits
        } else {
            let en = n as f64;
            let am = en * p;
            let g = ln_gamma(en + 1.0);
            let pc = 1.0 - p;
            let plog = p.ln();
            let pclog = pc.ln();
            let sq = (2.0 * am * pc).sqrt();
            loop {
                let mut em;
                let mut y;
                loop {
                    y = (std::f64::consts::PI * self.f64()).tan();
                    em = sq * y + am;
                    if em >= 0.0 && em < en + 1.0 {
                        break;
                    }
                }
                em = em.floor();
                let t = 1.2
                    * sq
                    * (1.0 + y * y)
                    * (g - ln_gamma(em + 1.0) - ln_gamma(en - em + 1.0)
                        + em * plog
                        + (en - em) * pclog)
                        .exp();
                if self.f64() <= t {
                    break em as u64;
                }
            }
        };

        if p < pp {
            n - bnl
        } else {
            bnl
        }
    }

    /// Truncated normal length: rejection until the variate lands in
    /// [low, high]. A zero scale collapses to the clamped location.
    pub fn trunc_normal(&mut self, location: f64, scale: f64, low: u64, high: u64) -> u32 {
        if scale == 0.0 {
            return clamp_u32(location, low, high);
        }
        loop {
            let u = self.gauss_with(location, scale);
            if u >= low as f64 && u <= high as f64 {
                return u as u32;
            }
        }
    }

    /// Truncated skew-normal length (Azzalini construction: a pair of
    /// correlated normals, the sign of the first selecting the half-plane).
    pub fn trunc_skew_normal(
        &mut self,
        location: f64,
        scale: f64,
        shape: f64,
        low: u64,
        high: u64,
    ) -> u32 {
        if scale == 0.0 {
            return clamp_u32(location, low, high);
        }
        let delta = shape / (1.0 + shape * shape).sqrt();
        let coef = (1.0 - delta * delta).sqrt();
        loop {
            let u0 = self.gauss();
            let v = self.gauss();
            let u1 = delta * u0 + coef * v;
            let z = if u0 >= 0.0 { u1 } else { -u1 };
            let u = location + scale * z;
            if u >= low as f64 && u <= high as f64 {
                return u as u32;
            }
        }
    }

    /// Truncated gamma length with the given shape and scale
    /// (Marsaglia-Tsang squeeze; the shape < 1 case is boosted through
    /// shape + 1 and a uniform power).
    pub fn trunc_gamma(&mut self, shape: f64, scale: f64, low: u64, high: u64) -> u32 {
        loop {
            let u = self.gamma(shape) * scale;
            if u >= low as f64 && u <= high as f64 {
                return u as u32;
            }
        }
    }

    fn gamma(&mut self, shape: f64) -> f64 {
        if shape < 1.0 {
            let boost = self.gamma(shape + 1.0);
            let u = self.f64();
            return boost * u.powf(1.0 / shape);
        }
        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let x = self.gauss();
            let v = 1.0 + c * x;
            if v <= 0.0 {
                continue;
            }
            let v = v * v * v;
            let u = self.f64();
            if u < 1.0 - 0.0331 * x * x * x * x {
                return d * v;
            }
            if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
                return d * v;
            }
        }
    }

    /// Exponential variate with the given rate (mean 1/rate).
    pub fn exp_with_rate(&mut self, rate: f64) -> f64 {
        // Inverse transform; f64() < 1 keeps the log argument positive.
        -(1.0 - self.f64()).ln() / rate
    }

    /// Truncated exponential integer with the given mean: resample until
    /// the variate does not exceed `max`.
    pub fn trunc_exp_int(&mut self, mean: u32, max: u32) -> u32 {
        if mean == 0 || max == 0 {
            return 0;
        }
        let rate = 1.0 / mean as f64;
        loop {
            let u = self.exp_with_rate(rate) as u32;
            if u <= max {
                return u;
            }
        }
    }

    /// Weighted index draw over `u64` weights. Returns `Ok(None)` when the
    /// weight array is empty or sums to zero; cumulative-sum overflow is a
    /// fatal numeric error.
    pub fn sample_index_u64(&mut self, weights: &[u64]) -> SimResult<Option<usize>> {
        let size = weights.len();
        if size == 0 {
            return Ok(None);
        }
        if self.csum_u64.len() < size {
            self.csum_u64.resize(size, 0);
        }

        self.csum_u64[0] = weights[0];
        for i in 1..size {
            self.csum_u64[i] = self.csum_u64[i - 1].checked_add(weights[i]).ok_or_else(|| {
                SimError::Numeric("integer overflow in cumulative weight sum".to_string())
            })?;
        }

        let total = self.csum_u64[size - 1];
        if total == 0 {
            return Ok(None);
        }
        let u = self.rng.gen_range(0..total);
        Ok(Some(search_upper_u64(&self.csum_u64[..size], u)))
    }

    /// Weighted index draw over `f64` weights. Returns `Ok(None)` when the
    /// weight array is empty or sums to zero.
    pub fn sample_index_f64(&mut self, weights: &[f64]) -> SimResult<Option<usize>> {
        let size = weights.len();
        if size == 0 {
            return Ok(None);
        }
        if self.csum_f64.len() < size {
            self.csum_f64.resize(size, 0.0);
        }

        self.csum_f64[0] = weights[0];
        for i in 1..size {
            self.csum_f64[i] = self.csum_f64[i - 1] + weights[i];
        }

        let total = self.csum_f64[size - 1];
        if total <= 0.0 {
            return Ok(None);
        }
        let u = self.f64_below(total);
        Ok(Some(search_upper_f64(&self.csum_f64[..size], u)))
    }
}

/// First index whose cumulative value exceeds `x` (upper-bound binary
/// search over a non-decreasing array).
fn search_upper_u64(a: &[u64], x: u64) -> usize {
    let (mut i, mut j) = (0usize, a.len());
    while i < j {
        let h = i + (j - i) / 2;
        if a[h] <= x {
            i = h + 1;
        } else {
            j = h;
        }
    }
    i
}

fn search_upper_f64(a: &[f64], x: f64) -> usize {
    let (mut i, mut j) = (0usize, a.len());
    while i < j {
        let h = i + (j - i) / 2;
        if a[h] <= x {
            i = h + 1;
        } else {
            j = h;
        }
    }
    i.min(a.len() - 1)
}

fn clamp_u32(x: f64, low: u64, high: u64) -> u32 {
    let x = x.max(low as f64).min(high as f64);
    x as u32
}

/// Natural log of the gamma function (Lanczos approximation, g = 5).
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COEF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}
