//! Mixtures of truncated length distributions.
//!
//! Both the target fragment size distribution and the poly-A tail length
//! distribution are specified as weighted mixtures of truncated components,
//! written `weight:kind:(p1,p2[,p3],low,high) + ...` where kind is one of
//! `n` (normal), `sn` (skew-normal, with the extra shape parameter) or `g`
//! (gamma).

use std::fmt;

use crate::error::{SimError, SimResult};
use crate::random::RandGen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixKind {
    Normal,
    SkewNormal,
    Gamma,
}

impl MixKind {
    fn tag(&self) -> &'static str {
        match self {
            MixKind::Normal => "n",
            MixKind::SkewNormal => "sn",
            MixKind::Gamma => "g",
        }
    }
}

/// One truncated mixture component. For gamma components the location
/// parameter is the shape of the distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct MixComp {
    pub kind: MixKind,
    pub location: f64,
    pub scale: f64,
    pub shape: f64,
    pub low: u64,
    pub high: u64,
}

impl MixComp {
    /// Draw one length from the truncated component. Degenerate bounds
    /// short-circuit to the constant.
    pub fn sample_length(&self, rng: &mut RandGen) -> u32 {
        if self.low == self.high {
            return self.low as u32;
        }
        match self.kind {
            MixKind::Normal => rng.trunc_normal(self.location, self.scale, self.low, self.high),
            MixKind::SkewNormal => {
                rng.trunc_skew_normal(self.location, self.scale, self.shape, self.low, self.high)
            }
            MixKind::Gamma => rng.trunc_gamma(self.location, self.scale, self.low, self.high),
        }
    }
}

impl fmt::Display for MixComp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MixKind::SkewNormal => write!(
                f,
                "{}:({}, {}, {}, {}, {})",
                self.kind.tag(),
                self.location,
                self.scale,
                self.shape,
                self.low,
                self.high
            ),
            _ => write!(
                f,
                "{}:({}, {}, {}, {})",
                self.kind.tag(),
                self.location,
                self.scale,
                self.low,
                self.high
            ),
        }
    }
}

/// Weighted mixture with a stable component order. Weights need not sum to
/// one; sampling normalizes implicitly.
#[derive(Debug, Clone)]
pub struct TargetMix {
    pub components: Vec<(MixComp, f64)>,
}

impl TargetMix {
    /// Global [low, high] across all components.
    pub fn bounds(&self) -> (u64, u64) {
        let mut low = u64::MAX;
        let mut high = 0;
        for (comp, _) in &self.components {
            low = low.min(comp.low);
            high = high.max(comp.high);
        }
        (low, high)
    }

    /// Draw a component index proportionally to the mixture weights.
    pub fn sample_comp(&self, rng: &mut RandGen) -> SimResult<&MixComp> {
        if self.components.len() == 1 {
            return Ok(&self.components[0].0);
        }
        let weights: Vec<f64> = self.components.iter().map(|(_, w)| *w).collect();
        let idx = rng.sample_index_f64(&weights)?.ok_or_else(|| {
            SimError::Config("mixture weights sum to zero".to_string())
        })?;
        Ok(&self.components[idx].0)
    }

    /// Draw one length: pick a component, then sample its truncated
    /// distribution.
    pub fn sample_length(&self, rng: &mut RandGen) -> SimResult<u32> {
        let comp = self.sample_comp(rng)?;
        Ok(comp.sample_length(rng))
    }
}

impl fmt::Display for TargetMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .components
            .iter()
            .map(|(c, w)| format!("{}:{}", w, c))
            .collect();
        write!(f, "{}", parts.join(" + "))
    }
}

/// Parse a full mixture string: components joined by `+`.
pub fn parse_mix(s: &str) -> SimResult<TargetMix> {
    let mut components = Vec::new();
    for part in s.split('+') {
        let part = part.trim();
        if part.is_empty() {
            return Err(SimError::Config(format!("empty component in mixture string: \"{}\"", s)));
        }
        components.push(parse_component(part)?);
    }
    Ok(TargetMix { components })
}

/// Parse one `weight:kind:(params)` component.
fn parse_component(s: &str) -> SimResult<(MixComp, f64)> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() != 3 {
        return Err(SimError::Config(format!(
            "mixture component needs weight:kind:(params), got \"{}\"",
            s
        )));
    }

    let weight: f64 = fields[0]
        .parse()
        .map_err(|_| SimError::Config(format!("invalid mixture weight \"{}\"", fields[0])))?;
    if weight <= 0.0 {
        return Err(SimError::Config(format!(
            "mixture weight must be positive, got \"{}\"",
            fields[0]
        )));
    }

    let kind = match fields[1] {
        "n" => MixKind::Normal,
        "sn" => MixKind::SkewNormal,
        "g" => MixKind::Gamma,
        other => {
            return Err(SimError::Config(format!("invalid mixture kind \"{}\"", other)));
        }
    };

    let params = fields[2];
    if !params.starts_with('(') || !params.ends_with(')') {
        return Err(SimError::Config(format!(
            "missing parentheses in mixture component \"{}\"",
            s
        )));
    }
    let inner: Vec<&str> = params[1..params.len() - 1].split(',').collect();
    let expected = if kind == MixKind::SkewNormal { 5 } else { 4 };
    if inner.len() != expected {
        return Err(SimError::Config(format!(
            "expected {} parameters for kind \"{}\" in \"{}\", got {}",
            expected,
            fields[1],
            s,
            inner.len()
        )));
    }

    let num = |field: &str, what: &str| -> SimResult<f64> {
        field
            .trim()
            .parse()
            .map_err(|_| SimError::Config(format!("invalid {} \"{}\" in mixture \"{}\"", what, field, s)))
    };

    let location = num(inner[0], "location")?;
    let scale = num(inner[1], "scale")?;
    let mut next = 2;
    let shape = if kind == MixKind::SkewNormal {
        next += 1;
        num(inner[2], "shape")?
    } else {
        0.0
    };
    let low = num(inner[next], "lower bound")?;
    let high = num(inner[next + 1], "upper bound")?;

    if location < 0.0 {
        return Err(SimError::Config(format!("negative location in mixture \"{}\"", s)));
    }
    if scale < 0.0 {
        return Err(SimError::Config(format!("negative scale in mixture \"{}\"", s)));
    }
    if low < 0.0 || high < 0.0 || low.fract() != 0.0 || high.fract() != 0.0 {
        return Err(SimError::Config(format!(
            "bounds must be non-negative integers in mixture \"{}\"",
            s
        )));
    }
    if high < low {
        return Err(SimError::Config(format!(
            "upper bound is below lower bound in mixture \"{}\"",
            s
        )));
    }

    Ok((
        MixComp {
            kind,
            location,
            scale,
            shape,
            low: low as u64,
            high: high as u64,
        },
        weight,
    ))
}
