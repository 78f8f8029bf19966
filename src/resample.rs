//! Canonical-rate resampling.
//!
//! Every stored series runs at [`StoreConfig::target_sfreq`].  The source
//! rate decides the path:
//!
//! ```text
//! src == target            → pass through
//! src == k · target        → keep samples 0, k, 2k, …   (⌈n / k⌉ samples)
//! anything else            → EcgDbError::UnsupportedSampleRate
//!                            or, with ResampleFallback::Fft,
//!                            band-limited FFT resampling (round(n · ratio) samples)
//! ```
//!
//! Decimation is plain index picking with no anti-alias filter, so integer
//! samples pass through bit-exact.
use anyhow::Result;
use ndarray::{s, Array2};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::{ResampleFallback, StoreConfig};
use crate::error::EcgDbError;

/// How one recording is brought to the target rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResamplePlan {
    PassThrough,
    /// Keep every k-th sample.
    Decimate(usize),
    /// FFT resampling by `target / source`.
    Fft { ratio: f64 },
}

impl ResamplePlan {
    /// Choose the plan for a source rate.
    pub fn for_rate(src_sfreq: f64, cfg: &StoreConfig) -> Result<Self> {
        let target = cfg.target_sfreq;
        let ratio = src_sfreq / target;
        let k = ratio.round();
        if src_sfreq > 0.0 && k >= 1.0 && (ratio - k).abs() < 1e-6 {
            return Ok(if k == 1.0 {
                ResamplePlan::PassThrough
            } else {
                ResamplePlan::Decimate(k as usize)
            });
        }
        match cfg.resample_fallback {
            ResampleFallback::Fft if src_sfreq > 0.0 => Ok(ResamplePlan::Fft { ratio: target / src_sfreq }),
            _ => Err(EcgDbError::UnsupportedSampleRate { sfreq: src_sfreq, target }.into()),
        }
    }

    /// Number of samples produced from `n` input samples.
    pub fn output_len(&self, n: usize) -> usize {
        match *self {
            ResamplePlan::PassThrough => n,
            ResamplePlan::Decimate(k) => n.div_ceil(k),
            ResamplePlan::Fft { ratio } => (ratio * n as f64).round() as usize,
        }
    }

    /// Apply the plan to lead-major `[C, T]` data.
    pub fn apply(&self, data: &Array2<i32>) -> Result<Array2<i32>> {
        match *self {
            ResamplePlan::PassThrough => Ok(data.clone()),
            ResamplePlan::Decimate(k) => Ok(decimate(data, k)),
            ResamplePlan::Fft { ratio } => fft_resample(data, ratio),
        }
    }
}

/// Bring `data` (`[C, T]`, sampled at `src_sfreq`) to the target rate.
pub fn resample_to_target(data: &Array2<i32>, src_sfreq: f64, cfg: &StoreConfig) -> Result<Array2<i32>> {
    ResamplePlan::for_rate(src_sfreq, cfg)?.apply(data)
}

/// Keep columns `0, k, 2k, …`.
pub fn decimate(data: &Array2<i32>, k: usize) -> Array2<i32> {
    data.slice(s![.., ..;k]).to_owned()
}

// ── FFT fallback ──────────────────────────────────────────────────────────

/// Padding added on each side before the FFT: enough to reach the next power
/// of two, with at least `min(n / 8, 100)` samples per side.
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let next_pow2 = (n + min_add).next_power_of_two();
    let total = next_pow2 - n;
    (total / 2, total - total / 2)
}

/// Resample every lead of `data` by `ratio` and round back to integers.
pub fn fft_resample(data: &Array2<i32>, ratio: f64) -> Result<Array2<i32>> {
    let (n_ch, n_in) = data.dim();
    let final_len = (ratio * n_in as f64).round() as usize;
    let (npad_l, npad_r) = auto_npad(n_in);
    let mut planner = FftPlanner::<f64>::new();

    let mut out = Array2::<i32>::zeros((n_ch, final_len));
    for (ch, row) in data.rows().into_iter().enumerate() {
        let x: Vec<f64> = row.iter().map(|&v| v as f64).collect();
        let y = resample_1d(&mut planner, &x, ratio, npad_l, npad_r);
        for (o, v) in out.row_mut(ch).iter_mut().zip(y) {
            *o = v.round() as i32;
        }
    }
    Ok(out)
}

/// Resample one signal by `ratio` with reflect padding of `npad_l`/`npad_r`.
///
/// Spectrum is truncated (downsampling) or zero-extended (upsampling); the
/// Nyquist bin of the shorter spectrum is doubled or halved so the
/// real-valued inverse keeps the right energy.
pub fn resample_1d(
    planner: &mut FftPlanner<f64>,
    x: &[f64],
    ratio: f64,
    npad_l: usize,
    npad_r: usize,
) -> Vec<f64> {
    let n_in = x.len();
    if n_in == 0 {
        return vec![];
    }
    let final_len = (ratio * n_in as f64).round() as usize;

    // Odd reflection about the end points, limited to the signal length.
    let pad_l = npad_l.min(n_in - 1);
    let pad_r = npad_r.min(n_in - 1);
    let old_len = n_in + pad_l + pad_r;
    let mut padded = Vec::with_capacity(old_len);
    padded.extend((1..=pad_l).rev().map(|i| 2.0 * x[0] - x[i]));
    padded.extend_from_slice(x);
    let last = x[n_in - 1];
    padded.extend((1..=pad_r).map(|i| 2.0 * last - x[(n_in - 1).saturating_sub(i)]));

    let new_len = (ratio * old_len as f64).round() as usize;
    if new_len == 0 {
        return vec![0.0; final_len];
    }
    let shorter = new_len < old_len;
    let use_len = if shorter { new_len } else { old_len };

    let mut spectrum: Vec<Complex<f64>> = padded.iter().map(|&v| Complex { re: v, im: 0.0 }).collect();
    planner.plan_fft_forward(old_len).process(&mut spectrum);
    let mut half: Vec<Complex<f64>> = spectrum[..old_len / 2 + 1].to_vec();

    if use_len % 2 == 0 && use_len / 2 < half.len() {
        half[use_len / 2] *= if shorter { 2.0 } else { 0.5 };
    }
    let scale = new_len as f64 / old_len as f64;
    half.iter_mut().for_each(|v| *v *= scale);

    // Rebuild the full Hermitian spectrum at the new length.
    let new_half = new_len / 2 + 1;
    let mut full = vec![Complex::<f64>::default(); new_len];
    let n_copy = half.len().min(new_half);
    full[..n_copy].copy_from_slice(&half[..n_copy]);
    for i in 1..new_half {
        let j = new_len - i;
        if j >= new_half {
            full[j] = full[i].conj();
        }
    }
    planner.plan_fft_inverse(new_len).process(&mut full);

    let strip_l = (ratio * npad_l as f64).round() as usize;
    let strip_end = (strip_l + final_len).min(new_len);
    let mut y: Vec<f64> = full[strip_l.min(strip_end)..strip_end]
        .iter()
        .map(|c| c.re / new_len as f64)
        .collect();
    y.resize(final_len, 0.0);
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n_ch: usize, n: usize) -> Array2<i32> {
        Array2::from_shape_fn((n_ch, n), |(c, t)| (c * 10_000 + t) as i32 - 500)
    }

    #[test]
    fn plan_by_rate() {
        let cfg = StoreConfig::default();
        assert_eq!(ResamplePlan::for_rate(250.0, &cfg).unwrap(), ResamplePlan::PassThrough);
        assert_eq!(ResamplePlan::for_rate(500.0, &cfg).unwrap(), ResamplePlan::Decimate(2));
        assert_eq!(ResamplePlan::for_rate(1000.0, &cfg).unwrap(), ResamplePlan::Decimate(4));
    }

    #[test]
    fn unlisted_rate_rejected_by_default() {
        let cfg = StoreConfig::default();
        let err = ResamplePlan::for_rate(257.0, &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcgDbError>(),
            Some(EcgDbError::UnsupportedSampleRate { .. })
        ));
        assert!(ResamplePlan::for_rate(0.0, &cfg).is_err());
        assert!(ResamplePlan::for_rate(125.0, &cfg).is_err());
    }

    #[test]
    fn unlisted_rate_uses_fft_when_enabled() {
        let cfg = StoreConfig { resample_fallback: ResampleFallback::Fft, ..StoreConfig::default() };
        let plan = ResamplePlan::for_rate(257.0, &cfg).unwrap();
        assert!(matches!(plan, ResamplePlan::Fft { .. }));
        let out = plan.apply(&Array2::zeros((2, 2570))).unwrap();
        assert_eq!(out.dim(), (2, 2500));
    }

    #[test]
    fn decimation_picks_every_kth() {
        let cfg = StoreConfig::default();
        for (sfreq, k) in [(250.0, 1usize), (500.0, 2), (1000.0, 4)] {
            for n in [0usize, 1, 7, 5000, 5001] {
                let data = ramp(3, n);
                let out = resample_to_target(&data, sfreq, &cfg).unwrap();
                assert_eq!(out.ncols(), n.div_ceil(k), "sfreq={sfreq} n={n}");
                for (j, col) in out.columns().into_iter().enumerate() {
                    assert_eq!(col, data.column(j * k));
                }
            }
        }
    }

    #[test]
    fn output_len_matches_apply() {
        let cfg = StoreConfig { resample_fallback: ResampleFallback::Fft, ..StoreConfig::default() };
        for sfreq in [250.0, 500.0, 1000.0, 257.0, 360.0] {
            let plan = ResamplePlan::for_rate(sfreq, &cfg).unwrap();
            let out = plan.apply(&ramp(1, 3001)).unwrap();
            assert_eq!(out.ncols(), plan.output_len(3001), "sfreq={sfreq}");
        }
    }

    #[test]
    fn fft_preserves_dc() {
        let data = Array2::from_elem((1, 1000), 314);
        let out = fft_resample(&data, 250.0 / 360.0).unwrap();
        for &v in out.iter() {
            assert!((v - 314).abs() <= 1, "got {v}");
        }
    }

    #[test]
    fn auto_npad_reaches_power_of_two() {
        assert_eq!(auto_npad(15360), (512, 512));
        assert_eq!(auto_npad(30720), (1024, 1024));
        let (l, r) = auto_npad(5000);
        assert!((5000 + l + r).is_power_of_two());
    }
}
