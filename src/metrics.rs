//! Host-side evaluation and bookkeeping utilities (`ndarray`, `f32`).
//!
//! Every threshold is an explicit argument.

use std::collections::BTreeMap;

use crate::{Error, Result};
use ndarray::{ArrayView1, ArrayView2};

/// Ideal CA–CA distance between consecutive residues (Å).
pub const CA_CA_DISTANCE: f32 = 3.802_097_4;

/// Geometry checks on a CA trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaCaMetrics {
    /// Mean `|d_i - CA_CA_DISTANCE|` over consecutive CA–CA distances.
    pub ca_ca_deviation: f32,
    /// Fraction of consecutive distances below `CA_CA_DISTANCE + bond_tol`.
    pub ca_ca_valid_percent: f32,
    /// Distinct pairs (any separation) closer than `clash_tol`; coincident pairs are not counted.
    pub num_ca_ca_clashes: usize,
}

/// CA–CA bond and clash metrics for one structure.
///
/// - `ca`: `[R, 3]` CA positions (R ≥ 2)
/// - `bond_tol`: tolerance above the ideal CA–CA distance (typ. 0.1 Å)
/// - `clash_tol`: clash distance (typ. 1.0 Å)
pub fn ca_ca_metrics(ca: &ArrayView2<f32>, bond_tol: f32, clash_tol: f32) -> Result<CaCaMetrics> {
    let n = ca.nrows();
    if ca.ncols() != 3 {
        return Err(Error::Shape("ca must be [R, 3]"));
    }
    if n < 2 {
        return Err(Error::Domain("ca must contain at least two residues"));
    }
    if !bond_tol.is_finite() || bond_tol < 0.0 || !clash_tol.is_finite() || clash_tol < 0.0 {
        return Err(Error::Domain("tolerances must be finite and nonnegative"));
    }

    let dist = |i: usize, j: usize| -> f32 {
        let d = &ca.row(i) - &ca.row(j);
        d.dot(&d).sqrt()
    };

    let mut dev = 0.0f64;
    let mut valid = 0usize;
    for i in 1..n {
        let d = dist(i, i - 1);
        dev += (d - CA_CA_DISTANCE).abs() as f64;
        if d < CA_CA_DISTANCE + bond_tol {
            valid += 1;
        }
    }

    let mut clashes = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let d = dist(i, j);
            if d > 0.0 && d < clash_tol {
                clashes += 1;
            }
        }
    }

    Ok(CaCaMetrics {
        ca_ca_deviation: (dev / (n - 1) as f64) as f32,
        ca_ca_valid_percent: valid as f32 / (n - 1) as f32,
        num_ca_ca_clashes: clashes,
    })
}

/// Mean loss per time bin.
///
/// Bin edges are `linspace(0, 1 + 1e-3, num_bins + 1)`; only occupied bins are reported, keyed as
/// `"{name} t=[{start:.2},{end:.2})"`. Times outside the edges are dropped.
pub fn t_stratified_loss(
    t: &ArrayView1<f32>,
    loss: &ArrayView1<f32>,
    num_bins: usize,
    name: &str,
) -> Result<BTreeMap<String, f32>> {
    if t.len() != loss.len() {
        return Err(Error::Shape("t and loss must have the same length"));
    }
    if num_bins == 0 {
        return Err(Error::Domain("num_bins must be >= 1"));
    }
    let upper = 1.0f32 + 1e-3;
    let edge = |k: usize| upper * k as f32 / num_bins as f32;

    let mut sums = vec![0.0f64; num_bins];
    let mut counts = vec![0usize; num_bins];
    for (&ti, &li) in t.iter().zip(loss.iter()) {
        // Index of the last edge <= t.
        let Some(bin) = (0..num_bins).rev().find(|&k| edge(k) <= ti) else {
            continue;
        };
        if ti >= upper {
            continue;
        }
        sums[bin] += li as f64;
        counts[bin] += 1;
    }

    let mut out = BTreeMap::new();
    for bin in 0..num_bins {
        if counts[bin] == 0 {
            continue;
        }
        let key = format!("{name} t=[{:.2},{:.2})", edge(bin), edge(bin + 1));
        out.insert(key, (sums[bin] / counts[bin] as f64) as f32);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use proptest::prelude::*;

    fn ideal_trace(n: usize) -> Array2<f32> {
        let mut ca = Array2::<f32>::zeros((n, 3));
        for i in 0..n {
            ca[[i, 0]] = i as f32 * CA_CA_DISTANCE;
        }
        ca
    }

    #[test]
    fn ideal_trace_has_no_deviation_or_clash() -> Result<()> {
        let m = ca_ca_metrics(&ideal_trace(8).view(), 0.1, 1.0)?;
        assert!(m.ca_ca_deviation < 1e-4);
        assert_eq!(m.ca_ca_valid_percent, 1.0);
        assert_eq!(m.num_ca_ca_clashes, 0);
        Ok(())
    }

    #[test]
    fn stretched_bond_and_clash_are_reported() -> Result<()> {
        let ca = array![[0.0f32, 0.0, 0.0], [4.5, 0.0, 0.0], [4.5, 0.5, 0.0]];
        let m = ca_ca_metrics(&ca.view(), 0.1, 1.0)?;
        assert!((m.ca_ca_valid_percent - 0.5).abs() < 1e-6);
        assert_eq!(m.num_ca_ca_clashes, 1);
        let expected_dev = ((4.5 - CA_CA_DISTANCE).abs() + (0.5 - CA_CA_DISTANCE).abs()) / 2.0;
        assert!((m.ca_ca_deviation - expected_dev).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn coincident_atoms_are_not_clashes() -> Result<()> {
        let ca = array![[0.0f32, 0.0, 0.0], [0.0, 0.0, 0.0]];
        assert_eq!(ca_ca_metrics(&ca.view(), 0.1, 1.0)?.num_ca_ca_clashes, 0);
        Ok(())
    }

    #[test]
    fn stratified_loss_bins_by_time() -> Result<()> {
        let t = array![0.1f32, 0.2, 0.6, 0.99];
        let loss = array![1.0f32, 3.0, 5.0, 7.0];
        let out = t_stratified_loss(&t.view(), &loss.view(), 4, "trans_loss")?;
        assert_eq!(out.len(), 3);
        assert_eq!(out["trans_loss t=[0.00,0.25)"], 2.0);
        assert_eq!(out["trans_loss t=[0.50,0.75)"], 5.0);
        assert_eq!(out["trans_loss t=[0.75,1.00)"], 7.0);
        Ok(())
    }

    #[test]
    fn stratified_loss_rejects_mismatched_lengths() {
        let t = array![0.1f32, 0.2];
        let loss = array![1.0f32];
        assert!(t_stratified_loss(&t.view(), &loss.view(), 4, "x").is_err());
        assert!(t_stratified_loss(&t.view(), &t.view(), 0, "x").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_stratified_counts_cover_unit_interval(
            ts in prop::collection::vec(0.0f32..1.0f32, 1..64),
            bins in 1usize..8,
        ) {
            let loss = ndarray::Array1::from_elem(ts.len(), 2.5f32);
            let t = ndarray::Array1::from_vec(ts);
            let out = t_stratified_loss(&t.view(), &loss.view(), bins, "l").unwrap();
            prop_assert!(!out.is_empty());
            prop_assert!(out.len() <= bins);
            for v in out.values() {
                prop_assert!((v - 2.5).abs() < 1e-6);
            }
        }
    }
}
