//! Seeded toy datasets.
//!
//! Columns:
//!
//! - `Enu`: log-normal "energy"
//! - `x`: unit normal
//! - `nJets`: Poisson count
//! - `w`: nominal weight in `[0.5, 1.5)`
//! - `px`: fixed array of two normals
//! - `tracks`: jagged array with `nJets` uniform values
//! - `idx`: index into `spl`, 0 or 1
//! - `spl`: array of two per-event response splines

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal, Poisson};

use crate::error::{AppError, Result};
use crate::source::{Column, ColumnTable, RecordObject};

/// Knot positions of every generated response spline.
pub const SPLINE_KNOTS: [f64; 3] = [0.0, 1.0, 2.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthConfig {
    pub entries: usize,
    pub seed: u64,
    /// Spread of the spline slopes around 1.
    pub response_sigma: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            entries: 1000,
            seed: 42,
            response_sigma: 0.1,
        }
    }
}

fn dist_err(e: impl std::fmt::Display) -> AppError {
    AppError::config(format!("synthetic distribution: {e}"))
}

pub fn generate_table(cfg: &SynthConfig) -> Result<ColumnTable> {
    if cfg.entries == 0 {
        return Err(AppError::config("synthetic dataset needs at least one entry"));
    }
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let energy = LogNormal::new(0.5, 0.6).map_err(dist_err)?;
    let unit = Normal::new(0.0, 1.0).map_err(dist_err)?;
    let jets = Poisson::new(2.0).map_err(dist_err)?;
    let slope = Normal::new(0.0, cfg.response_sigma).map_err(dist_err)?;

    let n = cfg.entries;
    let mut enu = Vec::with_capacity(n);
    let mut x = Vec::with_capacity(n);
    let mut n_jets = Vec::with_capacity(n);
    let mut w = Vec::with_capacity(n);
    let mut px = Vec::with_capacity(2 * n);
    let mut tracks = Vec::with_capacity(n);
    let mut idx = Vec::with_capacity(n);
    let mut spl = Vec::with_capacity(n);

    for _ in 0..n {
        enu.push(energy.sample(&mut rng));
        x.push(unit.sample(&mut rng));
        let k: f64 = jets.sample(&mut rng);
        n_jets.push(k);
        w.push(rng.gen_range(0.5..1.5));
        px.push(unit.sample(&mut rng));
        px.push(unit.sample(&mut rng));
        tracks.push((0..k as usize).map(|_| rng.r#gen::<f64>()).collect::<Vec<f64>>());
        idx.push(f64::from(rng.gen_range(0u8..2)));

        let mut response = || {
            let s: f64 = slope.sample(&mut rng);
            RecordObject::Spline(SPLINE_KNOTS.iter().map(|&k| [k, 1.0 + s * (k - 1.0)]).collect())
        };
        let pair = vec![response(), response()];
        spl.push(RecordObject::Array(pair));
    }

    ColumnTable::from_columns(vec![
        ("Enu", Column::Scalar(enu)),
        ("x", Column::Scalar(x)),
        ("nJets", Column::Scalar(n_jets)),
        ("w", Column::Scalar(w)),
        ("px", Column::Fixed { width: 2, values: px }),
        ("tracks", Column::Jagged(tracks)),
        ("idx", Column::Scalar(idx)),
        ("spl", Column::Object(spl)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_table() {
        let cfg = SynthConfig {
            entries: 50,
            ..SynthConfig::default()
        };
        let a = generate_table(&cfg).unwrap();
        let b = generate_table(&cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_entries(), 50);

        let c = generate_table(&SynthConfig { seed: 7, ..cfg }).unwrap();
        assert_ne!(a.column("x"), c.column("x"));
    }

    #[test]
    fn splines_are_neutral_at_nominal() {
        let table = generate_table(&SynthConfig {
            entries: 10,
            ..SynthConfig::default()
        })
        .unwrap();
        let Some(Column::Object(objs)) = table.column("spl") else {
            panic!("spl column missing");
        };
        for obj in objs {
            for i in 0..2 {
                let pts = obj.select(Some(i)).and_then(RecordObject::points).unwrap();
                assert!((pts[1][1] - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn zero_entries_rejected() {
        assert!(generate_table(&SynthConfig {
            entries: 0,
            ..SynthConfig::default()
        })
        .is_err());
    }
}
