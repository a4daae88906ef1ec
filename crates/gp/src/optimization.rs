use ndarray::{arr1, Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use linfa::prelude::Float;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Build `n_start + 1` starting points for the optimization in log10 space:
/// the given `param0` first, then points drawn uniformly within `bounds`.
/// Returns starting points and log10 bounds.
pub(crate) fn prepare_multistart<F: Float>(
    n_start: usize,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    seed: u64,
) -> (Array2<F>, Vec<(F, F)>) {
    let bounds: Vec<(F, F)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let mut params0 = Array2::zeros((n_start + 1, param0.len()));
    params0.row_mut(0).assign(&param0.mapv(|v| F::log10(v)));

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    for mut row in params0.rows_mut().into_iter().skip(1) {
        for (v, (lo, up)) in row.iter_mut().zip(bounds.iter()) {
            *v = if lo < up { rng.gen_range(*lo..*up) } else { *lo };
        }
    }
    (params0, bounds)
}

/// Optimize gp hyper parameters given an initial guess and bounds with cobyla
pub(crate) fn optimize_params<ObjF, F>(
    objfn: ObjF,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
    F: Float,
{
    use cobyla::{minimize, Func, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0: Vec<f64> = param0.iter().map(into_f64).collect();

    let bounds: Vec<_> = bounds
        .iter()
        .map(|(lo, up)| (into_f64(lo), into_f64(up)))
        .collect();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        &bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let params_opt = arr1(&x_opt);
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, params_opt)
        }
        Err((status, x_opt, _)) => {
            log::warn!("ERROR Cobyla optimizer in GP status={status:?}");
            (f64::INFINITY, arr1(&x_opt))
        }
    }
}

#[inline(always)]
pub(crate) fn into_f64<F: Float>(v: &F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_multistart_within_bounds() {
        let (starts, bounds) = prepare_multistart(5, &array![1., 0.1], &[(1e-2, 1e2), (1e-3, 1.)], 42);
        assert_eq!(starts.dim(), (6, 2));
        assert_abs_diff_eq!(starts.row(0).to_owned(), array![0., -1.], epsilon = 1e-12);
        assert_eq!(bounds, vec![(-2., 2.), (-3., 0.)]);
        for row in starts.rows() {
            for (v, (lo, up)) in row.iter().zip(bounds.iter()) {
                assert!(v >= lo && v <= up);
            }
        }
    }

    #[test]
    fn test_multistart_is_reproducible() {
        let a = prepare_multistart(3, &array![1.], &[(1e-2, 1e2)], 7).0;
        let b = prepare_multistart(3, &array![1.], &[(1e-2, 1e2)], 7).0;
        assert_eq!(a, b);
    }

    #[test]
    fn test_optimize_quadratic() {
        let objfn = |x: &[f64], _g: Option<&mut [f64]>, _u: &mut ()| -> f64 {
            (x[0] - 0.3).powi(2) + (x[1] + 0.2).powi(2)
        };
        let (fmin, xopt) = optimize_params(
            objfn,
            &array![0., 0.],
            &[(-1., 1.), (-1., 1.)],
            CobylaParams {
                ftol_rel: 1e-10,
                ..CobylaParams::default()
            },
        );
        assert!(fmin < 1e-6);
        assert_abs_diff_eq!(xopt, array![0.3, -0.2], epsilon = 1e-3);
    }
}
