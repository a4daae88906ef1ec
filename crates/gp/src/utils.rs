use crate::correlation_models::CorrelationModel;
use linfa::Float;
use ndarray::{s, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

/// Absolute differences between every pair `(i, j)`, `i < j`, of training points.
/// Only the upper triangle is stored as the correlation matrix is symmetric.
#[derive(Debug)]
pub struct DiffMatrix<F: Float> {
    /// Absolute differences, one row per pair: (n_obs * (n_obs - 1) / 2, nx)
    pub d: Array2<F>,
    /// Pair `(i, j)` of each row of `d`
    pub d_indices: Array2<usize>,
    /// Number of training points
    pub n_obs: usize,
}

impl<F: Float> DiffMatrix<F> {
    /// Differences of the (n_obs, nx) points `x`
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> DiffMatrix<F> {
        let n_obs = x.nrows();
        let n_pairs = n_obs * n_obs.saturating_sub(1) / 2;
        let mut d = Array2::zeros((n_pairs, x.ncols()));
        let mut d_indices = Array2::zeros((n_pairs, 2));
        let mut start = 0;
        for i in 0..n_obs {
            let others = x.slice(s![i + 1.., ..]);
            let end = start + others.nrows();
            d.slice_mut(s![start..end, ..])
                .assign(&(&others - &x.row(i)).mapv(|v| v.abs()));
            for (r, j) in (start..end).zip(i + 1..n_obs) {
                d_indices[[r, 0]] = i;
                d_indices[[r, 1]] = j;
            }
            start = end;
        }
        DiffMatrix {
            d,
            d_indices,
            n_obs,
        }
    }

    /// Symmetric (n_obs, n_obs) correlation matrix `R + nugget * I`
    pub fn correlation_matrix(
        &self,
        corr: &impl CorrelationModel<F>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
        nugget: F,
    ) -> Array2<F> {
        let values = corr.value(&self.d, theta);
        let mut r = Array2::from_diag_elem(self.n_obs, F::one() + nugget);
        for (pair, v) in self.d_indices.rows().into_iter().zip(values.column(0)) {
            r[[pair[0], pair[1]]] = *v;
            r[[pair[1], pair[0]]] = *v;
        }
        r
    }
}

/// Differences `x_i - y_j` for every pair of rows, laid out row major wrt `(i, j)`:
/// shape (nrows(x) * nrows(y), ncols(x)).
/// *Panics* if x and y have not the same number of columns
pub fn pairwise_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert_eq!(x.ncols(), y.ncols());
    let ny = y.nrows();
    let mut result = Array2::zeros((x.nrows() * ny, x.ncols()));
    for (i, xi) in x.rows().into_iter().enumerate() {
        result
            .slice_mut(s![i * ny..(i + 1) * ny, ..])
            .assign(&(&xi.insert_axis(Axis(0)) - y));
    }
    result
}

/// Cross correlation matrix (nrows(x), nrows(y)) between points of `x` and `y`
pub(crate) fn cross_correlation<F: Float>(
    corr: &impl CorrelationModel<F>,
    theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    let r = corr.value(&pairwise_differences(x, y), theta);
    let mut res = Array2::zeros((x.nrows(), y.nrows()));
    for (k, v) in r.column(0).iter().enumerate() {
        res[[k / y.nrows(), k % y.nrows()]] = *v;
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::SquaredExponentialCorr;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pairwise_differences() {
        let x = array![[1., 0.], [3., 2.]];
        let y = array![[0., 0.], [1., 1.], [4., -1.]];
        assert_eq!(
            pairwise_differences(&x, &y),
            array![
                [1., 0.],
                [0., -1.],
                [-3., 1.],
                [3., 2.],
                [2., 1.],
                [-1., 3.]
            ]
        );
    }

    #[test]
    fn test_diff_matrix() {
        let xt = array![[0.], [0.5], [2.], [-1.]];
        let dm = DiffMatrix::new(&xt);
        assert_eq!(dm.d, array![[0.5], [2.], [1.], [1.5], [1.5], [3.]]);
        assert_eq!(
            dm.d_indices,
            array![[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]]
        );
        assert_eq!(dm.n_obs, 4);
    }

    #[test]
    fn test_single_point_diff_matrix() {
        let dm = DiffMatrix::new(&array![[1., 2.]]);
        assert_eq!(dm.d.dim(), (0, 2));
        let r = dm.correlation_matrix(&SquaredExponentialCorr(), &array![1., 1.], 0.);
        assert_eq!(r, array![[1.]]);
    }

    #[test]
    fn test_correlation_matrices_agree() {
        let xt = array![[0.5, 1.], [1.2, 0.], [2.0, 2.]];
        let theta = array![0.8, 1.5];
        let corr = SquaredExponentialCorr();
        let r = DiffMatrix::new(&xt).correlation_matrix(&corr, &theta, 1e-3);
        let rc = cross_correlation(&corr, &theta, &xt, &xt);
        assert_abs_diff_eq!(r.diag().to_owned(), array![1.001, 1.001, 1.001], epsilon = 1e-12);
        assert_abs_diff_eq!(r[[0, 2]], rc[[0, 2]], epsilon = 1e-12);
        assert_abs_diff_eq!(r[[2, 1]], rc[[2, 1]], epsilon = 1e-12);
    }
}
