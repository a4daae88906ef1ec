use crate::errors::Result;
use linfa::Float;
use linfa_linalg::triangular::{SolveTriangular, UPLO};
use ndarray::{ArrayBase, Data, Ix2};

/// Log density of the columns of `y` (n, L) under the multivariate normal `N(mean, L.L^T)`
/// where `chol` is the (n, n) lower Cholesky factor of the covariance matrix.
///
/// `mean` is broadcast to the shape of `y`, so a (n, 1) mean is shared by every column.
/// The result is summed over the L columns.
pub fn multivariate_normal<F: Float>(
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    mean: &ArrayBase<impl Data<Elem = F>, Ix2>,
    chol: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<F> {
    let diff = y - mean;
    let alpha = chol.solve_triangular(&diff, UPLO::Lower)?;
    let n = F::cast(y.nrows());
    let n_latent = F::cast(y.ncols());
    let mut ll = F::cast(-0.5) * alpha.mapv(|v| v * v).sum();
    ll -= n_latent * chol.diag().mapv(|v| v.ln()).sum();
    ll -= F::cast(0.5) * n * n_latent * F::cast(2. * std::f64::consts::PI).ln();
    Ok(ll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa_linalg::cholesky::Cholesky;
    use ndarray::array;

    #[test]
    fn test_standard_normal() {
        let chol = array![[1.0]];
        let ll = multivariate_normal(&array![[0.0]], &array![[0.0]], &chol).unwrap();
        assert_abs_diff_eq!(ll, -0.5 * (2. * std::f64::consts::PI).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_correlated_bivariate() {
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let chol = cov.cholesky().unwrap();
        let y = array![[1.0], [-1.0]];
        let ll = multivariate_normal(&y, &array![[0.0], [0.0]], &chol).unwrap();
        // det = 1.75, inv = [[1, -0.5], [-0.5, 2]] / 1.75
        let quad = (1.0 + 1.0 + 2.0) / 1.75;
        let expected = -0.5 * quad - 0.5 * 1.75f64.ln() - (2. * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_columns_are_summed() {
        let chol = array![[1.0, 0.0], [0.3, 0.8]];
        let y = array![[0.2, -0.4], [1.0, 0.1]];
        let mean = array![[0.1], [0.1]];
        let both = multivariate_normal(&y, &mean, &chol).unwrap();
        let first = multivariate_normal(&y.slice(ndarray::s![.., 0..1]), &mean, &chol).unwrap();
        let second = multivariate_normal(&y.slice(ndarray::s![.., 1..2]), &mean, &chol).unwrap();
        assert_abs_diff_eq!(both, first + second, epsilon = 1e-12);
    }
}
