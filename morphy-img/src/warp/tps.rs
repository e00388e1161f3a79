use crate::error::GeometryError;
use crate::shapes::point::PointF32;
use ndarray::{Array2, s};

const PIVOT_EPSILON: f64 = 1e-12;

/// Thin-plate spline f with f(from[i]) == to[i], solved as the linear system
///
///   | K  P | |w|   |v|
///   | P' 0 | |a| = |0|
///
/// where K[i][j] = U(|from[i] - from[j]|), U(r) = r^2 log r^2 and
/// P[i] = [1, x_i, y_i]. Coordinates are divided by `norm` for conditioning.
#[derive(Debug, Clone)]
pub struct ThinPlateSpline {
    centers: Vec<(f64, f64)>,
    weights: Array2<f64>,
    affine: Array2<f64>,
    norm: f64,
}

fn kernel(r2: f64) -> f64 {
    if r2 <= 0. { 0. } else { r2 * r2.ln() }
}

impl ThinPlateSpline {
    pub fn fit(from: &[PointF32], to: &[PointF32], norm: f32) -> Result<Self, GeometryError> {
        let n = from.len();
        let norm = (norm as f64).max(1.);
        let centers: Vec<(f64, f64)> = from
            .iter()
            .map(|p| (p.x as f64 / norm, p.y as f64 / norm))
            .collect();

        let size = n + 3;
        let mut l = Array2::<f64>::zeros((size, size));
        let mut rhs = Array2::<f64>::zeros((size, 2));

        for (i, &(xi, yi)) in centers.iter().enumerate() {
            for (j, &(xj, yj)) in centers.iter().enumerate().skip(i + 1) {
                let u = kernel((xi - xj).powi(2) + (yi - yj).powi(2));
                l[[i, j]] = u;
                l[[j, i]] = u;
            }

            l[[i, n]] = 1.;
            l[[i, n + 1]] = xi;
            l[[i, n + 2]] = yi;
            l[[n, i]] = 1.;
            l[[n + 1, i]] = xi;
            l[[n + 2, i]] = yi;

            rhs[[i, 0]] = to[i].x as f64 / norm;
            rhs[[i, 1]] = to[i].y as f64 / norm;
        }

        let solution = solve(l, rhs)?;

        Ok(Self {
            centers,
            weights: solution.slice(s![..n, ..]).to_owned(),
            affine: solution.slice(s![n.., ..]).to_owned(),
            norm,
        })
    }

    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        let px = x as f64 / self.norm;
        let py = y as f64 / self.norm;

        let mut mx = self.affine[[0, 0]] + self.affine[[1, 0]] * px + self.affine[[2, 0]] * py;
        let mut my = self.affine[[0, 1]] + self.affine[[1, 1]] * px + self.affine[[2, 1]] * py;

        for (i, &(cx, cy)) in self.centers.iter().enumerate() {
            let u = kernel((px - cx).powi(2) + (py - cy).powi(2));
            mx += self.weights[[i, 0]] * u;
            my += self.weights[[i, 1]] * u;
        }

        ((mx * self.norm) as f32, (my * self.norm) as f32)
    }
}

// Gaussian elimination with partial pivoting, solving a x = b for every
// column of b.
fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>, GeometryError> {
    let n = a.nrows();
    let cols = b.ncols();

    for col in 0..n {
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[[row, col]].abs() > a[[pivot, col]].abs() {
                pivot = row;
            }
        }

        let p = a[[pivot, col]];
        if !p.is_finite() || p.abs() < PIVOT_EPSILON {
            return Err(GeometryError::Singular);
        }

        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            for k in 0..cols {
                b.swap([col, k], [pivot, k]);
            }
        }

        for row in (col + 1)..n {
            let f = a[[row, col]] / a[[col, col]];
            if f == 0. {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= f * a[[col, k]];
            }
            for k in 0..cols {
                b[[row, k]] -= f * b[[col, k]];
            }
        }
    }

    let mut x = Array2::<f64>::zeros((n, cols));
    for row in (0..n).rev() {
        for k in 0..cols {
            let mut sum = b[[row, k]];
            for j in (row + 1)..n {
                sum -= a[[row, j]] * x[[j, k]];
            }
            x[[row, k]] = sum / a[[row, row]];
        }
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::Singular);
    }

    Ok(x)
}
