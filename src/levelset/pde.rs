//! Upwind spatial-derivative kernels over a 1D stencil of 7 samples centered
//! at index 3. Each returns the one-sided pair `(d_minus, d_plus)` unless the
//! scheme is inherently centered.

/// First order upwind.
pub fn upwind1(d0: &[f64; 7], dx: f64) -> (f64, f64) {
    let inv_dx = 1.0 / dx;
    (
        inv_dx * (d0[3] - d0[2]),
        inv_dx * (d0[4] - d0[3]),
    )
}

/// Second order centered difference.
pub fn cd2(d0: &[f64; 7], dx: f64) -> f64 {
    0.5 * (d0[4] - d0[2]) / dx
}

/// Third order essentially non-oscillatory scheme.
pub fn eno3(d0: &[f64; 7], dx: f64) -> (f64, f64) {
    let inv_dx = 1.0 / dx;
    let h_inv_dx = 0.5 * inv_dx;
    let t_inv_dx = inv_dx / 3.0;

    let mut d1 = [0.0; 6];
    for i in 0..6 {
        d1[i] = inv_dx * (d0[i + 1] - d0[i]);
    }
    let mut d2 = [0.0; 5];
    for i in 0..5 {
        d2[i] = h_inv_dx * (d1[i + 1] - d1[i]);
    }

    let mut dfx = [0.0; 2];
    for k in 0..2usize {
        let (c, kstar, d3_0, d3_1);
        if d2[k + 1].abs() < d2[k + 2].abs() {
            c = d2[k + 1];
            kstar = k as isize - 1;
            d3_0 = t_inv_dx * (d2[k + 1] - d2[k]);
            d3_1 = t_inv_dx * (d2[k + 2] - d2[k + 1]);
        } else {
            c = d2[k + 2];
            kstar = k as isize;
            d3_0 = t_inv_dx * (d2[k + 2] - d2[k + 1]);
            d3_1 = t_inv_dx * (d2[k + 3] - d2[k + 2]);
        }
        let cstar = if d3_0.abs() < d3_1.abs() { d3_0 } else { d3_1 };

        let dq1 = d1[k + 2];
        let dq2 = c * (2.0 * (1.0 - k as f64) - 1.0) * dx;
        let ks = 1.0 - kstar as f64;
        let dq3 = cstar * (3.0 * ks * ks - 6.0 * ks + 2.0) * dx * dx;

        dfx[k] = dq1 + dq2 + dq3;
    }
    (dfx[0], dfx[1])
}

/// Fifth order weighted ENO with the adaptive epsilon of Jiang and Shu.
pub fn weno5(d0: &[f64; 7], dx: f64) -> (f64, f64) {
    let inv_dx = 1.0 / dx;
    let mut d = [0.0; 6];
    for i in 0..6 {
        d[i] = inv_dx * (d0[i + 1] - d0[i]);
    }

    let minus = weno5_one_sided([d[0], d[1], d[2], d[3], d[4]]);
    let plus = weno5_one_sided([d[5], d[4], d[3], d[2], d[1]]);
    (minus, plus)
}

fn weno5_one_sided(v: [f64; 5]) -> f64 {
    let [v1, v2, v3, v4, v5] = v;

    let phix1 = v1 / 3.0 - 7.0 * v2 / 6.0 + 11.0 * v3 / 6.0;
    let phix2 = -v2 / 6.0 + 5.0 * v3 / 6.0 + v4 / 3.0;
    let phix3 = v3 / 3.0 + 5.0 * v4 / 6.0 - v5 / 6.0;

    let c13_12 = 13.0 / 12.0;
    let s1 = c13_12 * sq(v1 - 2.0 * v2 + v3) + 0.25 * sq(v1 - 4.0 * v2 + 3.0 * v3);
    let s2 = c13_12 * sq(v2 - 2.0 * v3 + v4) + 0.25 * sq(v2 - v4);
    let s3 = c13_12 * sq(v3 - 2.0 * v4 + v5) + 0.25 * sq(3.0 * v3 - 4.0 * v4 + v5);

    let max_sq = sq(v1).max(sq(v2)).max(sq(v3)).max(sq(v4)).max(sq(v5));
    let eps = 1.0e-6 * max_sq + 1.0e-99;

    let a1 = 0.1 / sq(s1 + eps);
    let a2 = 0.6 / sq(s2 + eps);
    let a3 = 0.3 / sq(s3 + eps);

    (a1 * phix1 + a2 * phix2 + a3 * phix3) / (a1 + a2 + a3)
}

#[inline]
fn sq(x: f64) -> f64 {
    x * x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_samples(slope: f64, dx: f64) -> [f64; 7] {
        let mut d0 = [0.0; 7];
        for (i, v) in d0.iter_mut().enumerate() {
            *v = slope * (i as f64 - 3.0) * dx;
        }
        d0
    }

    #[test]
    fn all_schemes_are_exact_on_linear_data() {
        let dx = 0.1;
        let d0 = linear_samples(2.5, dx);
        let (m, p) = upwind1(&d0, dx);
        assert_relative_eq!(m, 2.5, epsilon = 1e-10);
        assert_relative_eq!(p, 2.5, epsilon = 1e-10);
        assert_relative_eq!(cd2(&d0, dx), 2.5, epsilon = 1e-10);
        let (m, p) = eno3(&d0, dx);
        assert_relative_eq!(m, 2.5, epsilon = 1e-10);
        assert_relative_eq!(p, 2.5, epsilon = 1e-10);
        let (m, p) = weno5(&d0, dx);
        assert_relative_eq!(m, 2.5, epsilon = 1e-9);
        assert_relative_eq!(p, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn eno3_is_exact_on_smooth_cubics() {
        // f(x) = x^3, f'(0) = 0; third order reconstruction captures it
        let dx = 0.5;
        let mut d0 = [0.0; 7];
        for (i, v) in d0.iter_mut().enumerate() {
            let x = (i as f64 - 3.0) * dx;
            *v = x * x * x;
        }
        let (m, p) = eno3(&d0, dx);
        assert_relative_eq!(m, 0.0, epsilon = 1e-10);
        assert_relative_eq!(p, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn upwind_pair_brackets_a_kink() {
        // |x| has derivative -1 from the left, +1 from the right at 0
        let dx = 1.0;
        let mut d0 = [0.0; 7];
        for (i, v) in d0.iter_mut().enumerate() {
            *v = (i as f64 - 3.0).abs();
        }
        let (m, p) = upwind1(&d0, dx);
        assert_eq!(m, -1.0);
        assert_eq!(p, 1.0);
    }
}
