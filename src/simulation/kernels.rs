use crate::math::Vec3;
use std::f64::consts::PI;

/// Poly6 smoothing kernel, the standard choice for density estimation.
#[derive(Clone, Copy, Debug)]
pub struct SphStdKernel {
    pub h: f64,
    h2: f64,
    h3: f64,
    h5: f64,
}

impl SphStdKernel {
    pub fn new(kernel_radius: f64) -> Self {
        let h = kernel_radius;
        let h2 = h * h;
        let h3 = h2 * h;
        let h5 = h2 * h3;
        SphStdKernel { h, h2, h3, h5 }
    }

    pub fn value(&self, distance: f64) -> f64 {
        if distance * distance >= self.h2 {
            0.0
        } else {
            let x = 1.0 - distance * distance / self.h2;
            315.0 / (64.0 * PI * self.h3) * x * x * x
        }
    }

    pub fn first_derivative(&self, distance: f64) -> f64 {
        if distance >= self.h {
            0.0
        } else {
            let x = 1.0 - distance * distance / self.h2;
            -945.0 / (32.0 * PI * self.h5) * distance * x * x
        }
    }

    /// Gradient at a point `distance` away from the center, along
    /// `direction_to_center`.
    pub fn gradient(&self, distance: f64, direction_to_center: Vec3) -> Vec3 {
        -self.first_derivative(distance) * direction_to_center
    }

    pub fn second_derivative(&self, distance: f64) -> f64 {
        if distance * distance >= self.h2 {
            0.0
        } else {
            let x = distance * distance / self.h2;
            945.0 / (32.0 * PI * self.h5) * (1.0 - x) * (5.0 * x - 1.0)
        }
    }
}

/// Spiky kernel; its gradient does not vanish at the center, which is what
/// pressure forces need to avoid particle clumping.
#[derive(Clone, Copy, Debug)]
pub struct SphSpikyKernel {
    pub h: f64,
    h4: f64,
    h5: f64,
    h3: f64,
}

impl SphSpikyKernel {
    pub fn new(kernel_radius: f64) -> Self {
        let h = kernel_radius;
        let h2 = h * h;
        let h3 = h2 * h;
        let h4 = h2 * h2;
        let h5 = h4 * h;
        SphSpikyKernel { h, h3, h4, h5 }
    }

    pub fn value(&self, distance: f64) -> f64 {
        if distance >= self.h {
            0.0
        } else {
            let x = 1.0 - distance / self.h;
            15.0 / (PI * self.h3) * x * x * x
        }
    }

    pub fn first_derivative(&self, distance: f64) -> f64 {
        if distance >= self.h {
            0.0
        } else {
            let x = 1.0 - distance / self.h;
            -45.0 / (PI * self.h4) * x * x
        }
    }

    pub fn gradient(&self, distance: f64, direction_to_center: Vec3) -> Vec3 {
        -self.first_derivative(distance) * direction_to_center
    }

    pub fn second_derivative(&self, distance: f64) -> f64 {
        if distance >= self.h {
            0.0
        } else {
            let x = 1.0 - distance / self.h;
            90.0 / (PI * self.h5) * x
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kernels_vanish_at_the_support_radius() {
        let std = SphStdKernel::new(0.1);
        let spiky = SphSpikyKernel::new(0.1);
        assert_eq!(std.value(0.1), 0.0);
        assert_eq!(std.value(0.2), 0.0);
        assert_eq!(spiky.value(0.1), 0.0);
        assert_eq!(spiky.first_derivative(0.15), 0.0);
    }

    #[test]
    fn poly6_integrates_to_one() {
        // radial quadrature of W over the support ball
        let h = 0.25;
        let kernel = SphStdKernel::new(h);
        let n = 2000;
        let dr = h / n as f64;
        let mut integral = 0.0;
        for i in 0..n {
            let r = (i as f64 + 0.5) * dr;
            integral += kernel.value(r) * 4.0 * PI * r * r * dr;
        }
        assert_relative_eq!(integral, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn spiky_gradient_points_away_from_center() {
        let kernel = SphSpikyKernel::new(0.1);
        let dir_to_center = Vec3::new(1.0, 0.0, 0.0);
        let g = kernel.gradient(0.05, dir_to_center);
        // repulsive: gradient along +direction_to_center
        assert!(g.x > 0.0);
    }
}
