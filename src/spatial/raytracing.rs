use crate::spatial::math::V3c;

/// A ray in world space, defined by its origin and a (conventionally unit)
/// direction vector.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: V3c<f32>,
    pub direction: V3c<f32>,
}

impl Ray {
    pub fn new(origin: V3c<f32>, direction: V3c<f32>) -> Self {
        Self { origin, direction }
    }

    /// A ray is valid when its direction is (approximately) a unit vector.
    pub fn is_valid(&self) -> bool {
        (1. - self.direction.length()).abs() < crate::spatial::FLOAT_ERROR_TOLERANCE
    }

    pub fn point_at(&self, d: f32) -> V3c<f32> {
        self.origin + self.direction * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_is_valid() {
        let ray = Ray::new(V3c::new(0., 0., 0.), V3c::new(1., 0., 0.));
        assert!(ray.is_valid());
        let ray = Ray::new(V3c::new(0., 0., 0.), V3c::new(2., 0., 0.));
        assert!(!ray.is_valid());
    }

    #[test]
    fn test_point_at() {
        let ray = Ray::new(V3c::new(1., 1., 1.), V3c::new(0., 1., 0.));
        let p = ray.point_at(3.);
        assert!((p.y - 4.).abs() < 0.0001);
    }
}
