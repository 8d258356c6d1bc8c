//! Random walk used to move the emulated device around

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::geo::EARTH_RADIUS_M;
use shared::Coords;
use std::f64::consts::PI;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

/// Moves a position a fixed distance along a random heading on every step
pub struct RandomWalk<R: Rng> {
    position: Coords,
    step_m: f64,
    rng: R,
}

impl RandomWalk<StdRng> {
    pub fn new(start: Coords, step_m: f64) -> Self {
        Self::with_rng(start, step_m, StdRng::from_entropy())
    }

    /// Reproducible walk for tests and demos
    pub fn with_seed(start: Coords, step_m: f64, seed: u64) -> Self {
        Self::with_rng(start, step_m, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> RandomWalk<R> {
    pub fn with_rng(start: Coords, step_m: f64, rng: R) -> Self {
        Self {
            position: start,
            step_m,
            rng,
        }
    }

    pub fn position(&self) -> Coords {
        self.position
    }

    /// Takes one step and returns the new position
    pub fn step(&mut self) -> Coords {
        if self.step_m == 0.0 {
            return self.position;
        }

        let heading = self.rng.gen_range(0.0..2.0 * PI);
        let lat = self.position.lat + self.step_m * heading.cos() / METERS_PER_DEGREE;
        // Longitude degrees shrink towards the poles
        let shrink = self.position.lat.to_radians().cos().max(1e-6);
        let lon = self.position.lon + self.step_m * heading.sin() / (METERS_PER_DEGREE * shrink);

        self.position = Coords::new(lat.clamp(-90.0, 90.0), wrap_longitude(lon));
        self.position
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid maps 180 to -180, keep the documented upper bound inclusive
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}
