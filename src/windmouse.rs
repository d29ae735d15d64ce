//! WindMouse path synthesis.
//!
//! A cursor starts at the origin and is pulled toward the target by a
//! gravity term while a damped random walk ("wind") pushes it sideways. The
//! continuous position is integrated every iteration; only whole-pixel
//! boundary crossings are emitted as [`MotionStep`]s, so sub-pixel velocity
//! accumulates instead of being rounded away.

use crate::config::{Bounds, WindMouseConfig};
use crate::models::{MotionPath, MotionStep, WindParams};
use rand::Rng;

const SQRT_3: f64 = 1.732_050_807_568_877_2;
const SQRT_5: f64 = 2.236_067_977_499_79;

/// Integration steps allowed per emitted point. A draw whose velocity never
/// crosses a pixel boundary would otherwise loop without ever reaching the cap.
const ITERATIONS_PER_POINT: usize = 16;

#[derive(Debug, Clone)]
pub struct WindMouse {
    config: WindMouseConfig,
}

impl WindMouse {
    pub fn new(config: WindMouseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WindMouseConfig {
        &self.config
    }

    /// Fresh parameters for one movement. Reusing them across movements
    /// would make every path look alike.
    pub fn draw_params<R: Rng + ?Sized>(&self, rng: &mut R) -> WindParams {
        WindParams {
            speed: self.config.speed.sample(rng),
            gravity: self.config.gravity.sample(rng),
            wind: self.config.wind.sample(rng),
            target_radius: self.config.target_radius.sample(rng),
            max_step: self.config.max_step.sample(rng),
        }
    }

    /// Random target offset, uniform on each axis.
    pub fn random_target<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        let range = Bounds::new(-self.config.target_range_px, self.config.target_range_px);
        (range.sample(rng), range.sample(rng))
    }

    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        target_x: f64,
        target_y: f64,
    ) -> MotionPath {
        let params = self.draw_params(rng);
        self.synthesize_with(rng, params, target_x, target_y)
    }

    pub fn synthesize_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        params: WindParams,
        target_x: f64,
        target_y: f64,
    ) -> MotionPath {
        let cap = self.config.max_path_points;
        let budget = cap.saturating_mul(ITERATIONS_PER_POINT);
        let gust = Bounds::new(-params.wind, params.wind);
        let mut steps = Vec::new();

        let (mut x, mut y) = (0.0_f64, 0.0_f64);
        let (mut vx, mut vy) = (0.0_f64, 0.0_f64);
        let (mut wx, mut wy) = (0.0_f64, 0.0_f64);

        let mut dist = (target_x - x).hypot(target_y - y);
        let mut iterations = 0;
        while dist > params.target_radius && steps.len() < cap && iterations < budget {
            iterations += 1;
            wx = wx / SQRT_3 + gust.sample(rng) / SQRT_5;
            wy = wy / SQRT_3 + gust.sample(rng) / SQRT_5;

            let (pull_x, pull_y) = if dist > 0.0 {
                (
                    (target_x - x) * params.gravity / dist,
                    (target_y - y) * params.gravity / dist,
                )
            } else {
                (0.0, 0.0)
            };
            vx += (wx + pull_x) / params.speed;
            vy += (wy + pull_y) / params.speed;

            let velocity = vx.hypot(vy);
            if velocity > params.max_step {
                vx = vx / velocity * params.max_step;
                vy = vy / velocity * params.max_step;
            }

            let dx = (x + vx).round() as i32 - x.round() as i32;
            let dy = (y + vy).round() as i32 - y.round() as i32;

            x += vx;
            y += vy;

            if dx != 0 || dy != 0 {
                steps.push(MotionStep {
                    dx,
                    dy,
                    delay_us: self.config.delay_us.sample(rng),
                });
            }

            dist = (target_x - x).hypot(target_y - y);
        }

        MotionPath {
            steps,
            params,
            target: (target_x, target_y),
            arrived: dist <= params.target_radius,
        }
    }
}
