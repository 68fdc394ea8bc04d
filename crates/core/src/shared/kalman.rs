use nalgebra::{SMatrix, SVector};

use super::bbox::BBox;

type State = SVector<f32, 6>;
type Measurement = SVector<f32, 4>;

const PROCESS_NOISE: f32 = 0.1;
const VELOCITY_NOISE_SCALE: f32 = 0.5;
const MEASUREMENT_NOISE: f32 = 1.0;
const INITIAL_UNCERTAINTY: f32 = 10.0;

/// Constant-velocity Kalman filter over a bounding box.
///
/// State: `[x, y, w, h, vx, vy]`. Measurement: `[x, y, w, h]`.
/// Size is modelled as constant; only position carries velocity.
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: State,
    covariance: SMatrix<f32, 6, 6>,
    transition: SMatrix<f32, 6, 6>,
    measurement: SMatrix<f32, 4, 6>,
    process_noise: SMatrix<f32, 6, 6>,
    measurement_noise: SMatrix<f32, 4, 4>,
}

impl KalmanBoxFilter {
    pub fn new(bbox: &BBox) -> Self {
        let state = State::from_column_slice(&[
            bbox.x as f32,
            bbox.y as f32,
            bbox.width as f32,
            bbox.height as f32,
            0.0,
            0.0,
        ]);

        let mut transition = SMatrix::<f32, 6, 6>::identity();
        transition[(0, 4)] = 1.0; // x += vx
        transition[(1, 5)] = 1.0; // y += vy

        let mut measurement = SMatrix::<f32, 4, 6>::zeros();
        for i in 0..4 {
            measurement[(i, i)] = 1.0;
        }

        let mut process_noise = SMatrix::<f32, 6, 6>::identity() * PROCESS_NOISE;
        for i in 4..6 {
            process_noise[(i, i)] *= VELOCITY_NOISE_SCALE;
        }

        Self {
            state,
            covariance: SMatrix::<f32, 6, 6>::identity() * INITIAL_UNCERTAINTY,
            transition,
            measurement,
            process_noise,
            measurement_noise: SMatrix::<f32, 4, 4>::identity() * MEASUREMENT_NOISE,
        }
    }

    /// Advances the state one frame and returns the predicted box.
    pub fn predict(&mut self) -> BBox {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
        self.bbox()
    }

    /// Folds a measured box into the state and returns the corrected box.
    pub fn correct(&mut self, observed: &BBox) -> BBox {
        let z = Measurement::new(
            observed.x as f32,
            observed.y as f32,
            observed.width as f32,
            observed.height as f32,
        );
        let innovation = z - self.measurement * self.state;
        let innovation_cov = self.measurement * self.covariance * self.measurement.transpose()
            + self.measurement_noise;

        if let Some(inv) = innovation_cov.try_inverse() {
            let gain = self.covariance * self.measurement.transpose() * inv;
            self.state += gain * innovation;
            self.covariance = (SMatrix::<f32, 6, 6>::identity() - gain * self.measurement)
                * self.covariance;
        }
        self.bbox()
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(
            self.state[0].round() as i32,
            self.state[1].round() as i32,
            self.state[2].round().max(0.0) as i32,
            self.state[3].round().max(0.0) as i32,
        )
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4], self.state[5])
    }

    pub fn state(&self) -> [f32; 6] {
        let mut out = [0.0; 6];
        out.copy_from_slice(self.state.as_slice());
        out
    }
}
