//! Second-order high-pass filter applied to raw PCM before suppression.
//!
//! Removes rumble and car-noise energy below roughly 100 Hz:
//!
//! ```text
//! y[n] = b0 x[n] + b1 x[n-1] + b2 x[n-2] - a1 y[n-1] - a2 y[n-2]
//! ```

const B: [f32; 3] = [0.9273, -1.8545, 0.9273];
const A: [f32; 3] = [1.0, -1.9059, 0.9114];

#[derive(Debug, Clone, Default)]
pub struct GsmHighPass {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl GsmHighPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `input` into `output`; both slices must have equal length.
    pub fn process(&mut self, input: &[i16], output: &mut [f32]) {
        for (&s, out) in input.iter().zip(output.iter_mut()) {
            let x = f32::from(s);
            let y = B[0] * x + B[1] * self.x1 + B[2] * self.x2 - A[1] * self.y1 - A[2] * self.y2;
            self.x2 = self.x1;
            self.x1 = x;
            self.y2 = self.y1;
            self.y1 = y;
            *out = y;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
