/// Physical area of one calibration cell, in mm².
pub const DEFAULT_CELL_AREA_MM2: f64 = 25.0;
/// Expected edge length of a calibration cell, in pixels, handed to the engine.
pub const DEFAULT_CELL_SIZE_PX: u32 = 30;

const MM2_PER_CM2: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub cell_area_mm2: f64,
    pub cell_size_px: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_AREA_MM2, DEFAULT_CELL_SIZE_PX)
    }
}

impl Calibration {
    pub fn new(cell_area_mm2: f64, cell_size_px: u32) -> Self {
        Self {
            cell_area_mm2,
            cell_size_px,
        }
    }

    pub fn square_cm(&self, raw_pixel_area: f64, px_per_cell: f64) -> f64 {
        square_cm(raw_pixel_area, px_per_cell, self.cell_area_mm2)
    }
}

/// Converts an engine pixel area into cm² using the measured cell scale.
///
/// No rounding is applied. A missing or degenerate scale yields `NaN` so the
/// caller sees the same sentinel as any other failed measurement.
pub fn square_cm(raw_pixel_area: f64, px_per_cell: f64, cell_area_mm2: f64) -> f64 {
    if !px_per_cell.is_finite() || px_per_cell <= 0.0 {
        return f64::NAN;
    }
    raw_pixel_area * (cell_area_mm2 / (px_per_cell * px_per_cell)) / MM2_PER_CM2
}

pub fn format_area(area_cm2: f64) -> String {
    if area_cm2.is_finite() {
        format!("{:.2} cm²", area_cm2)
    } else {
        "—".to_string()
    }
}
