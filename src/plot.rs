use plotters::prelude::PathElement;
use plotters::prelude::*;

use coherent_array::utils::DynError;
use coherent_array::{PowerSpectrum, Waveform};

pub use plotters::prelude::{RGBColor, BLUE, RED};

const PLOT_FONT_SCALE: f64 = 1.2;

fn scaled_font_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

fn scaled_area_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

struct Line<'a> {
    points: Vec<(f64, f64)>,
    color: &'a RGBColor,
    label: &'a str,
}

fn bounds(lines: &[Line<'_>]) -> ((f64, f64), (f64, f64)) {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);
    for &(px, py) in lines.iter().flat_map(|l| l.points.iter()) {
        x = (x.0.min(px), x.1.max(px));
        if py.is_finite() {
            y = (y.0.min(py), y.1.max(py));
        }
    }
    // Flat series still need a non-empty range.
    if y.1 <= y.0 {
        y = (y.0 - 1.0, y.0 + 1.0);
    }
    (x, y)
}

fn draw_lines(
    filename: &str,
    x_label: &str,
    y_label: &str,
    lines: &[Line<'_>],
) -> Result<(), DynError> {
    if lines.is_empty() {
        return Err("No series provided to plot".into());
    }
    if lines.iter().any(|l| l.points.is_empty()) {
        return Err("No data points to plot".into());
    }

    let root = BitMapBackend::new(filename, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let ((x_min, x_max), (y_min, y_max)) = bounds(lines);
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .light_line_style(WHITE.mix(0.0))
        .draw()?;

    for line in lines {
        let color = line.color;
        chart
            .draw_series(LineSeries::new(line.points.iter().copied(), color))?
            .label(line.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], color));
    }

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", scaled_font_size(20)).into_font())
        .draw()?;

    root.present()?;
    Ok(())
}

/// Overlay waveforms against time (ns). Each keeps its own time grid.
pub fn plot_waveforms(
    filename: &str,
    series: &[(&Waveform, &RGBColor, &str)],
) -> Result<(), DynError> {
    let lines: Vec<Line<'_>> = series
        .iter()
        .map(|&(wf, color, label)| Line {
            points: wf.times().zip(wf.even().iter().copied()).collect(),
            color,
            label,
        })
        .collect();
    draw_lines(filename, "Time [ns]", "Amplitude", &lines)
}

/// Overlay power spectra in dB against frequency (GHz). DC is left out.
pub fn plot_spectra(
    filename: &str,
    series: &[(&PowerSpectrum, &RGBColor, &str)],
) -> Result<(), DynError> {
    let lines: Vec<Line<'_>> = series
        .iter()
        .map(|&(spectrum, color, label)| Line {
            points: spectrum
                .frequencies()
                .zip(spectrum.values().iter())
                .skip(1)
                .map(|(f, &p)| (f, 10.0 * p.max(1e-30).log10()))
                .collect(),
            color,
            label,
        })
        .collect();
    draw_lines(filename, "Frequency [GHz]", "Power [dB]", &lines)
}
