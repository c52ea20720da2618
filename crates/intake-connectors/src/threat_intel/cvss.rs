//! CVSS score colors.

const GREEN: [&str; 4] = ["#50C878", "#6CB65B", "#89C35B", "#A3C157"];
const AMBER: [&str; 3] = ["#FFB347", "#FFA07A", "#FF7F50"];
const RED: [&str; 3] = ["#FF6347", "#FF4500", "#FF4040"];

/// Color for scores outside `(0, 10]`.
pub const UNSCORED: &str = "#000000";

/// Hex color for a CVSS score.
///
/// Scores up to 4 are green, up to 7 amber and the rest red. The shade is
/// picked by the integer part of the score within its band.
pub fn cvss_color(score: f64) -> &'static str {
    if !(score > 0.0 && score <= 10.0) {
        return UNSCORED;
    }
    let whole = score.trunc() as usize;
    let (shades, offset) = if score <= 4.0 {
        (&GREEN[..], 0)
    } else if score <= 7.0 {
        (&AMBER[..], 4)
    } else {
        (&RED[..], 7)
    };
    let index = whole.saturating_sub(offset).clamp(1, shades.len());
    shades[index - 1]
}
