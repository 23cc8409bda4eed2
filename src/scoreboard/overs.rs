/// Convert a displayed overs value ("4.3" = 4 overs, 3 balls) into a
/// fractional overs count (4.5) usable for run-rate arithmetic.
///
/// Plain numbers without a ball component are taken as-is. Only the first
/// two dot-separated parts are read, so "4.3.2" is 4.5. Anything
/// unparseable yields `0.0`.
pub fn overs_to_decimal(overs: &str) -> f64 {
    let overs = overs.trim();
    if !overs.contains('.') {
        return overs.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0);
    }
    let mut parts = overs.split('.');
    let whole = parts.next().and_then(|p| p.parse::<u32>().ok());
    let balls = parts.next().and_then(|p| p.parse::<u32>().ok());
    match (whole, balls) {
        (Some(whole), Some(balls)) => whole as f64 + balls as f64 / 6.0,
        _ => 0.0,
    }
}

/// Round to two decimal places, the precision the scoreboard shows rates in.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
