use once_cell::sync::OnceCell;

/// Parses a declination string of the form `DD MM SS.ss` (space separated,
/// sign on the degrees field) as written into FITS headers by the host,
/// returning decimal degrees.
pub fn dec_string_to_degrees(declination: &str) -> anyhow::Result<f64> {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"^\s*([+-]?\d+)\s+(\d+)\s+([\d.]+)\s*$").unwrap()
    });
    let caps = re.captures(declination)
        .ok_or_else(|| anyhow::anyhow!("malformed declination string: {declination:?}"))?;
    let deg_field = &caps[1];
    let deg: f64 = deg_field.parse()?;
    let min: f64 = caps[2].parse()?;
    let sec: f64 = caps[3].parse()?;
    let magnitude = deg.abs() + min / 60.0 + sec / 3600.0;
    Ok(if deg_field.starts_with('-') { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_declination() {
        let deg = dec_string_to_degrees("42 30 15.00").unwrap();
        assert!((deg - 42.504166).abs() < 1e-4);
    }

    #[test]
    fn parses_negative_declination() {
        let deg = dec_string_to_degrees("-10 00 00.00").unwrap();
        assert!((deg + 10.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_malformed_string() {
        assert!(dec_string_to_degrees("garbage").is_err());
    }
}
