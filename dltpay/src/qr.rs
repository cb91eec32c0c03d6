//! QR rendering for payment URLs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use qrcode::types::QrError;

const DARK: &str = "#000000";
const LIGHT: &str = "#FFFFFF";

/// Renders `data` as an SVG document with a quiet zone.
///
/// # Errors
///
/// [`QrError`] if `data` does not fit in a QR code.
pub fn svg(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render()
        .quiet_zone(true)
        .dark_color(svg::Color(DARK))
        .light_color(svg::Color(LIGHT))
        .build())
}

/// Renders `data` as a base64 `data:image/svg+xml` URI.
///
/// # Errors
///
/// As for [`svg`].
pub fn svg_data_uri(data: &str) -> Result<String, QrError> {
    let svg = svg(data)?;
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)))
}

/// Renders `data` as block characters for a terminal.
///
/// # Errors
///
/// As for [`svg`].
pub fn terminal(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://yesallofus.com/pay/pl_abc123";

    #[test]
    fn test_svg_and_data_uri() {
        let svg = svg(URL).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains(DARK));
        let uri = svg_data_uri(URL).unwrap();
        assert!(uri.starts_with("data:image/svg+xml;base64,"));
        let decoded = STANDARD
            .decode(uri.trim_start_matches("data:image/svg+xml;base64,"))
            .unwrap();
        assert_eq!(decoded, svg.into_bytes());
    }

    #[test]
    fn test_terminal_is_square_ish() {
        let art = terminal(URL).unwrap();
        let lines: Vec<_> = art.lines().collect();
        assert!(lines.len() > 20);
        assert_eq!(lines[0].chars().count(), lines.len() * 2);
    }

    #[test]
    fn test_oversized_payload_is_an_error() {
        assert!(svg(&"x".repeat(8000)).is_err());
    }
}
