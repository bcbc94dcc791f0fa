//! Parsed representation of item state strings
//!
//! A raw state string such as `"ON"`, `"21.5 °C"`, `"120,80,45"` or
//! `"52.52,13.40"` is parsed once into every facet a consumer may need.
//! Parsing is total: each facet is independently absent when the string does
//! not fit it.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Hue, saturation, brightness triple as sent by color items
static HSB_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*\.?[0-9]+),([0-9]*\.?[0-9]+),([0-9]*\.?[0-9]+)$")
        .expect("Invalid HSB pattern regex")
});

/// A state string parsed into all of its possible interpretations.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedState {
    raw: String,
    boolean: bool,
    number: Option<NumberState>,
    hsv: Option<HsvState>,
    brightness: Option<i32>,
    location: Option<GeoLocation>,
}

impl ParsedState {
    /// Parse `state`, using `number_pattern` (a printf-like state pattern)
    /// when the state is rendered as a number.
    pub fn parse(state: &str, number_pattern: Option<&str>) -> Self {
        Self {
            raw: state.to_string(),
            boolean: parse_as_boolean(state),
            number: parse_as_number(state, number_pattern),
            hsv: parse_as_hsv(state),
            brightness: parse_as_brightness(state),
            location: parse_as_location(state),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_boolean(&self) -> bool {
        self.boolean
    }

    pub fn as_number(&self) -> Option<&NumberState> {
        self.number.as_ref()
    }

    pub fn as_hsv(&self) -> Option<HsvState> {
        self.hsv
    }

    pub fn as_brightness(&self) -> Option<i32> {
        self.brightness
    }

    pub fn as_location(&self) -> Option<GeoLocation> {
        self.location
    }

    /// The number pattern this state was parsed with, if any.
    pub fn number_pattern(&self) -> Option<&str> {
        self.number.as_ref().and_then(|n| n.format.as_deref())
    }
}

impl fmt::Display for ParsedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse an optional state string. `None` stays `None`.
pub fn parse_state(state: Option<&str>, number_pattern: Option<&str>) -> Option<ParsedState> {
    state.map(|s| ParsedState::parse(s, number_pattern))
}

// ─────────────────────────────────────────────────────────────────
// Facets
// ─────────────────────────────────────────────────────────────────

/// Color in HSV space: hue in degrees, saturation and value in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvState {
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
}

impl HsvState {
    /// Convert to 8-bit RGB.
    pub fn to_rgb(&self) -> (u8, u8, u8) {
        let h = self.hue.rem_euclid(360.0) / 60.0;
        let s = self.saturation.clamp(0.0, 1.0);
        let v = self.value.clamp(0.0, 1.0);

        let sector = h.floor();
        let fraction = h - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * fraction);
        let t = v * (1.0 - s * (1.0 - fraction));

        let (r, g, b) = match sector as i32 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        let to_byte = |c: f32| (c * 255.0).round().clamp(0.0, 255.0) as u8;
        (to_byte(r), to_byte(g), to_byte(b))
    }

    /// `#rrggbb` representation
    pub fn to_hex(&self) -> String {
        let (r, g, b) = self.to_rgb();
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

/// Geographic position from a `lat,lon[,alt]` state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Numeric state with optional unit and display pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberState {
    pub value: f64,
    pub unit: Option<String>,
    pub format: Option<String>,
}

impl NumberState {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            unit: None,
            format: None,
        }
    }

    /// Copy of this state carrying a different value, keeping unit and pattern.
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            unit: self.unit.clone(),
            format: self.format.clone(),
        }
    }

    /// The bare value, rounded when the pattern asks for an integer.
    pub fn format_value(&self) -> String {
        match self.actual_value() {
            FormatArg::Int(i) => i.to_string(),
            FormatArg::Float(f) => f.to_string(),
        }
    }

    fn actual_value(&self) -> FormatArg {
        match &self.format {
            Some(format) if format.contains("%d") => FormatArg::Int(self.value.round() as i64),
            _ => FormatArg::Float(self.value),
        }
    }
}

impl fmt::Display for NumberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(format) = self.format.as_deref().filter(|p| !p.is_empty()) {
            let pattern = format.replace("%unit%", self.unit.as_deref().unwrap_or(""));
            // A pattern that does not fit the value falls back to plain rendering
            if let Some(rendered) = apply_pattern(&pattern, self.actual_value()) {
                return f.write_str(&rendered);
            }
        }
        match &self.unit {
            Some(unit) => write!(f, "{} {}", self.format_value(), unit),
            None => f.write_str(&self.format_value()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Parsers
// ─────────────────────────────────────────────────────────────────

fn parse_as_boolean(state: &str) -> bool {
    if state == "ON" {
        return true;
    }
    parse_as_brightness(state).is_some_and(|b| b != 0)
}

fn parse_as_number(state: &str, format: Option<&str>) -> Option<NumberState> {
    match state {
        "ON" => Some(NumberState::new(100.0)),
        "OFF" => Some(NumberState::new(0.0)),
        _ => {
            let (number, unit) = match state.split_once(' ') {
                Some((number, unit)) => (number, Some(unit.to_string())),
                None => (state, None),
            };
            let value = number.parse::<f64>().ok()?;
            Some(NumberState {
                value,
                unit,
                format: format.map(str::to_string),
            })
        }
    }
}

fn parse_as_hsv(state: &str) -> Option<HsvState> {
    let parts: Vec<&str> = state.split(',').collect();
    if parts.len() != 3 {
        return None;
    }
    let hue = parts[0].trim().parse::<f32>().ok()?;
    let saturation = parts[1].trim().parse::<f32>().ok()?;
    let value = parts[2].trim().parse::<f32>().ok()?;
    Some(HsvState {
        hue,
        saturation: saturation / 100.0,
        value: value / 100.0,
    })
}

fn parse_as_brightness(state: &str) -> Option<i32> {
    if let Some(caps) = HSB_PATTERN.captures(state) {
        return caps
            .get(3)
            .and_then(|m| m.as_str().parse::<f32>().ok())
            .map(|b| b.round() as i32);
    }
    let value = state.parse::<f32>().ok()?;
    if !value.is_finite() {
        return None;
    }
    // Dimmers report fractional percentages; anything above zero is "on"
    if value > 0.0 && value < 1.0 {
        Some(1)
    } else {
        Some(value.round() as i32)
    }
}

fn parse_as_location(state: &str) -> Option<GeoLocation> {
    let parts: Vec<&str> = state.split(',').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let latitude = parts[0].trim().parse::<f64>().ok()?;
    let longitude = parts[1].trim().parse::<f64>().ok()?;
    let altitude = match parts.get(2) {
        Some(alt) => Some(alt.trim().parse::<f64>().ok()?),
        None => None,
    };
    // Keeps HSB triples from being mistaken for coordinates
    if latitude.abs() <= 90.0 && longitude.abs() <= 180.0 {
        Some(GeoLocation {
            latitude,
            longitude,
            altitude,
        })
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────
// printf-style state patterns
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum FormatArg {
    Int(i64),
    Float(f64),
}

/// Render a single-argument printf-like pattern (`%d`, `%.1f`, `%s`, `%%`).
///
/// Returns `None` when the pattern does not fit the argument, mirroring a
/// format exception on the server-side pattern.
fn apply_pattern(pattern: &str, arg: FormatArg) -> Option<String> {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut consumed = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut left_align = false;
        let mut zero_pad = false;
        let mut plus_sign = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_align = true,
                '0' => zero_pad = true,
                '+' => plus_sign = true,
                ' ' | ',' | '#' => {}
                _ => break,
            }
            chars.next();
        }

        let width = parse_field_size(&mut chars)?;

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            precision = Some(parse_field_size(&mut chars)?);
        }

        let conversion = chars.next()?;
        let rendered = match conversion {
            '%' => {
                out.push('%');
                continue;
            }
            'n' => {
                out.push('\n');
                continue;
            }
            'd' => {
                if consumed {
                    return None;
                }
                consumed = true;
                // Flagged or sized `%d` patterns still get a float argument
                let i = match arg {
                    FormatArg::Int(i) => i,
                    FormatArg::Float(v) => v.round() as i64,
                };
                if plus_sign && i >= 0 {
                    format!("+{i}")
                } else {
                    i.to_string()
                }
            }
            'f' => {
                if consumed {
                    return None;
                }
                consumed = true;
                match arg {
                    FormatArg::Float(v) => {
                        let s = format!("{:.*}", precision.unwrap_or(6), v);
                        if plus_sign && v >= 0.0 {
                            format!("+{s}")
                        } else {
                            s
                        }
                    }
                    FormatArg::Int(_) => return None,
                }
            }
            's' | 'S' => {
                if consumed {
                    return None;
                }
                consumed = true;
                let s = match arg {
                    FormatArg::Int(i) => i.to_string(),
                    FormatArg::Float(v) => v.to_string(),
                };
                let s = match precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                };
                if conversion == 'S' {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            _ => return None,
        };

        out.push_str(&pad(&rendered, width, left_align, zero_pad));
    }

    Some(out)
}

/// Largest width or precision a pattern may ask for.
const MAX_FIELD_SIZE: usize = 1_000;

/// Leading decimal digits of a width or precision; `None` past [`MAX_FIELD_SIZE`].
fn parse_field_size(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut size = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        size = size.checked_mul(10)?.checked_add(d as usize)?;
        if size > MAX_FIELD_SIZE {
            return None;
        }
        chars.next();
    }
    Some(size)
}

fn pad(value: &str, width: usize, left_align: bool, zero_pad: bool) -> String {
    let len = value.chars().count();
    if len >= width {
        return value.to_string();
    }
    let fill = width - len;
    if left_align {
        format!("{value}{}", " ".repeat(fill))
    } else if zero_pad {
        match value.strip_prefix('-') {
            Some(rest) => format!("-{}{rest}", "0".repeat(fill)),
            None => format!("{}{value}", "0".repeat(fill)),
        }
    } else {
        format!("{}{value}", " ".repeat(fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_as_boolean() {
        for state in ["ON", "100", "1", "0.1", "10,20,30"] {
            assert!(parse_as_boolean(state), "{state} should be true");
        }
        for state in ["OFF", "0", "CLOSED", "", "10,20,0"] {
            assert!(!parse_as_boolean(state), "{state} should be false");
        }
    }

    #[test]
    fn test_parse_as_number() {
        let cases = [
            ("ON", 100.0),
            ("OFF", 0.0),
            ("3", 3.0),
            ("0", 0.0),
            ("42.42", 42.42),
        ];
        for (state, expected) in cases {
            assert_eq!(parse_as_number(state, None), Some(NumberState::new(expected)));
        }
        assert_eq!(parse_as_number("abc", None), None);
    }

    #[test]
    fn test_parse_as_number_splits_unit() {
        let number = parse_as_number("21.5 °C", None).unwrap();
        assert_eq!(number.value, 21.5);
        assert_eq!(number.unit.as_deref(), Some("°C"));
    }

    #[test]
    fn test_parse_as_brightness() {
        let cases = [("100", 100), ("0", 0), ("0.1", 1), ("10,20,30", 30), ("10,20,30.6", 31)];
        for (state, expected) in cases {
            assert_eq!(parse_as_brightness(state), Some(expected), "state {state}");
        }
        assert_eq!(parse_as_brightness("ON"), None);
    }

    #[test]
    fn test_parse_as_hsv() {
        let hsv = parse_as_hsv("120,50,100").unwrap();
        assert_eq!(hsv.hue, 120.0);
        assert_eq!(hsv.saturation, 0.5);
        assert_eq!(hsv.value, 1.0);
        assert!(parse_as_hsv("120,50").is_none());
        assert!(parse_as_hsv("a,b,c").is_none());
    }

    #[test]
    fn test_hsv_to_hex() {
        let red = HsvState {
            hue: 0.0,
            saturation: 1.0,
            value: 1.0,
        };
        assert_eq!(red.to_hex(), "#ff0000");
        let green = HsvState {
            hue: 120.0,
            saturation: 1.0,
            value: 1.0,
        };
        assert_eq!(green.to_hex(), "#00ff00");
    }

    #[test]
    fn test_parse_as_location() {
        let loc = parse_as_location("52.52,13.40").unwrap();
        assert_eq!(loc.latitude, 52.52);
        assert_eq!(loc.longitude, 13.40);
        assert_eq!(loc.altitude, None);

        let loc = parse_as_location("52.52,13.40,34").unwrap();
        assert_eq!(loc.altitude, Some(34.0));

        assert!(parse_as_location("120,200,45").is_none());
        assert!(parse_as_location("1").is_none());
    }

    #[test]
    fn test_parse_is_idempotent() {
        for raw in ["ON", "21.5 °C", "120,80,45", "52.52,13.40", "", "garbage"] {
            let first = ParsedState::parse(raw, Some("%.1f %unit%"));
            let second = ParsedState::parse(raw, Some("%.1f %unit%"));
            assert_eq!(first, second);
            let reparsed = ParsedState::parse(first.as_str(), first.number_pattern());
            if first.as_number().is_some() {
                assert_eq!(first, reparsed);
            }
        }
    }

    #[test]
    fn test_number_display_without_pattern() {
        assert_eq!(NumberState::new(42.0).to_string(), "42");
        assert_eq!(parse_as_number("21.5 °C", None).unwrap().to_string(), "21.5 °C");
    }

    #[test]
    fn test_number_display_with_pattern() {
        let number = parse_as_number("21.46 °C", Some("%.1f %unit%")).unwrap();
        assert_eq!(number.to_string(), "21.5 °C");

        let number = parse_as_number("21.6", Some("%d %%")).unwrap();
        assert_eq!(number.to_string(), "22 %");

        let number = parse_as_number("7", Some("%03d")).unwrap();
        assert_eq!(number.to_string(), "007");
    }

    #[test]
    fn test_number_display_pattern_mismatch_falls_back() {
        let number = parse_as_number("21.5", Some("%d %.1f")).unwrap();
        assert_eq!(number.to_string(), "22");

        let number = parse_as_number("21.5 W", Some("%x")).unwrap();
        assert_eq!(number.to_string(), "21.5 W");
    }

    #[test]
    fn test_number_display_oversized_field_falls_back() {
        let number =
            parse_as_number("21.5 °C", Some("%99999999999999999999999.1f %unit%")).unwrap();
        assert_eq!(number.to_string(), "21.5 °C");

        let number = parse_as_number("21.5", Some("%.99999999999999999999999f")).unwrap();
        assert_eq!(number.to_string(), "21.5");

        let number = parse_as_number("3", Some("%5000d")).unwrap();
        assert_eq!(number.to_string(), "3");

        let number = parse_as_number("3", Some("%4d")).unwrap();
        assert_eq!(number.to_string(), "   3");
    }

    #[test]
    fn test_with_value_keeps_unit_and_format() {
        let number = parse_as_number("5 kWh", Some("%.2f %unit%")).unwrap();
        let changed = number.with_value(7.0);
        assert_eq!(changed.to_string(), "7.00 kWh");
    }

    #[test]
    fn test_parse_state_none() {
        assert!(parse_state(None, None).is_none());
        assert_eq!(parse_state(Some("ON"), None).unwrap().as_str(), "ON");
    }
}
