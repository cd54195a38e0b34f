//! Vehicle-key normalization and content-id handling.
//!
//! Every chunk is keyed by a normalized vehicle key of the form
//! `{year}_{make}_{model}_{engine}` plus a deterministic content id of the
//! form `{chunk_type}:{component}`. Keys are built here and nowhere else:
//! generated content fills values, never identifiers.
//!
//! Model names arrive with generation suffixes ("F-150 (Thirteenth
//! generation)") and engine names with marketing noise ("3.5L V6 EcoBoost",
//! "1.6L Ecotec I4 (108 hp)"). Normalization strips both down to the stable
//! part so the same physical vehicle always maps to the same key:
//!
//! | Input | Key segment |
//! |-------|-------------|
//! | `Civic (Eighth generation, North America)` | `civic` |
//! | `3.5L V6 EcoBoost` | `3.5l_ecoboost` |
//! | `1.5L Turbo` | `1.5t` |
//! | `1.6L Ecotec I4 (108 hp)` | `1.6l` |

use anyhow::{bail, Result};

use crate::models::ChunkType;

/// Build the canonical vehicle key from raw year/make/model/engine values.
///
/// The engine is optional (EVs have none); when absent the key has three
/// segments.
pub fn normalize_vehicle_key(year: u16, make: &str, model: &str, engine: Option<&str>) -> String {
    let make = normalize_component(make);
    let model = clean_model_name(model);

    match engine {
        Some(engine) => format!("{}_{}_{}_{}", year, make, model, clean_engine_name(engine)),
        None => format!("{}_{}_{}", year, make, model),
    }
}

/// Strip parenthetical generation/trim descriptors and normalize.
fn clean_model_name(model: &str) -> String {
    let mut cleaned = String::with_capacity(model.len());
    let mut depth = 0usize;
    for ch in model.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(ch),
            _ => {}
        }
    }
    normalize_component(cleaned.trim())
}

/// Reduce an engine description to displacement plus induction marker.
///
/// "Ecotec" is GM's naturally-aspirated line, not a turbo; "EcoBoost" is
/// Ford's turbo branding and is kept verbatim because owners search by it.
fn clean_engine_name(engine: &str) -> String {
    let lower = engine.to_lowercase();
    let lower = lower.trim();

    let displacement = match extract_displacement(lower) {
        Some(d) => d,
        None => return normalize_component(lower),
    };

    let is_ecoboost = lower.contains("ecoboost");
    let turbo_terms = ["turbo", "tsi", "tfsi", "turbocharged"];
    let is_turbo = turbo_terms.iter().any(|t| lower.contains(t)) || has_t_shorthand(lower);

    if is_ecoboost {
        format!("{}l_ecoboost", displacement)
    } else if is_turbo {
        format!("{}t", displacement)
    } else {
        format!("{}l", displacement)
    }
}

/// Find a `N.NL`-style displacement ("2.0l", "5.4 l") or a bare `N.NT`
/// shorthand ("2.0t") and return the numeric part.
fn extract_displacement(lower: &str) -> Option<String> {
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let number = &lower[start..i];
            let mut j = i;
            while j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == b'l' || bytes[j] == b't') {
                return Some(number.to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// True for "2.0T"-style shorthand: digits immediately followed by `t` at a
/// word boundary.
fn has_t_shorthand(lower: &str) -> bool {
    let bytes = lower.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b't' && i > 0 && bytes[i - 1].is_ascii_digit() {
            let at_boundary = i + 1 >= bytes.len() || !bytes[i + 1].is_ascii_alphanumeric();
            if at_boundary {
                return true;
            }
        }
    }
    false
}

/// Normalize a free-text segment for use inside a key: lowercase, spaces to
/// underscores, only `[a-z0-9_.-]` kept, runs of underscores collapsed.
pub fn normalize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_underscore = false;
    for ch in value.trim().to_lowercase().chars() {
        let mapped = match ch {
            ' ' => Some('_'),
            'a'..='z' | '0'..='9' | '-' | '.' => Some(ch),
            '_' => Some('_'),
            _ => None,
        };
        if let Some(c) = mapped {
            if c == '_' {
                if last_was_underscore {
                    continue;
                }
                last_was_underscore = true;
            } else {
                last_was_underscore = false;
            }
            out.push(c);
        }
    }
    out.trim_matches('_').to_string()
}

/// Build a content id from a chunk type and component name.
pub fn build_content_id(chunk_type: ChunkType, component: &str) -> Result<String> {
    let component = normalize_component(component);
    if component.is_empty() {
        bail!("content id component must not be empty");
    }
    Ok(format!("{}:{}", chunk_type.as_str(), component))
}

/// Split a content id back into its chunk-type prefix and component.
pub fn parse_content_id(content_id: &str) -> Result<(ChunkType, &str)> {
    let (type_str, component) = match content_id.split_once(':') {
        Some(parts) => parts,
        None => bail!("invalid content id (missing ':'): {}", content_id),
    };
    let chunk_type = match ChunkType::parse(type_str) {
        Some(t) => t,
        None => bail!("invalid content id (unknown chunk type '{}')", type_str),
    };
    if component.is_empty() {
        bail!("invalid content id (empty component): {}", content_id);
    }
    Ok((chunk_type, component))
}

/// The make segment of a vehicle key, used by the QA contamination rules.
pub fn make_of(vehicle_key: &str) -> Option<&str> {
    let mut parts = vehicle_key.split('_');
    parts.next()?;
    parts.next()
}

/// Turn a key component back into a display string ("front_caliper" →
/// "Front Caliper").
pub fn humanize(component: &str) -> String {
    component
        .split('_')
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_lose_generation_suffixes() {
        let cases = [
            ("Aveo (T200/T250)", "aveo"),
            ("F-150 (Eleventh generation)", "f-150"),
            ("Civic (Eighth generation, North America)", "civic"),
            ("Accord", "accord"),
            ("Camry (XV40)", "camry"),
            ("CR-V (Third generation)", "cr-v"),
            ("RAV4 (XA40)", "rav4"),
            ("3 Series (E90)", "3_series"),
            ("Model 3", "model_3"),
            ("A4 (B8)", "a4"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_model_name(input), expected, "input: {}", input);
        }
    }

    #[test]
    fn engine_names_reduce_to_displacement_and_induction() {
        let cases = [
            ("1.6L Ecotec I4 (108 hp)", "1.6l"),
            ("5.4L Triton V8", "5.4l"),
            ("2.0L K20Z3 i-VTEC I4 (Si)", "2.0l"),
            ("3.5L V6 EcoBoost", "3.5l_ecoboost"),
            ("2.0T", "2.0t"),
            ("2.7L EcoBoost V6", "2.7l_ecoboost"),
            ("5.0L Coyote V8", "5.0l"),
            ("1.5L Turbo", "1.5t"),
            ("2.4L 4-cylinder", "2.4l"),
            ("3.5L V6", "3.5l"),
            ("1.8L i-VTEC", "1.8l"),
            ("2.0L Turbo I4", "2.0t"),
            ("5.7L HEMI V8", "5.7l"),
            ("6.2L V8 Supercharged", "6.2l"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_engine_name(input), expected, "input: {}", input);
        }
    }

    #[test]
    fn full_keys_match_booking_flow_format() {
        let cases = [
            (
                2007,
                "Chevrolet",
                "Aveo (T200/T250)",
                Some("1.6L Ecotec I4 (108 hp)"),
                "2007_chevrolet_aveo_1.6l",
            ),
            (2019, "Honda", "Accord", Some("2.0T"), "2019_honda_accord_2.0t"),
            (
                2018,
                "Ford",
                "F-150 (Thirteenth generation)",
                Some("5.0L Coyote V8"),
                "2018_ford_f-150_5.0l",
            ),
            (
                2020,
                "Toyota",
                "Camry (XV70)",
                Some("3.5L V6"),
                "2020_toyota_camry_3.5l",
            ),
            (
                2017,
                "Honda",
                "Civic (Tenth generation)",
                Some("1.5L Turbo"),
                "2017_honda_civic_1.5t",
            ),
            (
                2019,
                "Ford",
                "Mustang",
                Some("2.3L EcoBoost"),
                "2019_ford_mustang_2.3l_ecoboost",
            ),
            (2021, "Tesla", "Model 3", None, "2021_tesla_model_3"),
        ];
        for (year, make, model, engine, expected) in cases {
            assert_eq!(
                normalize_vehicle_key(year, make, model, engine),
                expected,
                "{} {} {}",
                year,
                make,
                model
            );
        }
    }

    #[test]
    fn content_ids_round_trip() {
        let id = build_content_id(ChunkType::TorqueSpec, "Front Caliper").unwrap();
        assert_eq!(id, "torque_spec:front_caliper");
        let (t, component) = parse_content_id(&id).unwrap();
        assert_eq!(t, ChunkType::TorqueSpec);
        assert_eq!(component, "front_caliper");
    }

    #[test]
    fn content_id_rejects_malformed_input() {
        assert!(parse_content_id("front_caliper").is_err());
        assert!(parse_content_id("hovercraft_spec:skirt").is_err());
        assert!(parse_content_id("torque_spec:").is_err());
        assert!(build_content_id(ChunkType::Tsb, "  ").is_err());
    }

    #[test]
    fn make_extraction_and_humanize() {
        assert_eq!(make_of("2019_honda_accord_2.0t"), Some("honda"));
        assert_eq!(make_of("2019"), None);
        assert_eq!(humanize("front_caliper"), "Front Caliper");
    }
}
