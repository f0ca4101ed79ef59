//! Region membership for `regions` territories.
//!
//! A region entry is either a numeric postcode prefix ("80", "8011") or a
//! Dutch province name. Province membership is resolved from the two-digit
//! postcode area. The table is a coarse approximation: a handful of areas
//! straddle a provincial border and are assigned to the province holding most
//! of their addresses.

/// (province, inclusive two-digit postcode area ranges)
const PROVINCE_AREAS: &[(&str, &[(u8, u8)])] = &[
    ("Noord-Holland", &[(10, 12), (14, 21)]),
    ("Flevoland", &[(13, 13), (82, 83)]),
    ("Zuid-Holland", &[(22, 33)]),
    ("Utrecht", &[(34, 39)]),
    ("Gelderland", &[(40, 42), (65, 73)]),
    ("Zeeland", &[(43, 45)]),
    ("Noord-Brabant", &[(46, 57)]),
    ("Limburg", &[(58, 64)]),
    ("Overijssel", &[(74, 77), (80, 81)]),
    ("Drenthe", &[(78, 79), (94, 94)]),
    ("Friesland", &[(84, 92)]),
    ("Groningen", &[(93, 93), (95, 99)]),
];

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Province containing a (normalized) postcode, if its area is known.
pub fn province_for_postcode(postcode: &str) -> Option<&'static str> {
    let area: u8 = postcode.get(..2)?.parse().ok()?;
    PROVINCE_AREAS
        .iter()
        .find(|(_, ranges)| ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&area)))
        .map(|(name, _)| *name)
}

/// True when `name` is a province this module knows about.
pub fn is_known_province(name: &str) -> bool {
    let wanted = normalize_name(name);
    PROVINCE_AREAS
        .iter()
        .any(|(province, _)| normalize_name(province) == wanted)
}

/// First region entry the postcode belongs to.
pub fn matching_region<'a>(postcode: &str, regions: &'a [String]) -> Option<&'a str> {
    let digits: String = postcode.chars().take_while(|c| c.is_ascii_digit()).collect();
    let province = province_for_postcode(postcode).map(normalize_name);

    regions
        .iter()
        .find(|region| {
            let region = region.trim();
            if !region.is_empty() && region.chars().all(|c| c.is_ascii_digit()) {
                digits.starts_with(region)
            } else {
                province.as_deref() == Some(normalize_name(region).as_str())
            }
        })
        .map(String::as_str)
}
