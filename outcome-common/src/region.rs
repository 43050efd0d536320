/// Derive the case-management region code from a field officer id.
/// Officer ids start with the country letter, e.g. `E1-RL-SAM1-01`.
pub fn region_lookup(officer_id: &str) -> Option<&'static str> {
    match officer_id.trim_start().chars().next()?.to_ascii_uppercase() {
        'E' => Some("E1000000"),
        'W' => Some("W1000000"),
        'N' => Some("N1000000"),
        _ => None,
    }
}
