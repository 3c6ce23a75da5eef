//! Resource naming for volumes created by a run

use rand::Rng;

/// Longest volume name the local volume driver can store as a directory
pub const MAX_VOLUME_NAME_LEN: usize = 255;

/// Substrings Windows reserves as device names, with their safe spellings
const RESERVED_NAMES: [(&str, &str); 6] = [
    ("aux", "a_u_x"),
    ("com", "c_o_m"),
    ("con", "c_o_n"),
    ("lpt", "l_p_t"),
    ("nul", "n_u_l"),
    ("prn", "p_r_n"),
];

/// Break up Windows-reserved device names so the result is a valid path component
pub fn filter_reserved_names(name: &str) -> String {
    RESERVED_NAMES
        .iter()
        .fold(name.to_string(), |acc, (reserved, safe)| acc.replace(reserved, safe))
}

/// `len` random lowercase ASCII letters
pub fn random_letters<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Per-run volume name such as `pack-layers-qwertyuiop`
pub fn run_volume_name<R: Rng + ?Sized>(rng: &mut R, kind: &str) -> String {
    filter_reserved_names(&format!("pack-{}-{}", kind, random_letters(rng, 10)))
}

/// Replace characters the volume-name grammar `[a-zA-Z0-9][a-zA-Z0-9_.-]+` rejects
pub fn sanitize_volume_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_.-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Whether `name` satisfies the runtime's volume-name grammar
pub fn is_valid_volume_name(name: &str) -> bool {
    if name.len() > MAX_VOLUME_NAME_LEN {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    let rest: Vec<char> = chars.collect();
    !rest.is_empty()
        && rest
            .iter()
            .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(*c))
}
