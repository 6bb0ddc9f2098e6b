//! Parameter name normalisation

/// Convert a CamelCase or camelCase name to snake_case.
///
/// Every run of uppercase letters is prefixed with an underscore, then the
/// whole name is lower-cased, so `createdAt` becomes `created_at` and
/// `userID` becomes `user_id`. A run may not begin at the first character;
/// a leading run is split after its first letter. Names that are already
/// snake_case pass through unchanged.
pub fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous_upper = false;

    for (i, ch) in name.chars().enumerate() {
        let upper = ch.is_ascii_uppercase();
        if upper && i > 0 && (!previous_upper || i == 1) {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
        previous_upper = upper;
    }

    out
}
