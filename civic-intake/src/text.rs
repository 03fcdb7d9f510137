//! Name normalisation shared by candidate keys and municipality matching

/// Fold common Latin diacritics to their ASCII base letter
pub fn fold_diacritics(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => out.push('a'),
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => out.push('A'),
            'ç' => out.push('c'),
            'Ç' => out.push('C'),
            'è' | 'é' | 'ê' | 'ë' => out.push('e'),
            'È' | 'É' | 'Ê' | 'Ë' => out.push('E'),
            'ì' | 'í' | 'î' | 'ï' => out.push('i'),
            'Ì' | 'Í' | 'Î' | 'Ï' => out.push('I'),
            'ñ' => out.push('n'),
            'Ñ' => out.push('N'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => out.push('o'),
            'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => out.push('O'),
            'ù' | 'ú' | 'û' | 'ü' => out.push('u'),
            'Ù' | 'Ú' | 'Û' | 'Ü' => out.push('U'),
            'ý' | 'ÿ' => out.push('y'),
            'Ý' | 'Ÿ' => out.push('Y'),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            _ => out.push(c),
        }
    }
    out
}

/// Lower-case, fold diacritics, turn punctuation into spaces, collapse runs
pub fn simplify(input: &str) -> String {
    let folded = fold_diacritics(input).to_lowercase();
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key used for candidate upserts: "first last" simplified
///
/// "Jean-Pierre DUPONT" and "jean pierre Dupont" share one key.
pub fn normalize_person_name(first_name: Option<&str>, last_name: &str) -> String {
    let full = match first_name {
        Some(first) if !first.trim().is_empty() => format!("{} {}", first, last_name),
        _ => last_name.to_string(),
    };
    simplify(&full)
}

const PLACE_PREFIXES: &[&str] = &[
    "commune de ",
    "commune d ",
    "ville de ",
    "ville d ",
    "mairie de ",
    "mairie d ",
    "municipalite de ",
];

/// Canonical municipality name for comparison
pub fn normalize_place_name(input: &str) -> String {
    let mut simplified = simplify(input);

    for prefix in PLACE_PREFIXES {
        if let Some(rest) = simplified.strip_prefix(prefix) {
            simplified = rest.to_string();
            break;
        }
    }

    simplified
        .split(' ')
        .map(|word| match word {
            "st" => "saint",
            "ste" => "sainte",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}
