//! Human-readable slugs for locally created records

const MAX_SLUG_LEN: usize = 80;

/// Lowercase ASCII slug: alphanumerics kept, everything else collapsed to `-`
///
/// Common Latin accents are folded (`é` → `e`, `œ` → `oe`) so French titles
/// stay readable.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars().flat_map(char::to_lowercase) {
        let piece = if c.is_ascii_alphanumeric() {
            None
        } else {
            match fold_accent(c) {
                Some(folded) => Some(folded),
                None => {
                    pending_dash = true;
                    continue;
                }
            }
        };

        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        match piece {
            Some(folded) => slug.push_str(folded),
            None => slug.push(c),
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    slug
}

/// Slug of a ballot: `{session}-{external id}-{title}`
pub fn ballot_slug(session: u32, external_id: &str, title: &str) -> String {
    let title = slugify(title);
    let id = slugify(external_id);
    if title.is_empty() {
        format!("{}-{}", session, id)
    } else {
        format!("{}-{}-{}", session, id, title)
    }
}

fn fold_accent(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => "a",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'œ' => "oe",
        'æ' => "ae",
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_french_title() {
        assert_eq!(
            slugify("Motion de censure déposée en application de l'article 49"),
            "motion-de-censure-deposee-en-application-de-l-article-49"
        );
        assert_eq!(slugify("  Œuvre -- à  venir!  "), "oeuvre-a-venir");
    }

    #[test]
    fn test_slugify_truncates_without_trailing_dash() {
        let long = "mot ".repeat(40);
        let slug = slugify(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_ballot_slug() {
        assert_eq!(ballot_slug(16, "1234", "Projet de loi"), "16-1234-projet-de-loi");
        assert_eq!(ballot_slug(16, "1234", "!!!"), "16-1234");
    }
}
