//! Verbose model text → structured JSON (spec §4.10).
//!
//! Grounded on the teacher's deterministic-transform style in
//! `scrapers/rate_limiter/mod.rs` (parse-then-default, never throw), applied
//! here to a hand-rolled line parser rather than a library: the input format
//! (`--- Page N ---`, `Ligne K:`, `Option N: ... (confidence)`) is bespoke to
//! this pipeline and has no existing crate for it.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Party {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Inscription {
    pub date: Option<String>,
    pub publication_number: Option<String>,
    pub nature: Option<String>,
    pub parties: Vec<Party>,
    pub remarks: Option<String>,
    pub radiation_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PageMetadata {
    pub district: Option<String>,
    pub cadastre: Option<String>,
    pub lot_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SanitizedPage {
    pub page_number: u32,
    pub metadata: PageMetadata,
    pub inscriptions: Vec<Inscription>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SanitizedDocument {
    pub pages: Vec<SanitizedPage>,
}

/// Picks the highest-confidence option among `Option N: value (confidence)`
/// choices; first wins on a tie (spec §4.10).
fn select_best_option(field_blob: &str) -> Option<String> {
    let option_re = Regex::new(r"Option\s+\d+:\s*(.*?)\s*\(([0-9.]+)\)").unwrap();
    let mut best: Option<(f64, String)> = None;

    for caps in option_re.captures_iter(field_blob) {
        let value = caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        let confidence: f64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);

        match &best {
            Some((best_conf, _)) if confidence <= *best_conf => {}
            _ => best = Some((confidence, value)),
        }
    }

    best.map(|(_, v)| v)
}

/// Normalizes one raw field value: resolves multi-option choices, then maps
/// the literal `[Vide]` sentinel to `None` (spec §4.10).
fn normalize_field(raw: &str) -> Option<String> {
    let resolved = if raw.contains("Option ") {
        select_best_option(raw).unwrap_or_else(|| raw.trim().to_string())
    } else {
        raw.trim().to_string()
    };

    if resolved.is_empty() || resolved == "[Vide]" {
        None
    } else {
        Some(resolved)
    }
}

/// Party-splitting heuristic (spec §4.10, §9 open question): when the role
/// blob names exactly as many role tokens as the name blob has names, pair
/// them positionally; otherwise every name shares the single role blob.
fn split_parties(name_blob: &str, role_blob: &str) -> Vec<Party> {
    let names: Vec<&str> = name_blob.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if names.is_empty() {
        return Vec::new();
    }

    let roles: Vec<&str> = role_blob.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();

    if roles.len() == names.len() && roles.len() > 1 {
        names
            .into_iter()
            .zip(roles)
            .map(|(name, role)| Party {
                name: name.to_string(),
                role: role.to_string(),
            })
            .collect()
    } else {
        let shared_role = role_blob.trim().to_string();
        names
            .into_iter()
            .map(|name| Party {
                name: name.to_string(),
                role: shared_role.clone(),
            })
            .collect()
    }
}

fn parse_header_field<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    body.lines()
        .find_map(|line| line.strip_prefix(&format!("{key}:")))
        .map(str::trim)
}

fn parse_line_field<'a>(block: &'a str, label: &str) -> Option<&'a str> {
    block
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(&format!("{label}:")))
        .map(str::trim)
}

fn parse_page(page_number: u32, body: &str) -> SanitizedPage {
    let metadata = PageMetadata {
        district: parse_header_field(body, "District").map(String::from),
        cadastre: parse_header_field(body, "Cadastre").map(String::from),
        lot_number: parse_header_field(body, "Lot").map(String::from),
    };

    let ligne_re = Regex::new(r"(?m)^Ligne\s+\d+:").unwrap();
    let mut bounds: Vec<usize> = ligne_re.find_iter(body).map(|m| m.start()).collect();
    bounds.push(body.len());

    let mut inscriptions = Vec::new();
    for window in bounds.windows(2) {
        let block = &body[window[0]..window[1]];

        let name_blob = parse_line_field(block, "Parties").unwrap_or_default();
        let role_blob = parse_line_field(block, "Roles").unwrap_or_default();

        inscriptions.push(Inscription {
            date: parse_line_field(block, "Date").and_then(normalize_field),
            publication_number: parse_line_field(block, "Numero de publication").and_then(normalize_field),
            nature: parse_line_field(block, "Nature").and_then(normalize_field),
            parties: split_parties(name_blob, role_blob),
            remarks: parse_line_field(block, "Remarques").and_then(normalize_field),
            radiation_number: parse_line_field(block, "Numero de radiation").and_then(normalize_field),
        });
    }

    SanitizedPage {
        page_number,
        metadata,
        inscriptions,
    }
}

/// Transforms verbose model text into [`SanitizedDocument`] (spec §4.10).
/// Never panics on malformed input: an input with no recognizable
/// `--- Page N ---` marker degrades to `{pages: []}`.
pub fn sanitize(verbose: &str) -> SanitizedDocument {
    let page_marker = Regex::new(r"(?m)^---\s*Page\s+(\d+)\s*---").unwrap();

    // (page number, body-start offset, next-marker-start offset) so each
    // page's body runs up to the next marker's own line, not into it.
    let markers: Vec<(u32, usize, usize)> = page_marker
        .captures_iter(verbose)
        .filter_map(|caps| {
            let number: u32 = caps.get(1)?.as_str().parse().ok()?;
            let whole = caps.get(0)?;
            Some((number, whole.end(), whole.start()))
        })
        .collect();

    if markers.is_empty() {
        return SanitizedDocument::default();
    }

    let mut pages = Vec::with_capacity(markers.len());
    for (i, (page_number, body_start, _)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map(|(_, _, next_marker_start)| *next_marker_start).unwrap_or(verbose.len());
        let body = verbose.get(*body_start..body_end).unwrap_or("");
        pages.push(parse_page(*page_number, body));
    }

    SanitizedDocument { pages }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_to_empty_pages_on_no_marker() {
        let result = sanitize("just some unrelated text");
        assert_eq!(result, SanitizedDocument::default());
    }

    #[test]
    fn vide_maps_to_none() {
        let input = "--- Page 1 ---\nLigne 1:\n  Date: [Vide]\n  Parties: Jean Tremblay\n  Roles: vendeur\n";
        let doc = sanitize(input);
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].inscriptions[0].date, None);
    }

    #[test]
    fn selects_highest_confidence_option() {
        let field = "Option 1: Jean Tremblay (0.62) Option 2: Jean Tremblay-Roy (0.91)";
        assert_eq!(select_best_option(field), Some("Jean Tremblay-Roy".to_string()));
    }

    #[test]
    fn splits_parties_positionally_when_counts_match() {
        let parties = split_parties("Jean Tremblay; Marie Roy", "vendeur; acheteur");
        assert_eq!(
            parties,
            vec![
                Party { name: "Jean Tremblay".into(), role: "vendeur".into() },
                Party { name: "Marie Roy".into(), role: "acheteur".into() },
            ]
        );
    }

    #[test]
    fn shares_single_role_when_counts_mismatch() {
        let parties = split_parties("Jean Tremblay; Marie Roy", "vendeur");
        assert_eq!(parties.len(), 2);
        assert!(parties.iter().all(|p| p.role == "vendeur"));
    }
}
