//! Composed descriptions and the number tokens embedded in them.
//!
//! Descriptions are written once, at creation. Renumbering only touches
//! number fields, so tokens inside a description keep the value they had
//! when it was composed.

use crate::numbering::SequenceKind;

/// Composes a non-conformity description.
///
/// `A Constatação C{n} não cumpre o disposto no {article}. {text}`
pub fn compose_nc_description(constatacao: u32, article: &str, text: &str) -> String {
    format!(
        "A Constatação {} não cumpre o disposto no {}. {}",
        SequenceKind::Constatacao.format(constatacao),
        article,
        text
    )
}

/// Composes a determination description.
///
/// `Para sanar NC{n}, {text}`
pub fn compose_determination_description(non_conformity: u32, text: &str) -> String {
    format!(
        "Para sanar {}, {}",
        SequenceKind::NaoConformidade.format(non_conformity),
        text
    )
}

/// Returns the back-reference prefix `repair` puts in front of a
/// non-conformity description lacking one.
pub fn constatacao_prefix(constatacao: u32) -> String {
    format!("Constatação {}: ", SequenceKind::Constatacao.format(constatacao))
}

/// Returns true if `text` contains the token for `number` of `kind`.
///
/// Tokens are matched whole: `C1` does not match inside `C12` or `NC1`.
pub fn contains_token(text: &str, kind: SequenceKind, number: u32) -> bool {
    token_positions(text, kind).any(|n| n == Some(number))
}

/// Returns true if `text` contains any constatação token.
pub fn has_constatacao_reference(text: &str) -> bool {
    token_positions(text, SequenceKind::Constatacao).any(|n| n.is_some())
}

/// Returns the first `len` characters of `text`, trimmed.
pub fn legacy_prefix(text: &str, len: usize) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(len) {
        Some((end, _)) => trimmed[..end].trim_end(),
        None => trimmed,
    }
}

/// Yields the number of every whole token of `kind` in `text`.
fn token_positions(text: &str, kind: SequenceKind) -> impl Iterator<Item = Option<u32>> + '_ {
    let prefix = kind.prefix();
    text.match_indices(prefix).map(move |(start, _)| {
        let preceded = text[..start]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric);
        if preceded {
            return None;
        }
        let rest = &text[start + prefix.len()..];
        let digits: &str = &rest[..rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len())];
        if digits.is_empty() {
            return None;
        }
        let followed = rest[digits.len()..]
            .chars()
            .next()
            .is_some_and(char::is_alphanumeric);
        if followed {
            return None;
        }
        digits.parse().ok()
    })
}
