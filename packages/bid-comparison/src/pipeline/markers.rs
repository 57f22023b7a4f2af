//! Wording that marks a line item as excluded scope.

use crate::pipeline::decode::parse_amount;

/// Single-word markers (after dots are dropped, so "N.I.C." reads "nic").
const WORD_MARKERS: &[&str] = &["tbd", "nic", "excluded"];

/// Multi-word markers, matched on whole words.
const PHRASE_MARKERS: &[&str] = &["by others", "not included", "not in contract"];

/// Whether the text carries an exclusion marker: `$0`, "TBD", "NIC",
/// "By Others", "not included" or "excluded".
pub fn is_exclusion_marker(text: &str) -> bool {
    let lowered = text.to_lowercase().replace('.', "");
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| WORD_MARKERS.contains(w)) {
        return true;
    }

    let joined = format!(" {} ", words.join(" "));
    if PHRASE_MARKERS
        .iter()
        .any(|p| joined.contains(&format!(" {} ", p)))
    {
        return true;
    }

    has_zero_dollar_amount(text)
}

fn has_zero_dollar_amount(text: &str) -> bool {
    text.match_indices('$').any(|(i, _)| {
        let amount: String = text[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || matches!(c, ',' | '.'))
            .collect();
        let amount = amount.trim_end_matches(['.', ',']);
        !amount.is_empty() && parse_amount(amount) == Some(0.0)
    })
}
