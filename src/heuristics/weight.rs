use crate::ocr::{Rect, Token};

const ANCHOR: &str = "quantity";

/// Marker of the unit row printed under the quantity table ("1234.0000 KGS").
const UNIT_MARKER: &str = ".0000";

/// True when `a` shares horizontal extent with `b` (one of `b`'s x edges
/// falls inside `a`) while the two are vertically disjoint, i.e. one sits
/// directly above the other. This is a row-adjacency test, not intersection.
pub fn is_row_adjacent(a: Rect, b: Rect) -> bool {
    let x_shared = (a.x1 <= b.x1 && b.x1 <= a.x2) || (a.x1 <= b.x2 && b.x2 <= a.x2);
    let y_disjoint = a.y2 < b.y1 || b.y2 < a.y1;
    x_shared && y_disjoint
}

/// Total weight as `"<digits>,<unit row text>"`.
///
/// Anchors on the first token reading "quantity", then takes the first
/// token after it that is stacked above or below the anchor and is neither
/// a repeat of the anchor label nor the unit row itself.
pub fn extract_total_weight(tokens: &[Token]) -> Option<String> {
    let anchor_idx = tokens
        .iter()
        .position(|t| t.text.to_lowercase() == ANCHOR)?;
    let anchor_text = &tokens[anchor_idx].text;
    let anchor = tokens[anchor_idx].rect();

    let unit = tokens
        .iter()
        .rev()
        .find(|t| t.text.contains(UNIT_MARKER))
        .map(|t| t.text.as_str())
        .unwrap_or("");

    let value = tokens[anchor_idx + 1..]
        .iter()
        .find(|t| {
            is_row_adjacent(t.rect(), anchor) && t.text != *anchor_text && !t.text.contains(UNIT_MARKER)
        })?;

    let digits: String = value.text.chars().filter(|c| c.is_ascii_digit()).collect();
    Some(format!("{digits},{unit}"))
}
