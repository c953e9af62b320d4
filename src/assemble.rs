// src/assemble.rs

use crate::ocr::{Quad, RegionTextMap, Token};
use serde::Serialize;

pub const HEADER: &str = "# EXTRACTED FIELDS";

#[derive(Serialize)]
struct TokenView<'a> {
    text: &'a str,
    bbox: &'a Quad,
}

fn render_tokens(tokens: &[Token]) -> String {
    let view: Vec<TokenView<'_>> = tokens
        .iter()
        .map(|t| TokenView {
            text: &t.text,
            bbox: &t.bbox,
        })
        .collect();
    serde_json::to_string(&view).unwrap_or_else(|_| "[]".to_string())
}

/// Build the text block handed to the LLM: a header line, then one
/// `"<region>: <tokens>"` line per region in map order.
pub fn assemble(regions: &RegionTextMap) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (name, tokens) in regions.iter() {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(&render_tokens(tokens));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionName;

    #[test]
    fn one_line_per_region_in_order() {
        let map = RegionTextMap::new(vec![
            (
                RegionName::UpperRight,
                vec![Token::new("NP0012345", 0.97, [[1.0, 2.0]; 4])],
            ),
            (RegionName::Middle, vec![]),
            (RegionName::Bottom, vec![]),
        ]);
        let text = assemble(&map);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            r#"upper_right: [{"text":"NP0012345","bbox":[[1.0,2.0],[1.0,2.0],[1.0,2.0],[1.0,2.0]]}]"#
        );
        assert_eq!(lines[2], "middle: []");
        assert_eq!(lines[3], "bottom: []");
    }

    #[test]
    fn deterministic() {
        let map = RegionTextMap::new(vec![(
            RegionName::Middle,
            vec![
                Token::new("By Truck", 0.8, [[0.0, 0.0]; 4]),
                Token::new("Hanoi VIETNAM", 0.9, [[5.0, 5.0]; 4]),
            ],
        )]);
        assert_eq!(assemble(&map), assemble(&map.clone()));
    }
}
