use roxmltree::{Document, Node};

use crate::error::{Error, Result};
use crate::event::Polarization;
use crate::geom::{check_index, collect_complete, AntennaPosition, AntennaPositions};

fn is_tag(node: Node<'_, '_>, tag: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(tag)
}

fn child_text<'a>(node: Node<'a, 'a>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|n| is_tag(*n, tag))
        .and_then(|n| n.text())
        .map(str::trim)
}

fn line_of(doc: &Document<'_>, node: Node<'_, '_>) -> usize {
    doc.text_pos_at(node.range().start).row as usize
}

fn parse_opt_f64(doc: &Document<'_>, node: Node<'_, '_>, tag: &str) -> Result<Option<f64>> {
    match child_text(node, tag) {
        Some(v) if !v.is_empty() => v.parse::<f64>().map(Some).map_err(|e| Error::Parse {
            line: line_of(doc, node),
            message: format!("<{tag}> '{v}': {e}"),
        }),
        _ => Ok(None),
    }
}

fn parse_f64(doc: &Document<'_>, node: Node<'_, '_>, tag: &str) -> Result<f64> {
    parse_opt_f64(doc, node, tag)?.ok_or_else(|| Error::Parse {
        line: line_of(doc, node),
        message: format!("<antenna> is missing <{tag}>"),
    })
}

/// Parse an `<array>` of `<antenna index=".." [pol="H|V"]>` entries, each
/// with `<phi>`, `<r>`, `<z>` and optional `<group-delay>`. Entries without a
/// `pol` attribute set both polarizations; entries with one override it.
pub fn parse_antenna_xml(xml: &str) -> Result<AntennaPositions> {
    let doc = Document::parse(xml)?;
    let array = doc
        .descendants()
        .find(|n| is_tag(*n, "array"))
        .ok_or_else(|| Error::InvalidConfig("<array> element not found".into()))?;

    let mut slots: [Vec<Option<AntennaPosition>>; 2] = [Vec::new(), Vec::new()];
    let mut entries: Vec<_> = array.children().filter(|n| is_tag(*n, "antenna")).collect();
    // Polarization-specific entries are applied after the shared ones.
    entries.sort_by_key(|n| n.attribute("pol").is_some());

    for node in entries {
        let line = line_of(&doc, node);
        let index = node
            .attribute("index")
            .ok_or_else(|| Error::Parse {
                line,
                message: "<antenna> has no index attribute".into(),
            })?
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::Parse {
                line,
                message: format!("antenna index: {e}"),
            })?;
        let index = check_index(index, line)?;
        let pols: &[Polarization] = match node.attribute("pol") {
            None => &Polarization::ALL,
            Some(p) => match Polarization::from_letter(p) {
                Some(Polarization::Horizontal) => &[Polarization::Horizontal],
                Some(Polarization::Vertical) => &[Polarization::Vertical],
                None => {
                    return Err(Error::Parse {
                        line,
                        message: format!("unknown polarization '{p}'"),
                    })
                }
            },
        };

        let position = AntennaPosition::new(
            parse_f64(&doc, node, "phi")?,
            parse_f64(&doc, node, "r")?,
            parse_f64(&doc, node, "z")?,
        )
        .with_group_delay(parse_opt_f64(&doc, node, "group-delay")?.unwrap_or(0.0));

        for pol in pols {
            let slot = &mut slots[pol.index()];
            if index >= slot.len() {
                slot.resize(index + 1, None);
            }
            slot[index] = Some(position);
        }
    }

    let [hpol, vpol] = slots;
    AntennaPositions::new(collect_complete(hpol)?, collect_complete(vpol)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARRAY: &str = r#"<?xml version="1.0"?>
<array name="test">
  <antenna index="1">
    <phi>90</phi><r>1.5</r><z>-0.5</z><group-delay>0.2</group-delay>
  </antenna>
  <antenna index="0" pol="V">
    <phi>1</phi><r>1.0</r><z>0.25</z>
  </antenna>
  <antenna index="0">
    <phi>0</phi><r>1.0</r><z>0.0</z>
  </antenna>
</array>
"#;

    #[test]
    fn shared_entries_then_polarization_overrides() {
        let geom = parse_antenna_xml(ARRAY).unwrap();
        assert_eq!(geom.len(), 2);
        let h0 = geom.position(0, Polarization::Horizontal);
        let v0 = geom.position(0, Polarization::Vertical);
        assert_eq!((h0.phi, h0.z), (0.0, 0.0));
        assert_eq!((v0.phi, v0.z), (1.0, 0.25));
        let v1 = geom.position(1, Polarization::Vertical);
        assert_eq!((v1.r, v1.group_delay), (1.5, 0.2));
    }

    #[test]
    fn missing_coordinate_reports_line() {
        let xml = "<array>\n<antenna index=\"0\"><phi>0</phi><r>1</r></antenna>\n</array>";
        match parse_antenna_xml(xml) {
            Err(Error::Parse { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("<z>"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn oversized_index_is_rejected() {
        let xml = "<array>\n<antenna index=\"99999999999\"><phi>0</phi><r>1</r><z>0</z></antenna>\n</array>";
        assert!(matches!(
            parse_antenna_xml(xml),
            Err(Error::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn malformed_document_is_an_xml_error() {
        assert!(matches!(parse_antenna_xml("<array>"), Err(Error::Xml(_))));
    }
}
