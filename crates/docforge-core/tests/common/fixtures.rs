//! Fixture PDFs built with lopdf

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

/// A Letter-sized PDF with one Helvetica line of text per page
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for line in lines {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(line.as_bytes().to_vec(), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    // MediaBox lives on the tree root and is inherited by every page
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => lines.len() as i64,
            "Kids" => kids,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// `count` pages labelled `<prefix> page <n>`
pub fn labelled_pdf(count: usize, prefix: &str) -> Vec<u8> {
    let lines: Vec<String> = (1..=count).map(|n| format!("{} page {}", prefix, n)).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    text_pdf(&refs)
}

/// A two-level page tree. Each section is an intermediate `/Pages` node
/// holding MediaBox, Rotate and Resources for its pages. Every page keeps
/// its drawing in an indirect array of two content streams.
pub fn sectioned_pdf(sections: &[(&str, usize, [i64; 2], i64)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.6");
    let root_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut sections_kids = Vec::new();
    let mut total = 0;
    for (label, count, [width, height], rotate) in sections {
        let node_id = doc.new_object_id();
        let mut kids = Vec::new();
        for n in 1..=*count {
            let head = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 14.into()]),
                    Operation::new("Td", vec![72.into(), 500.into()]),
                ],
            };
            let line = format!("{} page {}", label, n);
            let tail = Content {
                operations: vec![
                    Operation::new(
                        "Tj",
                        vec![Object::String(line.into_bytes(), StringFormat::Literal)],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let head_id = doc.add_object(Stream::new(Dictionary::new(), head.encode().unwrap()));
            let tail_id = doc.add_object(Stream::new(Dictionary::new(), tail.encode().unwrap()));
            let contents_id = doc.add_object(vec![
                Object::Reference(head_id),
                Object::Reference(tail_id),
            ]);

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(node_id),
                "Contents" => Object::Reference(contents_id),
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            node_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => Object::Reference(root_id),
                "Count" => *count as i64,
                "Kids" => kids,
                "MediaBox" => vec![0.into(), 0.into(), (*width).into(), (*height).into()],
                "Rotate" => *rotate,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => Object::Reference(font_id) },
                },
            }),
        );
        sections_kids.push(Object::Reference(node_id));
        total += *count;
    }

    doc.objects.insert(
        root_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => total as i64,
            "Kids" => sections_kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(root_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Decoded content streams of one page, concatenated
pub fn page_content(pdf: &[u8], page: u32) -> String {
    let doc = Document::load_mem(pdf).unwrap();
    let page_id = doc.get_pages()[&page];
    String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
}
