//! In-memory fixture PDFs for unit tests

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// How a fixture page stores its `/Contents`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentsLayout {
    /// A single stream reference
    #[default]
    Stream,
    /// A direct array of two streams that only make sense concatenated
    Array,
    /// A reference to an array object holding the two streams
    IndirectArray,
}

/// Description of one fixture page
#[derive(Debug, Clone)]
pub struct PageSpec {
    pub text: Option<String>,
    pub width: f32,
    pub height: f32,
    pub rotate: i64,
    pub layout: ContentsLayout,
}

impl PageSpec {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            width: 612.0,
            height: 792.0,
            rotate: 0,
            layout: ContentsLayout::Stream,
        }
    }

    pub fn blank() -> Self {
        Self {
            text: None,
            ..Self::text("")
        }
    }

    pub fn size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn rotate(mut self, degrees: i64) -> Self {
        self.rotate = degrees;
        self
    }

    pub fn contents(mut self, layout: ContentsLayout) -> Self {
        self.layout = layout;
        self
    }

    fn media_box(&self) -> Vec<Object> {
        vec![
            0.into(),
            0.into(),
            Object::Real(self.width),
            Object::Real(self.height),
        ]
    }
}

/// Build a PDF whose pages each show their text in Helvetica
pub fn build_pdf(pages: &[PageSpec]) -> Vec<u8> {
    build_pdf_with_info(pages, &[])
}

/// Build a fixture PDF and attach an `/Info` dictionary
pub fn build_pdf_with_info(pages: &[PageSpec], info: &[(&str, &str)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let resources_id = add_resources(&mut doc);

    let mut kids = Vec::new();
    for spec in pages {
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => spec.media_box(),
            "Contents" => add_contents(&mut doc, spec),
            "Resources" => Object::Reference(resources_id),
        };
        if spec.rotate != 0 {
            page.set("Rotate", spec.rotate);
        }
        kids.push(Object::Reference(doc.add_object(page)));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => pages.len() as i64,
            "Kids" => kids,
        }),
    );
    finish(doc, pages_id, info)
}

/// Build a two-level page tree. Each group becomes an intermediate
/// `/Pages` node carrying the spec's MediaBox, Rotate and Resources;
/// its `count` pages inherit them and are labelled `<text>-<n>`.
pub fn build_nested_pdf(groups: &[(PageSpec, usize)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let root_id = doc.new_object_id();
    let resources_id = add_resources(&mut doc);

    let mut groups_kids = Vec::new();
    let mut total = 0;
    for (spec, count) in groups {
        let node_id = doc.new_object_id();
        let label = spec.text.clone().unwrap_or_default();

        let mut kids = Vec::new();
        for n in 1..=*count {
            let page_spec = PageSpec {
                text: Some(format!("{}-{}", label, n)),
                ..spec.clone()
            };
            let page = dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(node_id),
                "Contents" => add_contents(&mut doc, &page_spec),
            };
            kids.push(Object::Reference(doc.add_object(page)));
        }

        doc.objects.insert(
            node_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => Object::Reference(root_id),
                "Count" => *count as i64,
                "Kids" => kids,
                "MediaBox" => spec.media_box(),
                "Rotate" => spec.rotate,
                "Resources" => Object::Reference(resources_id),
            }),
        );
        groups_kids.push(Object::Reference(node_id));
        total += count;
    }

    doc.objects.insert(
        root_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => total as i64,
            "Kids" => groups_kids,
        }),
    );
    finish(doc, root_id, &[])
}

/// A fixture whose trailer references a standard security handler
pub fn encrypted_pdf(pages: &[PageSpec]) -> Vec<u8> {
    let mut doc = Document::load_mem(&build_pdf(pages)).expect("fixture parses");
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
        "U" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
        "P" => -4,
    });
    doc.trailer.set("Encrypt", Object::Reference(encrypt_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("fixture saves");
    buffer
}

/// Build a PDF of `count` text pages labelled `<prefix>-Page-<n>`
pub fn numbered_pdf(count: u32, prefix: &str) -> Vec<u8> {
    let specs: Vec<PageSpec> = (1..=count)
        .map(|n| PageSpec::text(&format!("{}-Page-{}", prefix, n)))
        .collect();
    build_pdf(&specs)
}

fn add_resources(doc: &mut Document) -> ObjectId {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => Object::Reference(font_id) },
    })
}

/// Add the page's content stream(s) and return the `/Contents` value
fn add_contents(doc: &mut Document, spec: &PageSpec) -> Object {
    let (head, tail) = match &spec.text {
        Some(text) => (
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
            ],
            vec![
                Operation::new(
                    "Tj",
                    vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ],
        ),
        None => (vec![], vec![]),
    };

    let mut add_stream = |operations: Vec<Operation>| {
        let content = Content { operations };
        let data = content.encode().expect("fixture content encodes");
        Object::Reference(doc.add_object(Stream::new(Dictionary::new(), data)))
    };

    match spec.layout {
        ContentsLayout::Stream => add_stream(head.into_iter().chain(tail).collect()),
        ContentsLayout::Array => Object::Array(vec![add_stream(head), add_stream(tail)]),
        ContentsLayout::IndirectArray => {
            let streams = vec![add_stream(head), add_stream(tail)];
            Object::Reference(doc.add_object(Object::Array(streams)))
        }
    }
}

fn finish(mut doc: Document, pages_id: ObjectId, info: &[(&str, &str)]) -> Vec<u8> {
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    if !info.is_empty() {
        let mut dict = Dictionary::new();
        for (key, value) in info {
            dict.set(key.as_bytes().to_vec(), Object::string_literal(*value));
        }
        let info_id = doc.add_object(dict);
        doc.trailer.set("Info", Object::Reference(info_id));
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("fixture saves");
    buffer
}
