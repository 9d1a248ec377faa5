//! Factur-X / ZUGFeRD invoice embedding
//!
//! Attaches a structured-invoice XML file to a PDF as `factur-x.xml` and
//! stamps the four identification keys of the Info dictionary. Pages are
//! never touched: only the catalog, the name tree and Info change.
//!
//! Two flavors are available:
//!
//! | Flavor | Adds |
//! |--------|------|
//! | `Manual` | EmbeddedFiles entry + Info keys |
//! | `FacturX` | the above, plus `/AF`, MD5-checked file parameters, PDF/A-3 XMP |

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use lopdf::{dictionary, Object, ObjectId, Stream, StringFormat};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attachment::{self, Attachment, FileSpecExtras};
use crate::document::{resolve, PdfDocument};
use crate::error::{DocforgeError, Result};
use crate::metadata::{self, pdf_date};

/// The embedded XML filename per Factur-X 1.0+
pub const FACTURX_FILENAME: &str = "factur-x.xml";

const FACTURX_NAMESPACE: &str = "urn:factur-x:pdfa:CrossIndustryDocument:invoice:1p0#";
const MIN_VERSION: &str = "1.7";

/// Factur-X conformance level, written to `fx:ConformanceLevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacturXLevel {
    Minimum,
    #[serde(rename = "basicwl")]
    BasicWl,
    Basic,
    En16931,
    #[default]
    Extended,
}

impl FacturXLevel {
    pub fn xmp_name(self) -> &'static str {
        match self {
            FacturXLevel::Minimum => "MINIMUM",
            FacturXLevel::BasicWl => "BASIC WL",
            FacturXLevel::Basic => "BASIC",
            FacturXLevel::En16931 => "EN 16931",
            FacturXLevel::Extended => "EXTENDED",
        }
    }
}

impl FromStr for FacturXLevel {
    type Err = DocforgeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "minimum" => Ok(FacturXLevel::Minimum),
            "basicwl" => Ok(FacturXLevel::BasicWl),
            "basic" => Ok(FacturXLevel::Basic),
            "en16931" | "comfort" => Ok(FacturXLevel::En16931),
            "extended" => Ok(FacturXLevel::Extended),
            _ => Err(DocforgeError::InvalidParameter(format!(
                "Unknown Factur-X level '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum ComplianceFlavor {
    /// Attachment and Info keys only
    Manual,
    /// Full PDF/A-3 profile
    FacturX {
        #[serde(default)]
        level: FacturXLevel,
    },
}

impl Default for ComplianceFlavor {
    fn default() -> Self {
        ComplianceFlavor::FacturX {
            level: FacturXLevel::default(),
        }
    }
}

impl FromStr for ComplianceFlavor {
    type Err = DocforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ComplianceFlavor::Manual),
            "factur-x" | "facturx" | "zugferd" => Ok(ComplianceFlavor::default()),
            other => Err(DocforgeError::InvalidParameter(format!(
                "Unknown compliance flavor '{}'",
                other
            ))),
        }
    }
}

/// Values written to the Info dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceMetadata {
    pub title: String,
    pub author: String,
    /// Derived from the flavor when unset
    pub subject: Option<String>,
    pub producer: String,
}

impl Default for ComplianceMetadata {
    fn default() -> Self {
        Self {
            title: "ZUGFeRD Rechnung".to_string(),
            author: "futalis GmbH".to_string(),
            subject: None,
            producer: "docforge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedOptions {
    pub flavor: ComplianceFlavor,
    pub metadata: ComplianceMetadata,
}

impl EmbedOptions {
    /// The explicit subject, or one naming the flavor and level
    pub fn subject(&self) -> String {
        if let Some(subject) = &self.metadata.subject {
            return subject.clone();
        }
        match self.flavor {
            ComplianceFlavor::Manual => "ZUGFeRD invoice".to_string(),
            ComplianceFlavor::FacturX { level } => {
                format!("Factur-X {} invoice", level.xmp_name())
            }
        }
    }
}

/// Produces a paginated PDF from styled markup
pub trait MarkupRenderer {
    fn render(&self, markup: &str, stylesheet: Option<&str>) -> Result<Vec<u8>>;
}

/// Embed `xml` into a serialized PDF
pub fn embed_invoice_xml(pdf: &[u8], xml: &[u8], options: &EmbedOptions) -> Result<Vec<u8>> {
    if pdf.is_empty() {
        return Err(DocforgeError::InvalidInput("PDF payload is empty".into()));
    }
    if xml.is_empty() {
        return Err(DocforgeError::InvalidInput("XML payload is empty".into()));
    }

    let mut doc = PdfDocument::parse(pdf)?;
    embed_into(&mut doc, xml, options)?;
    let output = doc.serialize()?;

    info!(
        "Embedded {} ({} bytes, {:?}) into {}-page PDF",
        FACTURX_FILENAME,
        xml.len(),
        options.flavor,
        doc.page_count()
    );
    Ok(output)
}

/// Render markup to PDF, then embed `xml`. Nothing is returned unless both succeed.
pub fn render_and_embed<R: MarkupRenderer + ?Sized>(
    renderer: &R,
    markup: &str,
    stylesheet: Option<&str>,
    xml: &[u8],
    options: &EmbedOptions,
) -> Result<Vec<u8>> {
    if xml.is_empty() {
        return Err(DocforgeError::InvalidInput("XML payload is empty".into()));
    }

    let pdf = renderer.render(markup, stylesheet).map_err(|e| match e {
        DocforgeError::Render(_) => e,
        other => DocforgeError::Render(other.to_string()),
    })?;
    debug!("Renderer produced {} bytes", pdf.len());

    embed_invoice_xml(&pdf, xml, options)
}

/// Embed into an already parsed document
pub fn embed_into(doc: &mut PdfDocument, xml: &[u8], options: &EmbedOptions) -> Result<()> {
    let subject = options.subject();
    let mut info = doc.metadata();
    info.set(metadata::TITLE, options.metadata.title.as_str());
    info.set(metadata::AUTHOR, options.metadata.author.as_str());
    info.set(metadata::SUBJECT, subject.as_str());
    info.set(metadata::PRODUCER, options.metadata.producer.as_str());
    doc.set_metadata(&info);

    let attachment = Attachment::new(FACTURX_FILENAME, xml);
    match options.flavor {
        ComplianceFlavor::Manual => {
            doc.set_attachment(&attachment)?;
        }
        ComplianceFlavor::FacturX { level } => {
            let now = Utc::now();
            let xmp = xmp_packet(level, &options.metadata, &subject, now);
            embed_facturx(doc, &attachment, xmp, now)?;
        }
    }
    Ok(())
}

fn embed_facturx(
    doc: &mut PdfDocument,
    attachment: &Attachment,
    xmp: String,
    now: DateTime<Utc>,
) -> Result<()> {
    let checksum = Md5::digest(&attachment.payload).to_vec();
    let extras = FileSpecExtras {
        stream: dictionary! {
            "Subtype" => Object::Name(b"text/xml".to_vec()),
            "Params" => dictionary! {
                "Size" => attachment.payload.len() as i64,
                "ModDate" => Object::string_literal(pdf_date(now)),
                "CheckSum" => Object::String(checksum, StringFormat::Hexadecimal),
            },
        },
        filespec: dictionary! {
            "Desc" => Object::string_literal("Factur-X invoice"),
            "AFRelationship" => "Data",
        },
    };

    let catalog_id = doc.catalog_id()?;
    let upserted = attachment::upsert_attachment(doc.inner_mut(), attachment, extras)?;
    set_associated_file(doc, catalog_id, upserted.filespec_id, &upserted.replaced)?;

    set_xmp_metadata(doc, catalog_id, xmp.into_bytes())?;

    if version_below(doc.version(), MIN_VERSION) {
        debug!("Raising PDF version {} -> {}", doc.version(), MIN_VERSION);
        doc.inner_mut().version = MIN_VERSION.to_string();
    }
    Ok(())
}

/// Point the catalog `/AF` array at `filespec_id`, dropping replaced specs
fn set_associated_file(
    doc: &mut PdfDocument,
    catalog_id: ObjectId,
    filespec_id: ObjectId,
    replaced: &[ObjectId],
) -> Result<()> {
    let existing: Vec<Object> = doc
        .inner()
        .get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"AF"))
        .map(|af| resolve(doc.inner(), af))
        .and_then(Object::as_array)
        .map(|items| items.to_vec())
        .unwrap_or_default();

    let mut af: Vec<Object> = existing
        .into_iter()
        .filter(|item| match item.as_reference() {
            Ok(id) => !replaced.contains(&id) && doc.inner().objects.contains_key(&id),
            Err(_) => true,
        })
        .collect();
    af.push(Object::Reference(filespec_id));

    doc.inner_mut()
        .get_dictionary_mut(catalog_id)
        .map_err(|e| DocforgeError::OperationError(format!("Invalid catalog: {}", e)))?
        .set("AF", Object::Array(af));
    Ok(())
}

/// Replace the catalog's XMP stream, reusing its object id when present
fn set_xmp_metadata(doc: &mut PdfDocument, catalog_id: ObjectId, packet: Vec<u8>) -> Result<()> {
    let stream = Stream::new(
        dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
        packet,
    )
    .with_compression(false);

    let existing = doc
        .inner()
        .get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"Metadata"))
        .and_then(Object::as_reference)
        .ok();

    let inner = doc.inner_mut();
    match existing {
        Some(id) if inner.objects.contains_key(&id) => {
            inner.objects.insert(id, Object::Stream(stream));
        }
        _ => {
            let id = inner.add_object(stream);
            inner
                .get_dictionary_mut(catalog_id)
                .map_err(|e| DocforgeError::OperationError(format!("Invalid catalog: {}", e)))?
                .set("Metadata", Object::Reference(id));
        }
    }
    Ok(())
}

fn version_below(version: &str, minimum: &str) -> bool {
    match (version.trim().parse::<f32>(), minimum.parse::<f32>()) {
        (Ok(current), Ok(min)) => current < min,
        _ => true,
    }
}

fn xmp_packet(
    level: FacturXLevel,
    meta: &ComplianceMetadata,
    subject: &str,
    now: DateTime<Utc>,
) -> String {
    let date = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about="" xmlns:pdfaid="http://www.aiim.org/pdfa/ns/id/">
      <pdfaid:part>3</pdfaid:part>
      <pdfaid:conformance>B</pdfaid:conformance>
    </rdf:Description>
    <rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/">
      <dc:format>application/pdf</dc:format>
      <dc:title><rdf:Alt><rdf:li xml:lang="x-default">{title}</rdf:li></rdf:Alt></dc:title>
      <dc:creator><rdf:Seq><rdf:li>{author}</rdf:li></rdf:Seq></dc:creator>
      <dc:description>
        <rdf:Alt><rdf:li xml:lang="x-default">{subject}</rdf:li></rdf:Alt>
      </dc:description>
    </rdf:Description>
    <rdf:Description rdf:about=""
        xmlns:pdf="http://ns.adobe.com/pdf/1.3/"
        xmlns:xmp="http://ns.adobe.com/xap/1.0/">
      <pdf:Producer>{producer}</pdf:Producer>
      <xmp:CreatorTool>{producer}</xmp:CreatorTool>
      <xmp:ModifyDate>{date}</xmp:ModifyDate>
      <xmp:MetadataDate>{date}</xmp:MetadataDate>
    </rdf:Description>
    <rdf:Description rdf:about="" xmlns:fx="{fx}">
      <fx:DocumentType>INVOICE</fx:DocumentType>
      <fx:DocumentFileName>{file}</fx:DocumentFileName>
      <fx:Version>1.0</fx:Version>
      <fx:ConformanceLevel>{level}</fx:ConformanceLevel>
    </rdf:Description>
    <rdf:Description rdf:about=""
        xmlns:pdfaExtension="http://www.aiim.org/pdfa/ns/extension/"
        xmlns:pdfaSchema="http://www.aiim.org/pdfa/ns/schema#"
        xmlns:pdfaProperty="http://www.aiim.org/pdfa/ns/property#">
      <pdfaExtension:schemas>
        <rdf:Bag>
          <rdf:li rdf:parseType="Resource">
            <pdfaSchema:schema>Factur-X PDFA Extension Schema</pdfaSchema:schema>
            <pdfaSchema:namespaceURI>{fx}</pdfaSchema:namespaceURI>
            <pdfaSchema:prefix>fx</pdfaSchema:prefix>
            <pdfaSchema:property>
              <rdf:Seq>
{properties}
              </rdf:Seq>
            </pdfaSchema:property>
          </rdf:li>
        </rdf:Bag>
      </pdfaExtension:schemas>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#,
        title = xml_escape(&meta.title),
        author = xml_escape(&meta.author),
        subject = xml_escape(subject),
        producer = xml_escape(&meta.producer),
        date = date,
        fx = FACTURX_NAMESPACE,
        file = FACTURX_FILENAME,
        level = level.xmp_name(),
        properties = extension_properties(),
    )
}

fn extension_properties() -> String {
    [
        ("DocumentFileName", "The name of the embedded XML document"),
        (
            "DocumentType",
            "The type of the hybrid document in capital letters, e.g. INVOICE or ORDER",
        ),
        (
            "Version",
            "The actual version of the standard applying to the embedded XML document",
        ),
        ("ConformanceLevel", "The conformance level of the embedded XML document"),
    ]
    .iter()
    .map(|(name, description)| {
        format!(
            r#"                <rdf:li rdf:parseType="Resource">
                  <pdfaProperty:name>{}</pdfaProperty:name>
                  <pdfaProperty:valueType>Text</pdfaProperty:valueType>
                  <pdfaProperty:category>external</pdfaProperty:category>
                  <pdfaProperty:description>{}</pdfaProperty:description>
                </rdf:li>"#,
            name, description
        )
    })
    .collect::<Vec<_>>()
    .join("\n")
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
