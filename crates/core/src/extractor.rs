use crate::error::IngestError;
use crate::models::DocumentKind;
use lopdf::Document;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// Maps a file name to a supported kind through its guessed MIME type.
pub fn detect_kind(file_name: &str) -> Result<DocumentKind, IngestError> {
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();

    match mime.essence_str() {
        "text/plain" => Ok(DocumentKind::PlainText),
        "application/pdf" => Ok(DocumentKind::Pdf),
        other => Err(IngestError::UnsupportedType {
            name: file_name.to_string(),
            mime: other.to_string(),
        }),
    }
}

pub fn extract_document_text(kind: DocumentKind, bytes: &[u8]) -> Result<String, IngestError> {
    match kind {
        DocumentKind::PlainText => Ok(String::from_utf8(bytes.to_vec())?),
        DocumentKind::Pdf => {
            let pages = LopdfExtractor.extract_pages(bytes)?;
            Ok(pages
                .into_iter()
                .map(|page| page.text)
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = document.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content encodes"),
            ));
            let page_id = document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).expect("pdf saves");
        bytes
    }

    #[test]
    fn pdf_pages_are_extracted_in_order() {
        let bytes = pdf_with_pages(&["Hydraulic pump manual", "Valve maintenance schedule"]);

        let pages = LopdfExtractor
            .extract_pages(&bytes)
            .expect("generated pdf should parse");
        assert_eq!(pages.iter().map(|page| page.number).collect::<Vec<_>>(), vec![1, 2]);
        assert!(pages[0].text.contains("Hydraulic pump manual"));
        assert!(pages[1].text.contains("Valve maintenance schedule"));

        let text = extract_document_text(DocumentKind::Pdf, &bytes).expect("pdf text");
        assert_eq!(
            text,
            pages
                .iter()
                .map(|page| page.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        );
        let first = text.find("Hydraulic").expect("first page text");
        let second = text.find("Valve").expect("second page text");
        assert!(first < second);
    }

    #[test]
    fn kinds_follow_guessed_mime_type() {
        assert_eq!(detect_kind("notes.txt").ok(), Some(DocumentKind::PlainText));
        assert_eq!(detect_kind("REPORT.PDF").ok(), Some(DocumentKind::Pdf));

        match detect_kind("slides.pptx") {
            Err(IngestError::UnsupportedType { name, .. }) => assert_eq!(name, "slides.pptx"),
            other => panic!("expected unsupported type, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_decoded_as_utf8() {
        let text = extract_document_text(DocumentKind::PlainText, "héllo".as_bytes())
            .expect("valid utf-8 should decode");
        assert_eq!(text, "héllo");

        let invalid = extract_document_text(DocumentKind::PlainText, &[0xff, 0xfe, 0x00]);
        assert!(matches!(invalid, Err(IngestError::Utf8(_))));
    }

    #[test]
    fn broken_pdf_is_a_parse_error() {
        let result = extract_document_text(DocumentKind::Pdf, b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }
}
