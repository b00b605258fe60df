// src/ocr.rs

use crate::error::OcrError;
use lopdf::Document;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Anything that can turn a document file into text.
pub trait OcrEngine {
    fn name(&self) -> &str;
    fn extract_text(&self, path: &Path) -> Result<String, OcrError>;
}

/// Number of non-whitespace characters in `text`.
pub fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Reads the embedded text layer of a PDF. Scanned PDFs and images are
/// rejected so the fallback engine gets them.
pub struct PdfTextLayer;

impl OcrEngine for PdfTextLayer {
    fn name(&self) -> &str {
        "pdf-text"
    }

    fn extract_text(&self, path: &Path) -> Result<String, OcrError> {
        if !is_pdf(path) {
            return Err(OcrError::Unsupported {
                engine: self.name().to_string(),
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| OcrError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        extract_text_from_pdf(&bytes)
    }
}

/// Text layer of an in-memory PDF.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> Result<String, OcrError> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| OcrError::Pdf(e.to_string()))?;

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return Err(OcrError::ScannedImage);
    }

    pdf_extract::extract_text_from_mem(pdf_bytes).map_err(|e| OcrError::Pdf(e.to_string()))
}

/// Heuristic: a page whose resources carry images but no fonts is a scan.
/// The document counts as scanned when at least 80% of its pages are.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let image_only_pages = pages
        .values()
        .filter_map(|id| doc.get_object(*id).ok())
        .filter_map(|obj| obj.as_dict().ok())
        .filter(|page| has_resource(doc, page, b"XObject") && !has_resource(doc, page, b"Font"))
        .count();

    let ratio = image_only_pages as f64 / pages.len() as f64;
    info!(
        total_pages = pages.len(),
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );
    ratio >= 0.8
}

fn has_resource(doc: &Document, page: &lopdf::Dictionary, key: &[u8]) -> bool {
    page.get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(key).ok())
        .and_then(|x| doc.dereference(x).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|d| !d.is_empty())
}

fn substitute(args: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|a| {
            vars.iter()
                .fold(a.clone(), |acc, &(key, value)| acc.replace(key, value))
        })
        .collect()
}

fn run_command(program: &str, args: &[String]) -> Result<Vec<u8>, OcrError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| OcrError::Command {
            program: program.to_string(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(OcrError::Command {
            program: program.to_string(),
            detail: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output.stdout)
}

/// Turns each page of a PDF into an image file inside `out_dir`.
pub trait PageRasterizer {
    /// Page images in page order.
    fn render(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrError>;
}

/// Rasterizes with an external program such as `pdftoppm`. `{path}` is the
/// PDF, `{out}` the output prefix inside the scratch directory. Every file
/// the program leaves there counts as a page, in file-name order.
pub struct CommandRasterizer {
    program: String,
    args: Vec<String>,
}

impl CommandRasterizer {
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl PageRasterizer for CommandRasterizer {
    fn render(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
        let pdf = pdf.to_string_lossy();
        let prefix = out_dir.join("page");
        let prefix = prefix.to_string_lossy();
        let args = substitute(&self.args, &[("{path}", pdf.as_ref()), ("{out}", prefix.as_ref())]);
        run_command(&self.program, &args)?;

        let io_err = |source| OcrError::Io {
            path: out_dir.to_path_buf(),
            source,
        };
        let mut pages = std::fs::read_dir(out_dir)
            .map_err(io_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        pages.retain(|p| p.is_file());
        pages.sort();
        Ok(pages)
    }
}

/// Runs an external OCR program and reads its stdout. `{path}` in the
/// argument list is replaced with the image path.
///
/// OCR programs read images, not PDFs: with a rasterizer attached, a PDF is
/// rendered to one image per page, each page is OCR'd and the texts are
/// joined in page order.
pub struct CommandOcr {
    program: String,
    args: Vec<String>,
    rasterizer: Option<Box<dyn PageRasterizer>>,
}

impl CommandOcr {
    /// `command[0]` is the program, the rest its arguments.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            rasterizer: None,
        })
    }

    pub fn with_rasterizer(mut self, rasterizer: Box<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    fn ocr_image(&self, image: &Path) -> Result<String, OcrError> {
        let image = image.to_string_lossy();
        let args = substitute(&self.args, &[("{path}", image.as_ref())]);
        let stdout = run_command(&self.program, &args)?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn ocr_pdf(&self, pdf: &Path, rasterizer: &dyn PageRasterizer) -> Result<String, OcrError> {
        let scratch = tempfile::tempdir().map_err(|source| OcrError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let pages = rasterizer.render(pdf, scratch.path())?;
        if pages.is_empty() {
            return Err(OcrError::Pdf("rasterizer produced no pages".to_string()));
        }
        debug!(pages = pages.len(), "Rendered PDF pages for OCR");

        let texts = pages
            .iter()
            .map(|page| self.ocr_image(page))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(texts.join("\n"))
    }
}

impl OcrEngine for CommandOcr {
    fn name(&self) -> &str {
        &self.program
    }

    fn extract_text(&self, path: &Path) -> Result<String, OcrError> {
        if !is_pdf(path) {
            return self.ocr_image(path);
        }
        match &self.rasterizer {
            Some(rasterizer) => self.ocr_pdf(path, rasterizer.as_ref()),
            None => Err(OcrError::Unsupported {
                engine: self.program.clone(),
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Primary engine with a fallback for low-yield results.
///
/// Never fails: engine errors are logged and the best text seen so far
/// (possibly empty) is returned.
pub struct FallbackOcr {
    primary: Box<dyn OcrEngine>,
    fallback: Option<Box<dyn OcrEngine>>,
    min_text_chars: usize,
}

impl FallbackOcr {
    pub fn new(
        primary: Box<dyn OcrEngine>,
        fallback: Option<Box<dyn OcrEngine>>,
        min_text_chars: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            min_text_chars,
        }
    }

    pub fn run(&self, path: &Path) -> String {
        let primary = match self.primary.extract_text(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(engine = self.primary.name(), error = %e, "Primary text extraction failed");
                String::new()
            }
        };

        let chars = meaningful_chars(&primary);
        if chars >= self.min_text_chars {
            info!(engine = self.primary.name(), chars, "Text extracted successfully");
            return primary;
        }

        let Some(fallback) = &self.fallback else {
            return primary;
        };
        info!(chars, engine = fallback.name(), "Extracted text too short, trying fallback OCR");

        match fallback.extract_text(path) {
            Ok(text) if meaningful_chars(&text) > chars => {
                info!(engine = fallback.name(), chars = meaningful_chars(&text), "Fallback OCR succeeded");
                text
            }
            Ok(_) => primary,
            Err(e) => {
                warn!(engine = fallback.name(), error = %e, "Fallback OCR failed");
                primary
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Fixed(&'static str);

    impl OcrEngine for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn extract_text(&self, _path: &Path) -> Result<String, OcrError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl OcrEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn extract_text(&self, _path: &Path) -> Result<String, OcrError> {
            Err(OcrError::ScannedImage)
        }
    }

    fn doc() -> PathBuf {
        PathBuf::from("scan.pdf")
    }

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, Err(OcrError::Pdf(_))));
    }

    #[test]
    fn test_text_layer_rejects_images() {
        let err = PdfTextLayer.extract_text(Path::new("photo.png")).unwrap_err();
        assert!(matches!(err, OcrError::Unsupported { .. }));
    }

    #[test]
    fn test_primary_enough_text() {
        let ocr = FallbackOcr::new(
            Box::new(Fixed("Invoice 123 total 45.00")),
            Some(Box::new(Fixed("fallback text that is much longer than primary"))),
            10,
        );
        assert_eq!(ocr.run(&doc()), "Invoice 123 total 45.00");
    }

    #[test]
    fn test_fallback_on_low_yield_or_error() {
        let ocr = FallbackOcr::new(Box::new(Fixed("ab")), Some(Box::new(Fixed("much better text"))), 10);
        assert_eq!(ocr.run(&doc()), "much better text");

        let ocr = FallbackOcr::new(Box::new(Broken), Some(Box::new(Fixed("rescued"))), 10);
        assert_eq!(ocr.run(&doc()), "rescued");
    }

    #[test]
    fn test_everything_fails_gives_empty() {
        let ocr = FallbackOcr::new(Box::new(Broken), Some(Box::new(Broken)), 10);
        assert_eq!(ocr.run(&doc()), "");

        let ocr = FallbackOcr::new(Box::new(Broken), None, 10);
        assert_eq!(ocr.run(&doc()), "");
    }

    /// Writes one text file per page; `cat` then plays the OCR program.
    struct FakePages(&'static [&'static str]);

    impl PageRasterizer for FakePages {
        fn render(&self, _pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
            let mut pages = Vec::new();
            for (i, text) in self.0.iter().enumerate() {
                let page = out_dir.join(format!("page-{}.png", i + 1));
                std::fs::write(&page, text).unwrap();
                pages.push(page);
            }
            Ok(pages)
        }
    }

    fn cat_ocr() -> CommandOcr {
        CommandOcr::from_command(&["cat".to_string(), "{path}".to_string()]).unwrap()
    }

    #[test]
    fn test_scanned_pdf_is_ocrd_page_by_page() {
        let fallback = cat_ocr().with_rasterizer(Box::new(FakePages(&["Invoice #77", "Total: $12.50"])));
        let ocr = FallbackOcr::new(Box::new(Broken), Some(Box::new(fallback)), 10);
        assert_eq!(ocr.run(&doc()), "Invoice #77\nTotal: $12.50");
    }

    #[test]
    fn test_pdf_without_rasterizer_is_unsupported() {
        let err = cat_ocr().extract_text(&doc()).unwrap_err();
        assert!(matches!(err, OcrError::Unsupported { .. }));
    }

    #[test]
    fn test_command_rasterizer_collects_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cmd: Vec<String> = ["sh", "-c", "printf a > \"$1-2.png\"; printf b > \"$1-1.png\"", "sh", "{out}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rasterizer = CommandRasterizer::from_command(&cmd).unwrap();

        let pages = rasterizer.render(&doc(), dir.path()).unwrap();
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["page-1.png", "page-2.png"]);
    }

    #[test]
    fn test_missing_ocr_program() {
        let cmd = ["definitely-not-an-ocr-binary".to_string(), "{path}".to_string()];
        let ocr = CommandOcr::from_command(&cmd).unwrap();
        let err = ocr.extract_text(Path::new("scan.png")).unwrap_err();
        assert!(matches!(err, OcrError::Command { .. }));
        assert!(CommandOcr::from_command(&[]).is_none());
    }
}
