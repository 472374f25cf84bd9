//! Office document conversion through a headless LibreOffice.

use std::path::PathBuf;

use async_trait::async_trait;
use kernel::Category;

use super::{ensure_output, output_path, ConvertRequest, Strategy};
use crate::error::ConvertError;
use crate::formats;
use crate::process::Tool;

const PROFILE_DIR: &str = "profile";
const OUT_DIR: &str = "out";
const SOURCE_STEM: &str = "source";

/// File extension soffice expects for each source type.
const SOURCE_EXTENSIONS: &[(&str, &str)] = &[
    (formats::PDF, "pdf"),
    (formats::DOC, "doc"),
    (formats::DOCX, "docx"),
    (formats::ODT, "odt"),
    (formats::XLS, "xls"),
    (formats::XLSX, "xlsx"),
    (formats::PPT, "ppt"),
    (formats::PPTX, "pptx"),
];

/// A real (source → target) transform soffice can perform.
struct Route {
    target: &'static str,
    sources: &'static [&'static str],
    filter: &'static str,
    import_filter: Option<&'static str>,
}

const ROUTES: &[Route] = &[
    Route {
        target: "pdf",
        sources: &[
            formats::DOC,
            formats::DOCX,
            formats::ODT,
            formats::XLS,
            formats::XLSX,
            formats::PPT,
            formats::PPTX,
        ],
        filter: "pdf",
        import_filter: None,
    },
    Route {
        target: "docx",
        sources: &[formats::PDF],
        filter: "docx:MS Word 2007 XML",
        import_filter: Some("writer_pdf_import"),
    },
];

pub struct DocumentStrategy {
    soffice: Tool,
}

impl DocumentStrategy {
    #[must_use]
    pub fn new(soffice: Tool) -> Self {
        Self { soffice }
    }
}

#[async_trait]
impl Strategy for DocumentStrategy {
    fn name(&self) -> &'static str {
        "document"
    }

    fn category(&self) -> Category {
        Category::Document
    }

    fn targets(&self) -> Vec<&'static str> {
        ROUTES.iter().map(|r| r.target).collect()
    }

    async fn convert(&self, request: &ConvertRequest<'_>) -> Result<PathBuf, ConvertError> {
        let route = ROUTES
            .iter()
            .find(|r| {
                r.target == request.target && r.sources.iter().any(|s| *s == request.detected_type)
            })
            .ok_or_else(|| {
                ConvertError::unsupported(
                    Category::Document,
                    format!("{} to {}", request.detected_type, request.target),
                )
            })?;

        // soffice names its output after the input, so feed it a fixed name
        let scratch = tokio::fs::canonicalize(request.scratch.path()).await?;
        let source = scratch.join(format!(
            "{SOURCE_STEM}.{}",
            source_extension(request.detected_type)
        ));
        tokio::fs::copy(request.input, &source).await?;
        let out_dir = scratch.join(OUT_DIR);
        tokio::fs::create_dir(&out_dir).await?;
        let profile = format!(
            "-env:UserInstallation=file://{}",
            scratch.join(PROFILE_DIR).display()
        );

        let mut invocation = self
            .soffice
            .invoke()
            .args(["--headless", "--norestore", "--nolockcheck", "--nodefault"])
            .arg(profile);
        if let Some(import_filter) = route.import_filter {
            invocation = invocation.arg(format!("--infilter={import_filter}"));
        }
        invocation
            .args(["--convert-to", route.filter, "--outdir"])
            .path_arg(&out_dir)
            .path_arg(&source)
            .redact(&scratch)
            .redact(request.scratch.path())
            .current_dir(&scratch)
            .run()
            .await
            .map_err(|e| ConvertError::failed(Category::Document, e))?;

        let produced = out_dir.join(format!("{SOURCE_STEM}.{}", route.target));
        ensure_output(Category::Document, &produced).await?;
        let output = output_path(request.scratch.path(), route.target);
        tokio::fs::rename(&produced, &output).await?;
        Ok(output)
    }
}

fn source_extension(mime: &str) -> &'static str {
    SOURCE_EXTENSIONS
        .iter()
        .find(|(m, _)| *m == mime)
        .map_or("bin", |(_, ext)| *ext)
}
