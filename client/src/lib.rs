use std::path::{Path, PathBuf};

use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use futures::StreamExt;
use kernel::{Capability, Category, ConvertReply, ErrorKind, ErrorReply};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use resource::Resource;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub mod resource;

const FALLBACK_NAME: &str = "converted";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid gateway address: {0}")]
    Address(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway refused ({status}, {kind:?}): {error}")]
    Rejected {
        status: u16,
        kind: ErrorKind,
        error: String,
    },
}

pub struct ConvertParams {
    pub uri: String,
    pub file: PathBuf,
    pub category: Category,
    pub target: String,
    /// Where the converted file is saved
    pub output_dir: PathBuf,
}

/// Uploads a file for conversion and saves the result once ready.
///
/// Returns the path of the saved file.
pub async fn convert(params: ConvertParams) -> Result<PathBuf, ClientError> {
    let base = Resource::new(&params.uri).ok_or_else(|| ClientError::Address(params.uri.clone()))?;
    let mut endpoint = base.clone();
    endpoint.append_path("convert");

    let form = upload_form(&params.file, params.category, &params.target).await?;
    let client = Client::new();
    let response = client.post(endpoint.to_string()).multipart(form).send().await?;
    let reply: ConvertReply = accepted(response).await?.json().await?;

    let download = base
        .follow(&reply.download_url)
        .ok_or_else(|| ClientError::Address(reply.download_url.clone()))?;
    let name = download
        .query_param("name")
        .map(|n| last_component(&n).to_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_owned());
    let response = accepted(client.get(download.to_string()).send().await?).await?;

    let target = params.output_dir.join(name);
    save(response, &target).await?;
    Ok(target)
}

/// Prints the gateway's conversion table.
pub async fn list_capabilities(uri: &str) -> Result<(), ClientError> {
    let mut resource = Resource::new(uri).ok_or_else(|| ClientError::Address(uri.to_owned()))?;
    resource.append_path("capabilities");

    let response = Client::new().get(resource.to_string()).send().await?;
    let capabilities: Vec<Capability> = accepted(response).await?.json().await?;
    println!("{}", capabilities_table(&capabilities));
    Ok(())
}

#[must_use]
pub fn capabilities_table(capabilities: &[Capability]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(vec![
            Cell::new("Category").add_attribute(Attribute::Bold),
            Cell::new("Target formats").add_attribute(Attribute::Bold),
        ]);
    for c in capabilities {
        table.add_row(vec![Cell::new(c.category), Cell::new(c.targets.join(", "))]);
    }
    table
}

async fn upload_form(file: &Path, category: Category, target: &str) -> Result<Form, ClientError> {
    let f = File::open(file).await?;
    let length = f.metadata().await?.len();
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_NAME.to_owned());
    let stream = reqwest::Body::wrap_stream(ReaderStream::new(f));
    let part = Part::stream_with_length(stream, length)
        .file_name(name)
        .mime_str(&mime_for_path(file))?;

    Ok(Form::new()
        .text("conversionType", category.as_str())
        .text("targetFormat", target.to_owned())
        .part("file", part))
}

fn mime_for_path(file: &Path) -> String {
    mime_guess::from_path(file)
        .first_or_octet_stream()
        .to_string()
}

fn last_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or_default()
}

/// Passes successful responses through, turns the rest into `Rejected`.
async fn accepted(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let (kind, error) = match response.json::<ErrorReply>().await {
        Ok(reply) => (reply.kind, reply.error),
        Err(_) => (ErrorKind::InternalIOError, status.to_string()),
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        kind,
        error,
    })
}

async fn save(response: Response, target: &Path) -> Result<(), ClientError> {
    let mut file = File::create(target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("report.PDF", "application/pdf")]
    #[case("photo.jpg", "image/jpeg")]
    #[case("bundle.zip", "application/zip")]
    #[case("noext", "application/octet-stream")]
    #[trace]
    fn mime_from_extension(#[case] file: &str, #[case] expected: &str) {
        // Act
        let mime = mime_for_path(Path::new(file));

        // Assert
        assert_eq!(mime, expected);
    }

    #[rstest]
    #[case("a.pdf", "a.pdf")]
    #[case("../../etc/passwd", "passwd")]
    #[case("dir\\evil.exe", "evil.exe")]
    #[case("trailing/", "")]
    #[trace]
    fn last_component_cases(#[case] name: &str, #[case] expected: &str) {
        // Act
        let actual = last_component(name);

        // Assert
        assert_eq!(actual, expected);
    }

    #[test]
    fn table_has_row_per_category() {
        // Arrange
        let capabilities = vec![
            Capability {
                category: Category::Image,
                targets: vec!["jpeg".into(), "png".into()],
            },
            Capability {
                category: Category::Archive,
                targets: vec!["zip".into()],
            },
        ];

        // Act
        let table = capabilities_table(&capabilities);

        // Assert
        assert_eq!(table.row_iter().count(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("jpeg, png"));
        assert!(rendered.contains("archive"));
    }

    #[tokio::test]
    async fn form_rejects_missing_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();

        // Act
        let result = upload_form(&dir.path().join("absent.png"), Category::Image, "jpeg").await;

        // Assert
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
