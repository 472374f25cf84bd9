use std::path::PathBuf;

use client::{ClientError, ConvertParams};

pub async fn convert_file(params: ConvertParams) -> Result<PathBuf, ClientError> {
    let file = params.file.clone();
    let saved = client::convert(params).await?;
    println!("{} converted into {}", file.display(), saved.display());
    Ok(saved)
}

pub async fn list_formats(uri: &str) -> Result<(), ClientError> {
    client::list_capabilities(uri).await
}
