//! Archive repackaging with zip, tar and flate2.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kernel::Category;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use super::{canonical_target, ensure_output, output_path, ConvertRequest, Strategy};
use crate::error::ConvertError;
use crate::formats;
use crate::storage::Scratch;

const EXTRACT_DIR: &str = "extracted";
const TAR_MAGIC_OFFSET: usize = 257;
const FALLBACK_ENTRY: &str = "file";
const COPY_CHUNK: usize = 64 * 1024;

/// Output container an archive can be repacked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tgz",
        }
    }

    /// Parses a comma separated list, ignoring blanks and repeats.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, String> {
        let mut formats = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let format = item.parse::<ArchiveFormat>()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        if formats.is_empty() {
            return Err("at least one archive target is required".to_owned());
        }
        Ok(formats)
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical_target(s).as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "tgz" => Ok(ArchiveFormat::TarGz),
            _ => Err(format!("unsupported archive format: {s}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ArchiveError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("corrupt zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("entry '{0}' escapes the extraction directory")]
    UnsafeEntry(String),

    #[error("extracted content exceeds {0} bytes")]
    TooLarge(u64),

    #[error("cancelled")]
    Cancelled,
}

/// What the uploaded archive turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Zip,
    Tar,
    TarGz,
    /// A single gzip compressed file
    Gzip,
}

impl Source {
    fn format(self) -> Option<ArchiveFormat> {
        match self {
            Source::Zip => Some(ArchiveFormat::Zip),
            Source::Tar => Some(ArchiveFormat::Tar),
            Source::TarGz => Some(ArchiveFormat::TarGz),
            Source::Gzip => None,
        }
    }
}

pub struct ArchiveStrategy {
    targets: Vec<ArchiveFormat>,
    max_extracted_bytes: u64,
}

impl ArchiveStrategy {
    #[must_use]
    pub fn new(targets: Vec<ArchiveFormat>, max_extracted_bytes: u64) -> Self {
        Self {
            targets,
            max_extracted_bytes,
        }
    }
}

#[async_trait]
impl Strategy for ArchiveStrategy {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn category(&self) -> Category {
        Category::Archive
    }

    fn targets(&self) -> Vec<&'static str> {
        self.targets.iter().map(|f| f.as_str()).collect()
    }

    async fn convert(&self, request: &ConvertRequest<'_>) -> Result<PathBuf, ConvertError> {
        let target = request
            .target
            .parse::<ArchiveFormat>()
            .map_err(|e| ConvertError::unsupported(Category::Archive, e))?;
        let detected = request.detected_type;
        if ![formats::ZIP, formats::TAR, formats::GZIP].contains(&detected) {
            return Err(ConvertError::unsupported(
                Category::Archive,
                format!("cannot unpack {detected}"),
            ));
        }

        let detected = detected.to_owned();
        let input = request.input.to_path_buf();
        let scratch = request.scratch.clone();
        let entry_name = entry_name(request.original_name);
        let output = output_path(scratch.path(), target.as_str());
        let limit = self.max_extracted_bytes;

        let result = {
            let output = output.clone();
            tokio::task::spawn_blocking(move || {
                let source = match detected.as_str() {
                    formats::ZIP => Source::Zip,
                    formats::TAR => Source::Tar,
                    _ if gzip_holds_tar(&input)? => Source::TarGz,
                    _ => Source::Gzip,
                };
                tracing::debug!("archive source {source:?} target {target:?}");
                repack(&input, source, target, &scratch, &entry_name, &output, limit)
            })
            .await
            .map_err(|e| ConvertError::failed(Category::Archive, e))?
        };
        if matches!(result, Err(ArchiveError::Cancelled)) {
            tracing::debug!("archive repack stopped, request gone");
        }
        result.map_err(|e| ConvertError::failed(Category::Archive, e))?;

        ensure_output(Category::Archive, &output).await?;
        Ok(output)
    }
}

fn repack(
    input: &Path,
    source: Source,
    target: ArchiveFormat,
    scratch: &Scratch,
    entry_name: &str,
    output: &Path,
    limit: u64,
) -> Result<(), ArchiveError> {
    checkpoint(scratch)?;
    if source.format() == Some(target) {
        return pack_single(input, entry_name, target, output);
    }

    let root = scratch.path().join(EXTRACT_DIR);
    fs::create_dir(&root)?;
    let mut budget = Budget::new(limit, scratch);
    match source {
        Source::Zip => extract_zip(input, &root, &mut budget)?,
        Source::Tar => extract_tar(File::open(input)?, &root, &mut budget)?,
        Source::TarGz => extract_tar(GzDecoder::new(File::open(input)?), &root, &mut budget)?,
        Source::Gzip => {
            let name = gunzipped_name(entry_name);
            let mut reader = GzDecoder::new(BufReader::new(File::open(input)?));
            let mut file = File::create(root.join(name))?;
            budget.copy(&mut reader, &mut file)?;
        }
    }
    tracing::debug!("extracted {} bytes", budget.used);
    pack_tree(&root, target, output, scratch)
}

fn checkpoint(scratch: &Scratch) -> Result<(), ArchiveError> {
    if scratch.is_cancelled() {
        Err(ArchiveError::Cancelled)
    } else {
        Ok(())
    }
}

/// Running total of unpacked bytes for one archive.
struct Budget<'a> {
    limit: u64,
    used: u64,
    scratch: &'a Scratch,
}

impl<'a> Budget<'a> {
    fn new(limit: u64, scratch: &'a Scratch) -> Self {
        Self {
            limit,
            used: 0,
            scratch,
        }
    }

    fn check(&self) -> Result<(), ArchiveError> {
        checkpoint(self.scratch)
    }

    fn copy<R: Read, W: Write>(&mut self, reader: &mut R, writer: &mut W) -> Result<(), ArchiveError> {
        let mut chunk = vec![0u8; COPY_CHUNK];
        loop {
            self.check()?;
            let read = match reader.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.used += read as u64;
            if self.used > self.limit {
                return Err(ArchiveError::TooLarge(self.limit));
            }
            writer.write_all(&chunk[..read])?;
        }
    }
}

fn gzip_holds_tar(path: &Path) -> io::Result<bool> {
    let mut decoder = GzDecoder::new(File::open(path)?);
    let mut head = Vec::with_capacity(512);
    Read::by_ref(&mut decoder).take(512).read_to_end(&mut head)?;
    Ok(head.len() >= TAR_MAGIC_OFFSET + 5
        && &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar")
}

fn extract_zip(input: &Path, root: &Path, budget: &mut Budget) -> Result<(), ArchiveError> {
    let mut archive = zip::ZipArchive::new(BufReader::new(File::open(input)?))?;
    for i in 0..archive.len() {
        budget.check()?;
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().and_then(|p| safe_relative(&p)) else {
            return Err(ArchiveError::UnsafeEntry(entry.name().to_owned()));
        };
        let path = root.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        budget.copy(&mut entry, &mut file)?;
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, root: &Path, budget: &mut Budget) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        budget.check()?;
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        let Some(relative) = safe_relative(&raw) else {
            if raw.components().all(|c| c == Component::CurDir) {
                continue;
            }
            return Err(ArchiveError::UnsafeEntry(raw.to_string_lossy().into_owned()));
        };
        let path = root.join(relative);
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&path)?;
        } else if kind.is_file() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&path)?;
            budget.copy(&mut entry, &mut file)?;
        } else {
            tracing::warn!("skipped tar entry {} of type {kind:?}", raw.display());
        }
    }
    Ok(())
}

/// Relative path made only of normal components, or nothing.
fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Files and directories below `root`, parents before children.
fn visit_dirs(root: &Path, dir: &Path, entries: &mut Vec<(PathBuf, bool)>) -> io::Result<()> {
    let mut children: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    children.sort_by_key(fs::DirEntry::file_name);
    for child in children {
        let path = child.path();
        let relative = path.strip_prefix(root).map_err(io::Error::other)?.to_path_buf();
        if child.file_type()?.is_dir() {
            entries.push((relative, true));
            visit_dirs(root, &path, entries)?;
        } else {
            entries.push((relative, false));
        }
    }
    Ok(())
}

/// Archive member name with `/` separators.
fn member_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn pack_tree(
    root: &Path,
    target: ArchiveFormat,
    output: &Path,
    scratch: &Scratch,
) -> Result<(), ArchiveError> {
    let mut entries = Vec::new();
    visit_dirs(root, root, &mut entries)?;
    let out = BufWriter::new(File::create(output)?);
    match target {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipWriter::new(out);
            for (relative, is_dir) in entries {
                checkpoint(scratch)?;
                let name = member_name(&relative);
                if is_dir {
                    zip.add_directory(name, zip_options().unix_permissions(0o755))?;
                } else {
                    zip.start_file(name, zip_options())?;
                    io::copy(&mut File::open(root.join(&relative))?, &mut zip)?;
                }
            }
            zip.finish()?.flush()?;
        }
        ArchiveFormat::Tar => {
            let mut builder = tar::Builder::new(out);
            append_tree(&mut builder, root, &entries, scratch)?;
            builder.into_inner()?.flush()?;
        }
        ArchiveFormat::TarGz => {
            let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
            append_tree(&mut builder, root, &entries, scratch)?;
            builder.into_inner()?.finish()?.flush()?;
        }
    }
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    entries: &[(PathBuf, bool)],
    scratch: &Scratch,
) -> Result<(), ArchiveError> {
    for (relative, is_dir) in entries {
        checkpoint(scratch)?;
        let path = root.join(relative);
        if *is_dir {
            builder.append_dir(member_name(relative), &path)?;
        } else {
            builder.append_path_with_name(&path, member_name(relative))?;
        }
    }
    Ok(())
}

fn pack_single(
    input: &Path,
    entry_name: &str,
    target: ArchiveFormat,
    output: &Path,
) -> Result<(), ArchiveError> {
    let out = BufWriter::new(File::create(output)?);
    match target {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipWriter::new(out);
            zip.start_file(entry_name, zip_options())?;
            io::copy(&mut File::open(input)?, &mut zip)?;
            zip.finish()?.flush()?;
        }
        ArchiveFormat::Tar => {
            let mut builder = tar::Builder::new(out);
            builder.append_path_with_name(input, entry_name)?;
            builder.into_inner()?.flush()?;
        }
        ArchiveFormat::TarGz => {
            let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
            builder.append_path_with_name(input, entry_name)?;
            builder.into_inner()?.finish()?.flush()?;
        }
    }
    Ok(())
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn entry_name(original_name: &str) -> String {
    Path::new(original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(FALLBACK_ENTRY)
        .to_owned()
}

/// Name of the file inside a plain gzip stream.
fn gunzipped_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix(".gz").map(|s| &name[..s.len()]) {
        if !stem.is_empty() {
            return stem.to_owned();
        }
    }
    if lower.ends_with(".tgz") {
        return format!("{}.tar", &name[..name.len() - 4]);
    }
    FALLBACK_ENTRY.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::BTreeMap;

    const LIMIT: u64 = 1024 * 1024;

    fn scratch() -> Scratch {
        Scratch::new(tempfile::tempdir().unwrap())
    }

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn read_zip(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut files = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            if entry.is_dir() {
                continue;
            }
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            files.insert(entry.name().to_owned(), content);
        }
        files
    }

    fn read_tar<R: Read>(reader: R) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(reader);
        let mut files = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            files.insert(name, content);
        }
        files
    }

    async fn run(
        targets: Vec<ArchiveFormat>,
        limit: u64,
        input: &Path,
        detected: &str,
        original: &str,
        target: &str,
        scratch: &Scratch,
    ) -> Result<PathBuf, ConvertError> {
        let strategy = ArchiveStrategy::new(targets, limit);
        strategy
            .convert(&ConvertRequest {
                input,
                detected_type: detected,
                original_name: original,
                target,
                scratch,
            })
            .await
    }

    #[rstest]
    #[case("zip", Ok(ArchiveFormat::Zip))]
    #[case("TAR", Ok(ArchiveFormat::Tar))]
    #[case("tar.gz", Ok(ArchiveFormat::TarGz))]
    #[case("tgz", Ok(ArchiveFormat::TarGz))]
    #[case("rar", Err(()))]
    #[case("7z", Err(()))]
    #[trace]
    fn parse_format(#[case] raw: &str, #[case] expected: Result<ArchiveFormat, ()>) {
        // Act
        let actual = raw.parse::<ArchiveFormat>().map_err(|_| ());

        // Assert
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case("zip", Ok(vec![ArchiveFormat::Zip]))]
    #[case("zip, tgz,zip", Ok(vec![ArchiveFormat::Zip, ArchiveFormat::TarGz]))]
    #[case(" , ", Err(()))]
    #[case("zip,rar", Err(()))]
    #[trace]
    fn parse_format_list(#[case] raw: &str, #[case] expected: Result<Vec<ArchiveFormat>, ()>) {
        // Act
        let actual = ArchiveFormat::parse_list(raw).map_err(|_| ());

        // Assert
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case("a/b/c.txt", Some("a/b/c.txt"))]
    #[case("./a.txt", Some("a.txt"))]
    #[case("../a.txt", None)]
    #[case("a/../../b", None)]
    #[case("/etc/passwd", None)]
    #[case(".", None)]
    #[trace]
    fn safe_relative_cases(#[case] raw: &str, #[case] expected: Option<&str>) {
        // Act
        let actual = safe_relative(Path::new(raw));

        // Assert
        assert_eq!(actual, expected.map(PathBuf::from));
    }

    #[rstest]
    #[case("data.csv.gz", "data.csv")]
    #[case("DATA.GZ", "DATA")]
    #[case("bundle.tgz", "bundle.tar")]
    #[case(".gz", "file")]
    #[case("blob", "file")]
    #[trace]
    fn gunzipped_name_cases(#[case] raw: &str, #[case] expected: &str) {
        // Act
        let actual = gunzipped_name(raw);

        // Assert
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn zip_of_zip_holds_single_entry() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        write_zip(&input, &[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let original = fs::read(&input).unwrap();

        // Act
        let output = run(
            vec![ArchiveFormat::Zip],
            LIMIT,
            &input,
            formats::ZIP,
            "bundle.zip",
            "zip",
            &scratch,
        )
        .await
        .unwrap();

        // Assert
        let files = read_zip(&output);
        assert_eq!(files.len(), 1);
        assert_eq!(files["bundle.zip"], original);
    }

    #[tokio::test]
    async fn tar_gz_to_zip_preserves_content() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        let files: &[(&str, &[u8])] = &[("top.txt", b"top"), ("nested/deep/leaf.bin", b"\x00\x01\x02")];
        write_tar_gz(&input, files);

        // Act
        let output = run(
            vec![ArchiveFormat::Zip],
            LIMIT,
            &input,
            formats::GZIP,
            "bundle.tar.gz",
            "zip",
            &scratch,
        )
        .await
        .unwrap();

        // Assert
        let expected: BTreeMap<String, Vec<u8>> = files
            .iter()
            .map(|(n, c)| ((*n).to_owned(), c.to_vec()))
            .collect();
        assert_eq!(read_zip(&output), expected);
    }

    #[tokio::test]
    async fn zip_to_tgz_preserves_content() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        write_zip(&input, &[("docs/readme.md", b"# hi"), ("run.sh", b"echo")]);

        // Act
        let output = run(
            vec![ArchiveFormat::Zip, ArchiveFormat::TarGz],
            LIMIT,
            &input,
            formats::ZIP,
            "bundle.zip",
            "tgz",
            &scratch,
        )
        .await
        .unwrap();

        // Assert
        let files = read_tar(GzDecoder::new(File::open(output).unwrap()));
        assert_eq!(files.len(), 2);
        assert_eq!(files["docs/readme.md"], b"# hi");
        assert_eq!(files["run.sh"], b"echo");
    }

    #[tokio::test]
    async fn plain_gzip_becomes_single_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        let mut encoder = GzEncoder::new(File::create(&input).unwrap(), Compression::default());
        encoder.write_all(b"a,b\n1,2\n").unwrap();
        encoder.finish().unwrap();

        // Act
        let output = run(
            vec![ArchiveFormat::Zip],
            LIMIT,
            &input,
            formats::GZIP,
            "table.csv.gz",
            "zip",
            &scratch,
        )
        .await
        .unwrap();

        // Assert
        let files = read_zip(&output);
        assert_eq!(files["table.csv"], b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn extraction_ceiling_enforced() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        let big = vec![0u8; 4096];
        write_zip(&input, &[("zeros.bin", &big)]);

        // Act
        let result = run(
            vec![ArchiveFormat::Tar],
            1024,
            &input,
            formats::ZIP,
            "bomb.zip",
            "tar",
            &scratch,
        )
        .await;

        // Assert
        assert!(matches!(result, Err(ConvertError::ConversionFailed { .. })));
    }

    #[tokio::test]
    async fn traversal_entry_rejected() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        // a raw header lets the name bypass the builder's own checks
        let evil = dir.path().join("evil.tar");
        {
            let mut builder = tar::Builder::new(File::create(&evil).unwrap());
            let mut header = tar::Header::new_old();
            header.as_old_mut().name[..9].copy_from_slice(b"../x.txt\0");
            header.set_size(1);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, &b"x"[..]).unwrap();
            builder.finish().unwrap();
        }

        // Act
        let result = run(
            vec![ArchiveFormat::Zip],
            LIMIT,
            &evil,
            formats::TAR,
            "evil.tar",
            "zip",
            &scratch,
        )
        .await;

        // Assert
        assert!(matches!(result, Err(ConvertError::ConversionFailed { .. })));
        assert!(!scratch.path().join("x.txt").exists());
        assert!(!dir.path().join("x.txt").exists());
    }

    #[rstest]
    #[case(formats::RAR)]
    #[case(formats::SEVEN_Z)]
    #[trace]
    #[tokio::test]
    async fn unpackable_sources_unsupported(#[case] detected: &str) {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        fs::write(&input, b"Rar!\x1a\x07\x00").unwrap();

        // Act
        let result = run(
            vec![ArchiveFormat::Zip],
            LIMIT,
            &input,
            detected,
            "a.rar",
            "zip",
            &scratch,
        )
        .await;

        // Assert
        assert!(matches!(
            result,
            Err(ConvertError::UnsupportedConversion { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_job_stops_before_extracting() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch();
        let input = dir.path().join("upload");
        write_zip(&input, &[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        scratch.cancel();

        // Act
        let result = run(
            vec![ArchiveFormat::Tar],
            LIMIT,
            &input,
            formats::ZIP,
            "bundle.zip",
            "tar",
            &scratch,
        )
        .await;

        // Assert
        assert!(matches!(result, Err(ConvertError::ConversionFailed { .. })));
        assert!(!scratch.path().join(EXTRACT_DIR).exists());
        assert!(!output_path(scratch.path(), "tar").exists());
    }

    #[test]
    fn budget_copy_stops_when_cancelled() {
        // Arrange
        let scratch = scratch();
        let mut budget = Budget::new(LIMIT, &scratch);
        let mut written = Vec::new();
        scratch.cancel();

        // Act
        let result = budget.copy(&mut &[1u8; 16][..], &mut written);

        // Assert
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(written.is_empty());
    }
}
