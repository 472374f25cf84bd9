//! Capability table from (category, target format) to conversion strategy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kernel::{Capability, Category};

use crate::config::Config;
use crate::error::ConvertError;
use crate::process::Tool;
use crate::storage::Scratch;

pub mod archive;
pub mod document;
pub mod image;
pub mod media;

/// Inputs of one strategy invocation.
#[derive(Debug)]
pub struct ConvertRequest<'a> {
    pub input: &'a Path,
    /// Trusted content type of `input`
    pub detected_type: &'a str,
    /// Sanitised client file name, for naming entries inside outputs
    pub original_name: &'a str,
    /// Canonical target format
    pub target: &'a str,
    /// Job scoped directory; strategies write nothing outside it. Blocking
    /// work holds a clone and stops once it is cancelled.
    pub scratch: &'a Scratch,
}

/// One family of (source → target) transforms backed by an external
/// capability.
///
/// A strategy either produces a real output file inside the scratch
/// directory or fails. It never reports success for a copy of its input.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> Category;

    /// Canonical target formats this strategy produces.
    fn targets(&self) -> Vec<&'static str>;

    /// Returns the path of the produced file inside `request.scratch`.
    async fn convert(&self, request: &ConvertRequest<'_>) -> Result<PathBuf, ConvertError>;
}

pub struct Dispatcher {
    table: BTreeMap<(Category, &'static str), Arc<dyn Strategy>>,
}

impl Dispatcher {
    /// Builds the table from configuration and validates it.
    pub fn new(config: &Config) -> Result<Self, String> {
        let ffmpeg = Tool::new(config.ffmpeg.clone(), config.tool_timeout);
        let soffice = Tool::new(config.soffice.clone(), config.tool_timeout);

        let strategies: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(image::ImageStrategy),
            Arc::new(media::MediaStrategy::video(ffmpeg.clone())),
            Arc::new(media::MediaStrategy::audio(ffmpeg)),
            Arc::new(document::DocumentStrategy::new(soffice)),
            Arc::new(archive::ArchiveStrategy::new(
                config.archive_targets.clone(),
                config.max_extracted_bytes,
            )),
        ];
        Self::from_strategies(strategies)
    }

    pub fn from_strategies(strategies: Vec<Arc<dyn Strategy>>) -> Result<Self, String> {
        let mut table = BTreeMap::new();
        for strategy in strategies {
            for target in strategy.targets() {
                let key = (strategy.category(), target);
                if let Some(previous) = table.insert(key, Arc::clone(&strategy)) {
                    return Err(format!(
                        "{} {target} claimed by both {} and {}",
                        key.0,
                        previous.name(),
                        strategy.name()
                    ));
                }
            }
        }
        let dispatcher = Self { table };
        dispatcher.validate()?;
        Ok(dispatcher)
    }

    /// Every category must be reachable and every entry must point at a
    /// strategy of its own category that claims the target.
    fn validate(&self) -> Result<(), String> {
        for category in Category::ALL {
            if !self.table.keys().any(|(c, _)| *c == category) {
                return Err(format!("no conversion registered for {category}"));
            }
        }
        for ((category, target), strategy) in &self.table {
            if strategy.category() != *category || !strategy.targets().contains(target) {
                return Err(format!(
                    "{} registered for {category} {target} but does not serve it",
                    strategy.name()
                ));
            }
        }
        Ok(())
    }

    /// Picks the strategy for a request. A miss is a lookup failure, never a
    /// fallthrough.
    pub fn select(
        &self,
        category: Category,
        target: &str,
    ) -> Result<(&'static str, &Arc<dyn Strategy>), ConvertError> {
        let target = canonical_target(target);
        self.table
            .iter()
            .find(|((c, t), _)| *c == category && *t == target)
            .map(|((_, t), strategy)| (*t, strategy))
            .ok_or_else(|| miss(category, &target))
    }

    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        Category::ALL
            .into_iter()
            .map(|category| Capability {
                category,
                targets: self
                    .table
                    .keys()
                    .filter(|(c, _)| *c == category)
                    .map(|(_, t)| (*t).to_owned())
                    .collect(),
            })
            .collect()
    }
}

/// Lowercased target with aliases folded.
#[must_use]
pub fn canonical_target(raw: &str) -> String {
    let target = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    match target.as_str() {
        "jpg" => "jpeg".to_owned(),
        "tar.gz" | "tar-gz" => "tgz".to_owned(),
        "matroska" => "mkv".to_owned(),
        "quicktime" => "mov".to_owned(),
        _ => target,
    }
}

/// Codec families treat an unknown target as an output format they lack;
/// document and archive targets name whole conversions.
fn miss(category: Category, target: &str) -> ConvertError {
    match category {
        Category::Image | Category::Video | Category::Audio => ConvertError::UnsupportedFormat {
            category,
            target: target.to_owned(),
        },
        Category::Document | Category::Archive => {
            ConvertError::unsupported(category, format!("no conversion to '{target}'"))
        }
    }
}

/// Output file name a strategy writes inside its scratch directory.
#[must_use]
pub fn output_path(scratch: &Path, target: &str) -> PathBuf {
    scratch.join(format!("output.{target}"))
}

/// Rejects a strategy result that is missing or empty.
pub async fn ensure_output(category: Category, output: &Path) -> Result<(), ConvertError> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(ConvertError::failed(category, "converter produced no output")),
    }
}
